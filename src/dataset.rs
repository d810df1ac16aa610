//! Review data acquisition and conversion.
//!
//! Acquisition prefers the remote review dataset and silently degrades to
//! synthetic reviews: remote failures are logged as notices, never returned.
//! Every record remembers where it came from so callers can still tell the
//! two paths apart.

use crate::config::TrainingConfig;
use crate::error::PipelineError;
use crate::responder::{canonical_reply, PROMPT_PREFIX};
use crate::sentiment::{self, Sentiment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Record count used when the caller passes no limit.
pub const DEFAULT_LIMIT: usize = 100;
/// Largest page the rows API serves.
const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Remote,
    Synthetic,
}

impl DataSource {
    /// "remote", "synthetic", or "mixed" when a remote fetch was topped up.
    pub fn summarize(records: &[RawReviewRecord]) -> &'static str {
        let remote = records.iter().any(|r| r.source == DataSource::Remote);
        let synthetic = records.iter().any(|r| r.source == DataSource::Synthetic);
        match (remote, synthetic) {
            (true, true) => "mixed",
            (true, false) => "remote",
            (false, true) => "synthetic",
            (false, false) => "none",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => f.write_str("remote"),
            Self::Synthetic => f.write_str("synthetic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReviewRecord {
    pub text: String,
    /// Star rating, 1 to 5.
    pub rating: Option<u8>,
    pub source: DataSource,
    /// Pre-assigned label (synthetic records only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Sentiment>,
}

impl RawReviewRecord {
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Whether [`convert`] will keep this record.
    pub fn is_usable(&self) -> bool {
        self.has_text() && (self.label.is_some() || self.rating.map_or(true, |r| Sentiment::from_rating(r).is_some()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub text: String,
    pub label: Sentiment,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingDataset {
    examples: Vec<TrainingExample>,
}

impl TrainingDataset {
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn examples(&self) -> &[TrainingExample] {
        &self.examples
    }

    pub fn label_counts(&self) -> BTreeMap<Sentiment, usize> {
        let mut counts = BTreeMap::new();
        for example in &self.examples {
            *counts.entry(example.label).or_insert(0) += 1;
        }
        counts
    }

    /// Writes the examples as pretty JSON.
    pub fn write_snapshot(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.examples)?)?;
        Ok(())
    }

    /// Language-model corpus: one `prompt <|endoftext|> reply <|endoftext|>` line per example.
    pub fn to_corpus(&self) -> String {
        self.examples
            .iter()
            .map(|e| {
                format!(
                    "{} {} <|endoftext|> {} <|endoftext|>",
                    PROMPT_PREFIX,
                    e.text.trim(),
                    canonical_reply(e.label)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Summary statistics over acquired records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetStats {
    pub total_reviews: usize,
    pub by_rating: BTreeMap<u8, usize>,
    pub by_source: BTreeMap<DataSource, usize>,
    pub avg_text_length: f64,
}

impl DatasetStats {
    pub fn of(records: &[RawReviewRecord]) -> Self {
        let mut stats = Self {
            total_reviews: records.len(),
            ..Default::default()
        };
        for record in records {
            if let Some(rating) = record.rating {
                *stats.by_rating.entry(rating).or_insert(0) += 1;
            }
            *stats.by_source.entry(record.source).or_insert(0) += 1;
        }
        if !records.is_empty() {
            let chars: usize = records.iter().map(|r| r.text.chars().count()).sum();
            stats.avg_text_length = (chars as f64 / records.len() as f64 * 10.0).round() / 10.0;
        }
        stats
    }
}

// ============================================================================
// Remote source
// ============================================================================

/// Somewhere labeled reviews can be fetched from.
#[async_trait::async_trait]
pub trait ReviewSource: Send + Sync {
    async fn fetch(&self, limit: usize) -> anyhow::Result<Vec<RawReviewRecord>>;
}

/// Reads reviews from a datasets-server `rows` endpoint.
pub struct HubSource {
    client: reqwest::Client,
    base_url: String,
    dataset: String,
}

#[derive(Debug, Deserialize)]
struct RowsPage {
    rows: Vec<RowEntry>,
}

#[derive(Debug, Deserialize)]
struct RowEntry {
    row: HubRow,
}

#[derive(Debug, Deserialize)]
struct HubRow {
    text: String,
    /// Zero-based star index: 0 is one star.
    label: i64,
}

impl HubSource {
    pub fn new(base_url: &str, dataset: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            dataset: dataset.to_string(),
        })
    }

    pub fn from_config(config: &TrainingConfig) -> anyhow::Result<Self> {
        Self::new(&config.dataset_api_url, &config.dataset_name, config.fetch_timeout)
    }

    async fn page(&self, offset: usize, length: usize) -> anyhow::Result<Vec<RawReviewRecord>> {
        let (offset, length) = (offset.to_string(), length.to_string());
        let response = self
            .client
            .get(format!("{}/rows", self.base_url))
            .query(&[
                ("dataset", self.dataset.as_str()),
                ("config", "default"),
                ("split", "train"),
                ("offset", offset.as_str()),
                ("length", length.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("rows request failed: {}", response.status());
        }
        parse_rows(&response.text().await?)
    }
}

#[async_trait::async_trait]
impl ReviewSource for HubSource {
    async fn fetch(&self, limit: usize) -> anyhow::Result<Vec<RawReviewRecord>> {
        let mut records = Vec::with_capacity(limit);
        while records.len() < limit {
            let length = PAGE_SIZE.min(limit - records.len());
            let page = self.page(records.len(), length).await?;
            if page.is_empty() {
                break;
            }
            records.extend(page);
        }
        records.truncate(limit);
        Ok(records)
    }
}

/// Parses one `rows` response body. Star index `n` (0..=4) becomes rating
/// `n + 1`; any other index rejects the whole page.
pub fn parse_rows(body: &str) -> anyhow::Result<Vec<RawReviewRecord>> {
    let page: RowsPage = serde_json::from_str(body)?;
    page.rows
        .into_iter()
        .map(|entry| {
            let rating = u8::try_from(entry.row.label + 1)
                .ok()
                .filter(|r| Sentiment::from_rating(*r).is_some())
                .ok_or_else(|| anyhow::anyhow!("label {} out of range", entry.row.label))?;
            Ok(RawReviewRecord {
                text: entry.row.text,
                rating: Some(rating),
                source: DataSource::Remote,
                label: None,
            })
        })
        .collect()
}

// ============================================================================
// Synthetic reviews
// ============================================================================

const SYNTHETIC_POSITIVE: &[(&str, u8)] = &[
    ("Absolutely fantastic product! Very happy with my purchase, I recommend it to everyone.", 5),
    ("Excellent quality and fast delivery. Exactly as described, great value for money.", 5),
    ("Very good product, well packaged. Responsive customer service. I recommend this brand.", 4),
    ("Satisfied with this purchase. Solid, well finished product. Delivered on time.", 4),
    ("Great product! Exactly what I was looking for. Thanks for the quick shipping.", 5),
    ("Good quality, matches the description. Fair price for this kind of product.", 4),
];

const SYNTHETIC_NEGATIVE: &[(&str, u8)] = &[
    ("Very disappointed with this purchase. Poor quality, nothing like the description.", 2),
    ("Defective from the first use. Customer service never answered. Avoid.", 1),
    ("Bad quality, cheap materials. The photos on the site are misleading. Disappointed.", 1),
    ("Not good at all. Late delivery and the product arrived damaged. Asking for a refund.", 2),
    ("Do not buy this! A total scam, nothing works as advertised.", 1),
    ("Disappointing quality for the price paid. Do not trust the fake reviews.", 2),
];

const SYNTHETIC_NEUTRAL: &[(&str, u8)] = &[
    ("Decent product, nothing more. Does the job but nothing exceptional. Average price.", 3),
    ("Average, the quality could be better. Acceptable for the price but that is all.", 3),
    ("It is fine, neither good nor bad. Covers the basics. You can find better elsewhere.", 3),
    ("Okay as a stopgap. Average quality, average customer service. Nothing special.", 3),
    ("Works as expected. Packaging was plain and delivery took the usual time.", 3),
    ("Mixed feelings. Some parts are nice, others feel flimsy. Probably keeping it.", 3),
];

/// Builds `count` labeled reviews, cycling positive, negative, neutral.
/// Deterministic and infallible.
pub fn synthetic_reviews(count: usize) -> Vec<RawReviewRecord> {
    (0..count)
        .map(|i| {
            let (label, pool) = match i % 3 {
                0 => (Sentiment::Positive, SYNTHETIC_POSITIVE),
                1 => (Sentiment::Negative, SYNTHETIC_NEGATIVE),
                _ => (Sentiment::Neutral, SYNTHETIC_NEUTRAL),
            };
            let (text, rating) = pool[(i / 3) % pool.len()];
            RawReviewRecord {
                text: text.to_string(),
                rating: Some(rating),
                source: DataSource::Synthetic,
                label: Some(label),
            }
        })
        .collect()
}

// ============================================================================
// Acquisition
// ============================================================================

pub struct DataAcquirer {
    remote: Arc<dyn ReviewSource>,
    remote_available: bool,
    min_examples: usize,
}

impl DataAcquirer {
    /// `remote_available` comes from the capability map; when false the
    /// remote source is never contacted.
    pub fn new(remote: Arc<dyn ReviewSource>, remote_available: bool, min_examples: usize) -> Self {
        Self {
            remote,
            remote_available,
            min_examples,
        }
    }

    pub async fn acquire(&self, limit: usize, prefer_synthetic: bool) -> Vec<RawReviewRecord> {
        let limit = if limit == 0 { DEFAULT_LIMIT } else { limit };

        if prefer_synthetic {
            tracing::info!("🧪 Synthetic data requested ({} reviews)", limit);
            return synthetic_reviews(limit);
        }
        if !self.remote_available {
            tracing::warn!("⚠️ Remote dataset unavailable, falling back to synthetic data");
            return synthetic_reviews(limit);
        }

        tracing::info!("📥 Fetching up to {} reviews from the remote dataset", limit);
        let mut records = match self.remote.fetch(limit).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("⚠️ Remote fetch failed ({:#}), falling back to synthetic data", e);
                return synthetic_reviews(limit);
            }
        };
        records.truncate(limit);

        let usable = records.iter().filter(|r| r.is_usable()).count();
        let wanted = self.min_examples.min(limit);
        if usable < wanted {
            let missing = wanted - usable;
            tracing::warn!(
                "⚠️ Remote dataset gave {} usable reviews, topping up with {} synthetic",
                usable,
                missing
            );
            // Unusable rows go first so the total stays within the limit.
            records.retain(|r| r.is_usable());
            records.extend(synthetic_reviews(missing));
        }

        tracing::info!("✅ Acquired {} reviews ({})", records.len(), DataSource::summarize(&records));
        records
    }
}

// ============================================================================
// Conversion
// ============================================================================

/// Normalizes records into training examples.
///
/// Pre-labeled records keep their label; rated records follow
/// [`Sentiment::from_rating`]; unrated, unlabeled ones are classified by
/// keywords. Blank text and out-of-range ratings are dropped one at a time.
/// An empty result is a [`PipelineError::Data`].
pub fn convert(records: &[RawReviewRecord]) -> Result<TrainingDataset, PipelineError> {
    let mut examples = Vec::with_capacity(records.len());
    let mut dropped = 0usize;

    for record in records {
        let text = record.text.trim();
        if text.is_empty() {
            dropped += 1;
            continue;
        }
        let label = match (record.label, record.rating) {
            (Some(label), _) => label,
            (None, Some(rating)) => match Sentiment::from_rating(rating) {
                Some(label) => label,
                None => {
                    tracing::debug!("skipping review with invalid rating {}", rating);
                    dropped += 1;
                    continue;
                }
            },
            (None, None) => sentiment::analyze(text).label,
        };
        examples.push(TrainingExample {
            text: text.to_string(),
            label,
        });
    }

    if dropped > 0 {
        tracing::info!("🧹 Dropped {} invalid reviews during conversion", dropped);
    }
    if examples.is_empty() {
        return Err(PipelineError::Data(format!(
            "{} input records, none with usable text and rating",
            records.len()
        )));
    }
    Ok(TrainingDataset { examples })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Unreachable(Arc<AtomicBool>);

    #[async_trait::async_trait]
    impl ReviewSource for Unreachable {
        async fn fetch(&self, _limit: usize) -> anyhow::Result<Vec<RawReviewRecord>> {
            self.0.store(true, Ordering::SeqCst);
            anyhow::bail!("connection refused")
        }
    }

    struct Canned(Vec<RawReviewRecord>);

    #[async_trait::async_trait]
    impl ReviewSource for Canned {
        async fn fetch(&self, limit: usize) -> anyhow::Result<Vec<RawReviewRecord>> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    /// Ignores the requested limit.
    struct Flood(usize);

    #[async_trait::async_trait]
    impl ReviewSource for Flood {
        async fn fetch(&self, _limit: usize) -> anyhow::Result<Vec<RawReviewRecord>> {
            Ok((0..self.0).map(|i| remote(&format!("avis {}", i), Some(4))).collect())
        }
    }

    /// Serves a fixed rows body through `parse_rows`.
    struct RowsBody(&'static str);

    #[async_trait::async_trait]
    impl ReviewSource for RowsBody {
        async fn fetch(&self, _limit: usize) -> anyhow::Result<Vec<RawReviewRecord>> {
            parse_rows(self.0)
        }
    }

    fn remote(text: &str, rating: Option<u8>) -> RawReviewRecord {
        RawReviewRecord {
            text: text.to_string(),
            rating,
            source: DataSource::Remote,
            label: None,
        }
    }

    #[tokio::test]
    async fn test_failing_remote_returns_exactly_limit_synthetic() {
        for limit in [1, 7, 10, 250] {
            let called = Arc::new(AtomicBool::new(false));
            let acquirer = DataAcquirer::new(Arc::new(Unreachable(called.clone())), true, 10);
            let records = acquirer.acquire(limit, false).await;
            assert!(called.load(Ordering::SeqCst));
            assert_eq!(records.len(), limit);
            assert!(records.iter().all(|r| r.source == DataSource::Synthetic));
        }
    }

    #[tokio::test]
    async fn test_unavailable_remote_is_never_contacted() {
        let called = Arc::new(AtomicBool::new(false));
        let acquirer = DataAcquirer::new(Arc::new(Unreachable(called.clone())), false, 10);
        let records = acquirer.acquire(12, false).await;
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(records.len(), 12);
    }

    #[tokio::test]
    async fn test_prefer_synthetic_and_default_limit() {
        let called = Arc::new(AtomicBool::new(false));
        let acquirer = DataAcquirer::new(Arc::new(Unreachable(called.clone())), true, 10);
        let records = acquirer.acquire(0, true).await;
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(records.len(), DEFAULT_LIMIT);
    }

    #[tokio::test]
    async fn test_short_remote_is_topped_up() {
        let canned = vec![remote("Super produit", Some(5)), remote("   ", Some(1)), remote("Bof", Some(3))];
        let acquirer = DataAcquirer::new(Arc::new(Canned(canned)), true, 5);
        let records = acquirer.acquire(20, false).await;
        assert_eq!(records.iter().filter(|r| r.has_text()).count(), 5);
        assert_eq!(records.iter().filter(|r| r.source == DataSource::Remote).count(), 2);
        assert_eq!(DataSource::summarize(&records), "mixed");
    }

    #[tokio::test]
    async fn test_out_of_range_labels_fall_back_to_synthetic() {
        let body = r#"{"rows":[{"row":{"text":"avis un","label":7}},{"row":{"text":"avis deux","label":9}}]}"#;
        let acquirer = DataAcquirer::new(Arc::new(RowsBody(body)), true, 10);
        let records = acquirer.acquire(2, false).await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.source == DataSource::Synthetic));
        assert_eq!(convert(&records).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_ratings_do_not_count_as_usable() {
        let canned = vec![remote("avis un", Some(8)), remote("avis deux", Some(0)), remote("Très bien", Some(5))];
        let acquirer = DataAcquirer::new(Arc::new(Canned(canned)), true, 3);
        let records = acquirer.acquire(3, false).await;
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.is_usable()));
        assert_eq!(records.iter().filter(|r| r.source == DataSource::Remote).count(), 1);
        assert_eq!(convert(&records).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_source_ignoring_limit_is_truncated() {
        let acquirer = DataAcquirer::new(Arc::new(Flood(40)), true, 5);
        let records = acquirer.acquire(12, false).await;
        assert_eq!(records.len(), 12);
        assert!(records.iter().all(|r| r.source == DataSource::Remote));
    }

    #[test]
    fn test_usable_follows_conversion_rules() {
        assert!(remote("ok", Some(3)).is_usable());
        assert!(remote("ok", None).is_usable());
        assert!(!remote("ok", Some(6)).is_usable());
        assert!(!remote("  ", Some(4)).is_usable());
        let mut labeled = remote("ok", Some(9));
        labeled.label = Some(Sentiment::Positive);
        assert!(labeled.is_usable());
    }

    #[tokio::test]
    async fn test_remote_timeout_falls_back() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                if let Ok((socket, _)) = listener.accept().await {
                    held.push(socket);
                }
            }
        });

        let source = HubSource::new(&format!("http://{}", addr), "any/dataset", Duration::from_millis(200)).unwrap();
        assert!(source.fetch(5).await.is_err());

        let acquirer = DataAcquirer::new(Arc::new(source), true, 3);
        let records = acquirer.acquire(5, false).await;
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.source == DataSource::Synthetic));
    }

    #[tokio::test]
    async fn test_hub_source_pages_through_rows() {
        use axum::{extract::Query, routing::get, Json, Router};
        use std::collections::HashMap;

        let app = Router::new().route(
            "/rows",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let offset: usize = q["offset"].parse().unwrap();
                let length: usize = q["length"].parse().unwrap();
                let rows: Vec<_> = (offset..offset + length)
                    .map(|i| serde_json::json!({ "row_idx": i, "row": { "text": format!("avis {}", i), "label": i % 5 } }))
                    .collect();
                Json(serde_json::json!({ "rows": rows }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let source = HubSource::new(&format!("http://{}/", addr), "SetFit/amazon_reviews_multi_fr", Duration::from_secs(5)).unwrap();
        let records = source.fetch(150).await.unwrap();
        assert_eq!(records.len(), 150);
        assert_eq!(records[0].rating, Some(1));
        assert_eq!(records[149].text, "avis 149");
        assert_eq!(records[149].rating, Some(5));
    }

    #[test]
    fn test_parse_rows_rejects_malformed_bodies() {
        assert!(parse_rows("<html>rate limited</html>").is_err());
        assert!(parse_rows(r#"{"rows":[{"row":{"text":"x","label":900}}]}"#).is_err());
        assert!(parse_rows(r#"{"rows":[{"row":{"text":"x","label":5}}]}"#).is_err());
        assert!(parse_rows(r#"{"rows":[{"row":{"text":"x","label":-1}}]}"#).is_err());
        let ok = parse_rows(r#"{"rows":[{"row_idx":0,"row":{"id":"fr_1","text":"Très bien","label":4,"label_text":"4"},"truncated_cells":[]}]}"#).unwrap();
        assert_eq!(ok, vec![remote("Très bien", Some(5))]);
    }

    #[test]
    fn test_synthetic_is_balanced_and_deterministic() {
        let records = synthetic_reviews(30);
        assert_eq!(records, synthetic_reviews(30));
        let dataset = convert(&records).unwrap();
        for label in Sentiment::ALL {
            assert_eq!(dataset.label_counts()[&label], 10);
        }
    }

    #[test]
    fn test_convert_empty_is_data_error() {
        assert!(matches!(convert(&[]), Err(PipelineError::Data(_))));
        assert!(matches!(convert(&[remote("  ", Some(5))]), Err(PipelineError::Data(_))));
    }

    #[test]
    fn test_convert_rating_three_is_neutral() {
        let records: Vec<_> = (0..8).map(|i| remote(&format!("review {}", i), Some(3))).collect();
        let dataset = convert(&records).unwrap();
        assert_eq!(dataset.len(), 8);
        assert!(dataset.examples().iter().all(|e| e.label == Sentiment::Neutral));
    }

    #[test]
    fn test_convert_bounds_and_partial_failure() {
        let records = vec![
            remote("Great", Some(5)),
            remote("", Some(4)),
            remote("Awful", Some(1)),
            remote("Out of range", Some(9)),
            remote("Produit fantastique, je recommande", None),
        ];
        let dataset = convert(&records).unwrap();
        let with_text = records.iter().filter(|r| r.has_text()).count();
        assert!(dataset.len() <= records.len());
        assert_eq!(dataset.len(), with_text - 1);
        assert_eq!(dataset.examples()[2].label, Sentiment::Positive);
    }

    #[test]
    fn test_convert_keeps_preassigned_labels() {
        let mut record = remote("Neutral words only", Some(5));
        record.label = Some(Sentiment::Negative);
        let dataset = convert(&[record]).unwrap();
        assert_eq!(dataset.examples()[0].label, Sentiment::Negative);
    }

    #[test]
    fn test_stats_and_corpus() {
        let records = vec![remote("abcd", Some(5)), remote("ab", Some(5))];
        let stats = DatasetStats::of(&records);
        assert_eq!(stats.total_reviews, 2);
        assert_eq!(stats.by_rating[&5], 2);
        assert_eq!(stats.avg_text_length, 3.0);

        let corpus = convert(&records).unwrap().to_corpus();
        assert_eq!(corpus.lines().count(), 2);
        assert!(corpus.starts_with("Customer review: abcd <|endoftext|>"));
    }
}
