//! Keyword-based sentiment analysis shared by the API and the training pipeline.
//!
//! Word lists cover French (the language of the review dataset) and English.
//! No external ML dependencies.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use utoipa::ToSchema;

static POSITIVE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    vec![
        // fr
        "excellent", "excellente", "fantastique", "parfait", "parfaite", "super", "génial",
        "formidable", "merveilleux", "incroyable", "magnifique", "extraordinaire", "remarquable",
        "satisfait", "satisfaite", "content", "contente", "heureux", "ravi", "ravie", "enchanté",
        "impressionné", "recommande", "qualité", "rapide", "efficace", "professionnel", "top",
        "bon", "bonne", "bien", "mieux", "meilleur", "adore",
        // en
        "good", "great", "amazing", "wonderful", "fantastic", "superb", "outstanding",
        "brilliant", "love", "loved", "best", "happy", "perfect", "awesome", "delightful",
        "satisfied", "recommend", "recommended", "impressive", "reliable", "quality", "fast",
    ]
    .into_iter()
    .collect()
});

static NEGATIVE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    vec![
        // fr
        "mauvais", "mauvaise", "terrible", "horrible", "nul", "nulle", "catastrophique",
        "décevant", "décevante", "insatisfait", "mécontent", "frustré", "énervé", "fâché",
        "déçu", "déçue", "problème", "erreur", "défaut", "défectueux", "cassé", "abîmé",
        "retard", "lent", "cher", "arnaque", "vol", "scandale", "inadmissible", "inacceptable",
        "pire", "déteste", "horreur", "cauchemar", "regret", "médiocre",
        // en
        "bad", "awful", "poor", "worst", "worse", "hate", "hated", "disappointing",
        "disappointed", "failure", "broken", "useless", "waste", "scam", "fake", "slow",
        "expensive", "overpriced", "garbage", "mediocre", "defective", "late",
    ]
    .into_iter()
    .collect()
});

/// The three-way label vocabulary used everywhere in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub const ALL: [Sentiment; 3] = [Sentiment::Positive, Sentiment::Negative, Sentiment::Neutral];

    /// Star rating policy: 4-5 positive, 1-2 negative, 3 neutral.
    /// Ratings outside 1..=5 have no label.
    pub fn from_rating(rating: u8) -> Option<Self> {
        match rating {
            4..=5 => Some(Self::Positive),
            3 => Some(Self::Neutral),
            1..=2 => Some(Self::Negative),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of sentiment analysis
#[derive(Debug, Clone, PartialEq)]
pub struct SentimentResult {
    pub label: Sentiment,
    pub score: f32,
    pub positive_count: usize,
    pub negative_count: usize,
}

/// Classifies text by counting positive and negative keywords.
/// Ties (including no keywords at all) are neutral.
pub fn analyze(text: &str) -> SentimentResult {
    let lowercase_text = text.to_lowercase();
    let words: Vec<&str> = lowercase_text
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();

    let positive_count = words.iter().filter(|w| POSITIVE_WORDS.contains(*w)).count();
    let negative_count = words.iter().filter(|w| NEGATIVE_WORDS.contains(*w)).count();
    let total = positive_count + negative_count;

    let (label, score) = if total == 0 {
        (Sentiment::Neutral, 0.5)
    } else {
        let positive_ratio = positive_count as f32 / total as f32;
        if positive_count > negative_count {
            (Sentiment::Positive, positive_ratio)
        } else if negative_count > positive_count {
            (Sentiment::Negative, 1.0 - positive_ratio)
        } else {
            (Sentiment::Neutral, 0.5)
        }
    };

    tracing::debug!(
        "🧠 Sentiment: {} words, {} positive, {} negative -> {}",
        words.len(),
        positive_count,
        negative_count,
        label
    );

    SentimentResult {
        label,
        score,
        positive_count,
        negative_count,
    }
}
