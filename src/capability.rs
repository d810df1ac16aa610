//! Runtime capability detection.
//!
//! Each optional backend (numeric arrays, neural training, remote datasets)
//! is checked by a [`Probe`]. Probes run as isolated tasks with a timeout, so
//! an error, a hang or a panic inside one only marks that capability as
//! unavailable. The resulting [`CapabilityMap`] is built once and cached.

use crate::config::TrainingConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Numeric array library (numpy).
    Numeric,
    /// Neural training stack (torch + transformers).
    Neural,
    /// Remote labeled review dataset.
    RemoteDataset,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Capability::Numeric, Capability::Neural, Capability::RemoteDataset];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Numeric => "numeric",
            Self::Neural => "neural",
            Self::RemoteDataset => "remote-dataset",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapabilityStatus {
    pub available: bool,
    pub version: Option<String>,
}

impl CapabilityStatus {
    pub fn available(version: Option<String>) -> Self {
        Self {
            available: true,
            version,
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// Which optional backends this process can use. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapabilityMap(BTreeMap<Capability, CapabilityStatus>);

impl CapabilityMap {
    pub fn with(mut self, capability: Capability, status: CapabilityStatus) -> Self {
        self.0.insert(capability, status);
        self
    }

    /// Missing entries read as unavailable.
    pub fn is_available(&self, capability: Capability) -> bool {
        self.0.get(&capability).map(|s| s.available).unwrap_or(false)
    }

    pub fn version(&self, capability: Capability) -> Option<&str> {
        self.0.get(&capability).and_then(|s| s.version.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Capability, CapabilityStatus)> + '_ {
        Capability::ALL
            .into_iter()
            .map(|c| (c, self.0.get(&c).cloned().unwrap_or_default()))
    }

    pub fn available_count(&self) -> usize {
        self.0.values().filter(|s| s.available).count()
    }
}

impl fmt::Display for CapabilityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (capability, status) in self.iter() {
            let mark = if status.available { "✅" } else { "❌" };
            match self.version(capability) {
                Some(v) => writeln!(f, "  {:<16} {} {}", capability.to_string(), mark, v)?,
                None => writeln!(f, "  {:<16} {}", capability.to_string(), mark)?,
            }
        }
        Ok(())
    }
}

/// A best-effort check for one capability. `Ok` carries an optional version.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    fn capability(&self) -> Capability;
    async fn probe(&self) -> anyhow::Result<Option<String>>;
}

/// Checks that the Python interpreter can import a set of modules and
/// reports the first module's `__version__`.
pub struct PythonModuleProbe {
    capability: Capability,
    python: String,
    script: String,
}

impl PythonModuleProbe {
    pub fn new(capability: Capability, python: &str, modules: &[&str]) -> Self {
        let script = match modules.first() {
            Some(first) => format!("import {}; print({}.__version__)", modules.join(", "), first),
            None => "pass".to_string(),
        };
        Self {
            capability,
            python: python.to_string(),
            script,
        }
    }

    /// Appends an extra statement that must also succeed.
    pub fn also(mut self, statement: &str) -> Self {
        self.script = format!("{}; {}", statement, self.script);
        self
    }
}

#[async_trait::async_trait]
impl Probe for PythonModuleProbe {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn probe(&self) -> anyhow::Result<Option<String>> {
        let output = Command::new(&self.python)
            .args(["-c", &self.script])
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last = stderr.lines().last().unwrap_or("no output");
            anyhow::bail!("{} exited with {}: {}", self.python, output.status, last);
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(version).filter(|v| !v.is_empty()))
    }
}

/// Checks that the dataset hub is reachable and knows the dataset.
/// Offline mode fails without touching the network.
pub struct DatasetHubProbe {
    base_url: String,
    dataset: String,
    offline: bool,
    timeout: Duration,
}

impl DatasetHubProbe {
    pub fn new(base_url: &str, dataset: &str, offline: bool, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            dataset: dataset.to_string(),
            offline,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl Probe for DatasetHubProbe {
    fn capability(&self) -> Capability {
        Capability::RemoteDataset
    }

    async fn probe(&self) -> anyhow::Result<Option<String>> {
        if self.offline {
            anyhow::bail!("offline mode, dataset hub not contacted");
        }
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        let response = client
            .get(format!("{}/is-valid", self.base_url))
            .query(&[("dataset", self.dataset.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("dataset hub answered {}", response.status());
        }
        Ok(None)
    }
}

pub struct CapabilityDetector {
    probes: Vec<Arc<dyn Probe>>,
    timeout: Duration,
    cache: OnceCell<CapabilityMap>,
}

impl CapabilityDetector {
    pub fn new(probes: Vec<Arc<dyn Probe>>, timeout: Duration) -> Self {
        Self {
            probes,
            timeout,
            cache: OnceCell::new(),
        }
    }

    /// Default probes for the configured interpreter and dataset hub.
    pub fn from_config(config: &TrainingConfig) -> Self {
        let probes: Vec<Arc<dyn Probe>> = vec![
            Arc::new(PythonModuleProbe::new(Capability::Numeric, &config.python, &["numpy"])),
            Arc::new(
                PythonModuleProbe::new(Capability::Neural, &config.python, &["torch", "transformers"])
                    .also("from transformers import GPT2LMHeadModel, GPT2Tokenizer"),
            ),
            Arc::new(DatasetHubProbe::new(
                &config.dataset_api_url,
                &config.dataset_name,
                config.offline,
                config.probe_timeout,
            )),
        ];
        Self::new(probes, config.probe_timeout)
    }

    /// A detector whose map is already known; used when the environment is
    /// described up front rather than probed.
    pub fn fixed(map: CapabilityMap) -> Self {
        Self {
            probes: Vec::new(),
            timeout: Duration::ZERO,
            cache: OnceCell::new_with(Some(map)),
        }
    }

    /// The process-wide map, probed on first use.
    pub async fn detect(&self) -> &CapabilityMap {
        self.cache.get_or_init(|| self.probe_all()).await
    }

    /// Runs every probe again, bypassing the cache.
    pub async fn probe_all(&self) -> CapabilityMap {
        let handles: Vec<_> = self
            .probes
            .iter()
            .map(|probe| {
                let probe = Arc::clone(probe);
                let timeout = self.timeout;
                let capability = probe.capability();
                let handle = tokio::spawn(async move { tokio::time::timeout(timeout, probe.probe()).await });
                (capability, handle)
            })
            .collect();

        let mut map = CapabilityMap::default();
        for (capability, handle) in handles {
            let status = match handle.await {
                Ok(Ok(Ok(version))) => CapabilityStatus::available(version),
                Ok(Ok(Err(e))) => {
                    tracing::debug!("🔍 {} unavailable: {:#}", capability, e);
                    CapabilityStatus::unavailable()
                }
                Ok(Err(_)) => {
                    tracing::debug!("🔍 {} probe timed out after {:?}", capability, self.timeout);
                    CapabilityStatus::unavailable()
                }
                Err(e) => {
                    tracing::debug!("🔍 {} probe crashed: {}", capability, e);
                    CapabilityStatus::unavailable()
                }
            };
            // A capability backed by several probes needs all of them.
            let merged = match map.0.get(&capability) {
                Some(existing) if !existing.available => CapabilityStatus::unavailable(),
                _ => status,
            };
            map.0.insert(capability, merged);
        }
        tracing::info!(
            "🔍 Capabilities: {}/{} available",
            map.available_count(),
            Capability::ALL.len()
        );
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(Capability, Option<&'static str>, Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl Probe for Fixed {
        fn capability(&self) -> Capability {
            self.0
        }
        async fn probe(&self) -> anyhow::Result<Option<String>> {
            self.2.fetch_add(1, Ordering::SeqCst);
            Ok(self.1.map(String::from))
        }
    }

    struct Failing(Capability);

    #[async_trait::async_trait]
    impl Probe for Failing {
        fn capability(&self) -> Capability {
            self.0
        }
        async fn probe(&self) -> anyhow::Result<Option<String>> {
            anyhow::bail!("numpy.dtype size changed, may indicate binary incompatibility")
        }
    }

    struct Panicking;

    #[async_trait::async_trait]
    impl Probe for Panicking {
        fn capability(&self) -> Capability {
            Capability::Neural
        }
        async fn probe(&self) -> anyhow::Result<Option<String>> {
            panic!("native extension blew up")
        }
    }

    struct Hanging;

    #[async_trait::async_trait]
    impl Probe for Hanging {
        fn capability(&self) -> Capability {
            Capability::RemoteDataset
        }
        async fn probe(&self) -> anyhow::Result<Option<String>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_detect_is_idempotent_and_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let detector = CapabilityDetector::new(
            vec![
                Arc::new(Fixed(Capability::Numeric, Some("1.26.4"), calls.clone())),
                Arc::new(Fixed(Capability::Neural, None, calls.clone())),
            ],
            Duration::from_secs(1),
        );
        let first = detector.detect().await.clone();
        let second = detector.detect().await.clone();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(first.is_available(Capability::Numeric));
        assert_eq!(first.version(Capability::Numeric), Some("1.26.4"));
        assert!(!first.is_available(Capability::RemoteDataset));
    }

    #[tokio::test]
    async fn test_failures_panics_and_hangs_become_unavailable() {
        let detector = CapabilityDetector::new(
            vec![
                Arc::new(Failing(Capability::Numeric)),
                Arc::new(Panicking),
                Arc::new(Hanging),
            ],
            Duration::from_millis(100),
        );
        let map = detector.detect().await;
        assert_eq!(map.available_count(), 0);
        for (_, status) in map.iter() {
            assert_eq!(status, CapabilityStatus::unavailable());
        }
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_unavailable() {
        let probe = PythonModuleProbe::new(Capability::Numeric, "definitely-not-a-python-binary", &["numpy"]);
        let detector = CapabilityDetector::new(vec![Arc::new(probe)], Duration::from_secs(5));
        assert!(!detector.detect().await.is_available(Capability::Numeric));
    }

    #[tokio::test]
    async fn test_one_failing_probe_vetoes_a_shared_capability() {
        let calls = Arc::new(AtomicUsize::new(0));
        let detector = CapabilityDetector::new(
            vec![
                Arc::new(Failing(Capability::Neural)),
                Arc::new(Fixed(Capability::Neural, Some("2.2.0"), calls)),
            ],
            Duration::from_secs(1),
        );
        assert!(!detector.probe_all().await.is_available(Capability::Neural));
    }

    #[tokio::test]
    async fn test_fixed_detector_skips_probing() {
        let map = CapabilityMap::default().with(Capability::Neural, CapabilityStatus::available(None));
        let detector = CapabilityDetector::fixed(map.clone());
        assert_eq!(detector.detect().await, &map);
    }

    async fn hub_stub() -> (String, Arc<AtomicUsize>) {
        use axum::{routing::get, Router};

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/is-valid",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "{\"viewer\": true}"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}", addr), hits)
    }

    #[tokio::test]
    async fn test_hub_probe_online_and_offline() {
        let (base, hits) = hub_stub().await;

        let online = DatasetHubProbe::new(&base, "SetFit/amazon_reviews_multi_fr", false, Duration::from_secs(5));
        assert!(online.probe().await.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let offline = DatasetHubProbe::new(&base, "SetFit/amazon_reviews_multi_fr", true, Duration::from_secs(5));
        let err = offline.probe().await.unwrap_err();
        assert!(err.to_string().contains("offline"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hub_probe_has_its_own_timeout() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let probe = DatasetHubProbe::new(&format!("http://{}", addr), "any", false, Duration::from_millis(200));
        let started = std::time::Instant::now();
        assert!(probe.probe().await.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_display_lists_versions() {
        let map = CapabilityMap::default().with(Capability::Numeric, CapabilityStatus::available(Some("1.26.4".into())));
        let rendered = map.to_string();
        assert!(rendered.contains("numeric"));
        assert!(rendered.contains("1.26.4"));
        assert!(rendered.contains("remote-dataset"));
    }

    #[test]
    fn test_python_probe_script() {
        let probe = PythonModuleProbe::new(Capability::Neural, "python3", &["torch", "transformers"])
            .also("from transformers import GPT2LMHeadModel");
        assert_eq!(
            probe.script,
            "from transformers import GPT2LMHeadModel; import torch, transformers; print(torch.__version__)"
        );
    }
}
