//! Process-wide settings, read once from the environment.
//!
//! `Settings::from_env()` is called at the top of each binary (after
//! `dotenv().ok()`) and the resulting struct is handed down by reference.
//! Nothing below `main` reads environment variables for configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Generation models tried by the sidecar, in order of preference.
pub const CANDIDATE_MODELS: &[&str] = &["distilgpt2", "gpt2", "microsoft/DialoGPT-small"];

#[derive(Debug, Clone)]
pub struct Settings {
    pub api: ApiConfig,
    pub ai: AiConfig,
    pub training: TrainingConfig,
    pub deployment: DeploymentConfig,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub title: &'static str,
    pub description: &'static str,
    pub version: &'static str,
    pub host: String,
    pub port: u16,
}

/// AI reply generation. Templates are used whenever this is disabled.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub enabled: bool,
    pub sidecar_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub data_dir: PathBuf,
    pub models_dir: PathBuf,
    /// Interpreter used both for capability probes and the script engine.
    pub python: String,
    /// Base URL of the datasets-server API.
    pub dataset_api_url: String,
    pub dataset_name: String,
    pub fetch_timeout: Duration,
    pub probe_timeout: Duration,
    pub min_examples: usize,
    /// Never contact the dataset hub (`HF_DATASETS_OFFLINE`).
    pub offline: bool,
}

#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub env: String,
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                title: "Review Responder API",
                description: "Sentiment analysis and automatic replies for customer reviews",
                version: env!("CARGO_PKG_VERSION"),
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            ai: AiConfig {
                enabled: false,
                sidecar_url: "http://localhost:8001/generate".to_string(),
                timeout: Duration::from_secs(15),
            },
            training: TrainingConfig {
                data_dir: PathBuf::from("data"),
                models_dir: PathBuf::from("models"),
                python: "python3".to_string(),
                dataset_api_url: "https://datasets-server.huggingface.co".to_string(),
                dataset_name: "SetFit/amazon_reviews_multi_fr".to_string(),
                fetch_timeout: Duration::from_secs(20),
                probe_timeout: Duration::from_secs(10),
                min_examples: 10,
                offline: false,
            },
            deployment: DeploymentConfig {
                env: "production".to_string(),
                debug: false,
            },
        }
    }
}

impl Settings {
    /// Defaults overlaid with whatever the environment provides.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let env = std::env::var("ENV").unwrap_or(defaults.deployment.env);
        Self {
            api: ApiConfig {
                host: std::env::var("HOST").unwrap_or(defaults.api.host),
                port: parsed("PORT", defaults.api.port),
                ..defaults.api
            },
            ai: AiConfig {
                enabled: flag("ENABLE_AI_MODEL"),
                sidecar_url: std::env::var("AI_SIDECAR_URL").unwrap_or(defaults.ai.sidecar_url),
                timeout: Duration::from_secs(parsed("AI_SIDECAR_TIMEOUT_SECS", defaults.ai.timeout.as_secs())),
            },
            training: TrainingConfig {
                data_dir: std::env::var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.training.data_dir),
                models_dir: std::env::var("MODELS_DIR").map(PathBuf::from).unwrap_or(defaults.training.models_dir),
                python: std::env::var("TRAINER_PYTHON").unwrap_or(defaults.training.python),
                dataset_api_url: std::env::var("DATASET_API_URL").unwrap_or(defaults.training.dataset_api_url),
                dataset_name: std::env::var("DATASET_NAME").unwrap_or(defaults.training.dataset_name),
                fetch_timeout: Duration::from_secs(parsed(
                    "DATASET_FETCH_TIMEOUT_SECS",
                    defaults.training.fetch_timeout.as_secs(),
                )),
                probe_timeout: Duration::from_secs(parsed(
                    "PROBE_TIMEOUT_SECS",
                    defaults.training.probe_timeout.as_secs(),
                )),
                min_examples: parsed("MIN_TRAINING_EXAMPLES", defaults.training.min_examples),
                offline: flag("HF_DATASETS_OFFLINE"),
            },
            deployment: DeploymentConfig {
                debug: env == "development",
                env,
            },
        }
    }

    /// Where real engines write when the caller gives no output directory.
    pub fn default_artifact_dir(&self) -> PathBuf {
        self.training.models_dir.join("review_trained")
    }

    /// Where `--snapshot` writes when given without a path.
    pub fn default_snapshot_path(&self) -> PathBuf {
        self.training.data_dir.join("training_data.json")
    }
}

fn flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
