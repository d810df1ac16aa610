//! Training pipeline driver.
//!
//! One `run` walks detect → acquire → convert → resolve → execute exactly
//! once. Probe and fetch failures are absorbed by the stages that own them;
//! only conversion and engine failures end the run.

use crate::capability::{Capability, CapabilityDetector};
use crate::config::Settings;
use crate::dataset::{convert, DataAcquirer, DataSource, DatasetStats, HubSource, ReviewSource};
use crate::engine::{Engine, EpochMetrics, SampleOutput, ScriptEngine, Simulator, TrainPlan};
use crate::error::PipelineError;
use crate::mode::{resolve, Degradation, RequestedMode, TrainingMode};
use crate::sentiment::Sentiment;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Detecting,
    Acquiring,
    Converting,
    ResolvingMode,
    Executing,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Detecting => "detecting",
            Self::Acquiring => "acquiring",
            Self::Converting => "converting",
            Self::ResolvingMode => "resolving-mode",
            Self::Executing => "executing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub mode: RequestedMode,
    pub limit: usize,
    pub prefer_synthetic: bool,
    pub epochs: usize,
    /// Overrides the default artifact directory.
    pub output_dir: Option<PathBuf>,
    /// Where to dump the converted dataset as JSON, if anywhere.
    pub snapshot: Option<PathBuf>,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            mode: RequestedMode::Auto,
            limit: crate::dataset::DEFAULT_LIMIT,
            prefer_synthetic: false,
            epochs: 1,
            output_dir: None,
            snapshot: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingResult {
    pub run_id: String,
    pub mode: TrainingMode,
    pub requested: RequestedMode,
    pub examples_used: usize,
    pub duration_seconds: f64,
    pub artifact_path: Option<String>,
    pub simulated: bool,
    pub degradation: Option<Degradation>,
    pub data_source: String,
    pub metrics: Vec<EpochMetrics>,
    pub samples: Vec<SampleOutput>,
    pub label_counts: BTreeMap<Sentiment, usize>,
    /// Computed over the acquired records, before conversion.
    pub dataset_stats: DatasetStats,
}

impl TrainingResult {
    /// Human-readable report printed by the trainer binary.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("✅ Training run {} finished", self.run_id),
            format!("   mode:      {} (requested {})", self.mode, self.requested),
            format!("   examples:  {} from {} data", self.examples_used, self.data_source),
            format!("   duration:  {:.1}s", self.duration_seconds),
        ];
        let counts: Vec<String> = self.label_counts.iter().map(|(label, n)| format!("{} {}", label, n)).collect();
        lines.push(format!("   labels:    {}", counts.join(", ")));
        lines.push(format!(
            "   reviews:   {} acquired, {:.1} chars on average",
            self.dataset_stats.total_reviews, self.dataset_stats.avg_text_length
        ));
        if let Some(last) = self.metrics.last() {
            lines.push(format!("   loss:      {:.4} after epoch {}", last.loss, last.epoch));
        }
        if !self.samples.is_empty() {
            let good = self.samples.iter().filter(|s| s.acceptable).count();
            lines.push(format!("   samples:   {}/{} acceptable", good, self.samples.len()));
        }
        if self.simulated {
            lines.push("   note:      simulated run, no model was trained".to_string());
        }
        match &self.artifact_path {
            Some(path) => lines.push(format!("   artifact:  {}", path)),
            None => lines.push("   artifact:  none".to_string()),
        }
        if let Some(notice) = &self.degradation {
            lines.push(format!("⚠️ {}", notice));
        }
        lines.join("\n")
    }
}

pub struct Orchestrator {
    detector: Arc<CapabilityDetector>,
    source: Arc<dyn ReviewSource>,
    engines: HashMap<TrainingMode, Arc<dyn Engine>>,
    min_examples: usize,
    default_artifact_dir: PathBuf,
}

impl Orchestrator {
    /// Wires the hub source, the simulator for demo runs and the script
    /// engine for light and full runs.
    pub fn new(settings: &Settings, detector: Arc<CapabilityDetector>) -> anyhow::Result<Self> {
        let script: Arc<dyn Engine> = Arc::new(ScriptEngine::new(&settings.training.python));
        let engines: HashMap<TrainingMode, Arc<dyn Engine>> = HashMap::from([
            (TrainingMode::Demo, Arc::new(Simulator) as Arc<dyn Engine>),
            (TrainingMode::Light, Arc::clone(&script)),
            (TrainingMode::Full, script),
        ]);
        Ok(Self {
            detector,
            source: Arc::new(HubSource::from_config(&settings.training)?),
            engines,
            min_examples: settings.training.min_examples,
            default_artifact_dir: settings.default_artifact_dir(),
        })
    }

    pub fn with_source(mut self, source: Arc<dyn ReviewSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_engine(mut self, mode: TrainingMode, engine: Arc<dyn Engine>) -> Self {
        self.engines.insert(mode, engine);
        self
    }

    pub async fn run(&self, request: &RunRequest) -> Result<TrainingResult, PipelineError> {
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut stage = Stage::Init;
        tracing::info!("🆔 Training run {} ({} requested)", run_id, request.mode);
        tracing::debug!("pipeline {}: {:?}", stage, request);

        let outcome = self.run_stages(request, &mut stage).await;
        match outcome {
            Ok(mut result) => {
                result.run_id = run_id;
                result.duration_seconds = started.elapsed().as_secs_f64();
                tracing::info!("🏁 Pipeline {} in {:.1}s", Stage::Done, result.duration_seconds);
                Ok(result)
            }
            Err(e) => {
                tracing::error!("❌ Pipeline {} during {}: {}", Stage::Failed, stage, e);
                Err(e)
            }
        }
    }

    async fn run_stages(&self, request: &RunRequest, stage: &mut Stage) -> Result<TrainingResult, PipelineError> {
        *stage = Stage::Detecting;
        let capabilities = self.detector.detect().await;
        tracing::info!(
            "🔍 {} of {} capabilities available",
            capabilities.available_count(),
            Capability::ALL.len()
        );

        *stage = Stage::Acquiring;
        let acquirer = DataAcquirer::new(
            Arc::clone(&self.source),
            capabilities.is_available(Capability::RemoteDataset),
            self.min_examples,
        );
        let records = acquirer.acquire(request.limit, request.prefer_synthetic).await;
        let data_source = DataSource::summarize(&records);
        let dataset_stats = DatasetStats::of(&records);

        *stage = Stage::Converting;
        let dataset = convert(&records)?;
        tracing::info!("📊 {} training examples ready", dataset.len());
        if let Some(path) = &request.snapshot {
            match dataset.write_snapshot(path) {
                Ok(()) => tracing::info!("💾 Dataset snapshot written to {}", path.display()),
                Err(e) => tracing::warn!("⚠️ Could not write snapshot {}: {:#}", path.display(), e),
            }
        }

        *stage = Stage::ResolvingMode;
        let resolution = resolve(request.mode, capabilities);
        tracing::info!(
            "🎯 Mode {}: {} ({})",
            resolution.mode,
            resolution.mode.profile().description,
            resolution.reason
        );
        if let Some(notice) = &resolution.degradation {
            tracing::warn!("⚠️ {}", notice);
        }

        *stage = Stage::Executing;
        let engine = self
            .engines
            .get(&resolution.mode)
            .ok_or_else(|| PipelineError::engine("none", format!("no engine registered for {}", resolution.mode)))?;
        let output_dir = match (&request.output_dir, resolution.mode) {
            (Some(dir), _) => Some(dir.clone()),
            (None, TrainingMode::Demo) => None,
            (None, _) => Some(self.default_artifact_dir.clone()),
        };
        let plan = TrainPlan {
            mode: resolution.mode,
            epochs: request.epochs.max(1),
            output_dir,
        };
        tracing::info!("🚀 Running {} engine", engine.name());
        let report = engine.train(&dataset, &plan).await?;

        *stage = Stage::Done;
        Ok(TrainingResult {
            run_id: String::new(),
            mode: resolution.mode,
            requested: request.mode,
            examples_used: dataset.len(),
            duration_seconds: 0.0,
            artifact_path: report.artifact_path.map(|p| p.display().to_string()),
            simulated: report.simulated,
            degradation: resolution.degradation,
            data_source: data_source.to_string(),
            metrics: report.metrics,
            samples: report.samples,
            label_counts: dataset.label_counts(),
            dataset_stats,
        })
    }
}
