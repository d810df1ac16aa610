//! Training engines.
//!
//! The orchestrator picks exactly one [`Engine`] per run from the resolved
//! mode. Real engines hand the optimization to an external transformers
//! process; the simulator fabricates a plausible loss curve.

use crate::dataset::TrainingDataset;
use crate::error::PipelineError;
use crate::mode::TrainingMode;
use crate::responder::{canonical_reply, PROMPT_PREFIX};
use crate::sentiment;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

const FINETUNE_SCRIPT: &str = include_str!("../scripts/finetune.py");
const SIMULATED_EPOCHS: usize = 3;
/// Reviews the trained model is asked to answer once training is done.
const SAMPLE_REVIEWS: [&str; 3] = [
    "Produit fantastique, très satisfait !",
    "Très déçu, qualité médiocre",
    "Correct, fait le travail",
];

/// Everything an engine needs besides the data.
#[derive(Debug, Clone)]
pub struct TrainPlan {
    pub mode: TrainingMode,
    pub epochs: usize,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f64,
}

/// One generation from the trained model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleOutput {
    pub prompt: String,
    pub response: String,
    /// Response length is within 11..200 characters.
    pub acceptable: bool,
}

impl SampleOutput {
    pub fn new(prompt: String, response: String) -> Self {
        let acceptable = (11..200).contains(&response.chars().count());
        Self {
            prompt,
            response,
            acceptable,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineReport {
    pub artifact_path: Option<PathBuf>,
    pub metrics: Vec<EpochMetrics>,
    /// Post-training generations; empty for simulated runs.
    pub samples: Vec<SampleOutput>,
    pub simulated: bool,
}

#[async_trait::async_trait]
pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;
    async fn train(&self, dataset: &TrainingDataset, plan: &TrainPlan) -> Result<EngineReport, PipelineError>;
}

// ============================================================================
// Script engine (light / full)
// ============================================================================

/// Runs the bundled fine-tuning script with the configured interpreter.
pub struct ScriptEngine {
    python: String,
}

impl ScriptEngine {
    pub fn new(python: &str) -> Self {
        Self {
            python: python.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RawSample {
    prompt: String,
    response: String,
}

#[derive(Debug, PartialEq)]
enum ScriptLine {
    Metric(EpochMetrics),
    Sample(SampleOutput),
    Log(String),
}

fn parse_script_line(line: &str) -> ScriptLine {
    let parsed = if let Some(json) = line.strip_prefix("METRIC ") {
        serde_json::from_str::<EpochMetrics>(json).map(ScriptLine::Metric)
    } else if let Some(json) = line.strip_prefix("SAMPLE ") {
        serde_json::from_str::<RawSample>(json).map(|s| ScriptLine::Sample(SampleOutput::new(s.prompt, s.response)))
    } else {
        return ScriptLine::Log(line.to_string());
    };
    parsed.unwrap_or_else(|e| {
        tracing::debug!("unparseable trainer line {:?}: {}", line, e);
        ScriptLine::Log(line.to_string())
    })
}

#[derive(Serialize)]
struct TrainingMetadata<'a> {
    base_model: &'a str,
    mode: TrainingMode,
    epochs: usize,
    batch_size: usize,
    training_samples: usize,
    label_counts: BTreeMap<sentiment::Sentiment, usize>,
    engine: &'static str,
    trained_at: String,
}

#[async_trait::async_trait]
impl Engine for ScriptEngine {
    fn name(&self) -> &'static str {
        "transformers"
    }

    async fn train(&self, dataset: &TrainingDataset, plan: &TrainPlan) -> Result<EngineReport, PipelineError> {
        let fail = |e: &dyn std::fmt::Display| PipelineError::engine(self.name(), e);
        let profile = plan.mode.profile();
        let base_model = profile
            .base_model
            .ok_or_else(|| fail(&format!("mode {} has no base model", plan.mode)))?;
        let output_dir = plan
            .output_dir
            .as_deref()
            .ok_or_else(|| fail(&"no output directory"))?;

        std::fs::create_dir_all(output_dir).map_err(|e| fail(&e))?;
        let corpus_path = output_dir.join("training_text.txt");
        let script_path = output_dir.join("finetune.py");
        std::fs::write(&corpus_path, dataset.to_corpus()).map_err(|e| fail(&e))?;
        std::fs::write(&script_path, FINETUNE_SCRIPT).map_err(|e| fail(&e))?;

        tracing::info!(
            "🚀 Fine-tuning {} for {} epoch(s), batch {}, {} examples",
            base_model,
            plan.epochs,
            profile.batch_size,
            dataset.len()
        );

        let mut child = Command::new(&self.python)
            .arg(&script_path)
            .arg("--data")
            .arg(&corpus_path)
            .args(["--model", base_model])
            .args(["--epochs", &plan.epochs.to_string()])
            .args(["--batch-size", &profile.batch_size.to_string()])
            .arg("--output")
            .arg(output_dir)
            .args(
                SAMPLE_REVIEWS
                    .iter()
                    .flat_map(|review| ["--sample".to_string(), format!("{} {}", PROMPT_PREFIX, review)]),
            )
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| fail(&format!("could not start {}: {}", self.python, e)))?;

        let mut stderr = child.stderr.take().ok_or_else(|| fail(&"stderr not captured"))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut metrics = Vec::new();
        let mut samples = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match parse_script_line(&line) {
                    ScriptLine::Metric(m) => {
                        tracing::info!("📉 epoch {} loss {:.4}", m.epoch, m.loss);
                        metrics.push(m);
                    }
                    ScriptLine::Sample(sample) => {
                        let mark = if sample.acceptable { "✅" } else { "⚠️" };
                        tracing::info!("🧪 {} {:?} -> {:?}", mark, sample.prompt, sample.response);
                        samples.push(sample);
                    }
                    ScriptLine::Log(line) => tracing::info!("🔄 [trainer] {}", line),
                }
            }
        }

        let status = child.wait().await.map_err(|e| fail(&e))?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            let tail = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("no error output");
            return Err(fail(&format!("{} ({})", tail.trim(), status)));
        }

        let metadata = TrainingMetadata {
            base_model,
            mode: plan.mode,
            epochs: plan.epochs,
            batch_size: profile.batch_size,
            training_samples: dataset.len(),
            label_counts: dataset.label_counts(),
            engine: self.name(),
            trained_at: chrono::Utc::now().to_rfc3339(),
        };
        write_json(&output_dir.join("training_metadata.json"), &metadata).map_err(|e| fail(&e))?;

        Ok(EngineReport {
            artifact_path: Some(output_dir.to_path_buf()),
            metrics,
            samples,
            simulated: false,
        })
    }
}

// ============================================================================
// Simulator (demo)
// ============================================================================

/// Fakes a training run for environments without any ML backend.
/// Ignores the requested epoch count.
pub struct Simulator;

#[derive(Serialize)]
struct SimulatedConfig {
    model_type: &'static str,
    trained_on: &'static str,
    training_samples: usize,
    status: &'static str,
    note: &'static str,
}

impl Simulator {
    fn loss_curve(&self) -> Vec<EpochMetrics> {
        let mut rng = rand::thread_rng();
        let mut loss: f64 = rng.gen_range(3.0..3.6);
        (1..=SIMULATED_EPOCHS)
            .map(|epoch| {
                loss *= rng.gen_range(0.6..0.8);
                EpochMetrics { epoch, loss }
            })
            .collect()
    }

    fn write_artifact(&self, dir: &Path, dataset: &TrainingDataset) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir)?;
        write_json(
            &dir.join("config.json"),
            &SimulatedConfig {
                model_type: "gpt2_simulation",
                trained_on: "customer_reviews",
                training_samples: dataset.len(),
                status: "demo_simulation",
                note: "Demo artifact. Replace with a trained model.",
            },
        )?;
        let responses: BTreeMap<&str, &str> = dataset
            .examples()
            .iter()
            .map(|e| (e.text.as_str(), canonical_reply(e.label)))
            .collect();
        write_json(&dir.join("demo_responses.json"), &responses)
    }
}

#[async_trait::async_trait]
impl Engine for Simulator {
    fn name(&self) -> &'static str {
        "simulator"
    }

    async fn train(&self, dataset: &TrainingDataset, plan: &TrainPlan) -> Result<EngineReport, PipelineError> {
        tracing::info!("🎭 Simulating training on {} examples", dataset.len());
        let metrics = self.loss_curve();
        for m in &metrics {
            tracing::info!("📉 [simulated] epoch {} loss {:.4}", m.epoch, m.loss);
        }

        for review in SAMPLE_REVIEWS {
            let label = sentiment::analyze(review).label;
            tracing::debug!("🧪 {:?} -> {} -> {}", review, label, canonical_reply(label));
        }

        if let Some(dir) = &plan.output_dir {
            self.write_artifact(dir, dataset)
                .map_err(|e| PipelineError::engine(self.name(), format!("{:#}", e)))?;
            tracing::info!("💾 Demo artifact written to {}", dir.display());
        }

        Ok(EngineReport {
            artifact_path: plan.output_dir.clone(),
            metrics,
            samples: Vec::new(),
            simulated: true,
        })
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{convert, synthetic_reviews};

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("review-responder-{}-{}", tag, uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_simulator_decreasing_loss_and_artifact() {
        let dataset = convert(&synthetic_reviews(6)).unwrap();
        let dir = scratch_dir("sim");
        let plan = TrainPlan {
            mode: TrainingMode::Demo,
            epochs: 50,
            output_dir: Some(dir.clone()),
        };
        let report = Simulator.train(&dataset, &plan).await.unwrap();
        assert!(report.simulated);
        assert_eq!(report.metrics.len(), SIMULATED_EPOCHS);
        assert!(report.metrics.windows(2).all(|w| w[1].loss < w[0].loss));
        assert_eq!(report.artifact_path.as_deref(), Some(dir.as_path()));

        let config: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("config.json")).unwrap()).unwrap();
        assert_eq!(config["training_samples"], 6);
        assert!(dir.join("demo_responses.json").exists());
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_simulator_without_output_writes_nothing() {
        let dataset = convert(&synthetic_reviews(3)).unwrap();
        let plan = TrainPlan {
            mode: TrainingMode::Demo,
            epochs: 1,
            output_dir: None,
        };
        let report = Simulator.train(&dataset, &plan).await.unwrap();
        assert!(report.artifact_path.is_none());
    }

    #[tokio::test]
    async fn test_script_engine_missing_interpreter_fails() {
        let dataset = convert(&synthetic_reviews(3)).unwrap();
        let dir = scratch_dir("script");
        let plan = TrainPlan {
            mode: TrainingMode::Light,
            epochs: 1,
            output_dir: Some(dir.clone()),
        };
        let err = ScriptEngine::new("definitely-not-a-python-binary")
            .train(&dataset, &plan)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Engine { engine: "transformers", .. }));
        assert!(dir.join("training_text.txt").exists());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_parse_script_lines() {
        assert_eq!(
            parse_script_line(r#"METRIC {"epoch": 2, "loss": 1.5}"#),
            ScriptLine::Metric(EpochMetrics { epoch: 2, loss: 1.5 })
        );
        match parse_script_line(r#"SAMPLE {"prompt": "Customer review: Top", "response": "Thank you so much for the kind words!"}"#) {
            ScriptLine::Sample(sample) => {
                assert_eq!(sample.prompt, "Customer review: Top");
                assert!(sample.acceptable);
            }
            other => panic!("expected a sample, got {:?}", other),
        }
        assert_eq!(parse_script_line("loading gpt2"), ScriptLine::Log("loading gpt2".to_string()));
        assert_eq!(parse_script_line("METRIC {oops"), ScriptLine::Log("METRIC {oops".to_string()));
    }

    #[test]
    fn test_sample_quality_bounds() {
        assert!(!SampleOutput::new("p".into(), "Merci.".into()).acceptable);
        assert!(!SampleOutput::new("p".into(), "x".repeat(200)).acceptable);
        assert!(SampleOutput::new("p".into(), "Merci pour votre retour".into()).acceptable);
    }

    #[tokio::test]
    async fn test_simulator_reports_no_samples() {
        let dataset = convert(&synthetic_reviews(3)).unwrap();
        let plan = TrainPlan {
            mode: TrainingMode::Demo,
            epochs: 1,
            output_dir: None,
        };
        assert!(Simulator.train(&dataset, &plan).await.unwrap().samples.is_empty());
    }

    #[tokio::test]
    async fn test_script_engine_rejects_demo_mode() {
        let dataset = convert(&synthetic_reviews(3)).unwrap();
        let plan = TrainPlan {
            mode: TrainingMode::Demo,
            epochs: 1,
            output_dir: Some(scratch_dir("demo")),
        };
        assert!(ScriptEngine::new("python3").train(&dataset, &plan).await.is_err());
    }
}
