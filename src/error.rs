use crate::orchestrator::Stage;

/// Errors that end a training run. Everything else in the pipeline
/// (probe failures, remote fetch failures, mode degradations) is recovered
/// locally and reported as a notice instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no usable training examples: {0}")]
    Data(String),
    #[error("training engine `{engine}` failed: {reason}")]
    Engine { engine: &'static str, reason: String },
}

impl PipelineError {
    pub fn engine(engine: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Engine {
            engine,
            reason: err.to_string(),
        }
    }

    /// The stage the run was in when this error ended it.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Data(_) => Stage::Converting,
            Self::Engine { .. } => Stage::Executing,
        }
    }
}
