//! Training mode selection.
//!
//! `resolve` turns a requested mode into a concrete one using the capability
//! map. When the result is weaker than what was explicitly asked for, the
//! resolution carries a [`Degradation`] notice that ends up in the run result.

use crate::capability::{Capability, CapabilityMap};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingMode {
    Demo,
    Light,
    Full,
}

impl TrainingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Demo => "demo",
            Self::Light => "light",
            Self::Full => "full",
        }
    }

    /// Engine parameters for this mode.
    pub fn profile(&self) -> ModeProfile {
        match self {
            Self::Demo => ModeProfile {
                base_model: None,
                batch_size: 0,
                description: "simulation without ML",
            },
            Self::Light => ModeProfile {
                base_model: Some("distilgpt2"),
                batch_size: 1,
                description: "light fine-tuning with DistilGPT-2",
            },
            Self::Full => ModeProfile {
                base_model: Some("gpt2"),
                batch_size: 2,
                description: "full fine-tuning with GPT-2",
            },
        }
    }
}

impl fmt::Display for TrainingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeProfile {
    pub base_model: Option<&'static str>,
    pub batch_size: usize,
    pub description: &'static str,
}

/// What the caller asked for. `Auto` never reaches an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestedMode {
    Auto,
    Demo,
    Light,
    Full,
}

impl FromStr for RequestedMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "demo" => Ok(Self::Demo),
            "light" => Ok(Self::Light),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown mode `{}` (expected auto, demo, light or full)", other)),
        }
    }
}

impl fmt::Display for RequestedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Demo => "demo",
            Self::Light => "light",
            Self::Full => "full",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Degradation {
    pub requested: TrainingMode,
    pub resolved: TrainingMode,
    pub reason: String,
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} degraded to {}: {}", self.requested, self.resolved, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub mode: TrainingMode,
    pub reason: String,
    pub degradation: Option<Degradation>,
}

/// Decision table, first match wins:
///
/// | requested | neural | numeric | resolved |
/// |-----------|--------|---------|----------|
/// | full      | yes    | yes     | full     |
/// | full      | no     | any     | light*   |
/// | full      | yes    | no      | light*   |
/// | light     | any    | yes     | light    |
/// | light     | yes    | no      | light    |
/// | light     | no     | no      | demo*    |
/// | demo      | any    | any     | demo     |
/// | auto      | yes    | yes     | full     |
/// | auto      | yes    | no      | light    |
/// | auto      | no     | any     | demo     |
///
/// `*` rows carry a degradation notice.
pub fn resolve(requested: RequestedMode, capabilities: &CapabilityMap) -> Resolution {
    let neural = capabilities.is_available(Capability::Neural);
    let numeric = capabilities.is_available(Capability::Numeric);

    let (mode, reason) = match (requested, neural, numeric) {
        (RequestedMode::Full, true, true) => (TrainingMode::Full, "neural and numeric backends available"),
        (RequestedMode::Full, false, _) => (TrainingMode::Light, "neural training backend unavailable"),
        (RequestedMode::Full, true, false) => (TrainingMode::Light, "numeric array backend unavailable"),
        (RequestedMode::Light, _, true) => (TrainingMode::Light, "numeric backend available"),
        (RequestedMode::Light, true, false) => (TrainingMode::Light, "neural backend available"),
        (RequestedMode::Light, false, false) => (TrainingMode::Demo, "no numeric or neural backend available"),
        (RequestedMode::Demo, _, _) => (TrainingMode::Demo, "demo requested"),
        (RequestedMode::Auto, true, true) => (TrainingMode::Full, "complete environment detected"),
        (RequestedMode::Auto, true, false) => (TrainingMode::Light, "neural backend without numeric arrays"),
        (RequestedMode::Auto, false, _) => (TrainingMode::Demo, "neural training backend unavailable"),
    };

    let explicit = match requested {
        RequestedMode::Auto => None,
        RequestedMode::Demo => Some(TrainingMode::Demo),
        RequestedMode::Light => Some(TrainingMode::Light),
        RequestedMode::Full => Some(TrainingMode::Full),
    };
    let degradation = explicit.filter(|wanted| *wanted != mode).map(|wanted| Degradation {
        requested: wanted,
        resolved: mode,
        reason: reason.to_string(),
    });

    Resolution {
        mode,
        reason: reason.to_string(),
        degradation,
    }
}
