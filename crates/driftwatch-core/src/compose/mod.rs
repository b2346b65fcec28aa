//! Declared state model.
//!
//! Types for the desired topology parsed from a Compose file, plus the
//! fingerprint used to short-circuit reparsing of unchanged bodies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

mod fingerprint;
mod parse;

pub use fingerprint::fingerprint;
pub use parse::parse_desired_state;

/// Scheduling mode for a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployMode {
    /// Fixed replica count.
    #[default]
    Replicated,
    /// One task per eligible node; the desired count is runtime-dependent.
    Global,
    /// Job with a fixed completion count.
    ReplicatedJob,
    /// Job running once per eligible node.
    GlobalJob,
}

impl DeployMode {
    /// Stable lowercase label matching the orchestrator's wire format.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Replicated => "replicated",
            Self::Global => "global",
            Self::ReplicatedJob => "replicated-job",
            Self::GlobalJob => "global-job",
        }
    }
}

impl std::fmt::Display for DeployMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeployMode {
    type Err = ComposeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replicated" => Ok(Self::Replicated),
            "global" => Ok(Self::Global),
            "replicated-job" => Ok(Self::ReplicatedJob),
            "global-job" => Ok(Self::GlobalJob),
            other => Err(ComposeError::UnsupportedMode(other.to_string())),
        }
    }
}

/// The fields tracked for a declared service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredService {
    /// Image reference; never empty.
    pub image: String,
    /// Scheduling mode.
    pub mode: DeployMode,
    /// Declared replica count; 0 for global mode ("defer to orchestrator").
    pub replicas: u64,
    /// Sorted, de-duplicated config names.
    #[serde(default)]
    pub configs: Vec<String>,
    /// Sorted, de-duplicated secret names.
    #[serde(default)]
    pub secrets: Vec<String>,
}

/// Normalized desired state parsed from a Compose file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    /// Declared services keyed by name.
    pub services: BTreeMap<String, DesiredService>,
}

/// Errors from parsing or fingerprinting a Compose body.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    /// The body was empty.
    #[error("compose body is empty")]
    EmptyBody,

    /// The body was not valid YAML for the Compose schema subset.
    #[error("load compose: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The file declared no services.
    #[error("compose has no services")]
    NoServices,

    /// A service was declared without an image.
    #[error("service {0:?} missing image")]
    MissingImage(String),

    /// A deploy mode outside the supported domain.
    #[error("unsupported deploy mode {0:?}")]
    UnsupportedMode(String),

    /// A config/secret reference without a source name.
    #[error("service {service:?} {resource} reference missing source")]
    MissingSource {
        /// Service holding the reference.
        service: String,
        /// `config` or `secret`.
        resource: &'static str,
    },

    /// A reference to a config/secret with no top-level declaration.
    #[error("service {service:?}: undefined {resource} {name:?}")]
    UndefinedReference {
        /// Service holding the reference.
        service: String,
        /// `config` or `secret`.
        resource: &'static str,
        /// The unresolved source name.
        name: String,
    },
}
