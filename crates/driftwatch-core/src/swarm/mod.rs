//! Observed state model.
//!
//! The runtime topology read from the orchestrator, normalized for
//! comparison against the declared state. The API client that produces
//! these values lives in the daemon crate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::compose::DeployMode;

/// A service's observed runtime state.
///
/// For global mode services, `desired_replicas` is populated from the
/// orchestrator's reported desired task count, which depends on node
/// availability and placement constraints and is only known at runtime.
/// Compare images with [`normalize_image`] to avoid digest-induced false
/// mismatches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualService {
    /// Service name, stack prefix stripped when stack-scoped.
    pub name: String,
    /// Image reference; may carry an `@sha256:...` digest suffix.
    pub image: String,
    /// Scheduling mode reported by the orchestrator.
    pub mode: DeployMode,
    /// Target replica count (from the spec, or the orchestrator's status).
    pub desired_replicas: u64,
    /// Count of tasks in the `running` state.
    pub running_replicas: u64,
    /// Sorted config names observed on running tasks.
    #[serde(default)]
    pub configs: Vec<String>,
    /// Sorted secret names observed on running tasks.
    #[serde(default)]
    pub secrets: Vec<String>,
    /// Update state when a rollout is in flight (e.g. `updating`), else empty.
    #[serde(default)]
    pub update_state: String,
}

/// The complete observed topology for one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualState {
    /// Observed services keyed by normalized name.
    pub services: BTreeMap<String, ActualService>,
}

/// Strips the `@sha256:...` digest suffix from an image reference.
///
/// The orchestrator appends the resolved digest to image references after
/// pulling, which would otherwise produce false mismatches against the
/// declared image.
#[must_use]
pub fn normalize_image(image: &str) -> &str {
    match image.find("@sha256:") {
        Some(idx) => &image[..idx],
        None => image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_image_strips_digest() {
        assert_eq!(normalize_image("nginx:1.23@sha256:abc123"), "nginx:1.23");
        assert_eq!(
            normalize_image("registry.example.com/app:v1@sha256:def456"),
            "registry.example.com/app:v1"
        );
        assert_eq!(normalize_image("nginx@sha256:abc123"), "nginx");
    }

    #[test]
    fn normalize_image_passes_plain_references() {
        assert_eq!(normalize_image("nginx:1.23"), "nginx:1.23");
        assert_eq!(normalize_image(""), "");
    }
}
