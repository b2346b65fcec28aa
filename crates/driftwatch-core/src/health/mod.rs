//! Health model.
//!
//! Types describing the evaluated health of services and stacks, and the
//! drift findings that explain a non-OK verdict.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

mod evaluate;

pub use evaluate::evaluate_stack_health;

/// Health verdict for a single service or a whole stack.
///
/// Variants are ordered by severity, so `max` implements the
/// "worsening never improves" aggregation rule.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ServiceStatus {
    /// Service matches its declared state.
    #[default]
    #[serde(rename = "OK")]
    Ok,
    /// Service is running but diverges from the declared state.
    #[serde(rename = "DEGRADED")]
    Degraded,
    /// Service is absent or has no running replicas.
    #[serde(rename = "FAILED")]
    Failed,
}

impl ServiceStatus {
    /// Stable uppercase label used in logs and wire payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Degraded => "DEGRADED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The type of drift detected between declared and observed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriftKind {
    /// Declared resource not observed on any running task.
    #[serde(rename = "MISSING")]
    Missing,
    /// Observed resource that is not declared.
    #[serde(rename = "EXTRA")]
    Extra,
    /// Observed service that is not declared (stack-scoped only).
    #[serde(rename = "EXTRA_SERVICE")]
    ExtraService,
}

impl std::fmt::Display for DriftKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => f.write_str("MISSING"),
            Self::Extra => f.write_str("EXTRA"),
            Self::ExtraService => f.write_str("EXTRA_SERVICE"),
        }
    }
}

/// The kind of resource a drift finding refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Swarm config attached to a service.
    Config,
    /// Swarm secret attached to a service.
    Secret,
    /// The service itself.
    Service,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config => f.write_str("config"),
            Self::Secret => f.write_str("secret"),
            Self::Service => f.write_str("service"),
        }
    }
}

/// A single drift finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftDetail {
    /// What happened to the resource.
    pub kind: DriftKind,
    /// What kind of resource drifted.
    pub resource: ResourceKind,
    /// Name of the drifted resource.
    pub name: String,
}

/// Health evaluation output for a single service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    /// Service name (stack prefix stripped).
    pub name: String,
    /// Evaluated status.
    pub status: ServiceStatus,
    /// Human-readable reasons, in fixed rule order.
    #[serde(default)]
    pub reasons: Vec<String>,
    /// Drift findings, missing before extra, names sorted within each rule.
    #[serde(default)]
    pub drift: Vec<DriftDetail>,
    /// Declared image, digest suffix stripped.
    #[serde(default)]
    pub desired_image: String,
    /// Observed image, digest suffix stripped.
    #[serde(default)]
    pub actual_image: String,
    /// Declared replica count (orchestrator-reported for global mode).
    #[serde(default)]
    pub desired_replicas: u64,
    /// Observed running replica count.
    #[serde(default)]
    pub running_replicas: u64,
    /// Consecutive cycles this service has held its current status.
    #[serde(default)]
    pub consecutive_cycles: u32,
    /// Status carried by the most recent emitted transition, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_notified_status: Option<ServiceStatus>,
}

/// Aggregated health for a stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackHealth {
    /// Max severity across all services; `OK` for an empty stack.
    pub status: ServiceStatus,
    /// Per-service verdicts, keyed by service name.
    pub services: BTreeMap<String, ServiceHealth>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_severity_ordering() {
        assert!(ServiceStatus::Ok < ServiceStatus::Degraded);
        assert!(ServiceStatus::Degraded < ServiceStatus::Failed);
        assert_eq!(
            ServiceStatus::Degraded.max(ServiceStatus::Failed),
            ServiceStatus::Failed
        );
        // Worsening never improves.
        assert_eq!(
            ServiceStatus::Failed.max(ServiceStatus::Ok),
            ServiceStatus::Failed
        );
    }

    #[test]
    fn status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&ServiceStatus::Degraded).unwrap(),
            "\"DEGRADED\""
        );
        let parsed: ServiceStatus = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(parsed, ServiceStatus::Failed);
    }

    #[test]
    fn drift_detail_round_trips() {
        let detail = DriftDetail {
            kind: DriftKind::ExtraService,
            resource: ResourceKind::Service,
            name: "stray".to_string(),
        };
        let json = serde_json::to_string(&detail).unwrap();
        assert!(json.contains("EXTRA_SERVICE"));
        assert!(json.contains("\"service\""));
        let back: DriftDetail = serde_json::from_str(&json).unwrap();
        assert_eq!(back, detail);
    }
}
