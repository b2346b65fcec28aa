//! Persisted snapshot schema.
//!
//! The JSON document the state store reads and writes between cycles. The
//! schema is versioned; see the store in the daemon crate for the upgrade
//! and discard rules.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::ServiceHealth;

/// Current schema version for the persisted state file.
pub const CURRENT_STATE_VERSION: u32 = 1;

/// The persisted health state for one stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSnapshot {
    /// Fingerprint of the desired compose body at evaluation time.
    #[serde(default)]
    pub desired_fingerprint: String,
    /// Per-service health at the last evaluation.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceHealth>,
    /// When the snapshot was evaluated.
    pub evaluated_at: DateTime<Utc>,
}

/// Snapshots for all stacks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Schema version; 0 marks the pre-versioned format.
    #[serde(default)]
    pub version: u32,
    /// Per-stack snapshots keyed by stack name.
    #[serde(default)]
    pub stacks: BTreeMap<String, StackSnapshot>,
}

impl State {
    /// An empty state at the current schema version.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: CURRENT_STATE_VERSION,
            stacks: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ServiceStatus;

    #[test]
    fn state_round_trips_through_json() {
        let mut state = State::empty();
        state.stacks.insert(
            "edge".to_string(),
            StackSnapshot {
                desired_fingerprint: "abc123".to_string(),
                services: BTreeMap::from([(
                    "api".to_string(),
                    ServiceHealth {
                        name: "api".to_string(),
                        status: ServiceStatus::Degraded,
                        reasons: vec!["replicas running 1/2".to_string()],
                        desired_replicas: 2,
                        running_replicas: 1,
                        consecutive_cycles: 3,
                        last_notified_status: Some(ServiceStatus::Ok),
                        ..ServiceHealth::default()
                    },
                )]),
                evaluated_at: Utc::now(),
            },
        );

        let json = serde_json::to_vec(&state).unwrap();
        let back: State = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn missing_version_defaults_to_zero() {
        let state: State = serde_json::from_str(r#"{"stacks":{}}"#).unwrap();
        assert_eq!(state.version, 0);
    }
}
