//! Transition detection with stabilization.
//!
//! Diffs the prior snapshot against the current evaluation and decides
//! which status changes are worth alerting on. A status change must hold
//! for the configured number of consecutive cycles before it is emitted;
//! the first run of a stack alerts immediately on anything non-OK.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::health::{DriftDetail, ServiceHealth, ServiceStatus, StackHealth};
use crate::snapshot::StackSnapshot;

/// Replica count movement between the prior and current observation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaChange {
    /// Desired replicas at the prior observation.
    pub previous_desired: u64,
    /// Desired replicas now.
    pub current_desired: u64,
    /// Running replicas at the prior observation.
    pub previous_running: u64,
    /// Running replicas now.
    pub current_running: u64,
    /// `current_desired - previous_desired`.
    pub desired_delta: i64,
    /// `current_running - previous_running`.
    pub running_delta: i64,
}

/// Image references before and after a transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageChange {
    /// Declared image at the prior observation.
    pub previous_desired: String,
    /// Declared image now.
    pub current_desired: String,
    /// Observed image at the prior observation.
    pub previous_actual: String,
    /// Observed image now.
    pub current_actual: String,
}

/// A per-service status change deemed worthy of alerting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTransition {
    /// Service name.
    pub name: String,
    /// Last notified status; `None` when the service is new to us.
    pub previous_status: Option<ServiceStatus>,
    /// Status being alerted on.
    pub current_status: ServiceStatus,
    /// Current reasons for the status.
    pub reasons: Vec<String>,
    /// Current drift findings.
    pub drift: Vec<DriftDetail>,
    /// Replica movement, when there is anything meaningful to report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_change: Option<ReplicaChange>,
    /// Image movement, when there is anything meaningful to report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_change: Option<ImageChange>,
}

/// Applies stabilization bookkeeping and computes emitted transitions.
///
/// Returns the updated per-service health map to persist (with
/// `consecutive_cycles` and `last_notified_status` maintained) and the
/// transitions to emit this cycle, sorted by service name. Services present
/// in the prior snapshot but absent from the current evaluation are dropped
/// without a transition.
#[must_use]
pub fn stabilize_transitions(
    prev: Option<&StackSnapshot>,
    current: &StackHealth,
    stabilization_cycles: u32,
) -> (BTreeMap<String, ServiceHealth>, Vec<ServiceTransition>) {
    let stabilization = stabilization_cycles.max(1);

    static EMPTY: BTreeMap<String, ServiceHealth> = BTreeMap::new();
    let prev_services = prev.map_or(&EMPTY, |snapshot| &snapshot.services);
    let first_run = prev_services.is_empty();

    let mut updated = BTreeMap::new();
    let mut transitions = Vec::new();

    for (name, service) in &current.services {
        let prev_service = prev_services.get(name);

        let consecutive = match prev_service {
            Some(previous) if previous.status == service.status => {
                previous.consecutive_cycles.saturating_add(1).max(2)
            }
            _ => 1,
        };

        // A service that was observed but never notified falls back to its
        // prior status, so a flap back to it stays quiet.
        let last_notified = prev_service
            .and_then(|previous| previous.last_notified_status)
            .or(prev_service.map(|previous| previous.status));

        let mut entry = service.clone();
        entry.consecutive_cycles = consecutive;
        entry.last_notified_status = last_notified;

        let changed = match last_notified {
            Some(notified) => service.status != notified,
            // New service after the first run: alert only on non-OK.
            None => service.status != ServiceStatus::Ok,
        };
        let should_notify = if first_run {
            service.status != ServiceStatus::Ok
        } else {
            changed && (stabilization <= 1 || consecutive >= stabilization)
        };

        if should_notify {
            transitions.push(ServiceTransition {
                name: name.clone(),
                previous_status: if first_run { None } else { last_notified },
                current_status: service.status,
                reasons: service.reasons.clone(),
                drift: service.drift.clone(),
                replica_change: build_replica_change(prev_service, service),
                image_change: build_image_change(prev_service, service),
            });
            entry.last_notified_status = Some(service.status);
        } else if changed {
            // A status change still waiting out the stabilization barrier
            // keeps the last notified observation as its baseline, so the
            // eventual alert reports deltas against what was last reported
            // rather than against the previous flapping cycle.
            if let Some(previous) = prev_service {
                entry.desired_replicas = previous.desired_replicas;
                entry.running_replicas = previous.running_replicas;
                entry.desired_image.clone_from(&previous.desired_image);
                entry.actual_image.clone_from(&previous.actual_image);
            }
        }

        updated.insert(name.clone(), entry);
    }

    (updated, transitions)
}

#[allow(clippy::cast_possible_wrap)] // replica counts stay far below i64::MAX
fn build_replica_change(
    prev: Option<&ServiceHealth>,
    current: &ServiceHealth,
) -> Option<ReplicaChange> {
    if prev.is_none() && current.desired_replicas == 0 && current.running_replicas == 0 {
        return None;
    }
    let (previous_desired, previous_running) =
        prev.map_or((0, 0), |p| (p.desired_replicas, p.running_replicas));
    Some(ReplicaChange {
        previous_desired,
        current_desired: current.desired_replicas,
        previous_running,
        current_running: current.running_replicas,
        desired_delta: current.desired_replicas as i64 - previous_desired as i64,
        running_delta: current.running_replicas as i64 - previous_running as i64,
    })
}

fn build_image_change(prev: Option<&ServiceHealth>, current: &ServiceHealth) -> Option<ImageChange> {
    if prev.is_none() && current.desired_image.is_empty() && current.actual_image.is_empty() {
        return None;
    }
    let (previous_desired, previous_actual) = prev.map_or_else(
        || (String::new(), String::new()),
        |p| (p.desired_image.clone(), p.actual_image.clone()),
    );
    Some(ImageChange {
        previous_desired,
        current_desired: current.desired_image.clone(),
        previous_actual,
        current_actual: current.actual_image.clone(),
    })
}
