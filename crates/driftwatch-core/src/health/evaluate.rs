//! Deterministic health evaluation.
//!
//! Pure comparison of declared vs observed state; no I/O. Identical inputs
//! always yield identical output.

use std::collections::BTreeSet;

use crate::compose::{DeployMode, DesiredService, DesiredState};
use crate::swarm::{normalize_image, ActualService, ActualState};

use super::{DriftDetail, DriftKind, ResourceKind, ServiceHealth, ServiceStatus, StackHealth};

/// Compares desired and actual state to compute per-service and stack health.
///
/// When `stack_scoped` is true, observed services absent from the desired
/// state are reported as `EXTRA_SERVICE` drift; when false they are ignored
/// entirely.
#[must_use]
pub fn evaluate_stack_health(
    desired: &DesiredState,
    actual: &ActualState,
    stack_scoped: bool,
) -> StackHealth {
    let mut result = StackHealth::default();

    for (name, desired_service) in &desired.services {
        let health = match actual.services.get(name) {
            Some(actual_service) => evaluate_service(name, desired_service, actual_service),
            None => ServiceHealth {
                name: name.clone(),
                status: ServiceStatus::Failed,
                reasons: vec!["missing service".to_string()],
                desired_image: normalize_image(&desired_service.image).to_string(),
                desired_replicas: desired_service.replicas,
                ..ServiceHealth::default()
            },
        };
        result.status = result.status.max(health.status);
        result.services.insert(name.clone(), health);
    }

    if stack_scoped {
        for (name, actual_service) in &actual.services {
            if desired.services.contains_key(name) {
                continue;
            }
            let health = ServiceHealth {
                name: name.clone(),
                status: ServiceStatus::Degraded,
                reasons: vec!["extra service".to_string()],
                actual_image: normalize_image(&actual_service.image).to_string(),
                desired_replicas: actual_service.desired_replicas,
                running_replicas: actual_service.running_replicas,
                drift: vec![DriftDetail {
                    kind: DriftKind::ExtraService,
                    resource: ResourceKind::Service,
                    name: actual_service.name.clone(),
                }],
                ..ServiceHealth::default()
            };
            result.status = result.status.max(health.status);
            result.services.insert(name.clone(), health);
        }
    }

    result
}

fn evaluate_service(name: &str, desired: &DesiredService, actual: &ActualService) -> ServiceHealth {
    let mut health = ServiceHealth {
        name: name.to_string(),
        ..ServiceHealth::default()
    };

    let desired_image = normalize_image(&desired.image).to_string();
    let actual_image = normalize_image(&actual.image).to_string();
    if desired_image != actual_image {
        health.status = health.status.max(ServiceStatus::Degraded);
        health
            .reasons
            .push(format!("image mismatch: want {desired_image} got {actual_image}"));
    }
    health.desired_image = desired_image;
    health.actual_image = actual_image;

    // Global services defer to the orchestrator's node-dependent count.
    let desired_replicas = if desired.mode == DeployMode::Global {
        actual.desired_replicas
    } else {
        desired.replicas
    };
    health.desired_replicas = desired_replicas;
    health.running_replicas = actual.running_replicas;

    // An in-flight service update suppresses replica noise, but a service
    // with zero running replicas is failed no matter what.
    let update_in_progress = !actual.update_state.is_empty() && actual.running_replicas > 0;
    if desired_replicas > 0 {
        if actual.running_replicas == 0 {
            health.status = health.status.max(ServiceStatus::Failed);
            health
                .reasons
                .push(format!("no running replicas (desired {desired_replicas})"));
        } else if !update_in_progress && actual.running_replicas != desired_replicas {
            health.status = health.status.max(ServiceStatus::Degraded);
            health.reasons.push(format!(
                "replicas running {}/{desired_replicas}",
                actual.running_replicas
            ));
        }
    }

    apply_drift(
        &mut health,
        ResourceKind::Config,
        &desired.configs,
        &actual.configs,
    );
    apply_drift(
        &mut health,
        ResourceKind::Secret,
        &desired.secrets,
        &actual.secrets,
    );

    for drift in &health.drift {
        let worsened = match drift.kind {
            DriftKind::Missing => ServiceStatus::Failed,
            DriftKind::Extra => ServiceStatus::Degraded,
            DriftKind::ExtraService => continue,
        };
        health.status = health.status.max(worsened);
    }

    health
}

fn apply_drift(
    health: &mut ServiceHealth,
    resource: ResourceKind,
    desired: &[String],
    actual: &[String],
) {
    let (missing, extra) = diff_names(desired, actual);
    for name in missing {
        health.reasons.push(format!("missing {resource}: {name}"));
        health.drift.push(DriftDetail {
            kind: DriftKind::Missing,
            resource,
            name,
        });
    }
    for name in extra {
        health.reasons.push(format!("extra {resource}: {name}"));
        health.drift.push(DriftDetail {
            kind: DriftKind::Extra,
            resource,
            name,
        });
    }
}

/// Sorted set differences between declared and observed names.
fn diff_names(desired: &[String], actual: &[String]) -> (Vec<String>, Vec<String>) {
    let desired_set: BTreeSet<&str> = desired.iter().map(String::as_str).collect();
    let actual_set: BTreeSet<&str> = actual.iter().map(String::as_str).collect();
    let missing = desired_set
        .difference(&actual_set)
        .map(ToString::to_string)
        .collect();
    let extra = actual_set
        .difference(&desired_set)
        .map(ToString::to_string)
        .collect();
    (missing, extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::DeployMode;

    fn desired(services: &[(&str, DesiredService)]) -> DesiredState {
        DesiredState {
            services: services
                .iter()
                .map(|(name, svc)| ((*name).to_string(), svc.clone()))
                .collect(),
        }
    }

    fn actual(services: &[(&str, ActualService)]) -> ActualState {
        ActualState {
            services: services
                .iter()
                .map(|(name, svc)| ((*name).to_string(), svc.clone()))
                .collect(),
        }
    }

    fn replicated(image: &str, replicas: u64) -> DesiredService {
        DesiredService {
            image: image.to_string(),
            mode: DeployMode::Replicated,
            replicas,
            configs: Vec::new(),
            secrets: Vec::new(),
        }
    }

    fn running(image: &str, desired: u64, running: u64) -> ActualService {
        ActualService {
            name: String::new(),
            image: image.to_string(),
            mode: DeployMode::Replicated,
            desired_replicas: desired,
            running_replicas: running,
            configs: Vec::new(),
            secrets: Vec::new(),
            update_state: String::new(),
        }
    }

    #[test]
    fn missing_service_fails() {
        let health = evaluate_stack_health(
            &desired(&[("api", replicated("app:v1", 2))]),
            &ActualState::default(),
            true,
        );
        assert_eq!(health.status, ServiceStatus::Failed);
        let api = &health.services["api"];
        assert_eq!(api.status, ServiceStatus::Failed);
        assert_eq!(api.reasons, vec!["missing service"]);
        assert_eq!(api.desired_replicas, 2);
    }

    #[test]
    fn matching_service_is_ok() {
        let health = evaluate_stack_health(
            &desired(&[("api", replicated("app:v1", 2))]),
            &actual(&[("api", running("app:v1", 2, 2))]),
            true,
        );
        assert_eq!(health.status, ServiceStatus::Ok);
        assert!(health.services["api"].reasons.is_empty());
    }

    #[test]
    fn image_mismatch_ignores_digest() {
        let health = evaluate_stack_health(
            &desired(&[("web", replicated("nginx:1.23", 1))]),
            &actual(&[("web", running("nginx:1.24@sha256:abc", 1, 1))]),
            true,
        );
        let web = &health.services["web"];
        assert_eq!(web.status, ServiceStatus::Degraded);
        assert_eq!(web.reasons, vec!["image mismatch: want nginx:1.23 got nginx:1.24"]);
    }

    #[test]
    fn same_image_with_digest_is_ok() {
        let health = evaluate_stack_health(
            &desired(&[("web", replicated("nginx:1.23", 1))]),
            &actual(&[("web", running("nginx:1.23@sha256:abc", 1, 1))]),
            true,
        );
        assert_eq!(health.services["web"].status, ServiceStatus::Ok);
    }

    #[test]
    fn zero_running_replicas_fail() {
        let health = evaluate_stack_health(
            &desired(&[("api", replicated("app:v1", 3))]),
            &actual(&[("api", running("app:v1", 3, 0))]),
            true,
        );
        let api = &health.services["api"];
        assert_eq!(api.status, ServiceStatus::Failed);
        assert_eq!(api.reasons, vec!["no running replicas (desired 3)"]);
    }

    #[test]
    fn replica_shortfall_and_excess_degrade() {
        for observed in [1, 5] {
            let health = evaluate_stack_health(
                &desired(&[("api", replicated("app:v1", 3))]),
                &actual(&[("api", running("app:v1", 3, observed))]),
                true,
            );
            let api = &health.services["api"];
            assert_eq!(api.status, ServiceStatus::Degraded);
            assert_eq!(api.reasons, vec![format!("replicas running {observed}/3")]);
        }
    }

    #[test]
    fn global_mode_uses_observed_desired_count() {
        let svc = DesiredService {
            mode: DeployMode::Global,
            replicas: 0,
            ..replicated("agent:v2", 0)
        };
        let health = evaluate_stack_health(
            &desired(&[("agent", svc)]),
            &actual(&[("agent", running("agent:v2", 4, 3))]),
            true,
        );
        let agent = &health.services["agent"];
        assert_eq!(agent.desired_replicas, 4);
        assert_eq!(agent.status, ServiceStatus::Degraded);
        assert_eq!(agent.reasons, vec!["replicas running 3/4"]);
    }

    #[test]
    fn update_in_progress_suppresses_replica_reasons() {
        let mut observed = running("app:v1", 3, 1);
        observed.update_state = "updating".to_string();
        let health = evaluate_stack_health(
            &desired(&[("api", replicated("app:v1", 3))]),
            &actual(&[("api", observed)]),
            true,
        );
        let api = &health.services["api"];
        assert_eq!(api.status, ServiceStatus::Ok);
        assert!(api.reasons.is_empty());
    }

    #[test]
    fn update_in_progress_does_not_mask_zero_replicas() {
        let mut observed = running("app:v1", 3, 0);
        observed.update_state = "updating".to_string();
        let health = evaluate_stack_health(
            &desired(&[("api", replicated("app:v1", 3))]),
            &actual(&[("api", observed)]),
            true,
        );
        assert_eq!(health.services["api"].status, ServiceStatus::Failed);
    }

    #[test]
    fn update_in_progress_keeps_image_and_drift_rules() {
        let mut observed = running("app:v2", 3, 1);
        observed.update_state = "updating".to_string();
        observed.secrets = vec!["stray".to_string()];
        let health = evaluate_stack_health(
            &desired(&[("api", replicated("app:v1", 3))]),
            &actual(&[("api", observed)]),
            true,
        );
        let api = &health.services["api"];
        assert_eq!(api.status, ServiceStatus::Degraded);
        assert_eq!(
            api.reasons,
            vec!["image mismatch: want app:v1 got app:v2", "extra secret: stray"]
        );
    }

    #[test]
    fn config_and_secret_drift() {
        let svc = DesiredService {
            configs: vec!["cfg1".to_string()],
            secrets: vec!["sec1".to_string()],
            ..replicated("app:v1", 1)
        };
        let mut observed = running("app:v1", 1, 1);
        observed.secrets = vec!["sec1".to_string(), "sec2".to_string()];
        let health = evaluate_stack_health(
            &desired(&[("api", svc)]),
            &actual(&[("api", observed)]),
            true,
        );
        let api = &health.services["api"];
        assert_eq!(api.status, ServiceStatus::Failed);
        assert_eq!(api.reasons, vec!["missing config: cfg1", "extra secret: sec2"]);
        assert_eq!(
            api.drift,
            vec![
                DriftDetail {
                    kind: DriftKind::Missing,
                    resource: ResourceKind::Config,
                    name: "cfg1".to_string(),
                },
                DriftDetail {
                    kind: DriftKind::Extra,
                    resource: ResourceKind::Secret,
                    name: "sec2".to_string(),
                },
            ]
        );
    }

    #[test]
    fn drift_names_are_sorted() {
        let svc = DesiredService {
            configs: vec!["b".to_string(), "a".to_string()],
            ..replicated("app:v1", 1)
        };
        let health = evaluate_stack_health(
            &desired(&[("api", svc)]),
            &actual(&[("api", running("app:v1", 1, 1))]),
            true,
        );
        let names: Vec<&str> = health.services["api"]
            .drift
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn extra_service_only_when_scoped() {
        let observed = actual(&[("stray", {
            let mut svc = running("ghost:v1", 1, 1);
            svc.name = "stray".to_string();
            svc
        })]);

        let scoped = evaluate_stack_health(&DesiredState::default(), &observed, true);
        assert_eq!(scoped.status, ServiceStatus::Degraded);
        let stray = &scoped.services["stray"];
        assert_eq!(stray.reasons, vec!["extra service"]);
        assert_eq!(stray.drift[0].kind, DriftKind::ExtraService);

        let unscoped = evaluate_stack_health(&DesiredState::default(), &observed, false);
        assert!(unscoped.services.is_empty());
        assert_eq!(unscoped.status, ServiceStatus::Ok);
    }

    #[test]
    fn stack_status_is_max_severity() {
        let health = evaluate_stack_health(
            &desired(&[
                ("ok", replicated("a:1", 1)),
                ("degraded", replicated("b:1", 2)),
                ("failed", replicated("c:1", 1)),
            ]),
            &actual(&[
                ("ok", running("a:1", 1, 1)),
                ("degraded", running("b:1", 2, 1)),
            ]),
            true,
        );
        assert_eq!(health.status, ServiceStatus::Failed);
        assert_eq!(health.services["ok"].status, ServiceStatus::Ok);
        assert_eq!(health.services["degraded"].status, ServiceStatus::Degraded);
        assert_eq!(health.services["failed"].status, ServiceStatus::Failed);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let d = desired(&[("api", replicated("app:v1", 2))]);
        let a = actual(&[("api", running("app:v2", 2, 1))]);
        let first = evaluate_stack_health(&d, &a, true);
        let second = evaluate_stack_health(&d, &a, true);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }
}
