//! Docker Engine API wire model.
//!
//! The subset of the `/services` and `/tasks` response schemas the sentinel
//! reads. Everything is optional-with-defaults: the Engine omits empty
//! fields and this model must tolerate any of them missing.

use serde::Deserialize;

/// A service from `GET /services`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Service {
    /// Service ID.
    #[serde(rename = "ID")]
    pub id: String,
    /// Declared service spec.
    pub spec: ServiceSpec,
    /// Aggregated task counts; present when `status=true` is requested.
    pub service_status: Option<ServiceStatus>,
    /// Rollout status; present only during/after an update.
    pub update_status: Option<UpdateStatus>,
}

/// The declared part of a service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ServiceSpec {
    /// Full service name (stack prefix included).
    pub name: String,
    /// Task template carrying the container spec.
    pub task_template: TaskSpec,
    /// Scheduling mode.
    pub mode: ServiceMode,
}

/// Task template / task spec.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TaskSpec {
    /// Container settings.
    pub container_spec: Option<ContainerSpec>,
}

/// Container settings within a task spec.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ContainerSpec {
    /// Image reference, possibly digest-pinned.
    pub image: String,
    /// Config attachments.
    pub configs: Vec<ConfigReference>,
    /// Secret attachments.
    pub secrets: Vec<SecretReference>,
}

/// A config attached to a container spec.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ConfigReference {
    /// Config name.
    pub config_name: String,
}

/// A secret attached to a container spec.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SecretReference {
    /// Secret name.
    pub secret_name: String,
}

/// Scheduling mode; exactly one branch is set by the Engine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ServiceMode {
    /// Replicated mode with an optional fixed count.
    pub replicated: Option<ReplicatedMode>,
    /// Global mode (one task per node).
    pub global: Option<serde_json::Value>,
    /// Replicated job.
    pub replicated_job: Option<serde_json::Value>,
    /// Global job.
    pub global_job: Option<serde_json::Value>,
}

/// Replicated mode settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ReplicatedMode {
    /// Declared replica count, when set.
    pub replicas: Option<u64>,
}

/// Aggregated task counts reported with `status=true`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ServiceStatus {
    /// Tasks currently running.
    pub running_tasks: u64,
    /// Tasks the orchestrator wants running.
    pub desired_tasks: u64,
}

/// Rollout status.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct UpdateStatus {
    /// e.g. `updating`, `paused`, `rollback_started`.
    pub state: Option<String>,
}

/// A task from `GET /tasks`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Task {
    /// Task ID.
    #[serde(rename = "ID")]
    pub id: String,
    /// Owning service ID.
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    /// Task runtime status.
    pub status: TaskStatus,
    /// Task spec (carries the realized container spec).
    pub spec: TaskSpec,
}

/// Task runtime status.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TaskStatus {
    /// Task state, e.g. `running`, `failed`, `shutdown`.
    pub state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_realistic_service() {
        let json = r#"{
            "ID": "9mnpnzenvg8p8tdbtq4wvbkcz",
            "Version": {"Index": 19},
            "Spec": {
                "Name": "edge_api",
                "TaskTemplate": {
                    "ContainerSpec": {
                        "Image": "app:v1@sha256:0d9c",
                        "Configs": [{"ConfigID": "c1", "ConfigName": "app_config"}],
                        "Secrets": [{"SecretID": "s1", "SecretName": "db_password"}]
                    }
                },
                "Mode": {"Replicated": {"Replicas": 3}}
            },
            "ServiceStatus": {"RunningTasks": 2, "DesiredTasks": 3},
            "UpdateStatus": {"State": "updating", "Message": "update in progress"}
        }"#;
        let service: Service = serde_json::from_str(json).unwrap();
        assert_eq!(service.id, "9mnpnzenvg8p8tdbtq4wvbkcz");
        assert_eq!(service.spec.name, "edge_api");
        let container = service.spec.task_template.container_spec.unwrap();
        assert_eq!(container.image, "app:v1@sha256:0d9c");
        assert_eq!(container.configs[0].config_name, "app_config");
        assert_eq!(container.secrets[0].secret_name, "db_password");
        assert_eq!(service.spec.mode.replicated.unwrap().replicas, Some(3));
        assert_eq!(service.service_status.unwrap().desired_tasks, 3);
        assert_eq!(service.update_status.unwrap().state.as_deref(), Some("updating"));
    }

    #[test]
    fn tolerates_sparse_payloads() {
        let service: Service = serde_json::from_str(r#"{"ID": "abc"}"#).unwrap();
        assert_eq!(service.id, "abc");
        assert!(service.spec.mode.replicated.is_none());
        assert!(service.service_status.is_none());

        let task: Task = serde_json::from_str(r#"{"ID": "t1", "ServiceID": "abc"}"#).unwrap();
        assert_eq!(task.status.state, "");
    }

    #[test]
    fn decodes_global_mode() {
        let json = r#"{"ID": "x", "Spec": {"Name": "edge_agent", "Mode": {"Global": {}}}}"#;
        let service: Service = serde_json::from_str(json).unwrap();
        assert!(service.spec.mode.global.is_some());
        assert!(service.spec.mode.replicated.is_none());
    }
}
