//! Swarm API client.
//!
//! Speaks the Docker Engine HTTP API (`/services`, `/tasks`, `/_ping`) and
//! normalizes the response into the core observed-state model. The client
//! is shared read-only across all runners.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use driftwatch_core::compose::DeployMode;
use driftwatch_core::swarm::{ActualService, ActualState};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::config::DockerTls;

pub mod wire;

/// Hard page-size ceiling of Engine list endpoints. A page this large is
/// assumed truncated and triggers ID-prefix partitioning.
const MAX_LIST_PAGE_SIZE: usize = 1000;
const MAX_ID_PREFIX_DEPTH: usize = 2;
const ID_PREFIX_CHARACTERS: &str = "0123456789abcdefghijklmnopqrstuvwxyz";

/// Pinned Engine API version; old enough to be universally supported,
/// recent enough to carry `ServiceStatus` aggregation.
const API_VERSION: &str = "v1.43";

const STACK_NAMESPACE_LABEL: &str = "com.docker.stack.namespace";
const ERROR_BODY_LIMIT: usize = 1024;

/// Swarm API interactions, mockable in tests.
#[async_trait]
pub trait SwarmApi: Send + Sync {
    /// Validates connectivity to the Docker daemon.
    async fn ping(&self) -> Result<(), SwarmError>;

    /// Retrieves the current state of services. An empty `stack_name`
    /// observes all services without label scoping or name stripping.
    async fn actual_state(&self, stack_name: &str) -> Result<ActualState, SwarmError>;
}

/// Swarm API failures.
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    /// Network-level failure.
    #[error("docker api request: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status from the Engine.
    #[error("docker api status {status}: {body}")]
    Status {
        /// The HTTP status returned.
        status: StatusCode,
        /// Up to 1 KiB of the response body.
        body: String,
    },

    /// Response body did not match the expected schema.
    #[error("decode docker api response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Docker host URL with an unsupported scheme.
    #[error("docker host {0:?} is not supported (use http, https or tcp)")]
    UnsupportedHost(String),

    /// TLS material could not be read or parsed.
    #[error("docker tls {path}: {reason}")]
    Tls {
        /// File that failed.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Client construction failed.
    #[error("build docker client: {0}")]
    Build(String),
}

/// Docker Engine API client.
pub struct DockerClient {
    base: String,
    client: reqwest::Client,
    max_page_size: usize,
}

impl DockerClient {
    /// Builds a client for the given Docker host.
    ///
    /// `host` accepts `http://`, `https://` and `tcp://` URLs; `tcp` maps
    /// to plain HTTP, or HTTPS when TLS is enabled.
    ///
    /// # Errors
    ///
    /// Fails on unsupported host schemes, unreadable TLS material, or an
    /// invalid client configuration.
    pub fn new(host: &str, timeout: Duration, tls: &DockerTls) -> Result<Self, SwarmError> {
        let base = normalize_host(host, tls.enabled)?;

        let mut builder = reqwest::Client::builder().timeout(if timeout.is_zero() {
            Duration::from_secs(5)
        } else {
            timeout
        });

        if tls.enabled {
            builder = apply_tls(builder, tls)?;
        }

        let client = builder
            .build()
            .map_err(|err| SwarmError::Build(err.to_string()))?;

        Ok(Self {
            base,
            client,
            max_page_size: MAX_LIST_PAGE_SIZE,
        })
    }

    #[cfg(test)]
    fn with_max_page_size(mut self, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size;
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SwarmError> {
        let url = format!("{}/{API_VERSION}{path}", self.base);
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let mut body = body.trim().to_string();
            body.truncate(ERROR_BODY_LIMIT);
            return Err(SwarmError::Status { status, body });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn list_services(&self, stack_name: &str) -> Result<Vec<wire::Service>, SwarmError> {
        let services = self.fetch_services(stack_name, None).await?;
        if services.len() < self.max_page_size {
            return Ok(services);
        }

        // The page came back full: assume truncation and re-list by
        // partitioning the ID space, de-duplicating by ID.
        let mut results = Vec::new();
        let mut seen = HashSet::new();
        for ch in ID_PREFIX_CHARACTERS.chars() {
            let items = self
                .services_by_prefix(stack_name, ch.to_string(), 1)
                .await?;
            append_unique(&mut results, items, &mut seen);
        }
        Ok(results)
    }

    fn services_by_prefix<'a>(
        &'a self,
        stack_name: &'a str,
        prefix: String,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<wire::Service>, SwarmError>> + Send + 'a>> {
        Box::pin(async move {
            let items = self.fetch_services(stack_name, Some(&prefix)).await?;
            if items.len() < self.max_page_size || depth >= MAX_ID_PREFIX_DEPTH {
                return Ok(items);
            }

            let mut results = Vec::new();
            let mut seen = HashSet::new();
            for ch in ID_PREFIX_CHARACTERS.chars() {
                let child = self
                    .services_by_prefix(stack_name, format!("{prefix}{ch}"), depth + 1)
                    .await?;
                append_unique(&mut results, child, &mut seen);
            }
            Ok(results)
        })
    }

    async fn fetch_services(
        &self,
        stack_name: &str,
        id_prefix: Option<&str>,
    ) -> Result<Vec<wire::Service>, SwarmError> {
        let mut filters = serde_json::Map::new();
        if !stack_name.is_empty() {
            let mut label = serde_json::Map::new();
            label.insert(
                format!("{STACK_NAMESPACE_LABEL}={stack_name}"),
                serde_json::Value::Bool(true),
            );
            filters.insert("label".to_string(), serde_json::Value::Object(label));
        }
        if let Some(prefix) = id_prefix {
            let mut id = serde_json::Map::new();
            id.insert(prefix.to_string(), serde_json::Value::Bool(true));
            filters.insert("id".to_string(), serde_json::Value::Object(id));
        }

        let query = [
            ("status", "true".to_string()),
            (
                "filters",
                serde_json::Value::Object(filters).to_string(),
            ),
        ];
        self.get_json("/services", &query).await
    }

    async fn list_tasks(&self, service_id: &str) -> Result<Vec<wire::Task>, SwarmError> {
        let mut service = serde_json::Map::new();
        service.insert(service_id.to_string(), serde_json::Value::Bool(true));
        let mut filters = serde_json::Map::new();
        filters.insert("service".to_string(), serde_json::Value::Object(service));

        let query = [("filters", serde_json::Value::Object(filters).to_string())];
        self.get_json("/tasks", &query).await
    }

    async fn collect_service(
        &self,
        service: &wire::Service,
        stack_name: &str,
    ) -> Result<ActualService, SwarmError> {
        let name = normalize_service_name(&service.spec.name, stack_name);
        let (mode, desired_replicas) = mode_and_desired(service);
        let image = service
            .spec
            .task_template
            .container_spec
            .as_ref()
            .map(|spec| spec.image.clone())
            .unwrap_or_default();
        let update_state = service
            .update_status
            .as_ref()
            .and_then(|status| status.state.clone())
            .unwrap_or_default();

        // The Engine does not paginate; query tasks per service to keep
        // each response bounded.
        let tasks = self.list_tasks(&service.id).await?;
        let (running_replicas, configs, secrets) = summarize_tasks(&tasks);

        Ok(ActualService {
            name,
            image,
            mode,
            desired_replicas,
            running_replicas,
            configs,
            secrets,
            update_state,
        })
    }
}

#[async_trait]
impl SwarmApi for DockerClient {
    async fn ping(&self) -> Result<(), SwarmError> {
        let url = format!("{}/_ping", self.base);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let mut body = body.trim().to_string();
            body.truncate(ERROR_BODY_LIMIT);
            return Err(SwarmError::Status { status, body });
        }
        Ok(())
    }

    async fn actual_state(&self, stack_name: &str) -> Result<ActualState, SwarmError> {
        let services = self.list_services(stack_name).await?;

        let mut state = ActualState {
            services: BTreeMap::new(),
        };
        for service in &services {
            let actual = self.collect_service(service, stack_name).await?;
            state.services.insert(actual.name.clone(), actual);
        }
        Ok(state)
    }
}

fn normalize_host(host: &str, tls_enabled: bool) -> Result<String, SwarmError> {
    let parsed =
        url::Url::parse(host).map_err(|_| SwarmError::UnsupportedHost(host.to_string()))?;
    let authority = match parsed.host_str() {
        Some(h) => match parsed.port() {
            Some(port) => format!("{h}:{port}"),
            None => h.to_string(),
        },
        None => return Err(SwarmError::UnsupportedHost(host.to_string())),
    };

    match parsed.scheme() {
        "http" => Ok(format!("http://{authority}")),
        "https" => Ok(format!("https://{authority}")),
        "tcp" => {
            let scheme = if tls_enabled { "https" } else { "http" };
            Ok(format!("{scheme}://{authority}"))
        }
        _ => Err(SwarmError::UnsupportedHost(host.to_string())),
    }
}

fn apply_tls(
    builder: reqwest::ClientBuilder,
    tls: &DockerTls,
) -> Result<reqwest::ClientBuilder, SwarmError> {
    let mut builder = builder;

    if let Some(ca) = &tls.ca {
        let pem = read_pem(ca)?;
        let certificate = reqwest::Certificate::from_pem(&pem).map_err(|err| SwarmError::Tls {
            path: ca.clone(),
            reason: err.to_string(),
        })?;
        builder = builder.add_root_certificate(certificate);
    }

    if let (Some(cert), Some(key)) = (&tls.cert, &tls.key) {
        let mut pem = read_pem(cert)?;
        pem.extend_from_slice(&read_pem(key)?);
        let identity = reqwest::Identity::from_pem(&pem).map_err(|err| SwarmError::Tls {
            path: cert.clone(),
            reason: err.to_string(),
        })?;
        builder = builder.identity(identity);
    }

    if !tls.verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    Ok(builder)
}

fn read_pem(path: &Path) -> Result<Vec<u8>, SwarmError> {
    std::fs::read(path).map_err(|err| SwarmError::Tls {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

fn normalize_service_name(name: &str, stack_name: &str) -> String {
    if stack_name.is_empty() {
        return name.to_string();
    }
    let prefix = format!("{stack_name}_");
    name.strip_prefix(&prefix).unwrap_or(name).to_string()
}

fn mode_and_desired(service: &wire::Service) -> (DeployMode, u64) {
    let status_desired = service
        .service_status
        .as_ref()
        .map_or(0, |status| status.desired_tasks);
    let mode = &service.spec.mode;

    if let Some(replicated) = &mode.replicated {
        let desired = replicated.replicas.unwrap_or(status_desired);
        (DeployMode::Replicated, desired)
    } else if mode.global.is_some() {
        (DeployMode::Global, status_desired)
    } else if mode.replicated_job.is_some() {
        (DeployMode::ReplicatedJob, status_desired)
    } else if mode.global_job.is_some() {
        (DeployMode::GlobalJob, status_desired)
    } else {
        (DeployMode::Replicated, status_desired)
    }
}

fn summarize_tasks(tasks: &[wire::Task]) -> (u64, Vec<String>, Vec<String>) {
    let mut running = 0_u64;
    let mut configs = BTreeSet::new();
    let mut secrets = BTreeSet::new();

    for task in tasks {
        if task.status.state != "running" {
            continue;
        }
        running += 1;

        let Some(spec) = &task.spec.container_spec else {
            continue;
        };
        for config in &spec.configs {
            if !config.config_name.is_empty() {
                configs.insert(config.config_name.clone());
            }
        }
        for secret in &spec.secrets {
            if !secret.secret_name.is_empty() {
                secrets.insert(secret.secret_name.clone());
            }
        }
    }

    (
        running,
        configs.into_iter().collect(),
        secrets.into_iter().collect(),
    )
}

fn append_unique(
    dst: &mut Vec<wire::Service>,
    items: Vec<wire::Service>,
    seen: &mut HashSet<String>,
) {
    for item in items {
        if item.id.is_empty() || !seen.insert(item.id.clone()) {
            continue;
        }
        dst.push(item);
    }
}
