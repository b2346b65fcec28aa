//! Runtime configuration.
//!
//! Configuration is environment-first: every knob is an environment
//! variable, with a sibling `.env` file as a fallback for local runs (real
//! environment always wins). Secret-bearing variables accept a `_FILE`
//! sibling whose trimmed file contents take precedence over the plain
//! variable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod mapping;
mod ssrf;

pub use mapping::{load_mapping_file, StackMapping};
pub use ssrf::validate_compose_url;

const ENV_POLL_INTERVAL: &str = "POLL_INTERVAL";
const ENV_COMPOSE_URL: &str = "COMPOSE_URL";
const ENV_COMPOSE_TIMEOUT: &str = "COMPOSE_TIMEOUT";
const ENV_COMPOSE_MAPPING_FILE: &str = "COMPOSE_MAPPING_FILE";
const ENV_STACK_NAME: &str = "STACK_NAME";
const ENV_DOCKER_PROXY_URL: &str = "DOCKER_PROXY_URL";
const ENV_DOCKER_API_TIMEOUT: &str = "DOCKER_API_TIMEOUT";
const ENV_DOCKER_TLS_VERIFY: &str = "DOCKER_TLS_VERIFY";
const ENV_DOCKER_TLS_CA: &str = "DOCKER_TLS_CA";
const ENV_DOCKER_TLS_CERT: &str = "DOCKER_TLS_CERT";
const ENV_DOCKER_TLS_KEY: &str = "DOCKER_TLS_KEY";
const ENV_SLACK_WEBHOOK_URL: &str = "SLACK_WEBHOOK_URL";
const ENV_WEBHOOK_URL: &str = "WEBHOOK_URL";
const ENV_WEBHOOK_TEMPLATE: &str = "WEBHOOK_TEMPLATE";
const ENV_ALERT_STABILIZATION_CYCLES: &str = "ALERT_STABILIZATION_CYCLES";
const ENV_STATE_PATH: &str = "STATE_PATH";
const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
const ENV_HEALTH_PORT: &str = "HEALTH_PORT";
const ENV_METRICS_PORT: &str = "METRICS_PORT";
const ENV_DRY_RUN: &str = "DRY_RUN";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_COMPOSE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_DOCKER_API_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_DOCKER_PROXY_URL: &str = "http://localhost:2375";
const DEFAULT_STABILIZATION_CYCLES: u32 = 2;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_HEALTH_PORT: u16 = 8080;
const DEFAULT_METRICS_PORT: u16 = 9090;
const DEFAULT_SYSTEM_STATE_PATH: &str = "/var/lib/driftwatch/state.json";

const DEFAULT_SWARM_CONFIG_PATH: &str = "/run/configs/compose-mapping.yaml";
const DEFAULT_SWARM_SECRET_PATH: &str = "/run/secrets/compose-mapping.yaml";
const DEFAULT_LOCAL_MAPPING_PATH: &str = "./compose-mapping.yaml";

/// Docker API TLS settings.
#[derive(Debug, Clone, Default)]
pub struct DockerTls {
    /// Whether TLS is enabled for the Docker API connection.
    pub enabled: bool,
    /// Whether the server certificate is verified against the CA.
    pub verify: bool,
    /// Path to the CA bundle (PEM).
    pub ca: Option<PathBuf>,
    /// Path to the client certificate (PEM).
    pub cert: Option<PathBuf>,
    /// Path to the client key (PEM).
    pub key: Option<PathBuf>,
}

/// Runtime configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interval between evaluation cycles.
    pub poll_interval: Duration,
    /// Timeout for compose fetches (per-stack mappings may override).
    pub compose_timeout: Duration,
    /// Timeout for Docker API calls.
    pub docker_api_timeout: Duration,
    /// Compose URL for single-stack mode; `None` in multi-stack mode.
    pub compose_url: Option<String>,
    /// Resolved mapping file path; `None` in single-stack mode.
    pub mapping_file: Option<PathBuf>,
    /// Stack scope for single-stack mode; empty means unscoped.
    pub stack_name: String,
    /// Docker API endpoint.
    pub docker_proxy_url: String,
    /// Docker API TLS settings.
    pub docker_tls: DockerTls,
    /// Slack incoming-webhook URL; empty disables the Slack sink.
    pub slack_webhook_url: String,
    /// Generic webhook URL; empty disables the webhook sink.
    pub webhook_url: String,
    /// Webhook body template; empty selects the built-in default.
    pub webhook_template: String,
    /// Consecutive cycles a status must hold before alerting.
    pub alert_stabilization_cycles: u32,
    /// Path of the persisted state file.
    pub state_path: PathBuf,
    /// Log level name.
    pub log_level: String,
    /// Port for `/healthz` and `/readyz`; 0 disables.
    pub health_port: u16,
    /// Port for `/metrics`; 0 disables.
    pub metrics_port: u16,
    /// When true, notifications are logged instead of delivered.
    pub dry_run: bool,
}

/// Configuration errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A duration variable failed to parse.
    #[error("invalid {name}: {source}")]
    InvalidDuration {
        /// Variable name.
        name: &'static str,
        /// Parse failure.
        source: humantime::DurationError,
    },

    /// A duration variable must be greater than zero.
    #[error("{0} must be greater than zero")]
    NonPositiveDuration(&'static str),

    /// A boolean variable failed to parse.
    #[error("invalid {name}: {value:?} is not a boolean")]
    InvalidBool {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },

    /// An integer variable failed to parse.
    #[error("invalid {name}: {value:?}")]
    InvalidNumber {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },

    /// A URL variable failed validation.
    #[error("invalid {name}: {reason}")]
    InvalidUrl {
        /// Variable or field name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A compose URL pointed at a blocked destination.
    #[error("{name} refused: {reason}")]
    BlockedUrl {
        /// Variable or field name.
        name: String,
        /// Why it was blocked.
        reason: String,
    },

    /// Both a compose URL and a mapping file were configured.
    #[error("COMPOSE_URL and compose mapping file are mutually exclusive: {0}")]
    MutuallyExclusive(PathBuf),

    /// Neither a compose URL nor a mapping file resolved.
    #[error("COMPOSE_URL is required when no compose mapping file is present")]
    MissingComposeSource,

    /// An explicitly configured mapping file does not exist.
    #[error("COMPOSE_MAPPING_FILE specified but not found: {0}")]
    MappingNotFound(PathBuf),

    /// The mapping file could not be read.
    #[error("read mapping file {path}: {source}")]
    MappingRead {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The mapping file could not be parsed.
    #[error("parse mapping file {path}: {source}")]
    MappingParse {
        /// File path.
        path: PathBuf,
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },

    /// The mapping file content was invalid.
    #[error("mapping file: {0}")]
    MappingInvalid(String),

    /// A `_FILE` secret sibling could not be read.
    #[error("read {name}: {source}")]
    SecretFile {
        /// Variable name (the `_FILE` form).
        name: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The `.env` file exists but could not be read.
    #[error("read .env: {0}")]
    DotEnv(std::io::Error),

    /// TLS was enabled without its required settings.
    #[error("docker tls enabled but missing {0}")]
    TlsIncomplete(String),
}

impl Config {
    /// Loads configuration from the environment and an optional `.env` file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for any invalid or inconsistent setting;
    /// all such errors are fatal at startup.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env_file(Path::new(".env"))
    }

    /// Loads configuration, reading fallback values from `env_file`.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_with_env_file(env_file: &Path) -> Result<Self, ConfigError> {
        let fallback = load_env_file(env_file)?;
        let env = Env { fallback };
        Self::from_env(&env)
    }

    fn from_env(env: &Env) -> Result<Self, ConfigError> {
        let poll_interval =
            env.duration(ENV_POLL_INTERVAL)?.unwrap_or(DEFAULT_POLL_INTERVAL);
        let compose_timeout = env
            .duration(ENV_COMPOSE_TIMEOUT)?
            .unwrap_or(DEFAULT_COMPOSE_TIMEOUT);
        let docker_api_timeout = env
            .duration(ENV_DOCKER_API_TIMEOUT)?
            .unwrap_or(DEFAULT_DOCKER_API_TIMEOUT);

        let compose_url = env.get(ENV_COMPOSE_URL).filter(|v| !v.is_empty());
        let stack_name = env.get(ENV_STACK_NAME).unwrap_or_default();
        let docker_proxy_url = env
            .get(ENV_DOCKER_PROXY_URL)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_DOCKER_PROXY_URL.to_string());

        let verify = env.boolean(ENV_DOCKER_TLS_VERIFY)?.unwrap_or(false);
        let ca = env.get(ENV_DOCKER_TLS_CA).filter(|v| !v.is_empty()).map(PathBuf::from);
        let cert = env
            .get(ENV_DOCKER_TLS_CERT)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let key = env.get(ENV_DOCKER_TLS_KEY).filter(|v| !v.is_empty()).map(PathBuf::from);
        // TLS is auto-detected: requesting verification or providing any
        // certificate path turns it on.
        let docker_tls = DockerTls {
            enabled: verify || ca.is_some() || cert.is_some() || key.is_some(),
            verify,
            ca,
            cert,
            key,
        };

        let slack_webhook_url = env.secret(ENV_SLACK_WEBHOOK_URL)?.unwrap_or_default();
        let webhook_url = env.secret(ENV_WEBHOOK_URL)?.unwrap_or_default();
        let webhook_template = env.get(ENV_WEBHOOK_TEMPLATE).unwrap_or_default();

        let alert_stabilization_cycles = env
            .number(ENV_ALERT_STABILIZATION_CYCLES)?
            .unwrap_or(DEFAULT_STABILIZATION_CYCLES);

        let state_path = env
            .get(ENV_STATE_PATH)
            .filter(|v| !v.is_empty())
            .map_or_else(default_state_path, PathBuf::from);

        let log_level = env
            .get(ENV_LOG_LEVEL)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let health_port = env.port(ENV_HEALTH_PORT)?.unwrap_or(DEFAULT_HEALTH_PORT);
        let metrics_port = env.port(ENV_METRICS_PORT)?.unwrap_or(DEFAULT_METRICS_PORT);
        let dry_run = env.boolean(ENV_DRY_RUN)?.unwrap_or(false);

        let mapping_file = find_mapping_file(env)?;

        let cfg = Self {
            poll_interval,
            compose_timeout,
            docker_api_timeout,
            compose_url,
            mapping_file,
            stack_name,
            docker_proxy_url,
            docker_tls,
            slack_webhook_url,
            webhook_url,
            webhook_template,
            alert_stabilization_cycles,
            state_path,
            log_level,
            health_port,
            metrics_port,
            dry_run,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match (&self.compose_url, &self.mapping_file) {
            (Some(_), Some(path)) => {
                return Err(ConfigError::MutuallyExclusive(path.clone()));
            }
            (None, None) => return Err(ConfigError::MissingComposeSource),
            _ => {}
        }

        if let Some(url) = &self.compose_url {
            validate_compose_url(url, ENV_COMPOSE_URL)?;
        }

        validate_url(&self.docker_proxy_url, ENV_DOCKER_PROXY_URL)?;
        if !self.slack_webhook_url.is_empty() {
            validate_url(&self.slack_webhook_url, ENV_SLACK_WEBHOOK_URL)?;
        }
        if !self.webhook_url.is_empty() {
            validate_url(&self.webhook_url, ENV_WEBHOOK_URL)?;
        }

        if self.docker_tls.enabled {
            let mut missing = Vec::new();
            if self.docker_tls.cert.is_none() {
                missing.push(ENV_DOCKER_TLS_CERT);
            }
            if self.docker_tls.key.is_none() {
                missing.push(ENV_DOCKER_TLS_KEY);
            }
            if self.docker_tls.verify && self.docker_tls.ca.is_none() {
                missing.push(ENV_DOCKER_TLS_CA);
            }
            if !missing.is_empty() {
                return Err(ConfigError::TlsIncomplete(missing.join(", ")));
            }
        }

        if let Ok(parsed) = url::Url::parse(&self.docker_proxy_url) {
            if parsed.scheme() == "https" && !self.docker_tls.enabled {
                return Err(ConfigError::InvalidUrl {
                    name: ENV_DOCKER_PROXY_URL.to_string(),
                    reason: "https docker host requires TLS configuration".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Whether the daemon runs in multi-stack (mapping file) mode.
    #[must_use]
    pub fn multi_stack(&self) -> bool {
        self.mapping_file.is_some()
    }
}

/// `set`/`unset` marker for the redacted startup config summary.
#[must_use]
pub fn secret_status(value: &str) -> &'static str {
    if value.is_empty() {
        "unset"
    } else {
        "set"
    }
}

fn default_state_path() -> PathBuf {
    std::env::var_os("HOME").map_or_else(
        || PathBuf::from(DEFAULT_SYSTEM_STATE_PATH),
        |home| PathBuf::from(home).join(".driftwatch").join("state.json"),
    )
}

fn validate_url(value: &str, name: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value).map_err(|err| ConfigError::InvalidUrl {
        name: name.to_string(),
        reason: err.to_string(),
    })?;
    if parsed.host_str().is_none() {
        return Err(ConfigError::InvalidUrl {
            name: name.to_string(),
            reason: "must include scheme and host".to_string(),
        });
    }
    Ok(())
}

/// Locates the compose mapping file.
///
/// Order of precedence: explicit `COMPOSE_MAPPING_FILE` (fatal if set but
/// missing), the standard Swarm config mount, the Swarm secret mount, then
/// a local `./compose-mapping.yaml`. `None` means single-stack mode.
fn find_mapping_file(env: &Env) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = env.get(ENV_COMPOSE_MAPPING_FILE).filter(|v| !v.is_empty()) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::MappingNotFound(path));
    }

    for candidate in [
        DEFAULT_SWARM_CONFIG_PATH,
        DEFAULT_SWARM_SECRET_PATH,
        DEFAULT_LOCAL_MAPPING_PATH,
    ] {
        let path = Path::new(candidate);
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
    }

    Ok(None)
}

/// Environment access with `.env` fallback.
struct Env {
    fallback: BTreeMap<String, String>,
}

impl Env {
    /// Returns the trimmed value; the real environment wins over `.env`.
    fn get(&self, name: &str) -> Option<String> {
        match std::env::var(name) {
            Ok(value) => Some(value.trim().to_string()),
            Err(_) => self.fallback.get(name).map(|v| v.trim().to_string()),
        }
    }

    /// Secret lookup: the `_FILE` sibling takes precedence.
    fn secret(&self, name: &str) -> Result<Option<String>, ConfigError> {
        let file_name = format!("{name}_FILE");
        if let Some(path) = self.get(&file_name).filter(|v| !v.is_empty()) {
            let contents =
                std::fs::read_to_string(&path).map_err(|source| ConfigError::SecretFile {
                    name: file_name,
                    source,
                })?;
            return Ok(Some(contents.trim().to_string()));
        }
        Ok(self.get(name))
    }

    fn duration(&self, name: &'static str) -> Result<Option<Duration>, ConfigError> {
        let Some(value) = self.get(name).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        let parsed = humantime::parse_duration(&value)
            .map_err(|source| ConfigError::InvalidDuration { name, source })?;
        if parsed.is_zero() {
            return Err(ConfigError::NonPositiveDuration(name));
        }
        Ok(Some(parsed))
    }

    fn boolean(&self, name: &'static str) -> Result<Option<bool>, ConfigError> {
        let Some(value) = self.get(name).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "t" | "true" | "yes" => Ok(Some(true)),
            "0" | "f" | "false" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidBool { name, value }),
        }
    }

    fn number(&self, name: &'static str) -> Result<Option<u32>, ConfigError> {
        let Some(value) = self.get(name).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        value
            .parse::<u32>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { name, value })
    }

    fn port(&self, name: &'static str) -> Result<Option<u16>, ConfigError> {
        let Some(value) = self.get(name).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        value
            .parse::<u16>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { name, value })
    }
}

/// Parses a `.env` file into key/value pairs.
///
/// Supports `KEY=VALUE` lines, blank lines, and `#` comments; values may be
/// single- or double-quoted. A missing file is not an error.
fn load_env_file(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(BTreeMap::new());
        }
        Err(err) => return Err(ConfigError::DotEnv(err)),
    };

    let mut values = BTreeMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().trim_start_matches("export ").trim();
        let value = line_value(value.trim());
        if !key.is_empty() {
            values.insert(key.to_string(), value.to_string());
        }
    }
    Ok(values)
}

fn line_value(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}
