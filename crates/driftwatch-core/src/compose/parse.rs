//! Compose file parsing.
//!
//! Reads the subset of the Compose schema the sentinel tracks: service
//! images, scheduling mode, replica counts, and config/secret references.
//! Everything else in the file is ignored.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::{ComposeError, DeployMode, DesiredService, DesiredState};

const DEFAULT_SERVICE_SCALE: u64 = 1;

#[derive(Debug, Deserialize)]
struct ComposeFile {
    #[serde(default)]
    services: BTreeMap<String, ComposeService>,
    #[serde(default)]
    configs: BTreeMap<String, TopLevelResource>,
    #[serde(default)]
    secrets: BTreeMap<String, TopLevelResource>,
}

#[derive(Debug, Deserialize)]
struct ComposeService {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    scale: Option<u64>,
    #[serde(default)]
    deploy: Option<DeploySection>,
    #[serde(default)]
    configs: Vec<ResourceRef>,
    #[serde(default)]
    secrets: Vec<ResourceRef>,
}

#[derive(Debug, Deserialize)]
struct DeploySection {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    replicas: Option<u64>,
}

/// A service-level config/secret reference, short or long syntax.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResourceRef {
    Short(String),
    Long {
        #[serde(default)]
        source: String,
    },
}

impl ResourceRef {
    fn source(&self) -> &str {
        match self {
            Self::Short(source) | Self::Long { source } => source,
        }
    }
}

/// A top-level `configs:`/`secrets:` entry; only the explicit name matters.
#[derive(Debug, Default, Deserialize)]
struct TopLevelResource {
    #[serde(default)]
    name: Option<String>,
}

/// Parses Compose content into a normalized desired state.
///
/// # Errors
///
/// Rejects empty bodies, files without services, services without an image,
/// unsupported deploy modes, and unresolved config/secret references.
pub fn parse_desired_state(body: &[u8]) -> Result<DesiredState, ComposeError> {
    if body.is_empty() {
        return Err(ComposeError::EmptyBody);
    }

    let file: ComposeFile = serde_yaml::from_slice(body)?;
    if file.services.is_empty() {
        return Err(ComposeError::NoServices);
    }

    let mut state = DesiredState::default();
    for (name, service) in &file.services {
        let image = match &service.image {
            Some(image) if !image.is_empty() => image.clone(),
            _ => return Err(ComposeError::MissingImage(name.clone())),
        };

        let mode = match service.deploy.as_ref().and_then(|d| d.mode.as_deref()) {
            Some(mode) => mode.parse::<DeployMode>()?,
            None => DeployMode::Replicated,
        };

        // Global mode replicas stay 0 at parse time: the desired count
        // depends on the node set and is only known at evaluation time.
        let replicas = if mode == DeployMode::Global {
            0
        } else {
            service
                .deploy
                .as_ref()
                .and_then(|d| d.replicas)
                .or(service.scale)
                .unwrap_or(DEFAULT_SERVICE_SCALE)
        };

        let configs = resolve_names(name, "config", &service.configs, &file.configs)?;
        let secrets = resolve_names(name, "secret", &service.secrets, &file.secrets)?;

        state.services.insert(
            name.clone(),
            DesiredService {
                image,
                mode,
                replicas,
                configs,
                secrets,
            },
        );
    }

    Ok(state)
}

fn resolve_names(
    service: &str,
    resource: &'static str,
    refs: &[ResourceRef],
    declared: &BTreeMap<String, TopLevelResource>,
) -> Result<Vec<String>, ComposeError> {
    if refs.is_empty() {
        return Ok(Vec::new());
    }

    let mut names = Vec::with_capacity(refs.len());
    for reference in refs {
        let source = reference.source();
        if source.is_empty() {
            return Err(ComposeError::MissingSource {
                service: service.to_string(),
                resource,
            });
        }
        let entry = declared
            .get(source)
            .ok_or_else(|| ComposeError::UndefinedReference {
                service: service.to_string(),
                resource,
                name: source.to_string(),
            })?;
        match &entry.name {
            Some(name) if !name.is_empty() => names.push(name.clone()),
            _ => names.push(source.to_string()),
        }
    }

    names.sort();
    names.dedup();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_services() {
        let body = br"
services:
  api:
    image: app:v1
    deploy:
      replicas: 3
  web:
    image: nginx:1.25
";
        let state = parse_desired_state(body).unwrap();
        assert_eq!(state.services.len(), 2);
        let api = &state.services["api"];
        assert_eq!(api.image, "app:v1");
        assert_eq!(api.mode, DeployMode::Replicated);
        assert_eq!(api.replicas, 3);
        assert_eq!(state.services["web"].replicas, 1);
    }

    #[test]
    fn scale_is_a_fallback_for_replicas() {
        let body = br"
services:
  api:
    image: app:v1
    scale: 4
  staged:
    image: app:v1
    scale: 4
    deploy:
      replicas: 2
";
        let state = parse_desired_state(body).unwrap();
        assert_eq!(state.services["api"].replicas, 4);
        // deploy.replicas wins over scale.
        assert_eq!(state.services["staged"].replicas, 2);
    }

    #[test]
    fn global_mode_gets_zero_replicas() {
        let body = br"
services:
  agent:
    image: agent:v2
    deploy:
      mode: global
      replicas: 7
";
        let state = parse_desired_state(body).unwrap();
        let agent = &state.services["agent"];
        assert_eq!(agent.mode, DeployMode::Global);
        assert_eq!(agent.replicas, 0);
    }

    #[test]
    fn unsupported_mode_is_rejected() {
        let body = br"
services:
  api:
    image: app:v1
    deploy:
      mode: sharded
";
        assert!(matches!(
            parse_desired_state(body),
            Err(ComposeError::UnsupportedMode(mode)) if mode == "sharded"
        ));
    }

    #[test]
    fn missing_image_is_rejected() {
        let body = br"
services:
  api:
    deploy:
      replicas: 1
";
        assert!(matches!(
            parse_desired_state(body),
            Err(ComposeError::MissingImage(name)) if name == "api"
        ));
    }

    #[test]
    fn empty_body_and_no_services_are_rejected() {
        assert!(matches!(parse_desired_state(b""), Err(ComposeError::EmptyBody)));
        assert!(matches!(
            parse_desired_state(b"services: {}"),
            Err(ComposeError::NoServices)
        ));
    }

    #[test]
    fn resolves_config_and_secret_references() {
        let body = br"
services:
  api:
    image: app:v1
    configs:
      - app_config
      - source: renamed
        target: /etc/renamed
    secrets:
      - db_password
configs:
  app_config: {}
  renamed:
    name: custom_config_v3
secrets:
  db_password:
    external: true
";
        let state = parse_desired_state(body).unwrap();
        let api = &state.services["api"];
        assert_eq!(api.configs, vec!["app_config", "custom_config_v3"]);
        assert_eq!(api.secrets, vec!["db_password"]);
    }

    #[test]
    fn reference_names_are_sorted_and_deduplicated() {
        let body = br"
services:
  api:
    image: app:v1
    configs:
      - zeta
      - alpha
      - source: zeta
configs:
  zeta: {}
  alpha: {}
";
        let state = parse_desired_state(body).unwrap();
        assert_eq!(state.services["api"].configs, vec!["alpha", "zeta"]);
    }

    #[test]
    fn undefined_reference_is_rejected() {
        let body = br"
services:
  api:
    image: app:v1
    secrets:
      - ghost
";
        assert!(matches!(
            parse_desired_state(body),
            Err(ComposeError::UndefinedReference { resource: "secret", name, .. }) if name == "ghost"
        ));
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        assert!(matches!(
            parse_desired_state(b"services: ["),
            Err(ComposeError::Yaml(_))
        ));
    }
}
