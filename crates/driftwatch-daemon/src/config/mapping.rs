//! Multi-stack mapping file.
//!
//! A YAML document assigning one compose URL (and optional fetch timeout)
//! to each watched stack.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::{validate_compose_url, ConfigError};

/// A single stack → compose URL mapping.
#[derive(Debug, Clone, Deserialize)]
pub struct StackMapping {
    /// Stack name; unique across the file.
    pub name: String,
    /// Compose URL for this stack.
    pub compose_url: String,
    /// Optional per-stack fetch timeout overriding the global default.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct MappingFile {
    #[serde(default)]
    stacks: Vec<StackMapping>,
}

/// Parses and validates a YAML mapping file.
///
/// # Errors
///
/// Returns a [`ConfigError`] when the file cannot be read or parsed, when
/// it declares no stacks, or when any mapping is invalid (missing name,
/// duplicate name, missing or blocked URL).
pub fn load_mapping_file(path: &Path) -> Result<Vec<StackMapping>, ConfigError> {
    let data = std::fs::read(path).map_err(|source| ConfigError::MappingRead {
        path: path.to_path_buf(),
        source,
    })?;

    let file: MappingFile =
        serde_yaml::from_slice(&data).map_err(|source| ConfigError::MappingParse {
            path: path.to_path_buf(),
            source,
        })?;

    validate_mappings(&file.stacks)?;
    Ok(file.stacks)
}

fn validate_mappings(mappings: &[StackMapping]) -> Result<(), ConfigError> {
    if mappings.is_empty() {
        return Err(ConfigError::MappingInvalid(
            "mapping file contains no stacks".to_string(),
        ));
    }

    let mut seen = BTreeSet::new();
    for (index, mapping) in mappings.iter().enumerate() {
        if mapping.name.is_empty() {
            return Err(ConfigError::MappingInvalid(format!(
                "stack {index}: name is required"
            )));
        }
        if mapping.compose_url.is_empty() {
            return Err(ConfigError::MappingInvalid(format!(
                "stack {:?}: compose_url is required",
                mapping.name
            )));
        }
        validate_compose_url(&mapping.compose_url, &format!("stack {:?} compose_url", mapping.name))?;
        if !seen.insert(mapping.name.as_str()) {
            return Err(ConfigError::MappingInvalid(format!(
                "stack {:?}: duplicate name",
                mapping.name
            )));
        }
    }

    Ok(())
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?;
        match value {
            None => Ok(None),
            Some(raw) => humantime::parse_duration(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
