use super::properties::{PropertyKey, ShellProperties};
use super::ConfigError;
use std::path::Path;
use tracing::{debug, warn};

/// Reads a TOML file into raw key-value pairs. Keys may sit at the top level
/// or under a `[sensorshell]` table; scalar values are stringified so every
/// source goes through the same lenient parser.
pub fn load_file_pairs(path: &Path) -> Result<Vec<(String, String)>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_toml_pairs(&content)
}

pub fn parse_toml_pairs(content: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut root: toml::Table = content.parse()?;
    let table = match root.remove("sensorshell") {
        Some(toml::Value::Table(section)) => section,
        Some(_) => {
            return Err(ConfigError::InvalidConfig(
                "'sensorshell' must be a table".to_string(),
            ));
        }
        None => root,
    };

    let mut pairs = Vec::with_capacity(table.len());
    for (key, value) in table {
        let value = match value {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            other => {
                warn!(key = %key, kind = other.type_str(), "Unsupported value type in config file, ignoring");
                continue;
            }
        };
        pairs.push((key, value));
    }
    Ok(pairs)
}

/// Pairs from `SENSORSHELL_*` environment variables.
pub fn load_env_pairs() -> Vec<(String, String)> {
    PropertyKey::ALL
        .into_iter()
        .filter_map(|key| {
            std::env::var(key.env_var())
                .ok()
                .map(|value| (key.as_str().to_string(), value))
        })
        .collect()
}

impl ShellProperties {
    /// Defaults, then the optional file, then environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut properties = ShellProperties::default();
        if let Some(path) = file {
            debug!(path = %path.display(), "Loading sensorshell properties file");
            properties.apply_pairs(load_file_pairs(path)?);
        }
        properties.apply_pairs(load_env_pairs());
        Ok(properties.normalized())
    }
}
