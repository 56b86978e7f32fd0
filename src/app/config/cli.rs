use super::properties::{PropertyKey, ShellProperties};
use super::{ConfigError, LogLevel};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Sensor data shell for the SensorBase collector", long_about = None)]
pub struct Cli {
    /// TOML properties file (flat keys or a [sensorshell] table)
    #[arg(long, env = "SENSORSHELL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Collector base URL
    #[arg(long)]
    pub host: Option<String>,

    /// Directory for offline data files
    #[arg(long)]
    pub offline_dir: Option<PathBuf>,

    /// Spread records over several concurrent shells
    #[arg(long)]
    pub multishell: bool,

    /// Log level
    #[arg(long, env = "SENSORSHELL_LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Property override, e.g. --set autosendMaxBuffer=100 (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_override)]
    pub overrides: Vec<(String, String)>,
}

fn parse_override(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    key.parse::<PropertyKey>()?;
    Ok((key.trim().to_string(), value.to_string()))
}

impl Cli {
    /// Resolves the full property set: defaults, file, environment, then
    /// the command line.
    pub fn into_properties(self) -> Result<ShellProperties, ConfigError> {
        let mut properties = ShellProperties::load(self.config.as_deref())?;

        let mut pairs = Vec::new();
        if let Some(host) = self.host {
            pairs.push((PropertyKey::Host.as_str().to_string(), host));
        }
        if let Some(dir) = self.offline_dir {
            pairs.push((
                PropertyKey::OfflineDir.as_str().to_string(),
                dir.to_string_lossy().into_owned(),
            ));
        }
        if self.multishell {
            pairs.push((
                PropertyKey::MultishellEnabled.as_str().to_string(),
                "true".to_string(),
            ));
        }
        pairs.extend(self.overrides);

        properties.apply_pairs(pairs);
        Ok(properties.normalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Duration;

    #[test]
    fn test_parse_override() {
        assert_eq!(
            parse_override("autosendMaxBuffer=100"),
            Ok(("autosendMaxBuffer".to_string(), "100".to_string()))
        );
        assert!(parse_override("noequals").is_err());
        assert!(parse_override("unknownKey=1").is_err());
    }

    #[test]
    #[serial]
    fn test_command_line_wins() {
        let cli = Cli::parse_from([
            "sensorshell",
            "--host",
            "http://collector:9876/sensorbase/",
            "--set",
            "autosendMaxBuffer=3",
            "--set",
            "timeout=2.5",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.log_level, LogLevel::Debug);

        let properties = cli.into_properties().unwrap();
        assert_eq!(properties.host, "http://collector:9876/sensorbase/");
        assert_eq!(properties.autosend_max_buffer, 3);
        assert_eq!(properties.timeout, Duration::from_millis(2500));
    }

    #[test]
    #[serial]
    fn test_multishell_flag_disables_offline() {
        let cli = Cli::parse_from(["sensorshell", "--multishell"]);
        let properties = cli.into_properties().unwrap();
        assert!(properties.multishell_enabled);
        assert!(!properties.offline_cache_enabled);
    }
}
