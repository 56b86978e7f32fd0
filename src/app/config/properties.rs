use crate::reliability::OfflineConfig;
use crate::sender::ClientConfig;
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Every recognised configuration option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Host,
    User,
    Password,
    Timeout,
    PingTimeout,
    MultishellEnabled,
    MultishellNumShells,
    MultishellBatchSize,
    MultishellMaxBuffer,
    MultishellAutosendInterval,
    OfflineCacheEnabled,
    OfflineRecoveryEnabled,
    OfflineRecoveryInterval,
    OfflineDir,
    AutosendInterval,
    AutosendMaxBuffer,
}

impl PropertyKey {
    pub const ALL: [PropertyKey; 16] = [
        PropertyKey::Host,
        PropertyKey::User,
        PropertyKey::Password,
        PropertyKey::Timeout,
        PropertyKey::PingTimeout,
        PropertyKey::MultishellEnabled,
        PropertyKey::MultishellNumShells,
        PropertyKey::MultishellBatchSize,
        PropertyKey::MultishellMaxBuffer,
        PropertyKey::MultishellAutosendInterval,
        PropertyKey::OfflineCacheEnabled,
        PropertyKey::OfflineRecoveryEnabled,
        PropertyKey::OfflineRecoveryInterval,
        PropertyKey::OfflineDir,
        PropertyKey::AutosendInterval,
        PropertyKey::AutosendMaxBuffer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PropertyKey::Host => "host",
            PropertyKey::User => "user",
            PropertyKey::Password => "password",
            PropertyKey::Timeout => "timeout",
            PropertyKey::PingTimeout => "pingTimeout",
            PropertyKey::MultishellEnabled => "multishellEnabled",
            PropertyKey::MultishellNumShells => "multishellNumShells",
            PropertyKey::MultishellBatchSize => "multishellBatchSize",
            PropertyKey::MultishellMaxBuffer => "multishellMaxBuffer",
            PropertyKey::MultishellAutosendInterval => "multishellAutosendInterval",
            PropertyKey::OfflineCacheEnabled => "offlineCacheEnabled",
            PropertyKey::OfflineRecoveryEnabled => "offlineRecoveryEnabled",
            PropertyKey::OfflineRecoveryInterval => "offlineRecoveryInterval",
            PropertyKey::OfflineDir => "offlineDir",
            PropertyKey::AutosendInterval => "autosendInterval",
            PropertyKey::AutosendMaxBuffer => "autosendMaxBuffer",
        }
    }

    /// `pingTimeout` -> `SENSORSHELL_PING_TIMEOUT`.
    pub fn env_var(self) -> String {
        let mut name = String::from("SENSORSHELL_");
        for c in self.as_str().chars() {
            if c.is_ascii_uppercase() {
                name.push('_');
            }
            name.push(c.to_ascii_uppercase());
        }
        name
    }
}

impl FromStr for PropertyKey {
    type Err = String;

    /// Matches camelCase, snake_case and dotted spellings alike.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '.' | '-'))
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let wanted = wanted.strip_prefix("sensorshell").unwrap_or(&wanted);
        PropertyKey::ALL
            .into_iter()
            .find(|key| key.as_str().to_ascii_lowercase() == wanted)
            .ok_or_else(|| format!("Unknown property '{s}'"))
    }
}

/// Immutable configuration snapshot for shells and the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellProperties {
    pub host: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(serialize_with = "super::serde_helpers::serialize")]
    pub timeout: Duration,
    #[serde(serialize_with = "super::serde_helpers::serialize")]
    pub ping_timeout: Duration,
    pub multishell_enabled: bool,
    pub multishell_num_shells: usize,
    /// Records routed to one shell before rotating; 0 routes at random.
    pub multishell_batch_size: usize,
    pub multishell_max_buffer: usize,
    #[serde(serialize_with = "super::serde_helpers::serialize")]
    pub multishell_autosend_interval: Duration,
    pub offline_cache_enabled: bool,
    pub offline_recovery_enabled: bool,
    #[serde(serialize_with = "super::serde_helpers::serialize")]
    pub offline_recovery_interval: Duration,
    pub offline_dir: PathBuf,
    /// Zero disables the auto-send timer.
    #[serde(serialize_with = "super::serde_helpers::serialize")]
    pub autosend_interval: Duration,
    /// Zero means unbounded.
    pub autosend_max_buffer: usize,
}

impl Default for ShellProperties {
    fn default() -> Self {
        Self {
            host: "http://localhost:9876/sensorbase/".to_string(),
            user: String::new(),
            password: String::new(),
            timeout: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(2),
            multishell_enabled: false,
            multishell_num_shells: 10,
            multishell_batch_size: 499,
            multishell_max_buffer: 500,
            multishell_autosend_interval: minutes(0.05),
            offline_cache_enabled: true,
            offline_recovery_enabled: true,
            offline_recovery_interval: minutes(10.0),
            offline_dir: PathBuf::from("/tmp/sensorshell/offline"),
            autosend_interval: minutes(1.0),
            autosend_max_buffer: 250,
        }
    }
}

impl ShellProperties {
    /// Builds properties from raw key-value pairs on top of the defaults.
    /// Unknown keys and invalid values are logged, never fatal.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut properties = Self::default();
        properties.apply_pairs(pairs);
        properties.normalized()
    }

    pub fn apply_pairs<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in pairs {
            match key.as_ref().parse::<PropertyKey>() {
                Ok(key) => self.set(key, value.as_ref()),
                Err(e) => warn!("{e}, ignoring"),
            }
        }
    }

    /// Sets one option. An invalid value resets the option to its default.
    pub fn set(&mut self, key: PropertyKey, value: &str) {
        if let Err(reason) = self.try_set(key, value) {
            warn!(
                property = key.as_str(),
                value,
                "Invalid property value ({reason}), using default"
            );
            self.reset(key);
        }
    }

    fn try_set(&mut self, key: PropertyKey, value: &str) -> Result<(), String> {
        let value = value.trim();
        match key {
            PropertyKey::Host => self.host = parse_host(value)?,
            PropertyKey::User => self.user = value.to_string(),
            PropertyKey::Password => self.password = value.to_string(),
            PropertyKey::Timeout => self.timeout = parse_seconds(value)?,
            PropertyKey::PingTimeout => self.ping_timeout = parse_seconds(value)?,
            PropertyKey::MultishellEnabled => self.multishell_enabled = parse_bool(value)?,
            PropertyKey::MultishellNumShells => self.multishell_num_shells = parse_count(value, 1)?,
            PropertyKey::MultishellBatchSize => self.multishell_batch_size = parse_count(value, 1)?,
            PropertyKey::MultishellMaxBuffer => self.multishell_max_buffer = parse_count(value, 0)?,
            PropertyKey::MultishellAutosendInterval => {
                self.multishell_autosend_interval = parse_minutes(value)?;
            }
            PropertyKey::OfflineCacheEnabled => self.offline_cache_enabled = parse_bool(value)?,
            PropertyKey::OfflineRecoveryEnabled => {
                self.offline_recovery_enabled = parse_bool(value)?;
            }
            PropertyKey::OfflineRecoveryInterval => {
                self.offline_recovery_interval = parse_minutes(value)?;
            }
            PropertyKey::OfflineDir => {
                if value.is_empty() {
                    return Err("empty path".to_string());
                }
                self.offline_dir = PathBuf::from(value);
            }
            PropertyKey::AutosendInterval => self.autosend_interval = parse_minutes(value)?,
            PropertyKey::AutosendMaxBuffer => self.autosend_max_buffer = parse_count(value, 0)?,
        }
        Ok(())
    }

    fn reset(&mut self, key: PropertyKey) {
        let defaults = Self::default();
        match key {
            PropertyKey::Host => self.host = defaults.host,
            PropertyKey::User => self.user = defaults.user,
            PropertyKey::Password => self.password = defaults.password,
            PropertyKey::Timeout => self.timeout = defaults.timeout,
            PropertyKey::PingTimeout => self.ping_timeout = defaults.ping_timeout,
            PropertyKey::MultishellEnabled => self.multishell_enabled = defaults.multishell_enabled,
            PropertyKey::MultishellNumShells => {
                self.multishell_num_shells = defaults.multishell_num_shells;
            }
            PropertyKey::MultishellBatchSize => {
                self.multishell_batch_size = defaults.multishell_batch_size;
            }
            PropertyKey::MultishellMaxBuffer => {
                self.multishell_max_buffer = defaults.multishell_max_buffer;
            }
            PropertyKey::MultishellAutosendInterval => {
                self.multishell_autosend_interval = defaults.multishell_autosend_interval;
            }
            PropertyKey::OfflineCacheEnabled => {
                self.offline_cache_enabled = defaults.offline_cache_enabled;
            }
            PropertyKey::OfflineRecoveryEnabled => {
                self.offline_recovery_enabled = defaults.offline_recovery_enabled;
            }
            PropertyKey::OfflineRecoveryInterval => {
                self.offline_recovery_interval = defaults.offline_recovery_interval;
            }
            PropertyKey::OfflineDir => self.offline_dir = defaults.offline_dir,
            PropertyKey::AutosendInterval => self.autosend_interval = defaults.autosend_interval,
            PropertyKey::AutosendMaxBuffer => {
                self.autosend_max_buffer = defaults.autosend_max_buffer;
            }
        }
    }

    /// Applies cross-option rules. Multi-shell mode never persists, so the
    /// offline cache and recovery are switched off when it is enabled.
    pub fn normalized(mut self) -> Self {
        if self.multishell_enabled && (self.offline_cache_enabled || self.offline_recovery_enabled)
        {
            warn!("Multi-shell mode enabled: disabling offline cache and offline recovery");
            self.offline_cache_enabled = false;
            self.offline_recovery_enabled = false;
        }
        if self.multishell_num_shells == 0 {
            self.multishell_num_shells = 1;
        }
        self
    }

    /// Properties for one constituent shell of a multi-shell.
    pub fn constituent(&self) -> Self {
        Self {
            multishell_enabled: false,
            offline_cache_enabled: false,
            offline_recovery_enabled: false,
            autosend_interval: self.multishell_autosend_interval,
            autosend_max_buffer: self.multishell_max_buffer,
            ..self.clone()
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            host: self.host.clone(),
            timeout: self.timeout,
            user: self.user.clone(),
            password: self.password.clone(),
            ..ClientConfig::default()
        }
    }

    pub fn offline_config(&self) -> OfflineConfig {
        OfflineConfig {
            directory: self.offline_dir.clone(),
            ..OfflineConfig::default()
        }
    }
}

fn minutes(value: f64) -> Duration {
    Duration::from_secs_f64(value * 60.0)
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err("expected true or false".to_string()),
    }
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value.parse().map_err(|_| "expected seconds".to_string())?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err("must be a positive number of seconds".to_string());
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

fn parse_minutes(value: &str) -> Result<Duration, String> {
    let mins: f64 = value.parse().map_err(|_| "expected minutes".to_string())?;
    if !mins.is_finite() || mins < 0.0 {
        return Err("must be zero or a positive number of minutes".to_string());
    }
    Duration::try_from_secs_f64(mins * 60.0).map_err(|e| e.to_string())
}

fn parse_count(value: &str, min: usize) -> Result<usize, String> {
    let count: usize = value
        .parse()
        .map_err(|_| "expected a non-negative integer".to_string())?;
    if count < min {
        return Err(format!("must be at least {min}"));
    }
    Ok(count)
}

fn parse_host(value: &str) -> Result<String, String> {
    let url = Url::parse(value).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    Ok(value.to_string())
}
