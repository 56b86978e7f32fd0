use super::error::MalformedEventError;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const KEY_TOOL: &str = "Tool";
pub const KEY_SENSOR_DATA_TYPE: &str = "SensorDataType";
pub const KEY_TIMESTAMP: &str = "Timestamp";
pub const KEY_RUNTIME: &str = "Runtime";
pub const KEY_URI: &str = "URI";
pub const KEY_RESOURCE: &str = "Resource";
pub const KEY_PROJECT_URI: &str = "ProjectURI";

/// One telemetry observation captured by an event source.
///
/// Fields are fixed once the record is built; the `with_*` methods consume the
/// record and are meant for the construction phase only. Property keys are
/// unique within a record and keep their insertion order so that the offline
/// file format is stable across recovery cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    timestamp: i64,
    runtime: i64,
    tool: String,
    sensor_data_type: String,
    uri: String,
    project_uri: String,
    properties: Vec<(String, String)>,
}

impl EventRecord {
    pub fn new(timestamp: i64, runtime: i64) -> Self {
        Self {
            timestamp,
            runtime,
            tool: String::new(),
            sensor_data_type: String::new(),
            uri: String::new(),
            project_uri: String::new(),
            properties: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    pub fn with_sensor_data_type(mut self, sensor_data_type: impl Into<String>) -> Self {
        self.sensor_data_type = sensor_data_type.into();
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn with_project_uri(mut self, project_uri: impl Into<String>) -> Self {
        self.project_uri = project_uri.into();
        self
    }

    /// Sets a property, replacing the value in place if the key already exists.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_property(key.into(), value.into());
        self
    }

    fn set_property(&mut self, key: String, value: String) {
        if let Some(slot) = self.properties.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.properties.push((key, value));
        }
    }

    /// Builds a record from a key-value event description.
    ///
    /// `Timestamp` and `Runtime` are required; they accept epoch millis or an
    /// RFC 3339 string. `URI` (or its legacy alias `Resource`) and `ProjectURI`
    /// fill the resource fields, every other key becomes a property.
    pub fn from_map<I, K, V>(pairs: I) -> Result<Self, MalformedEventError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut timestamp = None;
        let mut runtime = None;
        let mut tool = String::new();
        let mut sensor_data_type = String::new();
        let mut uri = String::new();
        let mut project_uri = String::new();
        let mut properties: Vec<(String, String)> = Vec::new();

        for (key, value) in pairs {
            let key = key.into();
            let value = value.into();
            match key.as_str() {
                KEY_TIMESTAMP => timestamp = Some(parse_field(KEY_TIMESTAMP, &value)?),
                KEY_RUNTIME => runtime = Some(parse_field(KEY_RUNTIME, &value)?),
                KEY_TOOL => tool = value,
                KEY_SENSOR_DATA_TYPE => sensor_data_type = value,
                KEY_URI | KEY_RESOURCE => uri = value,
                KEY_PROJECT_URI => project_uri = value,
                "" => return Err(MalformedEventError::EmptyPropertyKey),
                _ => {
                    if let Some(slot) = properties.iter_mut().find(|(k, _)| *k == key) {
                        slot.1 = value;
                    } else {
                        properties.push((key, value));
                    }
                }
            }
        }

        Ok(Self {
            timestamp: timestamp.ok_or(MalformedEventError::MissingField(KEY_TIMESTAMP))?,
            runtime: runtime.ok_or(MalformedEventError::MissingField(KEY_RUNTIME))?,
            tool,
            sensor_data_type,
            uri,
            project_uri,
            properties,
        })
    }

    /// Builds a record the way the shell does on `add`: a missing `Timestamp`
    /// becomes `now`, a missing `Runtime` becomes the timestamp.
    pub fn from_description<I, K, V>(pairs: I, now: i64) -> Result<Self, MalformedEventError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut pairs: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let timestamp = match pairs.iter().find(|(k, _)| k == KEY_TIMESTAMP) {
            Some((_, value)) => parse_field(KEY_TIMESTAMP, value)?,
            None => {
                pairs.push((KEY_TIMESTAMP.to_string(), now.to_string()));
                now
            }
        };
        if !pairs.iter().any(|(k, _)| k == KEY_RUNTIME) {
            pairs.push((KEY_RUNTIME.to_string(), timestamp.to_string()));
        }

        Self::from_map(pairs)
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn runtime(&self) -> i64 {
        self.runtime
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn sensor_data_type(&self) -> &str {
        &self.sensor_data_type
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn project_uri(&self) -> &str {
        &self.project_uri
    }

    pub fn properties(&self) -> &[(String, String)] {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn parse_field(field: &'static str, value: &str) -> Result<i64, MalformedEventError> {
    parse_timestamp(value).ok_or_else(|| MalformedEventError::InvalidTimestamp {
        field,
        value: value.to_string(),
    })
}

/// Parses epoch millis or an RFC 3339 timestamp into epoch millis.
pub fn parse_timestamp(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if let Ok(millis) = trimmed.parse::<i64>() {
        return Some(millis);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Formats epoch millis as RFC 3339 with millisecond precision (UTC), the
/// representation used on the wire.
pub fn format_timestamp(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => millis.to_string(),
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
