// Wire encoding: one GET request per record, every field URL-encoded as a
// query parameter.

use super::client::TransportError;
use crate::domain::{EventRecord, format_timestamp};
use url::Url;

pub const SENSORDATA_PATH: &str = "sensordata";
pub const PING_PATH: &str = "ping";

/// Parses a host URL and makes sure its path ends with `/` so relative
/// endpoints join underneath it instead of replacing the last segment.
pub fn normalize_host(host: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(host.trim()).map_err(|e| {
        TransportError::InvalidConfiguration(format!("Invalid host URL '{host}': {e}"))
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

pub fn endpoint(host: &Url, path: &str) -> Result<Url, TransportError> {
    host.join(path).map_err(|e| {
        TransportError::InvalidConfiguration(format!("Invalid endpoint '{path}' under {host}: {e}"))
    })
}

/// Builds the request URL for one record.
///
/// Properties are numbered from 1 in record order as `nameN`/`valueN`.
pub fn encode_record(sensordata_url: &Url, record: &EventRecord, project_id: Option<&str>) -> Url {
    let mut url = sensordata_url.clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("Timestamp", &format_timestamp(record.timestamp()))
            .append_pair("Runtime", &format_timestamp(record.runtime()))
            .append_pair("Tool", record.tool())
            .append_pair("SensorDataType", record.sensor_data_type())
            .append_pair("Resource", record.uri());

        if let Some(project_id) = project_id {
            query.append_pair("ProjectId", project_id);
        }

        for (index, (name, value)) in record.properties().iter().enumerate() {
            let n = index + 1;
            query
                .append_pair(&format!("name{n}"), name)
                .append_pair(&format!("value{n}"), value);
        }
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_normalize_host_appends_slash() {
        let url = normalize_host("http://localhost:9876/sensorbase").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9876/sensorbase/");
        assert_eq!(
            endpoint(&url, PING_PATH).unwrap().as_str(),
            "http://localhost:9876/sensorbase/ping"
        );
    }

    #[test]
    fn test_normalize_host_rejects_garbage() {
        assert!(matches!(
            normalize_host("not a url"),
            Err(TransportError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_encode_record_numbers_properties() {
        let base = Url::parse("http://h/sensorbase/sensordata").unwrap();
        let record = EventRecord::new(0, 1000)
            .with_tool("Eclipse")
            .with_sensor_data_type("DevEvent")
            .with_uri("/a b.rs")
            .with_property("Type", "x=1&y=2")
            .with_property("Note", "ünïcode");

        let url = encode_record(&base, &record, Some("p1"));
        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();

        assert_eq!(pairs["Timestamp"], "1970-01-01T00:00:00.000Z");
        assert_eq!(pairs["Runtime"], "1970-01-01T00:00:01.000Z");
        assert_eq!(pairs["Tool"], "Eclipse");
        assert_eq!(pairs["Resource"], "/a b.rs");
        assert_eq!(pairs["ProjectId"], "p1");
        assert_eq!(pairs["name1"], "Type");
        assert_eq!(pairs["value1"], "x=1&y=2");
        assert_eq!(pairs["name2"], "Note");
        assert_eq!(pairs["value2"], "ünïcode");
    }
}
