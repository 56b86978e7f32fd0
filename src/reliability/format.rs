//! Line-oriented offline file format.
//!
//! ```text
//! <SensorData>
//! <Timestamp>1700000000000</Timestamp>
//! <Runtime>1700000000000</Runtime>
//! <Tool>Eclipse</Tool>
//! <SensorDataType>DevEvent</SensorDataType>
//! <URI>/src/Foo.java</URI>
//! <ProjectURI>/workspace/foo</ProjectURI>
//! <Name>Type</Name>
//! <Value>Edit</Value>
//! </SensorData>
//! ```
//!
//! Values are escaped so one value always occupies exactly one line.

use crate::domain::{EventRecord, parse_timestamp};

const OPEN: &str = "<SensorData>";
const CLOSE: &str = "</SensorData>";

/// Serializes one record, terminator and trailing newline included.
pub fn serialize_record(record: &EventRecord) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(OPEN);
    out.push('\n');
    push_line(&mut out, "Timestamp", &record.timestamp().to_string());
    push_line(&mut out, "Runtime", &record.runtime().to_string());
    push_line(&mut out, "Tool", record.tool());
    push_line(&mut out, "SensorDataType", record.sensor_data_type());
    push_line(&mut out, "URI", record.uri());
    push_line(&mut out, "ProjectURI", record.project_uri());
    for (name, value) in record.properties() {
        push_line(&mut out, "Name", name);
        push_line(&mut out, "Value", value);
    }
    out.push_str(CLOSE);
    out.push('\n');
    out
}

pub fn serialize_records<'a, I>(records: I) -> String
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    records.into_iter().map(serialize_record).collect()
}

fn push_line(out: &mut String, tag: &str, value: &str) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    out.push_str(&escape(value));
    out.push_str("</");
    out.push_str(tag);
    out.push_str(">\n");
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\n' => escaped.push_str("&#10;"),
            '\r' => escaped.push_str("&#13;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let entities = [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&#10;", '\n'),
            ("&#13;", '\r'),
        ];
        match entities.iter().find(|(entity, _)| rest.starts_with(entity)) {
            Some((entity, c)) => {
                out.push(*c);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Result of parsing an offline file.
#[derive(Debug, Default)]
pub struct ParsedRecords {
    pub records: Vec<EventRecord>,
    /// Records dropped because they were unterminated or corrupt.
    pub skipped: usize,
}

#[derive(Default)]
struct PartialRecord {
    timestamp: Option<i64>,
    runtime: Option<i64>,
    tool: String,
    sensor_data_type: String,
    uri: String,
    project_uri: String,
    properties: Vec<(String, String)>,
    pending_name: Option<String>,
    corrupt: bool,
}

impl PartialRecord {
    fn finish(self) -> Option<EventRecord> {
        if self.corrupt || self.pending_name.is_some() {
            return None;
        }
        let mut record = EventRecord::new(self.timestamp?, self.runtime?)
            .with_tool(self.tool)
            .with_sensor_data_type(self.sensor_data_type)
            .with_uri(self.uri)
            .with_project_uri(self.project_uri);
        for (name, value) in self.properties {
            record = record.with_property(name, value);
        }
        Some(record)
    }

    fn accept(&mut self, tag: &str, value: String) {
        match tag {
            "Timestamp" => self.timestamp = parse_timestamp(&value),
            "Runtime" => self.runtime = parse_timestamp(&value),
            "Tool" => self.tool = value,
            "SensorDataType" => self.sensor_data_type = value,
            "URI" => self.uri = value,
            "ProjectURI" => self.project_uri = value,
            "Name" if self.pending_name.is_none() => self.pending_name = Some(value),
            "Value" => match self.pending_name.take() {
                Some(name) => self.properties.push((name, value)),
                None => self.corrupt = true,
            },
            _ => self.corrupt = true,
        }
    }
}

/// Parses every complete record. An unterminated record (for example the
/// tail of a file whose writer died mid-record) or a corrupt one is skipped
/// and counted, never failing the whole file.
pub fn parse_records(text: &str) -> ParsedRecords {
    let mut parsed = ParsedRecords::default();
    let mut current: Option<PartialRecord> = None;

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if line == OPEN {
            if current.replace(PartialRecord::default()).is_some() {
                parsed.skipped += 1;
            }
            continue;
        }
        if line == CLOSE {
            match current.take().and_then(PartialRecord::finish) {
                Some(record) => parsed.records.push(record),
                None => parsed.skipped += 1,
            }
            continue;
        }
        let record = current.get_or_insert_with(PartialRecord::default);
        match split_tagged_line(line) {
            Some((tag, value)) => record.accept(tag, unescape(value)),
            None => record.corrupt = true,
        }
    }

    if current.is_some() {
        parsed.skipped += 1;
    }
    parsed
}

fn split_tagged_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('<')?;
    let end = rest.find('>')?;
    let tag = &rest[..end];
    let body = &rest[end + 1..];
    let value = body.strip_suffix('>')?.strip_suffix(tag)?.strip_suffix("</")?;
    Some((tag, value))
}
