use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Keys that identify the inbound file and never travel to the outbound message
const TRANSPORT_KEYS: [&str; 6] = ["dataset", "collection", "uri", "uid", "format", "type"];

const NAIVE_TIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// One message on the bus: a topic, a message type and a JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub subject: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sender: String,
    pub time: DateTime<Utc>,
    #[serde(default = "Uuid::now_v7")]
    pub id: Uuid,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl BusMessage {
    pub fn new(subject: &str, kind: &str, sender: &str, data: Map<String, Value>) -> Self {
        Self {
            subject: subject.to_string(),
            kind: kind.to_string(),
            sender: sender.to_string(),
            time: Utc::now(),
            id: Uuid::now_v7(),
            data,
        }
    }

    /// Subscription match: the subject starts with one of the topics
    pub fn matches_topic(&self, topics: &[String]) -> bool {
        topics.iter().any(|topic| self.subject.starts_with(topic.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MessageError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' has an invalid value: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Granule notification, validated out of a message payload
#[derive(Debug, Clone, PartialEq)]
pub struct GranuleMessage {
    pub uri: String,
    pub source_path: PathBuf,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub instruments: Vec<String>,
    pub satellite: String,
    pub product: Option<String>,
    /// The untouched payload, used to derive the outbound message
    pub data: Map<String, Value>,
}

impl GranuleMessage {
    pub fn from_data(data: &Map<String, Value>) -> Result<Self, MessageError> {
        let start_time = match data.get("start_time") {
            Some(value) if !value.is_null() => parse_timestamp("start_time", value)?,
            _ => return Err(MessageError::MissingField("start_time")),
        };

        let end_time = match data.get("end_time") {
            Some(value) if !value.is_null() => Some(parse_timestamp("end_time", value)?),
            _ => None,
        };

        let uri = data
            .get("uri")
            .and_then(Value::as_str)
            .ok_or(MessageError::MissingField("uri"))?
            .to_string();
        let source_path = path_from_uri(&uri)?;

        let satellite = data
            .get("satellite")
            .or_else(|| data.get("platform_name"))
            .and_then(Value::as_str)
            .ok_or(MessageError::MissingField("satellite"))?
            .to_string();

        let instruments = match data.get("instruments").or_else(|| data.get("instrument")) {
            Some(Value::String(name)) => vec![name.clone()],
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        if instruments.is_empty() {
            return Err(MessageError::MissingField("instruments"));
        }

        let product = match data.get("product") {
            Some(Value::String(product)) => Some(product.clone()),
            Some(Value::Number(product)) => Some(product.to_string()),
            _ => None,
        };

        Ok(Self {
            uri,
            source_path,
            start_time,
            end_time,
            instruments,
            satellite,
            product,
            data: data.clone(),
        })
    }

    /// Minute-resolution scene identifier, e.g. "202306211005"
    pub fn scene_id(&self) -> String {
        self.start_time.format("%Y%m%d%H%M").to_string()
    }

    pub fn source_filename(&self) -> Option<&str> {
        self.source_path.file_name().and_then(|name| name.to_str())
    }
}

fn parse_timestamp(field: &'static str, value: &Value) -> Result<DateTime<Utc>, MessageError> {
    let text = value.as_str().ok_or_else(|| MessageError::InvalidField {
        field,
        reason: format!("expected a timestamp string, got {}", value),
    })?;

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NAIVE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| MessageError::InvalidField {
            field,
            reason: format!("unrecognised timestamp '{}'", text),
        })
}

/// Local path referenced by a message uri: "file:///data/x.bin",
/// "file://host/data/x.bin", "file:/data/x.bin" or "/data/x.bin"
fn path_from_uri(uri: &str) -> Result<PathBuf, MessageError> {
    if let Some(rest) = uri.strip_prefix("file://") {
        // file://host/path keeps only the path part
        let path = match rest.find('/') {
            Some(index) => &rest[index..],
            None => rest,
        };
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = uri.strip_prefix("file:") {
        return Ok(PathBuf::from(path));
    }

    if uri.contains("://") {
        return Err(MessageError::InvalidField {
            field: "uri",
            reason: format!("'{}' is not a local file", uri),
        });
    }

    Ok(PathBuf::from(uri))
}

/// Payload announcing a routed file: the inbound payload minus its
/// transport fields, pointing at the destination
pub fn outbound_data(input: &Map<String, Value>, destination: &Path) -> Map<String, Value> {
    let mut data = input.clone();
    for key in TRANSPORT_KEYS {
        data.remove(key);
    }

    let uid = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    data.insert("uri".to_string(), Value::String(destination.display().to_string()));
    data.insert("uid".to_string(), Value::String(uid));
    data.insert("type".to_string(), Value::String("unknown".to_string()));
    data.insert("format".to_string(), Value::String("BUFR".to_string()));
    data
}
