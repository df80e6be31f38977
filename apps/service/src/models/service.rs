use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable identity of a service record.
///
/// Records created by `add` use integer ids, but string ids are
/// accepted so externally managed record sets can be monitored as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceId {
    Int(i64),
    Text(String),
}

impl ServiceId {
    /// Parse a CLI/API supplied id, preferring the integer form
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        raw.parse::<i64>().map_or_else(|_| Self::Text(raw.to_string()), Self::Int)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceId::Int(id) => write!(f, "{id}"),
            ServiceId::Text(id) => write!(f, "{id}"),
        }
    }
}

impl From<i64> for ServiceId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<i32> for ServiceId {
    fn from(id: i32) -> Self {
        Self::Int(i64::from(id))
    }
}

impl From<&str> for ServiceId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

/// HTTP profile used when probing a service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProbeMethod {
    #[default]
    Get,
    Post,
    PostFile,
}

impl std::str::FromStr for ProbeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "POST_FILE" | "POST-FILE" => Ok(Self::PostFile),
            other => Err(format!("unsupported method '{other}' (expected GET, POST or POST_FILE)")),
        }
    }
}

/// Where the credential of an authenticated probe goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    Header,
    Query,
    Bearer,
}

impl std::str::FromStr for AuthKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "header" => Ok(Self::Header),
            "query" => Ok(Self::Query),
            "bearer" => Ok(Self::Bearer),
            other => Err(format!("unsupported auth type '{other}' (expected header, query or bearer)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub kind: AuthKind,
    /// Header or query parameter name; unused for bearer tokens
    #[serde(default)]
    pub key: String,
    pub value: String,
}

/// Multipart upload profile for `POST_FILE` probes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    pub field_name: Option<String>,
    pub test_file_path: Option<String>,
    pub test_content: Option<String>,
}

impl FileConfig {
    pub const DEFAULT_FIELD_NAME: &'static str = "file";
    pub const DEFAULT_CONTENT: &'static str = "test content";

    pub fn field_name(&self) -> &str {
        self.field_name.as_deref().filter(|name| !name.is_empty()).unwrap_or(Self::DEFAULT_FIELD_NAME)
    }

    pub fn test_content(&self) -> &str {
        self.test_content.as_deref().unwrap_or(Self::DEFAULT_CONTENT)
    }
}

/// Raw polling period as stored: plain seconds or a free-form description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, from = "StoredInterval")]
pub enum RawInterval {
    Seconds(i64),
    Text(String),
}

/// Any JSON value found in the `interval` field of a record
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredInterval {
    Seconds(i64),
    Fractional(f64),
    Text(String),
    Other(Value),
}

impl From<StoredInterval> for RawInterval {
    fn from(stored: StoredInterval) -> Self {
        match stored {
            StoredInterval::Seconds(seconds) => Self::Seconds(seconds),
            // Saturating cast; non-positive results take the default period
            StoredInterval::Fractional(seconds) => Self::Seconds(seconds.trunc() as i64),
            StoredInterval::Text(text) => Self::Text(text),
            StoredInterval::Other(value) => {
                tracing::warn!("Unusable interval {}, using the default", value);
                Self::default()
            }
        }
    }
}

impl Default for RawInterval {
    fn default() -> Self {
        Self::Text("60 seconds".to_string())
    }
}

impl fmt::Display for RawInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawInterval::Seconds(seconds) => write!(f, "{seconds}"),
            RawInterval::Text(text) => f.write_str(text),
        }
    }
}

/// Status of a service as seen by readers of the record set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Unknown,
    Checking,
    Up,
    Down,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Unknown => write!(f, "unknown"),
            ServiceStatus::Checking => write!(f, "checking"),
            ServiceStatus::Up => write!(f, "up"),
            ServiceStatus::Down => write!(f, "down"),
        }
    }
}

/// A monitored HTTP endpoint, as persisted in the flat record set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: ServiceId,

    #[serde(default)]
    pub name: String,

    pub url: String,

    #[serde(default)]
    pub method: ProbeMethod,

    /// JSON payload for `POST` probes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_config: Option<FileConfig>,

    #[serde(default)]
    pub auth: Option<AuthConfig>,

    #[serde(default)]
    pub interval: RawInterval,

    #[serde(default)]
    pub status: ServiceStatus,

    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    /// Fields owned by other writers of the record set, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Service {
    /// A fresh, never-checked record
    pub fn new(id: impl Into<ServiceId>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            method: ProbeMethod::Get,
            body: None,
            file_config: None,
            auth: None,
            interval: RawInterval::default(),
            status: ServiceStatus::Unknown,
            last_checked: None,
            status_code: None,
            error: None,
            response_time_ms: None,
            extra: Map::new(),
        }
    }

    pub fn with_interval(mut self, interval: RawInterval) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_method(mut self, method: ProbeMethod) -> Self {
        self.method = method;
        self
    }

    /// Name for log lines, falling back to the url
    pub fn label(&self) -> &str {
        if self.name.is_empty() { &self.url } else { &self.name }
    }
}
