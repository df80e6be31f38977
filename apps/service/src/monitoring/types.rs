use serde::{Deserialize, Serialize};

use crate::models::ServiceStatus;

/// Terminal outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Up,
    Down,
}

impl std::fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeStatus::Up => write!(f, "up"),
            ProbeStatus::Down => write!(f, "down"),
        }
    }
}

impl From<ProbeStatus> for ServiceStatus {
    fn from(status: ProbeStatus) -> Self {
        match status {
            ProbeStatus::Up => ServiceStatus::Up,
            ProbeStatus::Down => ServiceStatus::Down,
        }
    }
}

/// Result of a probe, handed to the reconciler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub status: ProbeStatus,

    /// HTTP status code, present only when a response was received
    pub status_code: Option<u16>,

    /// Human-readable cause of a `down` result
    pub error: Option<String>,

    /// Time until the response head arrived
    pub latency_ms: Option<u64>,
}

impl ProbeResult {
    /// A 2xx response
    pub fn up(status_code: u16, latency_ms: u64) -> Self {
        Self { status: ProbeStatus::Up, status_code: Some(status_code), error: None, latency_ms: Some(latency_ms) }
    }

    /// A response outside the 2xx range
    pub fn rejected(status_code: u16, reason: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            status: ProbeStatus::Down,
            status_code: Some(status_code),
            error: Some(reason.into()),
            latency_ms: Some(latency_ms),
        }
    }

    /// No response at all (DNS, refused connection, timeout, task failure)
    pub fn failure(error: impl Into<String>) -> Self {
        Self { status: ProbeStatus::Down, status_code: None, error: Some(error.into()), latency_ms: None }
    }

    pub fn is_up(&self) -> bool {
        self.status == ProbeStatus::Up
    }
}
