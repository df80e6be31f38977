use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::checker::{Checker, HttpChecker};
use super::types::ProbeResult;
use crate::models::Service;

/// Probe executor - runs one check and classifies the outcome
///
/// Never touches shared state: the caller reconciles the returned result.
pub struct ProbeExecutor {
    checker: Arc<dyn Checker>,
}

impl ProbeExecutor {
    /// Create a probe executor backed by the HTTP checker
    pub fn new(timeout_seconds: u64, user_agent: &str) -> Result<Self> {
        let checker = HttpChecker::new(Duration::from_secs(timeout_seconds.max(1)), user_agent)?;
        Ok(Self::with_checker(Arc::new(checker)))
    }

    pub fn with_checker(checker: Arc<dyn Checker>) -> Self {
        Self { checker }
    }

    /// Probe a service: 2xx is `up`, every other outcome is `down`
    pub async fn probe(&self, service: &Service) -> ProbeResult {
        let result = match self.checker.check(service).await {
            Ok(response) if (200..300).contains(&response.status_code) => {
                ProbeResult::up(response.status_code, response.latency_ms)
            }
            Ok(response) => {
                let reason = reqwest::StatusCode::from_u16(response.status_code)
                    .ok()
                    .and_then(|code| code.canonical_reason())
                    .map(|reason| format!(" {reason}"))
                    .unwrap_or_default();
                ProbeResult::rejected(
                    response.status_code,
                    format!("HTTP status {}{}", response.status_code, reason),
                    response.latency_ms,
                )
            }
            Err(e) => ProbeResult::failure(format!("{e:#}")),
        };

        if result.is_up() {
            info!(
                service = %service.id,
                "Service {} is up - {:?} - {:?}ms",
                service.label(),
                result.status_code,
                result.latency_ms
            );
        } else {
            warn!(
                service = %service.id,
                "Service {} is down - {}",
                service.label(),
                result.error.as_deref().unwrap_or("no detail")
            );
        }

        result
    }
}
