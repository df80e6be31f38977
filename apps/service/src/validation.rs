use url::Url;

use crate::error::MonitorError;
use crate::models::{AuthKind, Service};

/// Validation results with specific error messages
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { is_valid: true, error: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { is_valid: false, error: Some(msg.into()) }
    }

    pub fn into_result(self) -> Result<(), MonitorError> {
        if self.is_valid {
            Ok(())
        } else {
            Err(MonitorError::InvalidService(
                self.error.unwrap_or_else(|| "Validation failed".to_string()),
            ))
        }
    }
}

/// Validate the HTTP/HTTPS url a service is probed at
pub fn validate_service_url(target: &str) -> ValidationResult {
    if target.trim().is_empty() {
        return ValidationResult::err("URL cannot be empty");
    }

    match Url::parse(target) {
        Ok(url) => {
            let scheme = url.scheme();
            if scheme != "http" && scheme != "https" {
                return ValidationResult::err(format!(
                    "Invalid scheme '{scheme}'. Must be http or https"
                ));
            }

            if url.host_str().is_none() {
                return ValidationResult::err("URL must have a valid host");
            }

            ValidationResult::ok()
        }
        Err(e) => {
            if !target.contains("://") {
                ValidationResult::err("URL must include scheme (http:// or https://)")
            } else {
                ValidationResult::err(format!("Invalid URL: {e}"))
            }
        }
    }
}

/// Validate service name
pub fn validate_service_name(name: &str) -> ValidationResult {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return ValidationResult::err("Name cannot be empty");
    }

    if trimmed.len() > 100 {
        return ValidationResult::err("Name too long (max 100 characters)");
    }

    ValidationResult::ok()
}

/// Validate a record before it is written by a management operation
pub fn validate_service(service: &Service) -> ValidationResult {
    for result in [validate_service_name(&service.name), validate_service_url(&service.url)] {
        if !result.is_valid {
            return result;
        }
    }

    if let Some(auth) = &service.auth {
        if matches!(auth.kind, AuthKind::Header | AuthKind::Query) && auth.key.trim().is_empty() {
            return ValidationResult::err("Header and query auth require a key");
        }
        if auth.value.is_empty() {
            return ValidationResult::err("Auth value cannot be empty");
        }
    }

    ValidationResult::ok()
}
