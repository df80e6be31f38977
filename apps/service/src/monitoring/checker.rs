use anyhow::{Context, Result, anyhow};
use reqwest::multipart::{Form, Part};
use std::error::Error as _;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::models::{AuthConfig, AuthKind, FileConfig, ProbeMethod, Service};

/// File name used for the in-memory fallback upload
const FALLBACK_FILE_NAME: &str = "test.txt";

/// What came back from the target, whatever its status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResponse {
    pub status_code: u16,
    pub latency_ms: u64,
}

/// Checker trait for issuing one probe request
///
/// `Err` means no HTTP response was obtained at all.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, service: &Service) -> Result<CheckResponse>;
}

/// Target url and extra headers after authentication has been applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedTarget {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl AuthenticatedTarget {
    /// Apply the auth strategy once. The stored url is left untouched.
    pub fn new(url: &str, auth: Option<&AuthConfig>) -> Self {
        let mut target = Self { url: url.to_string(), headers: Vec::new() };

        match auth {
            Some(AuthConfig { kind: AuthKind::Header, key, value }) => {
                target.headers.push((key.clone(), value.clone()));
            }
            Some(AuthConfig { kind: AuthKind::Query, key, value }) => {
                target.url = append_query_pair(url, key, value);
            }
            Some(AuthConfig { kind: AuthKind::Bearer, value, .. }) => {
                target.headers.push(("Authorization".to_string(), format!("Bearer {value}")));
            }
            None => {}
        }

        target
    }
}

/// Append `key=value` to the query string, keeping any fragment last
fn append_query_pair(url: &str, key: &str, value: &str) -> String {
    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, format!("#{fragment}")),
        None => (url, String::new()),
    };

    let separator = match base.find('?') {
        None => "?",
        Some(_) if base.ends_with('?') || base.ends_with('&') => "",
        Some(_) => "&",
    };

    format!(
        "{base}{separator}{}={}{fragment}",
        urlencoding::encode(key),
        urlencoding::encode(value)
    )
}

/// HTTP checker supporting GET, JSON POST and multipart file upload probes
pub struct HttpChecker {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpChecker {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).user_agent(user_agent).build()?;

        Ok(Self { client, timeout })
    }

    /// Build the outbound request: auth first, then the method profile
    pub async fn build_request(&self, service: &Service) -> Result<reqwest::Request> {
        let target = AuthenticatedTarget::new(&service.url, service.auth.as_ref());

        let mut builder = match service.method {
            ProbeMethod::Get => self.client.get(&target.url),
            ProbeMethod::Post => {
                let builder = self.client.post(&target.url);
                match &service.body {
                    Some(body) => builder.json(body),
                    None => builder,
                }
            }
            ProbeMethod::PostFile => {
                let form = upload_form(service.file_config.as_ref()).await?;
                self.client.post(&target.url).multipart(form)
            }
        };

        for (name, value) in target.headers {
            builder = builder.header(name, value);
        }

        builder.build().context("Invalid probe request")
    }

    fn describe_error(&self, error: &reqwest::Error) -> String {
        if error.is_timeout() {
            return format!("Request timed out after {}s", self.timeout.as_secs());
        }

        // reqwest keeps the useful part (refused, dns) in the source chain
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, service: &Service) -> Result<CheckResponse> {
        let request = self.build_request(service).await?;
        debug!("Probing {} {}", request.method(), request.url());

        let start = Instant::now();
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| anyhow!("HTTP request failed: {}", self.describe_error(&e)))?;

        Ok(CheckResponse {
            status_code: response.status().as_u16(),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// One-part multipart form, from the fixture file when present on disk
async fn upload_form(config: Option<&FileConfig>) -> Result<Form> {
    let default_config = FileConfig::default();
    let config = config.unwrap_or(&default_config);

    let fixture_path = config.test_file_path.as_deref().map(Path::new);
    let fixture_exists = match fixture_path {
        Some(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
        None => false,
    };

    let fixture = match fixture_path {
        Some(path) if fixture_exists => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read upload fixture {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
            Some((name, bytes))
        }
        _ => None,
    };

    let (file_name, bytes) = fixture.unwrap_or_else(|| {
        (FALLBACK_FILE_NAME.to_string(), config.test_content().as_bytes().to_vec())
    });

    let part = Part::bytes(bytes).file_name(file_name);
    Ok(Form::new().part(config.field_name().to_string(), part))
}
