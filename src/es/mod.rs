//! Elasticsearch connectivity.
//!
//! `EsClient` talks to the external search service over HTTP: readiness
//! checks, creation of the flights index, `_search`, and `_bulk`
//! loading. Upstream failures surface as `EsError` values wrapped in
//! `anyhow::Error`, so callers can downcast to pick HTTP status codes.

use std::fmt;
use std::io::BufRead;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::FLIGHTS_INDEX;

mod client;

pub use client::EsClient;

/// Default address of a local development cluster.
pub const DEFAULT_ES_URL: &str = "http://localhost:9200";

/// Default user for basic authentication.
pub const DEFAULT_ES_USER: &str = "elastic";

/// Number of documents sent per `_bulk` request.
pub const BULK_CHUNK_SIZE: usize = 500;

/// Connection settings for the search service.
#[derive(Debug, Clone, PartialEq)]
pub struct EsConfig {
    pub url: String,
    pub username: String,
    /// Basic auth is only sent when a password is configured.
    pub password: Option<String>,
    pub index: String,
    /// Accept self-signed certificates (local clusters generate one).
    pub insecure: bool,
    pub request_timeout_secs: u64,
    pub ready_timeout_secs: u64,
    pub ready_poll_interval_secs: u64,
}

impl Default for EsConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ES_URL.to_string(),
            username: DEFAULT_ES_USER.to_string(),
            password: None,
            index: FLIGHTS_INDEX.to_string(),
            insecure: true,
            request_timeout_secs: 30,
            ready_timeout_secs: 300,
            ready_poll_interval_secs: 5,
        }
    }
}

/// Failure reported by, or while reaching, the search service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EsError {
    /// The service answered with a non-success status.
    Status { status: u16, reason: String },
    /// The service could not be reached (connection refused, timeout).
    Unavailable(String),
    /// `wait_until_ready` gave up.
    NotReady { waited_secs: u64 },
}

impl fmt::Display for EsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EsError::Status { status, reason } => {
                write!(f, "Elasticsearch returned status {status}: {reason}")
            }
            EsError::Unavailable(message) => {
                write!(f, "Elasticsearch is unavailable: {message}")
            }
            EsError::NotReady { waited_secs } => write!(
                f,
                "Elasticsearch did not become available in time (waited {waited_secs}s)"
            ),
        }
    }
}

impl std::error::Error for EsError {}

/// Outcome of `EsClient::create_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Created,
    Exists,
}

/// Counts reported after a bulk load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSummary {
    pub indexed: usize,
    pub failed: usize,
    /// First few item-level error reasons, for display.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Extract a readable reason from an error response body.
///
/// Handles `{"error": {"reason": ...}}`, `{"error": "..."}`, and falls
/// back to the raw (trimmed) body.
pub fn error_reason(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        match value.get("error") {
            Some(Value::String(message)) => return message.clone(),
            Some(error) => {
                if let Some(reason) = error
                    .get("root_cause")
                    .and_then(|causes| causes.get(0))
                    .and_then(|cause| cause.get("reason"))
                    .or_else(|| error.get("reason"))
                    .and_then(Value::as_str)
                {
                    return reason.to_string();
                }
            }
            None => {}
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

/// Read newline-delimited JSON documents, skipping blank lines.
pub fn read_json_lines<R: BufRead>(reader: R) -> Result<Vec<Value>> {
    let mut documents = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", index + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let document: Value = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid JSON document on line {}", index + 1))?;
        if !document.is_object() {
            anyhow::bail!("line {} is not a JSON object", index + 1);
        }
        documents.push(document);
    }
    Ok(documents)
}

/// Render documents as a `_bulk` NDJSON body of index actions.
pub fn bulk_body(documents: &[Value]) -> Result<String> {
    let mut body = String::new();
    for document in documents {
        body.push_str("{\"index\":{}}\n");
        body.push_str(&serde_json::to_string(document).context("failed to encode document")?);
        body.push('\n');
    }
    Ok(body)
}

/// Tally a `_bulk` response: items carrying an `error` are failures.
pub fn summarize_bulk_response(response: &Value) -> BulkSummary {
    const MAX_REPORTED_ERRORS: usize = 5;

    let mut summary = BulkSummary::default();
    let items = response
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for item in items {
        let outcome = item
            .as_object()
            .and_then(|actions| actions.values().next());
        match outcome.and_then(|outcome| outcome.get("error")) {
            Some(error) => {
                summary.failed += 1;
                if summary.errors.len() < MAX_REPORTED_ERRORS {
                    let reason = error
                        .get("reason")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string());
                    summary.errors.push(reason);
                }
            }
            None => summary.indexed += 1,
        }
    }

    summary
}
