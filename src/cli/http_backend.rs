use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::Serialize;

use crate::es::error_reason;
use crate::models::FormattedResults;
use crate::search::flights::FlightQuery;
use crate::search::query::{QueryKind, QueryParams};
use crate::server::QueryRequest;

/// HTTP client backend that delegates queries to a running
/// `flightquery serve` daemon.
pub struct HttpQueryBackend {
    client: Client,
    base_url: String,
}

impl HttpQueryBackend {
    /// Create a new HTTP backend targeting the given base URL
    /// (e.g. "http://127.0.0.1:5000").
    pub fn new<S: Into<String>>(base_url: S) -> Result<Self> {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client, base_url })
    }

    /// Execute a built query via `POST /v1/query`.
    pub fn query(&self, kind: QueryKind, params: QueryParams) -> Result<FormattedResults> {
        let request = QueryRequest {
            kind: kind.as_str().to_string(),
            params,
        };
        self.post_json("/v1/query", &request)
    }

    /// Execute a catalogue query via `POST /v1/flights`.
    pub fn flights(&self, entry: &FlightQuery) -> Result<FormattedResults> {
        self.post_json("/v1/flights", entry)
    }

    fn post_json<T, R>(&self, path: &str, body: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let url = self.url_for(path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .with_context(|| format!("failed to send request to {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!(
                "server returned {} for {}: {}",
                status,
                url,
                error_reason(&body)
            ));
        }

        let value = response
            .json::<R>()
            .context("failed to decode JSON response from server")?;

        Ok(value)
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}
