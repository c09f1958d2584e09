use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::es::{
    bulk_body, error_reason, summarize_bulk_response, BulkSummary, EsConfig, EsError,
    IndexStatus, BULK_CHUNK_SIZE,
};
use crate::models::{
    flights_index_mapping, format_response, FormattedResults, SearchRequest, SearchResponse,
};

/// Async HTTP client for a single index of the search service.
#[derive(Debug, Clone)]
pub struct EsClient {
    http: Client,
    base_url: String,
    config: EsConfig,
}

impl EsClient {
    /// Build a client for the configured cluster URL and index.
    pub fn new(config: EsConfig) -> Result<Self> {
        let base_url = config.url.trim_end_matches('/').to_string();

        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            config,
        })
    }

    pub fn index(&self) -> &str {
        &self.config.index
    }

    /// `GET /` succeeds.
    pub async fn ping(&self) -> Result<bool> {
        let response = self.send(self.request(Method::GET, "/")).await?;
        Ok(response.status().is_success())
    }

    /// Poll `ping` until the service answers or the ready timeout
    /// elapses.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let timeout = Duration::from_secs(self.config.ready_timeout_secs);
        let interval = Duration::from_secs(self.config.ready_poll_interval_secs.max(1));
        let started = Instant::now();

        loop {
            match self.ping().await {
                Ok(true) => {
                    info!(url = %self.base_url, "Successfully connected to Elasticsearch");
                    return Ok(());
                }
                Ok(false) => info!("Waiting for Elasticsearch..."),
                Err(err) => warn!("Connection failed: {err}"),
            }

            if started.elapsed() + interval > timeout {
                return Err(EsError::NotReady {
                    waited_secs: started.elapsed().as_secs(),
                }
                .into());
            }
            sleep(interval).await;
        }
    }

    /// `HEAD /{index}`: 200 means present, 404 absent.
    pub async fn index_exists(&self) -> Result<bool> {
        let path = format!("/{}", self.config.index);
        let response = self.send(self.request(Method::HEAD, &path)).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(EsError::Status {
                status: status.as_u16(),
                reason: format!("unexpected status checking index {}", self.config.index),
            }
            .into()),
        }
    }

    /// Create the index with the flights mapping unless it already
    /// exists.
    pub async fn create_index(&self) -> Result<IndexStatus> {
        if self.index_exists().await? {
            info!(index = %self.config.index, "Index already exists");
            return Ok(IndexStatus::Exists);
        }

        let path = format!("/{}", self.config.index);
        let request = self
            .request(Method::PUT, &path)
            .json(&flights_index_mapping());
        let response = self.send(request).await?;
        check_status(response)
            .await
            .with_context(|| format!("failed to create index {}", self.config.index))?;

        info!(index = %self.config.index, "Created index");
        Ok(IndexStatus::Created)
    }

    /// `POST /{index}/_search` with the given body.
    pub async fn search(&self, body: &SearchRequest) -> Result<SearchResponse> {
        let path = format!("/{}/_search", self.config.index);
        debug!(
            index = %self.config.index,
            body = %serde_json::to_string(body).unwrap_or_default(),
            "executing search"
        );

        let response = self
            .send(self.request(Method::POST, &path).json(body))
            .await?;
        let response = check_status(response).await?;
        response
            .json::<SearchResponse>()
            .await
            .context("failed to decode search response")
    }

    /// Run a search and flatten the response.
    pub async fn execute(&self, body: &SearchRequest) -> Result<FormattedResults> {
        let response = self.search(body).await?;
        let results = format_response(response);
        debug!(
            total_hits = results.total_hits,
            took_ms = results.took_ms,
            "search completed"
        );
        Ok(results)
    }

    /// Index documents through `_bulk`, `BULK_CHUNK_SIZE` at a time.
    ///
    /// The final chunk waits for a refresh so the documents are
    /// searchable once this returns.
    pub async fn bulk_load(&self, documents: &[Value]) -> Result<BulkSummary> {
        let mut summary = BulkSummary::default();
        let chunks = documents.chunks(BULK_CHUNK_SIZE);
        let chunk_count = chunks.len();

        for (position, chunk) in chunks.enumerate() {
            let refresh = if position + 1 == chunk_count {
                "wait_for"
            } else {
                "false"
            };
            let path = format!("/{}/_bulk?refresh={refresh}", self.config.index);
            let request = self
                .request(Method::POST, &path)
                .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                .body(bulk_body(chunk)?);

            let response = self.send(request).await?;
            let response = check_status(response)
                .await
                .with_context(|| format!("bulk request {} failed", position + 1))?;
            let body: Value = response
                .json()
                .await
                .context("failed to decode bulk response")?;

            let chunk_summary = summarize_bulk_response(&body);
            if chunk_summary.failed > 0 {
                warn!(
                    failed = chunk_summary.failed,
                    chunk = position + 1,
                    "bulk chunk had item failures"
                );
            }
            summary.indexed += chunk_summary.indexed;
            summary.failed += chunk_summary.failed;
            for reason in chunk_summary.errors {
                if summary.errors.len() < 5 {
                    summary.errors.push(reason);
                }
            }
        }

        info!(
            index = %self.config.index,
            indexed = summary.indexed,
            failed = summary.failed,
            "bulk load finished"
        );
        Ok(summary)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url_for(path));
        match &self.config.password {
            Some(password) => builder.basic_auth(&self.config.username, Some(password)),
            None => builder,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|err| EsError::Unavailable(format!("{} ({err})", self.base_url)).into())
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Turn non-success responses into `EsError::Status` with the server's
/// reason.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(EsError::Status {
        status: status.as_u16(),
        reason: error_reason(&body),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::{
        extract::State,
        http::StatusCode as AxumStatus,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;
    use tokio::net::TcpListener;

    use crate::models::Query;

    #[derive(Clone, Default)]
    struct Recorded {
        bodies: Arc<Mutex<Vec<Value>>>,
    }

    async fn spawn(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{addr}")
    }

    fn client_for(url: String) -> EsClient {
        EsClient::new(EsConfig {
            url,
            ready_timeout_secs: 1,
            ready_poll_interval_secs: 1,
            ..EsConfig::default()
        })
        .expect("client")
    }

    #[tokio::test]
    async fn search_posts_body_and_formats_response() {
        let recorded = Recorded::default();
        let app = Router::new()
            .route(
                "/kibana_sample_data_flights/_search",
                post(
                    |State(recorded): State<Recorded>, Json(body): Json<Value>| async move {
                        recorded.bodies.lock().expect("lock").push(body);
                        Json(json!({
                            "took": 3,
                            "hits": {
                                "total": {"value": 1, "relation": "eq"},
                                "hits": [{"_id": "1", "_source": {"Carrier": "ES-Air"}}]
                            }
                        }))
                    },
                ),
            )
            .with_state(recorded.clone());

        let client = client_for(spawn(app).await);
        let request = SearchRequest::with_query(Query::term("Carrier", "ES-Air")).size(5);
        let results = client.execute(&request).await.expect("execute");

        assert_eq!(results.total_hits, 1);
        assert_eq!(results.took_ms, 3);
        assert_eq!(results.hits, vec![json!({"Carrier": "ES-Air"})]);

        let bodies = recorded.bodies.lock().expect("lock");
        assert_eq!(
            bodies[0],
            json!({"size": 5, "query": {"term": {"Carrier": "ES-Air"}}})
        );
    }

    #[tokio::test]
    async fn upstream_errors_carry_status_and_reason() {
        let app = Router::new().route(
            "/kibana_sample_data_flights/_search",
            post(|| async {
                (
                    AxumStatus::BAD_REQUEST,
                    Json(json!({"error": {"reason": "unknown field [Carier]"}, "status": 400})),
                )
            }),
        );

        let client = client_for(spawn(app).await);
        let err = client
            .search(&SearchRequest::with_query(Query::MatchAll))
            .await
            .expect_err("expected error");

        match err.downcast_ref::<EsError>() {
            Some(EsError::Status { status, reason }) => {
                assert_eq!(*status, 400);
                assert_eq!(reason, "unknown field [Carier]");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_index_skips_existing_index() {
        let app = Router::new().route(
            "/kibana_sample_data_flights",
            get(|| async { Json(json!({})) }).put(|| async {
                (AxumStatus::INTERNAL_SERVER_ERROR, "should not be called")
            }),
        );

        let client = client_for(spawn(app).await);
        assert!(client.index_exists().await.expect("exists"));
        assert_eq!(
            client.create_index().await.expect("create"),
            IndexStatus::Exists
        );
    }

    #[tokio::test]
    async fn create_index_sends_mapping_when_missing() {
        let recorded = Recorded::default();
        let app = Router::new()
            .route(
                "/kibana_sample_data_flights",
                get(|| async { AxumStatus::NOT_FOUND }).put(
                    |State(recorded): State<Recorded>, Json(body): Json<Value>| async move {
                        recorded.bodies.lock().expect("lock").push(body);
                        Json(json!({"acknowledged": true}))
                    },
                ),
            )
            .with_state(recorded.clone());

        let client = client_for(spawn(app).await);
        assert_eq!(
            client.create_index().await.expect("create"),
            IndexStatus::Created
        );
        let bodies = recorded.bodies.lock().expect("lock");
        assert_eq!(bodies[0], flights_index_mapping());
    }

    #[tokio::test]
    async fn bulk_load_sends_ndjson_and_tallies_items() {
        let app = Router::new().route(
            "/kibana_sample_data_flights/_bulk",
            post(|body: String| async move {
                let documents = body.lines().count() / 2;
                let items: Vec<Value> = (0..documents)
                    .map(|_| json!({"index": {"status": 201}}))
                    .collect();
                Json(json!({"errors": false, "items": items}))
            }),
        );

        let client = client_for(spawn(app).await);
        let documents: Vec<Value> = (0..(BULK_CHUNK_SIZE + 3))
            .map(|i| json!({"FlightNum": format!("F{i}")}))
            .collect();
        let summary = client.bulk_load(&documents).await.expect("bulk");
        assert_eq!(summary.indexed, BULK_CHUNK_SIZE + 3);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn unreachable_cluster_is_unavailable_and_not_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let client = client_for(format!("http://{addr}"));
        let err = client.ping().await.expect_err("refused");
        assert!(matches!(
            err.downcast_ref::<EsError>(),
            Some(EsError::Unavailable(_))
        ));

        let err = client.wait_until_ready().await.expect_err("not ready");
        assert!(matches!(
            err.downcast_ref::<EsError>(),
            Some(EsError::NotReady { .. })
        ));
    }
}
