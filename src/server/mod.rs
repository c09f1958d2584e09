//! HTTP daemon/server mode for `flightquery`.
//!
//! This module exposes a small HTTP+JSON API in front of the search
//! service:
//!
//! - `GET /v1/health` – simple health check endpoint.
//! - `GET /flights/delay-analysis?min_delay=N` – delayed flights
//!   summarised per carrier (default `min_delay` is 40 minutes).
//! - `POST /v1/query` – accepts `{"kind": ..., "params": {...}}`, builds
//!   the request with the query builder, and returns `FormattedResults`.
//! - `POST /v1/flights` – accepts a catalogue entry such as
//!   `{"name": "by-carrier", "carrier": "ES-Air"}`.
//! - `POST /v1/search` – accepts a raw `SearchRequest` body.
//!
//! The server is intentionally thin: it performs JSON
//! (de)serialization, delegates to `EsClient`, and converts errors into
//! JSON HTTP responses.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, Query as QueryString, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::es::{EsClient, EsError};
use crate::models::{FormattedResults, SearchRequest};
use crate::search::flights::{delay_analysis_request, FlightQuery, DEFAULT_MIN_DELAY};
use crate::search::query::{build_query, parse_query_kind, QueryParams};

/// Shared handler state.
pub type AppState = Arc<EsClient>;

/// Simple health-check response payload.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// JSON error body returned by the API.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Body of `POST /v1/query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub kind: String,
    #[serde(default)]
    pub params: QueryParams,
}

/// Query string of `GET /flights/delay-analysis`. Kept as text so a
/// malformed value yields our JSON error rather than the extractor's
/// plain-text rejection.
#[derive(Debug, Deserialize)]
struct DelayAnalysisParams {
    min_delay: Option<String>,
}

/// Error type used by HTTP handlers to map internal failures into
/// JSON error responses.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let status = match err.downcast_ref::<EsError>() {
            Some(EsError::Unavailable(_)) | Some(EsError::NotReady { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Some(EsError::Status { .. }) => StatusCode::BAD_GATEWAY,
            // Anything else comes from building or validating the
            // request.
            None => StatusCode::BAD_REQUEST,
        };
        if status != StatusCode::BAD_REQUEST {
            warn!("upstream search failed: {err:#}");
        }
        Self {
            status,
            message: format!("{err:#}"),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

/// Build the Axum router for the flightquery HTTP API.
pub fn router(client: EsClient) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/flights/delay-analysis", get(delay_analysis))
        .route("/v1/query", post(query))
        .route("/v1/flights", post(flights))
        .route("/v1/search", post(search))
        .with_state(Arc::new(client))
}

/// Run the HTTP server bound to the provided socket address.
///
/// This is used by the CLI `flightquery serve` subcommand.
pub async fn run(addr: SocketAddr, client: EsClient) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_with_listener(listener, client).await
}

/// Run the HTTP server using an existing `TcpListener`.
///
/// This is primarily used in tests to bind to an ephemeral port.
pub async fn serve_with_listener(listener: TcpListener, client: EsClient) -> Result<()> {
    info!(addr = %listener.local_addr()?, index = client.index(), "HTTP API listening");
    axum::serve(listener, router(client)).await?;
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn delay_analysis(
    State(client): State<AppState>,
    QueryString(params): QueryString<DelayAnalysisParams>,
) -> Result<Json<FormattedResults>, ApiError> {
    let min_delay = match params.min_delay.as_deref() {
        None => DEFAULT_MIN_DELAY,
        Some(raw) => raw.trim().parse::<i64>().map_err(|_| {
            ApiError::bad_request(format!("invalid min_delay `{raw}`: expected an integer"))
        })?,
    };

    let request = delay_analysis_request(min_delay)?;
    let results = client.execute(&request).await?;
    Ok(Json(results))
}

async fn query(
    State(client): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<FormattedResults>, ApiError> {
    let Json(body) = payload?;
    let kind = parse_query_kind(&body.kind)?;
    let request = build_query(kind, body.params)?;
    let results = client.execute(&request).await?;
    Ok(Json(results))
}

async fn flights(
    State(client): State<AppState>,
    payload: Result<Json<FlightQuery>, JsonRejection>,
) -> Result<Json<FormattedResults>, ApiError> {
    let Json(entry) = payload?;
    let request = entry.to_request()?;
    info!(query = entry.name(), "running catalogue query");
    let results = client.execute(&request).await?;
    Ok(Json(results))
}

async fn search(
    State(client): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<FormattedResults>, ApiError> {
    let Json(request) = payload?;
    let results = client.execute(&request).await?;
    Ok(Json(results))
}
