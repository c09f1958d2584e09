//! In-process stand-in for an Elasticsearch cluster.
//!
//! Serves just enough of the REST API for the CLI and daemon tests:
//! `GET /`, `HEAD|GET|PUT /{index}`, `POST /{index}/_search`, and
//! `POST /{index}/_bulk`. Search responses echo the request body under
//! `aggregations.echo` so tests can assert on what was sent. Bulk
//! documents with `"reject": true` come back as item errors.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct FakeState {
    indices: Arc<Mutex<HashSet<String>>>,
    searches: Arc<Mutex<Vec<Value>>>,
    bulk_lines: Arc<Mutex<usize>>,
}

pub struct FakeEs {
    pub url: String,
    state: FakeState,
}

impl FakeEs {
    pub fn spawn() -> Self {
        let state = FakeState::default();
        let app = Router::new()
            .route("/", get(root))
            .route("/:index", get(index_head).put(create_index))
            .route("/:index/_search", post(search))
            .route("/:index/_bulk", post(bulk))
            .with_state(state.clone());

        let (tx, rx) = mpsc::channel::<SocketAddr>();
        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("fake es runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind fake es");
                tx.send(listener.local_addr().expect("fake es addr"))
                    .expect("send fake es addr");
                axum::serve(listener, app).await.expect("serve fake es");
            });
        });

        let addr = rx.recv().expect("fake es address");
        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    /// Bodies received by `_search`, oldest first.
    pub fn searches(&self) -> Vec<Value> {
        self.state.searches.lock().expect("lock").clone()
    }

    pub fn has_index(&self, index: &str) -> bool {
        self.state.indices.lock().expect("lock").contains(index)
    }

    pub fn bulk_documents(&self) -> usize {
        *self.state.bulk_lines.lock().expect("lock") / 2
    }
}

/// Address with nothing listening on it.
pub fn unused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}")
}

async fn root() -> Json<Value> {
    Json(json!({"name": "fake-es", "version": {"number": "8.15.0"}}))
}

async fn index_head(State(state): State<FakeState>, Path(index): Path<String>) -> StatusCode {
    if state.indices.lock().expect("lock").contains(&index) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn create_index(
    State(state): State<FakeState>,
    Path(index): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if body["mappings"]["properties"]["Carrier"]["type"] != "keyword" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"reason": "missing flights mapping"}})),
        );
    }
    state.indices.lock().expect("lock").insert(index.clone());
    (
        StatusCode::OK,
        Json(json!({"acknowledged": true, "index": index})),
    )
}

async fn search(
    State(state): State<FakeState>,
    Path(index): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if index == "missing_index" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": {
                    "root_cause": [{"type": "index_not_found_exception", "reason": "no such index [missing_index]"}],
                    "reason": "no such index [missing_index]"
                },
                "status": 404
            })),
        );
    }

    state.searches.lock().expect("lock").push(body.clone());
    (
        StatusCode::OK,
        Json(json!({
            "took": 5,
            "timed_out": false,
            "hits": {
                "total": {"value": 2, "relation": "eq"},
                "hits": [
                    {"_id": "1", "_source": {"FlightNum": "9HY9SWR", "Carrier": "ES-Air", "AvgTicketPrice": 841.27}},
                    {"_id": "2", "_source": {"FlightNum": "X98CCZO", "Carrier": "JetBeats", "AvgTicketPrice": 882.98}}
                ]
            },
            "aggregations": {"echo": body}
        })),
    )
}

async fn bulk(State(state): State<FakeState>, body: String) -> Json<Value> {
    let lines: Vec<&str> = body.lines().filter(|l| !l.trim().is_empty()).collect();
    *state.bulk_lines.lock().expect("lock") += lines.len();

    // Documents carrying `"reject": true` fail the way a mapping
    // conflict does.
    let items: Vec<Value> = lines
        .chunks(2)
        .map(|pair| {
            let document: Value = pair
                .get(1)
                .and_then(|line| serde_json::from_str(line).ok())
                .unwrap_or(Value::Null);
            if document["reject"] == Value::Bool(true) {
                json!({"index": {
                    "status": 400,
                    "error": {
                        "type": "mapper_parsing_exception",
                        "reason": format!("failed to parse document {}", document["FlightNum"])
                    }
                }})
            } else {
                json!({"index": {"status": 201, "result": "created"}})
            }
        })
        .collect();
    let errors = items.iter().any(|item| item["index"].get("error").is_some());
    Json(json!({"took": 1, "errors": errors, "items": items}))
}
