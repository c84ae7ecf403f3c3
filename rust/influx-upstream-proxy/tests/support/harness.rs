#![allow(dead_code)]

use axum::{
    body::{self, Body, Bytes},
    extract::{DefaultBodyLimit, Form, State},
    http::{self, HeaderMap, Method, Request, StatusCode, Uri},
    routing::{any, post},
    Json, Router,
};
use influx_upstream_proxy::{config::AppConfig, server::Server};
use serde_json::Value;
use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    sync::{Arc, Mutex, Once},
};
use tokio::{net::TcpListener, task::JoinHandle};
use tower::ServiceExt;
use url::form_urlencoded;

pub const WRITE_REJECTION: &str = "partial write: field type conflict";

static TRACING_INIT: Once = Once::new();

/// A request the fake upstream received on its write endpoint.
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub method: Method,
    pub uri: Uri,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Clone, Default)]
struct UpstreamState {
    reply: Arc<Mutex<Value>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    writes: Arc<Mutex<Vec<RecordedWrite>>>,
}

/// Prometheus-compatible upstream that answers every instant query with a canned body.
pub struct FakeUpstream {
    addr: SocketAddr,
    state: UpstreamState,
    handle: JoinHandle<()>,
}

impl FakeUpstream {
    pub async fn start() -> Self {
        let state = UpstreamState::default();
        *state.reply.lock().unwrap() = vector_reply(&[]);

        let app = Router::new()
            .route("/api/v1/query", post(Self::query))
            .route("/api/v1/write", any(Self::write))
            .layer(DefaultBodyLimit::disable())
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("fake upstream should bind");
        let addr = listener.local_addr().expect("fake upstream address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("fake upstream should serve");
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    async fn query(
        State(state): State<UpstreamState>,
        Form(form): Form<HashMap<String, String>>,
    ) -> Json<Value> {
        state.queries.lock().unwrap().push(form);
        let reply = state.reply.lock().unwrap().clone();
        Json(reply)
    }

    async fn write(
        State(state): State<UpstreamState>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> (StatusCode, [(&'static str, &'static str); 1], &'static str) {
        state.writes.lock().unwrap().push(RecordedWrite {
            method,
            uri,
            content_type: headers
                .get(http::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
        (
            StatusCode::BAD_REQUEST,
            [("x-upstream", "fake")],
            WRITE_REJECTION,
        )
    }
}

impl Drop for FakeUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Runs a test closure against a gateway router wired to a fresh fake upstream.
pub async fn with_gateway_harness<F, Fut>(test: F)
where
    F: FnOnce(GatewayHarness) -> Fut,
    Fut: Future<Output = ()>,
{
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });

    let upstream = FakeUpstream::start().await;
    let config = gateway_config(&upstream.base_url());
    let server = Server::new(config).expect("gateway should build");

    test(GatewayHarness {
        router: server.router(),
        upstream,
    })
    .await;
}

pub fn gateway_config(upstream: &str) -> AppConfig {
    AppConfig::from_vars(vec![
        ("IUP_LISTEN_HOST".to_string(), "127.0.0.1".to_string()),
        ("IUP_PORT".to_string(), "0".to_string()),
        ("IUP_UPSTREAM".to_string(), upstream.to_string()),
        ("IUP_SHUTDOWN_TIMEOUT_SECS".to_string(), "1".to_string()),
        ("IUP_SHUTDOWN_DELAY_SECS".to_string(), "0".to_string()),
    ])
    .expect("test configuration should load")
}

pub struct GatewayHarness {
    router: Router,
    upstream: FakeUpstream,
}

impl GatewayHarness {
    pub fn set_upstream_reply(&self, reply: Value) {
        *self.upstream.state.reply.lock().unwrap() = reply;
    }

    /// Form fields of every instant query the upstream received.
    pub fn upstream_queries(&self) -> Vec<HashMap<String, String>> {
        self.upstream.state.queries.lock().unwrap().clone()
    }

    pub fn upstream_writes(&self) -> Vec<RecordedWrite> {
        self.upstream.state.writes.lock().unwrap().clone()
    }

    /// POSTs `fields` as an urlencoded form to the legacy query endpoint.
    pub async fn legacy_query(&self, fields: &[(&str, &str)]) -> http::Response<Body> {
        let body = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .finish();
        let request = Request::builder()
            .method("POST")
            .uri("/query")
            .header(
                http::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(Body::from(body))
            .expect("failed to build legacy query request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> http::Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should handle harness request")
    }
}

pub fn vector_reply(samples: &[(f64, &str)]) -> Value {
    let result: Vec<Value> = samples
        .iter()
        .map(|(ts, value)| {
            serde_json::json!({
                "metric": {"__name__": "cpu_value", "db": "mydb", "host": "a"},
                "value": [ts, value],
            })
        })
        .collect();
    serde_json::json!({
        "status": "success",
        "data": {"resultType": "vector", "result": result},
    })
}

pub async fn read_text(response: http::Response<Body>) -> (StatusCode, String) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("response body should be readable");
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

pub async fn read_json(response: http::Response<Body>) -> (StatusCode, Value) {
    let (status, text) = read_text(response).await;
    let value = serde_json::from_str::<Value>(&text).expect("response body should be valid JSON");
    (status, value)
}
