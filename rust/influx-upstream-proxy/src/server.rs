use crate::{
    backend::{PrometheusClient, QueryBackend},
    config::AppConfig,
    error::{Result, ServiceError},
    proxy::{self, Proxy},
    query::{QueryEngine, RequestParameters},
    state::AppState,
};
use anyhow::Context;
use axum::{
    body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, Method},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper::{body::Incoming, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder as ConnBuilder,
};
use reqwest::{redirect, Client};
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    signal,
    sync::watch,
    task::JoinSet,
};
use tower::Service;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, error, info, warn, Level};
use url::form_urlencoded;

pub const LEGACY_QUERY_PATH: &str = "/query";

const MAX_FORM_BYTES: usize = 10 << 20;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Server {
    config: Arc<AppConfig>,
    state: AppState,
}

impl Server {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let client = upstream_client()?;
        let backend = Arc::new(PrometheusClient::new(client.clone(), &config.upstream));
        Ok(Self::assemble(config, client, backend))
    }

    /// Builds a server whose legacy queries run against `backend` instead of the upstream API.
    pub fn with_backend(config: AppConfig, backend: Arc<dyn QueryBackend>) -> anyhow::Result<Self> {
        let client = upstream_client()?;
        Ok(Self::assemble(config, client, backend))
    }

    fn assemble(config: AppConfig, client: Client, backend: Arc<dyn QueryBackend>) -> Self {
        let proxy = Proxy::new(client, config.upstream.clone());
        let state = AppState::new(QueryEngine::new(backend), proxy);
        Self {
            config: Arc::new(config),
            state,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(LEGACY_QUERY_PATH, any(Self::legacy_query))
            .fallback(proxy::forward)
            .with_state(self.state.clone())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            )
    }

    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Binds the configured address and serves until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        self.serve(listener, shutdown).await
    }

    /// Accepts connections from `listener` until `shutdown` resolves. In-flight
    /// requests then get `shutdown_timeout` to finish before their connections
    /// are aborted.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, upstream = %self.config.upstream, "HTTP server started");

        let router = self.router();
        let (drain_tx, drain_rx) = watch::channel(());
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(serve_connection(
                            stream,
                            peer,
                            router.clone(),
                            drain_rx.clone(),
                        ));
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
        drop(listener);

        let timeout = self.config.shutdown_timeout;
        info!(
            timeout_secs = timeout.as_secs(),
            connections = connections.len(),
            "HTTP server stopping, waiting for in-progress requests to finish"
        );
        let _ = drain_tx.send(());

        let drained = tokio::time::timeout(timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "drain timeout elapsed, closing remaining connections"
            );
            connections.shutdown().await;
        }

        let delay = self.config.shutdown_delay;
        info!(
            delay_secs = delay.as_secs(),
            "HTTP server shutdown finished, delaying before exit"
        );
        tokio::time::sleep(delay).await;
        info!("server exited");
        Ok(())
    }

    async fn legacy_query(State(state): State<AppState>, request: Request) -> Result<Response> {
        let form = read_form(request).await?;
        let params = RequestParameters::from_form(&form)?;
        let response = state.query.execute(&params).await?;
        let body = response.to_json_bytes()?;

        Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
    }
}

/// Serves one connection; a drain signal lets the current request finish and then closes it.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    mut drain: watch::Receiver<()>,
) {
    let service = service_fn(move |mut request: hyper::Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        router.clone().call(request)
    });
    let builder = ConnBuilder::new(TokioExecutor::new());
    let connection = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let mut draining = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(err) = result {
                    debug!(%peer, error = %err, "connection closed with error");
                }
                break;
            }
            _ = drain.changed(), if !draining => {
                draining = true;
                connection.as_mut().graceful_shutdown();
            }
        }
    }
}

fn upstream_client() -> anyhow::Result<Client> {
    Client::builder()
        .redirect(redirect::Policy::none())
        .build()
        .context("failed to build upstream HTTP client")
}

/// Decodes form fields from an urlencoded body followed by the URL query string,
/// so body values win when a field appears in both. Only POST, PUT and PATCH
/// bodies are read.
async fn read_form(request: Request) -> Result<Vec<(String, String)>> {
    let (parts, body) = request.into_parts();
    let mut form = Vec::new();

    if has_form_body(&parts.method) && is_urlencoded(&parts.headers) {
        let bytes = body::to_bytes(body, MAX_FORM_BYTES)
            .await
            .map_err(|err| ServiceError::InvalidBody(err.to_string()))?;
        form.extend(form_urlencoded::parse(&bytes).into_owned());
    }

    if let Some(query) = parts.uri.query() {
        form.extend(form_urlencoded::parse(query.as_bytes()).into_owned());
    }

    Ok(form)
}

fn has_form_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn is_urlencoded(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| {
            mime.trim()
                .eq_ignore_ascii_case("application/x-www-form-urlencoded")
        })
        .unwrap_or(false)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
