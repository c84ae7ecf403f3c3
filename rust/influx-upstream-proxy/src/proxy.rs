//! Transparent reverse proxy for every path that is not the legacy query endpoint.

use crate::{
    error::{Result, ServiceError},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, Uri},
    response::Response,
};
use reqwest::Client;
use std::net::{IpAddr, SocketAddr};
use tracing::warn;
use url::Url;

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Clone)]
pub struct Proxy {
    client: Client,
    upstream: Url,
}

impl Proxy {
    pub fn new(client: Client, upstream: Url) -> Self {
        Self { client, upstream }
    }

    /// Upstream URL for `uri`: paths joined by one slash, query strings joined by `&`.
    pub fn target_url(&self, uri: &Uri) -> Url {
        let mut url = self.upstream.clone();
        url.set_path(&join_path(self.upstream.path(), uri.path()));

        let base_query = self.upstream.query().filter(|q| !q.is_empty());
        let request_query = uri.query().filter(|q| !q.is_empty());
        let query = match (base_query, request_query) {
            (Some(base), Some(request)) => Some(format!("{base}&{request}")),
            (base, request) => base.or(request).map(str::to_string),
        };
        url.set_query(query.as_deref());
        url
    }

    pub async fn forward(&self, request: Request, peer: Option<SocketAddr>) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let target = self.target_url(&parts.uri);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        if let Some(peer) = peer {
            append_forwarded_for(&mut headers, peer.ip());
        }

        let upstream = self
            .client
            .request(parts.method.clone(), target.clone())
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await
            .map_err(|err| {
                warn!(method = %parts.method, %target, error = %err, "passthrough request failed");
                ServiceError::Proxy(err.to_string())
            })?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

pub async fn forward(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Result<Response> {
    state
        .proxy
        .forward(request, peer.map(|ConnectInfo(addr)| addr))
        .await
}

/// Joins two URL paths with exactly one slash between them.
pub(crate) fn join_path(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in listed {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let forwarded = match headers
        .get(X_FORWARDED_FOR)
        .and_then(|prior| prior.to_str().ok())
    {
        Some(prior) => format!("{prior}, {ip}"),
        None => ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
