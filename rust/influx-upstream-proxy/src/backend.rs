//! Instant-query client for Prometheus-compatible backends.

use crate::{
    error::{Result, ServiceError},
    proxy::join_path,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use url::Url;

pub const QUERY_API_PATH: &str = "/api/v1/query";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Unix seconds, fractional.
    pub timestamp: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorSample {
    pub labels: BTreeMap<String, String>,
    pub sample: Sample,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeSeries {
    pub labels: BTreeMap<String, String>,
    pub samples: Vec<Sample>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Scalar(Sample),
    Vector(Vec<VectorSample>),
    Matrix(Vec<RangeSeries>),
    String { timestamp: f64, value: String },
}

impl QueryValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            QueryValue::Scalar(_) => "scalar",
            QueryValue::Vector(_) => "vector",
            QueryValue::Matrix(_) => "matrix",
            QueryValue::String { .. } => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub value: QueryValue,
    pub warnings: Vec<String>,
}

/// Executes one expression at one instant. `time = None` evaluates at the backend's "now".
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn query(&self, expr: &str, time: Option<DateTime<Utc>>) -> Result<QueryOutcome>;
}

#[derive(Clone)]
pub struct PrometheusClient {
    client: Client,
    endpoint: Url,
}

impl PrometheusClient {
    pub fn new(client: Client, upstream: &Url) -> Self {
        let mut endpoint = upstream.clone();
        endpoint.set_path(&join_path(upstream.path(), QUERY_API_PATH));
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl QueryBackend for PrometheusClient {
    async fn query(&self, expr: &str, time: Option<DateTime<Utc>>) -> Result<QueryOutcome> {
        let mut form = vec![("query", expr.to_string())];
        if let Some(time) = time {
            form.push(("time", format_time(time)));
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .form(&form)
            .send()
            .await
            .map_err(|err| ServiceError::UpstreamQueryFailed(err.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ServiceError::UpstreamQueryFailed(err.to_string()))?;

        decode_response(&body).map_err(|err| match err {
            ServiceError::UpstreamQueryFailed(msg) if !status.is_success() => {
                ServiceError::UpstreamQueryFailed(format!("status {status}: {msg}"))
            }
            other => other,
        })
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    format!("{:.3}", time.timestamp_millis() as f64 / 1000.0)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum ApiData {
    Scalar(WirePoint),
    Vector(Vec<WireVectorSample>),
    Matrix(Vec<WireRangeSeries>),
    String(WirePoint),
}

type WirePoint = (f64, String);

#[derive(Debug, Deserialize)]
struct WireVectorSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: WirePoint,
}

#[derive(Debug, Deserialize)]
struct WireRangeSeries {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<WirePoint>,
}

fn decode_response(body: &[u8]) -> Result<QueryOutcome> {
    let response: ApiResponse = serde_json::from_slice(body).map_err(|err| {
        ServiceError::UpstreamQueryFailed(format!("undecodable response body: {err}"))
    })?;

    if response.status != "success" {
        let error_type = response.error_type.as_deref().unwrap_or("unknown");
        let message = response.error.as_deref().unwrap_or("no error message");
        return Err(ServiceError::UpstreamQueryFailed(format!(
            "{error_type}: {message}"
        )));
    }

    let data = response.data.ok_or_else(|| {
        ServiceError::UpstreamQueryFailed("response is missing the data field".into())
    })?;

    let value = match data {
        ApiData::Scalar(point) => QueryValue::Scalar(to_sample(point)?),
        ApiData::Vector(samples) => QueryValue::Vector(
            samples
                .into_iter()
                .map(|s| {
                    Ok(VectorSample {
                        labels: s.metric,
                        sample: to_sample(s.value)?,
                    })
                })
                .collect::<Result<_>>()?,
        ),
        ApiData::Matrix(series) => QueryValue::Matrix(
            series
                .into_iter()
                .map(|s| {
                    Ok(RangeSeries {
                        labels: s.metric,
                        samples: s.values.into_iter().map(to_sample).collect::<Result<_>>()?,
                    })
                })
                .collect::<Result<_>>()?,
        ),
        ApiData::String((timestamp, value)) => QueryValue::String { timestamp, value },
    };

    Ok(QueryOutcome {
        value,
        warnings: response.warnings,
    })
}

// Sample values travel as strings so NaN and +/-Inf survive JSON.
fn to_sample((timestamp, raw): WirePoint) -> Result<Sample> {
    let value = raw.parse::<f64>().map_err(|_| {
        ServiceError::UpstreamQueryFailed(format!("invalid sample value '{raw}'"))
    })?;
    Ok(Sample { timestamp, value })
}
