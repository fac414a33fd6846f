//! Custom-metric adapter for Prometheus-compatible instant queries.
//!
//! An unreachable backend (connect failure, timeout, non-200 status, or an
//! `https` url this plain-HTTP client cannot reach) is answered with a
//! fallback value so the control loop never stalls. A
//! backend that answers 200 with a payload we cannot use is reported as an
//! error, which the decision engine scores as neutral.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http_body_util::BodyExt;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use dbgrid_state::CustomSource;

use crate::fallback::FallbackTable;

/// Default per-query timeout.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// A response the adapter could not turn into a value.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteMetricError {
    /// 200 response whose `status` field is not `success`.
    #[error("query {query:?} returned status {status:?}: {message}")]
    Status {
        query: String,
        status: String,
        message: String,
    },

    #[error("malformed response for {query:?}: {reason}")]
    Malformed { query: String, reason: String },

    #[error("query {0:?} returned no samples")]
    NoData(String),

    #[error("invalid metrics server url {0:?}")]
    InvalidUrl(String),
}

/// Boxed future alias for custom metric lookups.
pub type MetricFuture<'a> = Pin<Box<dyn Future<Output = Result<f64, RemoteMetricError>> + Send + 'a>>;

/// Answers operator-defined custom metric queries.
pub trait MetricSource: Send + Sync {
    fn query<'a>(&'a self, source: &'a CustomSource) -> MetricFuture<'a>;
}

#[derive(Debug, Deserialize)]
struct PrometheusResponse {
    status: String,
    #[serde(default)]
    data: Option<PrometheusData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrometheusData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    value: (f64, String),
}

/// Why a request never produced a usable response.
enum Unreachable {
    Transport(String),
    Status(u16),
    Timeout,
    Tls,
}

impl std::fmt::Display for Unreachable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unreachable::Transport(e) => write!(f, "transport error: {e}"),
            Unreachable::Status(code) => write!(f, "http status {code}"),
            Unreachable::Timeout => f.write_str("timed out"),
            Unreachable::Tls => f.write_str("https is not supported"),
        }
    }
}

/// Target of one instant query, split out of the server url.
struct Endpoint {
    host: String,
    port: u16,
    path_prefix: String,
    tls: bool,
}

impl Endpoint {
    fn parse(server_url: &str) -> Result<Self, RemoteMetricError> {
        let invalid = || RemoteMetricError::InvalidUrl(server_url.to_string());
        let uri: http::Uri = server_url.trim_end_matches('/').parse().map_err(|_| invalid())?;
        let tls = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            _ => return Err(invalid()),
        };
        let authority = uri.authority().ok_or_else(invalid)?;
        Ok(Self {
            host: authority.host().to_string(),
            port: authority.port_u16().unwrap_or(if tls { 443 } else { 80 }),
            path_prefix: uri.path().trim_end_matches('/').to_string(),
            tls,
        })
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Instant-query client for a Prometheus-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct PrometheusSource {
    timeout: Duration,
    fallbacks: FallbackTable,
}

impl Default for PrometheusSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusSource {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_QUERY_TIMEOUT,
            fallbacks: FallbackTable::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: FallbackTable) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Run `expr` against `{server_url}/api/v1/query`.
    ///
    /// When the backend is unreachable the result is `fallback` if given,
    /// otherwise the table entry matching `expr`.
    pub async fn query_value(
        &self,
        server_url: &str,
        expr: &str,
        fallback: Option<f64>,
    ) -> Result<f64, RemoteMetricError> {
        let endpoint = Endpoint::parse(server_url)?;

        match self.fetch(&endpoint, expr).await {
            Ok(body) => parse_response(expr, &body),
            Err(reason) => {
                let value = fallback.unwrap_or_else(|| self.fallbacks.resolve(expr));
                warn!(
                    server = %server_url,
                    query = %expr,
                    %reason,
                    fallback = value,
                    "metrics backend unreachable, using fallback"
                );
                Ok(value)
            }
        }
    }

    async fn fetch(&self, endpoint: &Endpoint, expr: &str) -> Result<bytes::Bytes, Unreachable> {
        if endpoint.tls {
            return Err(Unreachable::Tls);
        }

        let address = endpoint.address();
        // Origin form; the authority travels in the host header.
        let uri = format!(
            "{}/api/v1/query?query={}&time={}",
            endpoint.path_prefix,
            urlencoding::encode(expr),
            epoch_secs()
        );

        let result = tokio::time::timeout(self.timeout, async {
            let stream = tokio::net::TcpStream::connect(&address)
                .await
                .map_err(|e| Unreachable::Transport(e.to_string()))?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| Unreachable::Transport(e.to_string()))?;

            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method("GET")
                .uri(&uri)
                .header("host", &address)
                .header("accept", "application/json")
                .header("user-agent", "dbgrid-metrics/0.1")
                .body(http_body_util::Empty::<bytes::Bytes>::new())
                .map_err(|e| Unreachable::Transport(e.to_string()))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| Unreachable::Transport(e.to_string()))?;

            if resp.status() != http::StatusCode::OK {
                return Err(Unreachable::Status(resp.status().as_u16()));
            }

            resp.into_body()
                .collect()
                .await
                .map(|body| body.to_bytes())
                .map_err(|e| Unreachable::Transport(e.to_string()))
        })
        .await;

        match result {
            Ok(outcome) => {
                debug!(%uri, ok = outcome.is_ok(), "metrics query finished");
                outcome
            }
            Err(_) => Err(Unreachable::Timeout),
        }
    }
}

impl MetricSource for PrometheusSource {
    fn query<'a>(&'a self, source: &'a CustomSource) -> MetricFuture<'a> {
        Box::pin(self.query_value(&source.server_url, &source.query, source.fallback))
    }
}

/// Extract the first sample of an instant-query response.
fn parse_response(expr: &str, body: &[u8]) -> Result<f64, RemoteMetricError> {
    let malformed = |reason: String| RemoteMetricError::Malformed {
        query: expr.to_string(),
        reason,
    };

    let response: PrometheusResponse =
        serde_json::from_slice(body).map_err(|e| malformed(e.to_string()))?;

    if response.status != "success" {
        return Err(RemoteMetricError::Status {
            query: expr.to_string(),
            status: response.status,
            message: response.error.unwrap_or_default(),
        });
    }

    let data = response.data.ok_or_else(|| malformed("missing data".to_string()))?;
    let raw = match data.result_type.as_str() {
        "vector" => {
            let samples: Vec<VectorSample> =
                serde_json::from_value(data.result).map_err(|e| malformed(e.to_string()))?;
            match samples.into_iter().next() {
                Some(sample) => sample.value.1,
                None => return Err(RemoteMetricError::NoData(expr.to_string())),
            }
        }
        "scalar" => {
            let (_, value): (f64, String) =
                serde_json::from_value(data.result).map_err(|e| malformed(e.to_string()))?;
            value
        }
        other => return Err(malformed(format!("unsupported result type {other:?}"))),
    };

    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(malformed(format!("non-numeric sample {raw:?}"))),
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
