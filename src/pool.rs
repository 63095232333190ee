//! Pooled HTTP client for the gateway's loopback listener
//!
//! All forwarded traffic and readiness probes go through one pooled
//! `hyper_util` client pointed at the single gateway target. Every request
//! leaving the pool carries the wrapper's bearer token; whatever credential
//! the caller supplied is overwritten.

use crate::error::GateBody;
use http_body_util::{BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, AUTHORIZATION, HOST};
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;

/// Connect timeout applied to every upstream connection attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Maximum idle upstream connections kept around
const MAX_IDLE_CONNECTIONS: usize = 10;
/// Idle connection timeout
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Error type for upstream operations
#[derive(Debug)]
pub enum UpstreamError {
    /// Error from the HTTP client
    Client(hyper_util::client::legacy::Error),
    /// Error building a request
    RequestBuild(String),
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamError::Client(e) => write!(f, "client error: {}", e),
            UpstreamError::RequestBuild(s) => write!(f, "request build error: {}", s),
        }
    }
}

impl std::error::Error for UpstreamError {}

impl From<hyper_util::client::legacy::Error> for UpstreamError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        UpstreamError::Client(err)
    }
}

/// Result of a single readiness probe round-trip
#[derive(Debug)]
pub enum ProbeOutcome {
    /// The gateway answered; any status counts as alive
    Responded(StatusCode),
    /// Connection refused or connect timeout: normal while the gateway boots
    Unreachable,
    /// Some other transport failure worth a warning
    Failed(String),
}

/// Pooled client for the gateway target
pub struct GatewayPool {
    /// Main client for proxying requests
    client: Client<HttpConnector, Incoming>,
    /// Dedicated client for probes (uses Empty body type)
    probe_client: Client<HttpConnector, Empty<Bytes>>,
    /// `host:port` of the gateway's loopback listener
    authority: String,
    /// Precomputed `Bearer <token>` header value
    bearer: HeaderValue,
}

impl GatewayPool {
    pub fn new(host: &str, port: u16, token: &str) -> anyhow::Result<Arc<Self>> {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);
        connector.set_connect_timeout(Some(CONNECT_TIMEOUT));

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .build(connector.clone());

        let probe_client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .build(connector);

        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| anyhow::anyhow!("gateway token contains invalid header characters"))?;

        Ok(Arc::new(Self {
            client,
            probe_client,
            authority: format!("{host}:{port}"),
            bearer,
        }))
    }

    /// `host:port` of the gateway listener, for raw TCP upgrade connections
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The Authorization header value injected on forwarded traffic
    pub fn bearer(&self) -> &HeaderValue {
        &self.bearer
    }

    /// Forward a request to the gateway, overwriting the Authorization and
    /// Host headers so the wrapper is the only credential the gateway sees.
    pub async fn send_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<GateBody>, UpstreamError> {
        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri = format!("http://{}{}", self.authority, path);

        let (parts, body) = req.into_parts();
        let mut builder = Request::builder().method(parts.method).uri(&uri);

        for (key, value) in parts.headers.iter() {
            if key == AUTHORIZATION || key == HOST {
                continue;
            }
            builder = builder.header(key, value);
        }
        builder = builder.header(AUTHORIZATION, self.bearer.clone());

        let upstream_req = builder
            .body(body)
            .map_err(|e| UpstreamError::RequestBuild(e.to_string()))?;

        let response = self.client.request(upstream_req).await?;
        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, body.boxed()))
    }

    /// One readiness probe against `path`. Never errors; the caller decides
    /// what each outcome means.
    pub async fn probe(&self, path: &str) -> ProbeOutcome {
        let uri = format!("http://{}{}", self.authority, path);
        let req = match Request::builder()
            .method("GET")
            .uri(&uri)
            .body(Empty::<Bytes>::new())
        {
            Ok(r) => r,
            Err(e) => return ProbeOutcome::Failed(e.to_string()),
        };

        match self.probe_client.request(req).await {
            Ok(response) => ProbeOutcome::Responded(response.status()),
            Err(e) if e.is_connect() => ProbeOutcome::Unreachable,
            Err(e) => ProbeOutcome::Failed(e.to_string()),
        }
    }
}
