//! The public-facing server: admin dispatch, configuration gating and
//! transparent proxying on one port
//!
//! The router is the only place that decides whether a request talks to the
//! wrapper (admin surface, health) or to the gateway (everything else), and
//! it asks the supervisor to bring the gateway up before any forwarding.

use crate::admin::AdminApi;
use crate::config::Config;
use crate::error::{full_body, json_error_response, GateBody, GateErrorCode};
use crate::pool::GatewayPool;
use crate::proxy;
use crate::supervisor::GatewaySupervisor;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Top-level path that opens the gateway's own control UI
const CONTROL_UI_PATH: &str = "/openclaw";

const LOADING_PAGE: &str = include_str!("assets/loading.html");

/// The wrapper's public server
pub struct GateServer {
    bind_addr: SocketAddr,
    config: Arc<Config>,
    supervisor: Arc<GatewaySupervisor>,
    pool: Arc<GatewayPool>,
    admin: Arc<AdminApi>,
    token: Arc<str>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GateServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bind_addr: SocketAddr,
        config: Arc<Config>,
        supervisor: Arc<GatewaySupervisor>,
        pool: Arc<GatewayPool>,
        admin: Arc<AdminApi>,
        token: Arc<str>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            config,
            supervisor,
            pool,
            admin,
            token,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "wrapper listening (HTTP/1.1 and HTTP/2)");
        self.serve(listener).await
    }

    /// Accept loop on an already-bound listener (lets tests pick port 0)
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let config = Arc::clone(&self.config);
                            let supervisor = Arc::clone(&self.supervisor);
                            let pool = Arc::clone(&self.pool);
                            let admin = Arc::clone(&self.admin);
                            let token = Arc::clone(&self.token);

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(
                                    stream, addr, config, supervisor, pool, admin, token,
                                )
                                .await
                                {
                                    debug!(addr = %addr, error = %e, "connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("wrapper server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    config: Arc<Config>,
    supervisor: Arc<GatewaySupervisor>,
    pool: Arc<GatewayPool>,
    admin: Arc<AdminApi>,
    token: Arc<str>,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let config = Arc::clone(&config);
        let supervisor = Arc::clone(&supervisor);
        let pool = Arc::clone(&pool);
        let admin = Arc::clone(&admin);
        let token = Arc::clone(&token);
        async move { handle_request(req, config, supervisor, pool, admin, token, addr).await }
    });

    // auto::Builder supports HTTP/1.1 (with WebSocket upgrades) and h2c
    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection_with_upgrades(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("connection error: {}", e))?;

    Ok(())
}

/// Route one request. Returning `Err` tears the connection down without an
/// HTTP response, which is how unconfigured WebSocket attempts are rejected.
async fn handle_request(
    req: Request<Incoming>,
    config: Arc<Config>,
    supervisor: Arc<GatewaySupervisor>,
    pool: Arc<GatewayPool>,
    admin: Arc<AdminApi>,
    token: Arc<str>,
    client_addr: SocketAddr,
) -> anyhow::Result<Response<GateBody>> {
    let path = req.uri().path().to_string();

    // Wrapper liveness, independent of gateway state
    if req.method() == Method::GET && path == "/health" {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(full_body("{\"ok\":true}"))
            .expect("valid response with StatusCode enum"));
    }

    if path == "/admin" || path.starts_with("/admin/") {
        return Ok(admin.handle(req, client_addr.ip()).await);
    }

    let upgrade = proxy::is_upgrade_request(&req);

    // The configured flag is re-read on every request; admin actions flip it
    if !config.is_configured() {
        if upgrade {
            debug!(addr = %client_addr, "rejecting upgrade: not configured");
            anyhow::bail!("upgrade rejected: gateway not configured");
        }
        return Ok(redirect("/admin"));
    }

    // A start is in flight: serve the interstitial instead of parking the
    // request on the start attempt
    if supervisor.is_starting() && !supervisor.is_running() {
        if upgrade {
            debug!(addr = %client_addr, "rejecting upgrade: gateway still starting");
            anyhow::bail!("upgrade rejected: gateway still starting");
        }
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(full_body(LOADING_PAGE))
            .expect("valid response with StatusCode enum"));
    }

    if let Err(e) = supervisor.ensure_running().await {
        warn!(error = %e, "gateway unavailable for proxied request");
        if upgrade {
            anyhow::bail!("upgrade rejected: {e}");
        }
        return Ok(json_error_response(
            GateErrorCode::from(&e),
            format!("Gateway not ready: {e}"),
        ));
    }

    // Pre-authenticate browser navigation into the gateway's control UI
    if req.method() == Method::GET
        && path == CONTROL_UI_PATH
        && !query_has_token(req.uri().query())
    {
        return Ok(redirect(&format!("{CONTROL_UI_PATH}?token={token}")));
    }

    if upgrade {
        return Ok(proxy::handle_upgrade(req, pool, client_addr).await);
    }
    Ok(proxy::forward(req, &pool, client_addr).await)
}

fn redirect(location: &str) -> Response<GateBody> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(hyper::header::LOCATION, location)
        .body(full_body("Redirecting"))
        .expect("valid response with StatusCode enum")
}

fn query_has_token(query: Option<&str>) -> bool {
    query
        .map(|q| q.split('&').any(|pair| pair == "token" || pair.starts_with("token=")))
        .unwrap_or(false)
}
