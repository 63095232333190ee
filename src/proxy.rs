//! Transparent forwarding of public traffic to the gateway
//!
//! From the gateway's point of view the wrapper is its only client: every
//! forwarded request and upgrade carries the wrapper's bearer token, and
//! whatever Authorization header the caller sent is discarded.

use crate::error::{empty_body, json_error_response, GateBody, GateErrorCode};
use crate::pool::GatewayPool;
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";
/// Header name for forwarded-for
const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header name for forwarded host
const X_FORWARDED_HOST: &str = "x-forwarded-host";
/// Header name for forwarded proto
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Check if a request is a WebSocket/HTTP upgrade request
pub fn is_upgrade_request(req: &Request<Incoming>) -> bool {
    let has_upgrade_connection = req
        .headers()
        .get(hyper::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_lowercase().contains("upgrade"))
        .unwrap_or(false);

    let has_upgrade_header = req.headers().contains_key(hyper::header::UPGRADE);

    has_upgrade_connection && has_upgrade_header
}

/// Stamp forwarding headers onto an inbound request.
///
/// X-Forwarded-* values are overwritten rather than appended: the wrapper is
/// the first trusted hop and client-supplied values must not survive it.
/// Returns the request ID for correlation.
pub fn decorate_request(req: &mut Request<Incoming>, client_addr: SocketAddr) -> String {
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let headers = req.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(X_REQUEST_ID, value);
    }
    if let Ok(value) = HeaderValue::from_str(&client_addr.ip().to_string()) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    if let Some(host) = headers.get(hyper::header::HOST).cloned() {
        headers.insert(X_FORWARDED_HOST, host);
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

    request_id
}

/// Forward a plain HTTP request to the gateway
pub async fn forward(
    mut req: Request<Incoming>,
    pool: &GatewayPool,
    client_addr: SocketAddr,
) -> Response<GateBody> {
    let request_id = decorate_request(&mut req, client_addr);
    debug!(method = %req.method(), uri = %req.uri(), request_id, "forwarding to gateway");

    match pool.send_request(req).await {
        Ok(response) => response,
        Err(e) => {
            error!(target = pool.authority(), request_id, error = %e, "failed to forward request");
            json_error_response(GateErrorCode::UpstreamUnreachable, "Failed to reach gateway")
        }
    }
}

/// Handle a WebSocket upgrade: replay the handshake against the gateway with
/// the wrapper's credential, then splice the two streams together.
pub async fn handle_upgrade(
    mut req: Request<Incoming>,
    pool: Arc<GatewayPool>,
    client_addr: SocketAddr,
) -> Response<GateBody> {
    let request_id = decorate_request(&mut req, client_addr);
    debug!(uri = %req.uri(), request_id, "handling upgrade request");

    let raw_request = build_upgrade_request(&req, pool.authority(), pool.bearer());

    let mut gateway_stream = match TcpStream::connect(pool.authority()).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(target = pool.authority(), error = %e, "failed to connect to gateway for upgrade");
            return json_error_response(
                GateErrorCode::UpstreamUnreachable,
                format!("Failed to connect to gateway: {}", e),
            );
        }
    };

    if let Err(e) = gateway_stream.write_all(&raw_request).await {
        error!(error = %e, "failed to send upgrade request to gateway");
        return json_error_response(
            GateErrorCode::UpstreamUnreachable,
            format!("Failed to send upgrade request: {}", e),
        );
    }

    let mut response_buf = vec![0u8; 4096];
    let n = match gateway_stream.read(&mut response_buf).await {
        Ok(n) if n > 0 => n,
        Ok(_) => {
            error!("gateway closed connection before responding to upgrade");
            return json_error_response(
                GateErrorCode::UpstreamUnreachable,
                "Gateway closed connection",
            );
        }
        Err(e) => {
            error!(error = %e, "failed to read upgrade response from gateway");
            return json_error_response(
                GateErrorCode::UpstreamUnreachable,
                format!("Failed to read gateway response: {}", e),
            );
        }
    };

    let (status, response_headers) = match parse_upgrade_response(&response_buf[..n]) {
        Some(parsed) => parsed,
        None => {
            error!("failed to parse gateway upgrade response");
            return json_error_response(
                GateErrorCode::UpstreamUnreachable,
                "Invalid upgrade response from gateway",
            );
        }
    };

    if status != StatusCode::SWITCHING_PROTOCOLS {
        warn!(status = %status, "gateway rejected upgrade request");
        // Return the gateway's non-101 response as-is
        let mut response = Response::builder().status(status);
        for (name, value) in &response_headers {
            if let Ok(hv) = HeaderValue::from_str(value) {
                response = response.header(name.as_str(), hv);
            }
        }
        return response
            .body(empty_body())
            .expect("valid response builder");
    }

    info!(request_id, "WebSocket upgrade successful");

    let mut response = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
    for (name, value) in &response_headers {
        // Skip hop-by-hop headers that hyper handles
        let name_lower = name.to_lowercase();
        if name_lower == "content-length" || name_lower == "transfer-encoding" {
            continue;
        }
        if let Ok(hv) = HeaderValue::from_str(value) {
            response = response.header(name.as_str(), hv);
        }
    }
    let response = response
        .body(empty_body())
        .expect("valid response builder");

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                debug!(request_id, "client upgrade complete, starting forwarding");
                forward_bidirectional(upgraded, gateway_stream, &request_id).await;
            }
            Err(e) => {
                error!(request_id, error = %e, "failed to upgrade client connection");
            }
        }
    });

    response
}

/// Build the raw HTTP upgrade request replayed against the gateway.
/// The caller's Authorization and Host headers are replaced with the
/// wrapper's own.
fn build_upgrade_request(req: &Request<Incoming>, authority: &str, bearer: &HeaderValue) -> Vec<u8> {
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut request = format!("{} {} HTTP/1.1\r\n", req.method(), path);

    for (name, value) in req.headers() {
        if name == hyper::header::AUTHORIZATION || name == hyper::header::HOST {
            continue;
        }
        if let Ok(v) = value.to_str() {
            request.push_str(&format!("{}: {}\r\n", name, v));
        }
    }

    request.push_str(&format!("Host: {}\r\n", authority));
    if let Ok(bearer) = bearer.to_str() {
        request.push_str(&format!("Authorization: {}\r\n", bearer));
    }
    request.push_str("\r\n");

    request.into_bytes()
}

/// Parse the HTTP response from the gateway to check for 101 Switching Protocols
fn parse_upgrade_response(data: &[u8]) -> Option<(StatusCode, Vec<(String, String)>)> {
    let response_str = std::str::from_utf8(data).ok()?;
    let mut lines = response_str.lines();

    // Status line: HTTP/1.1 101 Switching Protocols
    let status_line = lines.next()?;
    let parts: Vec<&str> = status_line.splitn(3, ' ').collect();
    if parts.len() < 2 {
        return None;
    }

    let status_code: u16 = parts[1].parse().ok()?;
    let status = StatusCode::from_u16(status_code).ok()?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Some((status, headers))
}

/// Forward bytes bidirectionally between client and gateway connections
async fn forward_bidirectional(client: Upgraded, gateway: TcpStream, request_id: &str) {
    let mut client_io = TokioIo::new(client);
    let mut gateway_io = gateway;

    match tokio::io::copy_bidirectional(&mut client_io, &mut gateway_io).await {
        Ok((client_to_gateway, gateway_to_client)) => {
            debug!(
                request_id,
                client_to_gateway, gateway_to_client, "WebSocket connection closed normally"
            );
        }
        Err(e) => {
            debug!(request_id, error = %e, "WebSocket connection closed with error");
        }
    }
}
