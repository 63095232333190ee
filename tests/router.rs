//! Integration tests for the public router, admin gate and reverse proxy

use base64::Engine;
use clawgate::admin::AdminApi;
use clawgate::backend::BackendCli;
use clawgate::config::Config;
use clawgate::pool::GatewayPool;
use clawgate::ratelimit::RateLimiter;
use clawgate::server::GateServer;
use clawgate::supervisor::GatewaySupervisor;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

const TEST_TOKEN: &str = "test-token-123";
const TEST_PASSWORD: &str = "correct horse battery staple";

/// Write an executable script standing in for the gateway entry point
fn write_fake_gateway(dir: &Path) -> String {
    let path = dir.join("fake-gateway.sh");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 60\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path.to_string_lossy().into_owned()
}

/// Gateway stand-in that answers every request with the Authorization header
/// it received, so bearer injection is observable from the outside
async fn spawn_echo_gateway() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).into_owned();
                let auth_line = request
                    .lines()
                    .find(|line| line.to_lowercase().starts_with("authorization:"))
                    .unwrap_or("authorization: none")
                    .to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    auth_line.len(),
                    auth_line
                );
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });
    port
}

struct TestWrapper {
    addr: SocketAddr,
    config: Arc<Config>,
    supervisor: Arc<GatewaySupervisor>,
    _dir: tempfile::TempDir,
    _shutdown_tx: watch::Sender<bool>,
}

async fn start_wrapper(
    password: Option<&str>,
    configured: bool,
    internal_port: u16,
    ready_timeout: Duration,
) -> TestWrapper {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::for_state_dir(dir.path());
    config.node = write_fake_gateway(dir.path());
    config.entry = "entry.js".to_string();
    config.internal_port = internal_port;
    config.setup_password = password.map(String::from);

    std::fs::create_dir_all(dir.path()).unwrap();
    if configured {
        std::fs::write(config.config_path(), "{}").unwrap();
    }

    let config = Arc::new(config);
    let token: Arc<str> = Arc::from(TEST_TOKEN);
    let pool = GatewayPool::new("127.0.0.1", internal_port, &token).unwrap();
    let supervisor = GatewaySupervisor::new(
        Arc::clone(&config),
        Arc::clone(&token),
        Arc::clone(&pool),
        ready_timeout,
    );
    let cli = Arc::new(BackendCli::new(Arc::clone(&config)));
    let limiter = RateLimiter::new(Duration::from_secs(60), 50);
    let admin = Arc::new(AdminApi::new(
        Arc::clone(&config),
        Arc::clone(&supervisor),
        cli,
        limiter,
        Arc::clone(&token),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GateServer::new(
        addr,
        Arc::clone(&config),
        Arc::clone(&supervisor),
        pool,
        admin,
        token,
        shutdown_rx,
    );
    tokio::spawn(server.serve(listener));

    TestWrapper {
        addr,
        config,
        supervisor,
        _dir: dir,
        _shutdown_tx: shutdown_tx,
    }
}

/// Send a raw HTTP request and collect the whole response
async fn raw_request(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    let _ = stream.read_to_string(&mut response).await;
    response
}

fn basic_auth(password: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("admin:{password}"));
    format!("Basic {encoded}")
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    raw_request(
        addr,
        &format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"),
    )
    .await
}

async fn http_get_auth(addr: SocketAddr, path: &str, password: &str) -> String {
    raw_request(
        addr,
        &format!(
            "GET {path} HTTP/1.1\r\nHost: localhost\r\nAuthorization: {}\r\nConnection: close\r\n\r\n",
            basic_auth(password)
        ),
    )
    .await
}

async fn http_post_auth(addr: SocketAddr, path: &str, password: &str, body: &str) -> String {
    raw_request(
        addr,
        &format!(
            "POST {path} HTTP/1.1\r\nHost: localhost\r\nAuthorization: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            basic_auth(password),
            body.len(),
            body
        ),
    )
    .await
}

// ============================================================================
// Liveness and configuration gating
// ============================================================================

#[tokio::test]
async fn test_health_needs_no_auth() {
    let wrapper = start_wrapper(None, false, 9, Duration::from_secs(5)).await;

    let response = http_get(wrapper.addr, "/health").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("{\"ok\":true}"));
}

#[tokio::test]
async fn test_unconfigured_request_redirects_to_admin() {
    let wrapper = start_wrapper(Some(TEST_PASSWORD), false, 9, Duration::from_secs(5)).await;

    let response = http_get(wrapper.addr, "/").await;
    assert!(response.starts_with("HTTP/1.1 302"));
    assert!(response.to_lowercase().contains("location: /admin"));

    let response = http_get(wrapper.addr, "/anything/else").await;
    assert!(response.starts_with("HTTP/1.1 302"));
}

#[tokio::test]
async fn test_unconfigured_upgrade_is_dropped_without_response() {
    let wrapper = start_wrapper(Some(TEST_PASSWORD), false, 9, Duration::from_secs(5)).await;

    let response = raw_request(
        wrapper.addr,
        "GET /ws HTTP/1.1\r\nHost: localhost\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n",
    )
    .await;
    assert!(response.is_empty(), "expected raw abort, got: {response}");
}

// ============================================================================
// Admin gate
// ============================================================================

#[tokio::test]
async fn test_admin_fails_closed_without_password() {
    let wrapper = start_wrapper(None, false, 9, Duration::from_secs(5)).await;

    let response = http_get(wrapper.addr, "/admin").await;
    assert!(response.starts_with("HTTP/1.1 500"));
    assert!(response.contains("SETUP_PASSWORD"));
}

#[tokio::test]
async fn test_admin_challenges_missing_credentials() {
    let wrapper = start_wrapper(Some(TEST_PASSWORD), false, 9, Duration::from_secs(5)).await;

    let response = http_get(wrapper.addr, "/admin").await;
    assert!(response.starts_with("HTTP/1.1 401"));
    assert!(response.contains("WWW-Authenticate: Basic"));
}

#[tokio::test]
async fn test_admin_rejects_wrong_password() {
    let wrapper = start_wrapper(Some(TEST_PASSWORD), false, 9, Duration::from_secs(5)).await;

    let response = http_get_auth(wrapper.addr, "/admin", "wrong password").await;
    assert!(response.starts_with("HTTP/1.1 401"));
    assert!(response.contains("WWW-Authenticate: Basic"));
}

#[tokio::test]
async fn test_admin_serves_setup_page_with_correct_password() {
    let wrapper = start_wrapper(Some(TEST_PASSWORD), false, 9, Duration::from_secs(5)).await;

    let response = http_get_auth(wrapper.addr, "/admin", TEST_PASSWORD).await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("OpenClaw Setup"));
}

#[tokio::test]
async fn test_stylesheet_is_served_without_credentials() {
    let wrapper = start_wrapper(Some(TEST_PASSWORD), false, 9, Duration::from_secs(5)).await;

    let response = http_get(wrapper.addr, "/admin/styles.css").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("text/css"));
}

#[tokio::test]
async fn test_admin_rate_limit_rejects_51st_attempt() {
    let wrapper = start_wrapper(Some(TEST_PASSWORD), false, 9, Duration::from_secs(5)).await;

    for i in 0..50 {
        let response = http_get(wrapper.addr, "/admin").await;
        assert!(
            response.starts_with("HTTP/1.1 401"),
            "attempt {i} should still be allowed through the limiter"
        );
    }

    let response = http_get(wrapper.addr, "/admin").await;
    assert!(response.starts_with("HTTP/1.1 429"));
}

#[tokio::test]
async fn test_reset_returns_system_to_unconfigured() {
    let wrapper = start_wrapper(Some(TEST_PASSWORD), true, 9, Duration::from_secs(5)).await;
    assert!(wrapper.config.is_configured());

    let response = http_post_auth(wrapper.addr, "/admin/reset", TEST_PASSWORD, "").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(!wrapper.config.is_configured());

    // Public traffic is gated again
    let response = http_get(wrapper.addr, "/").await;
    assert!(response.starts_with("HTTP/1.1 302"));
}

// ============================================================================
// Proxying
// ============================================================================

#[tokio::test]
async fn test_proxied_request_carries_injected_bearer() {
    let gateway_port = spawn_echo_gateway().await;
    let wrapper =
        start_wrapper(Some(TEST_PASSWORD), true, gateway_port, Duration::from_secs(10)).await;

    let response = raw_request(
        wrapper.addr,
        "GET /echo HTTP/1.1\r\nHost: localhost\r\nAuthorization: Bearer caller-secret\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200"));
    // The gateway saw the wrapper's token, not the caller's header
    assert!(response.contains(&format!("Bearer {TEST_TOKEN}")));
    assert!(!response.contains("caller-secret"));
}

#[tokio::test]
async fn test_control_ui_redirect_appends_token() {
    let gateway_port = spawn_echo_gateway().await;
    let wrapper =
        start_wrapper(Some(TEST_PASSWORD), true, gateway_port, Duration::from_secs(10)).await;

    let response = http_get(wrapper.addr, "/openclaw").await;
    assert!(response.starts_with("HTTP/1.1 302"));
    assert!(response.contains(&format!("/openclaw?token={TEST_TOKEN}")));

    // With a token already present, the request is proxied instead
    let response = http_get(wrapper.addr, &format!("/openclaw?token={TEST_TOKEN}")).await;
    assert!(response.starts_with("HTTP/1.1 200"));
}

#[tokio::test]
async fn test_loading_page_served_while_gateway_starts() {
    // Nothing listens on the internal port, so the start attempt hangs in
    // the readiness poll until its timeout
    let wrapper = start_wrapper(Some(TEST_PASSWORD), true, 9, Duration::from_secs(1)).await;

    let starter = {
        let supervisor = Arc::clone(&wrapper.supervisor);
        tokio::spawn(async move { supervisor.ensure_running().await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;

    let response = http_get(wrapper.addr, "/").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("Gateway is starting"));

    // Let the attempt settle so its process is cleaned up
    let outcome = starter.await.unwrap();
    assert!(outcome.is_err());
}

#[tokio::test]
async fn test_unready_gateway_yields_service_unavailable() {
    let wrapper = start_wrapper(Some(TEST_PASSWORD), true, 9, Duration::from_millis(300)).await;

    let response = http_get(wrapper.addr, "/anything").await;
    assert!(response.starts_with("HTTP/1.1 503"));
    assert!(response.contains("GATEWAY_NOT_READY"));
}
