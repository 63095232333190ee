//! Integration tests for the gateway supervisor
//!
//! The "gateway" here is a tiny shell script so the lifecycle machinery can
//! be exercised for real: spawning, readiness racing, crash observation,
//! restart and single-flight coordination.

use clawgate::config::Config;
use clawgate::error::StartError;
use clawgate::pool::GatewayPool;
use clawgate::supervisor::{GatewayState, GatewaySupervisor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Write an executable script standing in for the gateway entry point.
/// The wrapper invokes `<node> <entry> gateway run …`; the script receives
/// `<entry>` and the gateway arguments as positional parameters and ignores
/// them.
fn write_fake_gateway(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-gateway.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// Minimal HTTP listener standing in for the gateway's loopback endpoint
async fn spawn_stub_listener() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                    .await;
            });
        }
    });
    port
}

/// A supervisor wired to a fake gateway script and a chosen internal port
fn build_supervisor(
    dir: &Path,
    script_body: &str,
    internal_port: u16,
    configured: bool,
    ready_timeout: Duration,
) -> Arc<GatewaySupervisor> {
    let script = write_fake_gateway(dir, script_body);
    let mut config = Config::for_state_dir(dir);
    config.node = script.to_string_lossy().into_owned();
    config.entry = "entry.js".to_string();
    config.internal_port = internal_port;

    std::fs::create_dir_all(dir).unwrap();
    if configured {
        std::fs::write(config.config_path(), "{}").unwrap();
    }

    let pool = GatewayPool::new("127.0.0.1", internal_port, "test-token").unwrap();
    GatewaySupervisor::new(Arc::new(config), Arc::from("test-token"), pool, ready_timeout)
}

#[tokio::test]
async fn test_ensure_running_spawns_and_becomes_ready() {
    let dir = tempfile::tempdir().unwrap();
    let port = spawn_stub_listener().await;
    let supervisor = build_supervisor(
        dir.path(),
        "exec sleep 60",
        port,
        true,
        Duration::from_secs(10),
    );

    supervisor.ensure_running().await.unwrap();
    assert_eq!(supervisor.state(), GatewayState::Running);
    assert!(supervisor.is_running());
    let pid = supervisor.current_pid();
    assert!(pid.is_some());

    // A second call is a no-op on the same process
    supervisor.ensure_running().await.unwrap();
    assert_eq!(supervisor.current_pid(), pid);

    supervisor.stop(Duration::from_secs(2)).await;
    assert_eq!(supervisor.state(), GatewayState::Stopped);
    assert!(supervisor.current_pid().is_none());
}

#[tokio::test]
async fn test_concurrent_callers_share_one_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let port = spawn_stub_listener().await;
    // Each spawn leaves a mark so duplicates would be visible
    let supervisor = build_supervisor(
        dir.path(),
        "echo started >> \"$OPENCLAW_STATE_DIR/starts.log\"\nexec sleep 60",
        port,
        true,
        Duration::from_secs(10),
    );

    let mut handles = Vec::new();
    for _ in 0..10 {
        let supervisor = Arc::clone(&supervisor);
        handles.push(tokio::spawn(async move { supervisor.ensure_running().await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let starts = std::fs::read_to_string(dir.path().join("starts.log")).unwrap();
    assert_eq!(starts.lines().count(), 1, "expected exactly one spawn");

    supervisor.stop(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_unconfigured_never_spawns() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = build_supervisor(
        dir.path(),
        "echo started >> \"$OPENCLAW_STATE_DIR/starts.log\"\nexec sleep 60",
        9,
        false,
        Duration::from_secs(1),
    );

    for _ in 0..3 {
        match supervisor.ensure_running().await {
            Err(StartError::NotConfigured) => {}
            other => panic!("expected NotConfigured, got {:?}", other),
        }
    }

    assert!(!dir.path().join("starts.log").exists());
    assert_eq!(supervisor.state(), GatewayState::Stopped);
}

#[tokio::test]
async fn test_crash_during_startup_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    // No listener on the internal port; the exit wins the readiness race
    let supervisor =
        build_supervisor(dir.path(), "exit 7", 9, true, Duration::from_secs(10));

    match supervisor.ensure_running().await {
        Err(StartError::Crashed { code: Some(7) }) => {}
        other => panic!("expected Crashed with code 7, got {:?}", other),
    }
    assert_eq!(supervisor.state(), GatewayState::Stopped);
    assert!(supervisor.current_pid().is_none());

    // The settled failure is not replayed; the next call starts fresh
    match supervisor.ensure_running().await {
        Err(StartError::Crashed { .. }) => {}
        other => panic!("expected a fresh Crashed attempt, got {:?}", other),
    }
}

#[tokio::test]
async fn test_readiness_timeout_stops_the_process() {
    let dir = tempfile::tempdir().unwrap();
    // Process stays alive but nothing ever listens
    let supervisor = build_supervisor(
        dir.path(),
        "exec sleep 60",
        9,
        true,
        Duration::from_millis(400),
    );

    match supervisor.ensure_running().await {
        Err(StartError::NotReady { .. }) => {}
        other => panic!("expected NotReady, got {:?}", other),
    }
    assert_eq!(supervisor.state(), GatewayState::Stopped);
    assert!(supervisor.current_pid().is_none());
}

#[tokio::test]
async fn test_restart_produces_a_new_process() {
    let dir = tempfile::tempdir().unwrap();
    let port = spawn_stub_listener().await;
    let supervisor = build_supervisor(
        dir.path(),
        "exec sleep 60",
        port,
        true,
        Duration::from_secs(10),
    );

    supervisor.ensure_running().await.unwrap();
    let first_pid = supervisor.current_pid().unwrap();

    supervisor.restart().await.unwrap();
    assert!(supervisor.is_running());
    let second_pid = supervisor.current_pid().unwrap();
    assert_ne!(first_pid, second_pid);

    supervisor.stop(Duration::from_secs(2)).await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_unexpected_exit_clears_handle_and_allows_respawn() {
    let dir = tempfile::tempdir().unwrap();
    let port = spawn_stub_listener().await;
    let supervisor = build_supervisor(
        dir.path(),
        "exec sleep 60",
        port,
        true,
        Duration::from_secs(10),
    );

    supervisor.ensure_running().await.unwrap();
    let pid = supervisor.current_pid().unwrap();

    // Kill the gateway out from under the supervisor
    let status = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    // The exit watcher notices and rolls the state machine back
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while supervisor.is_running() {
        assert!(
            std::time::Instant::now() < deadline,
            "exit watcher never cleared the handle"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(supervisor.current_pid().is_none());

    // The next ensure respawns instead of assuming liveness
    supervisor.ensure_running().await.unwrap();
    let new_pid = supervisor.current_pid().unwrap();
    assert_ne!(pid, new_pid);

    supervisor.stop(Duration::from_secs(2)).await;
}
