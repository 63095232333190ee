//! Gateway process lifecycle
//!
//! One supervisor instance owns the single gateway process: spawning it with
//! token auth on the loopback listener, watching for exit, and coordinating
//! concurrent start requests so that any number of callers observe exactly
//! one spawn and one readiness poll.

use crate::config::Config;
use crate::error::StartError;
use crate::pool::GatewayPool;
use crate::ready;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

/// Grace period between SIGTERM and SIGKILL on restart
pub const RESTART_GRACE: Duration = Duration::from_millis(750);
/// Grace period used during wrapper shutdown
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// State of the gateway process
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayState {
    /// No process; also the state after a crash or stop
    Stopped,
    /// A start attempt is in flight, waiting for readiness
    Starting,
    /// Process spawned and the readiness poll succeeded
    Running,
}

#[derive(Debug, Clone, Copy)]
struct ExitInfo {
    code: Option<i32>,
}

/// Handle to the live gateway process
#[derive(Clone)]
struct GatewayHandle {
    pid: u32,
    /// Flipped to `Some` by the exit watcher when the process goes away
    exit_rx: watch::Receiver<Option<ExitInfo>>,
}

struct Inner {
    state: GatewayState,
    handle: Option<GatewayHandle>,
    /// Present while a start attempt is in flight; every concurrent
    /// `ensure_running` caller subscribes to this one attempt's outcome
    starting: Option<broadcast::Sender<Result<(), StartError>>>,
}

/// Supervises the gateway process.
///
/// Designed to be used behind an `Arc` for shared ownership across the
/// router, the admin handlers and the shutdown path; the constructor returns
/// `Arc<Self>` to enforce this.
pub struct GatewaySupervisor {
    config: Arc<Config>,
    token: Arc<str>,
    pool: Arc<GatewayPool>,
    ready_timeout: Duration,
    inner: Mutex<Inner>,
}

impl GatewaySupervisor {
    pub fn new(
        config: Arc<Config>,
        token: Arc<str>,
        pool: Arc<GatewayPool>,
        ready_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            token,
            pool,
            ready_timeout,
            inner: Mutex::new(Inner {
                state: GatewayState::Stopped,
                handle: None,
                starting: None,
            }),
        })
    }

    /// Current state of the gateway
    pub fn state(&self) -> GatewayState {
        self.inner.lock().state
    }

    /// Whether the gateway is up and past its readiness poll
    pub fn is_running(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == GatewayState::Running && inner.handle.is_some()
    }

    /// Whether a start attempt is currently in flight
    pub fn is_starting(&self) -> bool {
        self.inner.lock().starting.is_some()
    }

    /// Pid of the live gateway process, if any
    pub fn current_pid(&self) -> Option<u32> {
        self.inner.lock().handle.as_ref().map(|h| h.pid)
    }

    /// Make sure the gateway is running and ready.
    ///
    /// Concurrent callers share a single in-flight start attempt: the first
    /// caller creates it, everyone else subscribes to its outcome. The
    /// attempt runs in its own task, so a caller going away cannot abort a
    /// start that other callers are waiting on. A settled attempt clears
    /// itself, so the next call after a failure retries instead of replaying
    /// a stale error.
    pub async fn ensure_running(self: &Arc<Self>) -> Result<(), StartError> {
        let mut outcome_rx = {
            let mut inner = self.inner.lock();
            if inner.state == GatewayState::Running && inner.handle.is_some() {
                return Ok(());
            }
            if let Some(tx) = &inner.starting {
                tx.subscribe()
            } else {
                if !self.config.is_configured() {
                    return Err(StartError::NotConfigured);
                }
                let (tx, rx) = broadcast::channel(1);
                inner.state = GatewayState::Starting;
                inner.starting = Some(tx);
                let supervisor = Arc::clone(self);
                tokio::spawn(async move { supervisor.run_start_attempt().await });
                rx
            }
        };

        match outcome_rx.recv().await {
            Ok(outcome) => outcome,
            // Sender dropped without settling: the attempt task died
            Err(_) => Err(StartError::Spawn("start attempt aborted".to_string())),
        }
    }

    async fn run_start_attempt(self: Arc<Self>) {
        let outcome = self.spawn_and_wait_ready().await;
        if outcome.is_err() {
            // Never leave a half-started process behind a failed attempt
            self.stop(RESTART_GRACE).await;
        }
        let tx = {
            let mut inner = self.inner.lock();
            inner.state = match (&outcome, inner.handle.is_some()) {
                (Ok(()), true) => GatewayState::Running,
                _ => GatewayState::Stopped,
            };
            inner.starting.take()
        };
        if let Some(tx) = tx {
            let _ = tx.send(outcome);
        }
    }

    async fn spawn_and_wait_ready(self: &Arc<Self>) -> Result<(), StartError> {
        self.config
            .ensure_dirs()
            .map_err(|e| StartError::Spawn(format!("cannot create state directories: {e}")))?;

        let args = self.gateway_args();
        info!(
            command = %format!(
                "{} {} {}",
                self.config.node,
                self.config.entry,
                redact_token_args(&args).join(" ")
            ),
            "starting gateway"
        );
        info!(
            state_dir = %self.config.state_dir.display(),
            workspace_dir = %self.config.workspace_dir.display(),
            config_path = %self.config.config_path().display(),
            "gateway directories"
        );

        let mut cmd = Command::new(&self.config.node);
        cmd.arg(&self.config.entry)
            .args(&args)
            .env("OPENCLAW_STATE_DIR", &self.config.state_dir)
            .env("OPENCLAW_WORKSPACE_DIR", &self.config.workspace_dir)
            .env("OPENCLAW_GATEWAY_TOKEN", &*self.token)
            // Gateway logs flow through the wrapper's own stdio
            .stdin(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| StartError::Spawn(e.to_string()))?;
        let pid = child.id().unwrap_or(0);
        info!(pid, "gateway process spawned");

        let (exit_tx, exit_rx) = watch::channel(None::<ExitInfo>);
        {
            let mut inner = self.inner.lock();
            inner.handle = Some(GatewayHandle {
                pid,
                exit_rx: exit_rx.clone(),
            });
        }

        // Exit watcher: observes process exit at any point in the lifecycle,
        // not just during an explicit stop, and rolls the state machine back
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let status = child.wait().await;
            let exit = match &status {
                Ok(s) => ExitInfo { code: s.code() },
                Err(_) => ExitInfo { code: None },
            };
            match status {
                Ok(s) => error!(pid, status = ?s, "gateway exited"),
                Err(e) => error!(pid, error = %e, "failed waiting on gateway process"),
            }
            let _ = exit_tx.send(Some(exit));
            supervisor.on_exit(pid);
        });

        // Race readiness against the process dying on the launch pad
        let started = Instant::now();
        let mut exit_watch = exit_rx;
        tokio::select! {
            ready = ready::wait_until_ready(&self.pool, self.ready_timeout) => {
                if ready {
                    Ok(())
                } else {
                    Err(StartError::NotReady {
                        elapsed_secs: started.elapsed().as_secs(),
                    })
                }
            }
            res = exit_watch.wait_for(|e| e.is_some()) => {
                let code = res.ok().and_then(|r| r.as_ref().and_then(|e| e.code));
                Err(StartError::Crashed { code })
            }
        }
    }

    /// Called by the exit watcher (and the stop path) once the process with
    /// `pid` is gone. Clears the handle only if it is still the current one.
    fn on_exit(&self, pid: u32) {
        let mut inner = self.inner.lock();
        if inner.handle.as_ref().map(|h| h.pid) == Some(pid) {
            inner.handle = None;
            if inner.state == GatewayState::Running {
                inner.state = GatewayState::Stopped;
            }
        }
    }

    /// Stop the gateway: SIGTERM, wait up to `grace`, SIGKILL if still alive.
    /// No-op when nothing is running.
    pub async fn stop(&self, grace: Duration) {
        let handle = self.inner.lock().handle.clone();
        let Some(handle) = handle else { return };

        info!(pid = handle.pid, "sending SIGTERM to gateway");
        terminate(handle.pid);

        let mut exit_rx = handle.exit_rx.clone();
        let exited = tokio::time::timeout(grace, exit_rx.wait_for(|e| e.is_some()))
            .await
            .is_err();
        if exited {
            warn!(
                pid = handle.pid,
                grace_ms = grace.as_millis() as u64,
                "grace period exceeded, sending SIGKILL"
            );
            force_kill(handle.pid);
            let _ = tokio::time::timeout(Duration::from_secs(1), exit_rx.wait_for(|e| e.is_some()))
                .await;
        }
        self.on_exit(handle.pid);
    }

    /// Bounce the gateway: graceful stop, then a fresh `ensure_running`.
    pub async fn restart(self: &Arc<Self>) -> Result<(), StartError> {
        self.stop(RESTART_GRACE).await;
        self.ensure_running().await
    }

    /// Ordered teardown used by the wrapper's shutdown path
    pub async fn shutdown(&self) {
        self.stop(SHUTDOWN_GRACE).await;
    }

    fn gateway_args(&self) -> Vec<String> {
        vec![
            "gateway".to_string(),
            "run".to_string(),
            "--bind".to_string(),
            "loopback".to_string(),
            "--port".to_string(),
            self.config.internal_port.to_string(),
            "--auth".to_string(),
            "token".to_string(),
            "--token".to_string(),
            self.token.to_string(),
        ]
    }
}

/// Replace any argument following `--token` so command lines are loggable
fn redact_token_args(args: &[String]) -> Vec<String> {
    let mut safe = args.to_vec();
    for i in 1..safe.len() {
        if safe[i - 1] == "--token" {
            safe[i] = "[REDACTED]".to_string();
        }
    }
    safe
}

#[cfg(unix)]
fn terminate(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(unix)]
fn force_kill(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {
    warn!("graceful termination is not supported on this platform");
}

#[cfg(not(unix))]
fn force_kill(_pid: u32) {}
