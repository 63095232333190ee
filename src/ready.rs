//! Readiness polling for the gateway's loopback listener

use crate::pool::{GatewayPool, ProbeOutcome};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default bound on a readiness wait
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);
/// Pause between poll rounds
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Paths probed in order each round. Any HTTP response from any of them,
/// whatever the status code, means the listener is up.
const CANDIDATE_PATHS: &[&str] = &["/openclaw", "/", "/health"];

/// Poll the gateway until it answers or `timeout` elapses.
///
/// Connection refused and connect timeouts are the normal state while the
/// gateway boots and are not logged; other transport failures are warnings
/// but never abort the loop. Returns whether the gateway became ready.
pub async fn wait_until_ready(pool: &GatewayPool, timeout: Duration) -> bool {
    let start = Instant::now();
    debug!(target = pool.authority(), "starting readiness poll");

    while start.elapsed() < timeout {
        for path in CANDIDATE_PATHS {
            match pool.probe(path).await {
                ProbeOutcome::Responded(status) => {
                    info!(path, %status, elapsed_ms = start.elapsed().as_millis(), "gateway ready");
                    return true;
                }
                ProbeOutcome::Unreachable => {}
                ProbeOutcome::Failed(msg) => {
                    warn!(path, error = %msg, "readiness probe error");
                }
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    error!(
        timeout_secs = timeout.as_secs(),
        "gateway failed to become ready"
    );
    false
}
