//! Gateway token resolution and persistence
//!
//! The wrapper is the gateway's only authenticated client; the bearer token
//! it injects is resolved once at startup and never changes for the process
//! lifetime. The token value itself must never reach a log line.

use crate::config::Config;
use rand::RngCore;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Length of a generated token in bytes (hex-encoded on disk)
const TOKEN_LENGTH: usize = 32;

/// Resolve the gateway bearer token.
///
/// Precedence: `OPENCLAW_GATEWAY_TOKEN` environment override, then the
/// persisted token file, then a freshly generated value. A generated token is
/// best-effort persisted with restrictive permissions; persistence failure is
/// logged and the in-memory value remains usable.
pub fn resolve_gateway_token(config: &Config) -> Arc<str> {
    let env_override = std::env::var("OPENCLAW_GATEWAY_TOKEN")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    resolve_with_override(env_override.as_deref(), config)
}

fn resolve_with_override(env_override: Option<&str>, config: &Config) -> Arc<str> {
    if let Some(token) = env_override {
        info!(source = "env", "gateway token resolved");
        return Arc::from(token);
    }

    let token_file = config.token_file();
    match std::fs::read_to_string(&token_file) {
        Ok(existing) => {
            let existing = existing.trim();
            if !existing.is_empty() {
                info!(source = "file", "gateway token resolved");
                return Arc::from(existing);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %token_file.display(), error = %e, "could not read existing gateway token");
        }
    }

    let mut bytes = [0u8; TOKEN_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let generated = hex::encode(bytes);

    if let Err(e) = persist_token(&token_file, config, &generated) {
        warn!(path = %token_file.display(), error = %e, "could not persist gateway token");
    }

    info!(source = "generated", "gateway token resolved");
    Arc::from(generated.as_str())
}

fn persist_token(path: &Path, config: &Config, token: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(&config.state_dir)?;
    write_restricted(path, token)
}

#[cfg(unix)]
fn write_restricted(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_restricted(path: &Path, contents: &str) -> std::io::Result<()> {
    std::fs::write(path, contents)
}
