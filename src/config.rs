use anyhow::Context;
use std::path::{Path, PathBuf};

const DEFAULT_PUBLIC_PORT: u16 = 8080;
const DEFAULT_INTERNAL_PORT: u16 = 18789;
const DEFAULT_INTERNAL_HOST: &str = "127.0.0.1";
const DEFAULT_ENTRY: &str = "/openclaw/dist/entry.js";
const DEFAULT_NODE: &str = "node";

/// Name of the config artifact the gateway writes during onboarding.
/// Its existence is the "configured" signal.
const CONFIG_FILE_NAME: &str = "openclaw.json";

/// Wrapper configuration, resolved once at startup from the environment.
///
/// The wrapper has no CLI surface; everything is driven by environment
/// variables so it can run unattended under a process platform.
#[derive(Debug, Clone)]
pub struct Config {
    /// Public port the wrapper listens on
    pub public_port: u16,
    /// Gateway state directory (token file, config artifact)
    pub state_dir: PathBuf,
    /// Workspace directory handed to the gateway
    pub workspace_dir: PathBuf,
    /// Operator password protecting the admin surface (never generated)
    pub setup_password: Option<String>,
    /// Host the gateway binds internally
    pub internal_host: String,
    /// Port the gateway binds internally
    pub internal_port: u16,
    /// Gateway entry point script
    pub entry: String,
    /// Interpreter used to invoke the entry point
    pub node: String,
    /// Explicit config artifact path, overriding the state-dir default
    pub config_path_override: Option<PathBuf>,
}

impl Config {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let public_port = match env_trimmed("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("invalid PORT value: {raw}"))?,
            None => DEFAULT_PUBLIC_PORT,
        };

        let internal_port = match env_trimmed("INTERNAL_GATEWAY_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("invalid INTERNAL_GATEWAY_PORT value: {raw}"))?,
            None => DEFAULT_INTERNAL_PORT,
        };

        let state_dir = match env_trimmed("OPENCLAW_STATE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs_next::home_dir()
                .context("cannot determine home directory; set OPENCLAW_STATE_DIR")?
                .join(".openclaw"),
        };

        let workspace_dir = env_trimmed("OPENCLAW_WORKSPACE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| state_dir.join("workspace"));

        Ok(Self {
            public_port,
            workspace_dir,
            setup_password: env_trimmed("SETUP_PASSWORD"),
            internal_host: env_trimmed("INTERNAL_GATEWAY_HOST")
                .unwrap_or_else(|| DEFAULT_INTERNAL_HOST.to_string()),
            internal_port,
            entry: env_trimmed("OPENCLAW_ENTRY").unwrap_or_else(|| DEFAULT_ENTRY.to_string()),
            node: env_trimmed("OPENCLAW_NODE").unwrap_or_else(|| DEFAULT_NODE.to_string()),
            config_path_override: env_trimmed("OPENCLAW_CONFIG_PATH").map(PathBuf::from),
            state_dir,
        })
    }

    /// Test-friendly constructor: everything rooted under one directory.
    pub fn for_state_dir(state_dir: &Path) -> Self {
        Self {
            public_port: 0,
            workspace_dir: state_dir.join("workspace"),
            setup_password: None,
            internal_host: DEFAULT_INTERNAL_HOST.to_string(),
            internal_port: DEFAULT_INTERNAL_PORT,
            entry: DEFAULT_ENTRY.to_string(),
            node: DEFAULT_NODE.to_string(),
            config_path_override: None,
            state_dir: state_dir.to_path_buf(),
        }
    }

    /// Base URL of the gateway's internal listener.
    pub fn gateway_target(&self) -> String {
        format!("http://{}:{}", self.internal_host, self.internal_port)
    }

    /// Path of the persisted gateway token file.
    pub fn token_file(&self) -> PathBuf {
        self.state_dir.join("gateway.token")
    }

    /// Path of the config artifact whose existence gates gateway startup.
    pub fn config_path(&self) -> PathBuf {
        self.config_path_override
            .clone()
            .unwrap_or_else(|| self.state_dir.join(CONFIG_FILE_NAME))
    }

    /// Whether the gateway has been onboarded.
    ///
    /// Re-checked on every call; admin actions create and delete the artifact
    /// at any time, so the result must never be cached.
    pub fn is_configured(&self) -> bool {
        self.config_path().exists()
    }

    /// Delete the config artifact, returning the system to the unconfigured
    /// state. Idempotent: a missing artifact is success. Leaves the token
    /// file and workspace untouched.
    pub fn reset_config(&self) -> std::io::Result<()> {
        match std::fs::remove_file(self.config_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Create the state and workspace directories if missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;
        std::fs::create_dir_all(&self.workspace_dir)
    }
}

/// Read an environment variable, treating empty/whitespace values as unset.
fn env_trimmed(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
