//! One-shot invocations of the gateway executable
//!
//! Onboarding, config mutation and pairing all shell out to the same entry
//! point the supervisor runs. Output is captured as one combined transcript
//! and surfaced to the operator verbatim.

use crate::config::Config;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Exit code reported when the executable could not be spawned at all
const SPAWN_FAILURE_CODE: i32 = 127;

/// Captured result of a one-shot gateway invocation
#[derive(Debug)]
pub struct CommandOutput {
    /// Process exit code; -1 when terminated by a signal
    pub code: i32,
    /// Combined stdout and stderr text
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Version and channel-support introspection, fetched once per process
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub version: String,
    pub channels_help: String,
}

/// Runner for gateway subcommands (`onboard`, `config set`, `pairing`, …)
pub struct BackendCli {
    config: Arc<Config>,
    info: tokio::sync::OnceCell<BackendInfo>,
}

impl BackendCli {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            info: tokio::sync::OnceCell::new(),
        }
    }

    /// Run `<node> <entry> <args…>` to completion, capturing combined output.
    ///
    /// Every invocation inherits the wrapper's environment augmented with the
    /// state and workspace directories, so the gateway and its subcommands
    /// agree on where persisted state lives. Spawn failures are reported as
    /// exit code 127 with the error in the transcript rather than bubbling up.
    pub async fn run(&self, args: &[&str]) -> CommandOutput {
        debug!(node = %self.config.node, entry = %self.config.entry, ?args, "running gateway command");

        let mut cmd = Command::new(&self.config.node);
        cmd.arg(&self.config.entry)
            .args(args)
            .env("OPENCLAW_STATE_DIR", &self.config.state_dir)
            .env("OPENCLAW_WORKSPACE_DIR", &self.config.workspace_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match cmd.output().await {
            Ok(out) => {
                let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&out.stderr));
                CommandOutput {
                    code: out.status.code().unwrap_or(-1),
                    output: text,
                }
            }
            Err(e) => CommandOutput {
                code: SPAWN_FAILURE_CODE,
                output: format!("[spawn error] {e}\n"),
            },
        }
    }

    /// Version and `channels add --help` text, fetched concurrently on first
    /// use and cached for the process lifetime.
    pub async fn info(&self) -> BackendInfo {
        self.info
            .get_or_init(|| async {
                let (version, help) =
                    tokio::join!(self.run(&["--version"]), self.run(&["channels", "add", "--help"]));
                BackendInfo {
                    version: version.output.trim().to_string(),
                    channels_help: help.output,
                }
            })
            .await
            .clone()
    }

    /// Whether this gateway build lists `name` as an installable channel
    pub async fn supports_channel(&self, name: &str) -> bool {
        self.info().await.channels_help.contains(name)
    }
}
