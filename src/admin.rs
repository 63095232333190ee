//! Password-protected admin surface: setup UI, onboarding, diagnostics
//!
//! Every admin path except the stylesheet goes through the same gate: fail
//! closed when no password is configured, rate-limit by client address, then
//! verify HTTP Basic credentials with a digest-based constant-time compare.

use crate::backend::BackendCli;
use crate::config::Config;
use crate::error::{full_body, json_error_response, GateBody, GateErrorCode};
use crate::onboard::{self, OnboardRequest};
use crate::ratelimit::RateLimiter;
use crate::supervisor::GatewaySupervisor;
use base64::Engine;
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Challenge sent with every 401 from the gate
const BASIC_CHALLENGE: &str = "Basic realm=\"OpenClaw Setup\"";
/// Cap on admin request bodies
const MAX_BODY_BYTES: usize = 1024 * 1024;

const SETUP_PAGE: &str = include_str!("assets/setup.html");
const STYLESHEET: &str = include_str!("assets/styles.css");

/// Helper to create a plain-text response
fn response(status: StatusCode, body: impl Into<String>) -> Response<GateBody> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(full_body(body.into()))
        .expect("valid response with StatusCode enum")
}

/// Helper to create a JSON response
fn json_response(status: StatusCode, body: impl Into<String>) -> Response<GateBody> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(full_body(body.into()))
        .expect("valid response with StatusCode enum and static header")
}

/// 401 with the Basic challenge attached
fn challenge_response(code: GateErrorCode, body: &str) -> Response<GateBody> {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(WWW_AUTHENTICATE, BASIC_CHALLENGE)
        .header("Content-Type", "text/plain")
        .header("X-Proxy-Error", code.as_header_value())
        .body(full_body(body.to_string()))
        .expect("valid response with StatusCode enum and static headers")
}

/// Extract the password from an `Authorization: Basic` header value.
/// The username part is ignored; only the secret after the colon counts.
fn parse_basic_password(header: &str) -> Option<String> {
    let (scheme, encoded) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") || encoded.is_empty() {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let password = match decoded.split_once(':') {
        Some((_, password)) => password,
        None => "",
    };
    Some(password.to_string())
}

/// Compare a supplied password against the configured one.
///
/// Both sides are hashed to a fixed-size digest first and the digests are
/// folded byte-by-byte, so comparison time does not depend on how many
/// prefix bytes match.
fn verify_password(supplied: &str, expected: &str) -> bool {
    let supplied = Sha256::digest(supplied.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    let diff = supplied
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    diff == 0
}

#[derive(Debug, Deserialize)]
struct PairingRequest {
    channel: Option<String>,
    code: Option<String>,
}

/// The admin API: gate plus handlers
pub struct AdminApi {
    config: Arc<Config>,
    supervisor: Arc<GatewaySupervisor>,
    cli: Arc<BackendCli>,
    limiter: Arc<RateLimiter>,
    token: Arc<str>,
}

impl AdminApi {
    pub fn new(
        config: Arc<Config>,
        supervisor: Arc<GatewaySupervisor>,
        cli: Arc<BackendCli>,
        limiter: Arc<RateLimiter>,
        token: Arc<str>,
    ) -> Self {
        Self {
            config,
            supervisor,
            cli,
            limiter,
            token,
        }
    }

    /// Apply the admin gate. `Err` carries the response to send instead of
    /// invoking a handler.
    fn authorize(
        &self,
        req: &Request<Incoming>,
        client_ip: IpAddr,
    ) -> Result<(), Box<Response<GateBody>>> {
        let Some(expected) = self.config.setup_password.as_deref() else {
            // Fail closed: admin access must be explicitly enabled
            return Err(Box::new(response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "SETUP_PASSWORD is not set. Set it in the deployment environment before using /admin.",
            )));
        };

        if self.limiter.is_limited(client_ip) {
            warn!(%client_ip, "admin request rate limited");
            return Err(Box::new(json_error_response(
                GateErrorCode::RateLimited,
                "Too many requests. Try again later.",
            )));
        }

        let supplied = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_basic_password);

        match supplied {
            None => Err(Box::new(challenge_response(
                GateErrorCode::AuthRequired,
                "Auth required",
            ))),
            Some(password) if verify_password(&password, expected) => Ok(()),
            Some(_) => {
                warn!(%client_ip, "admin authentication failed");
                Err(Box::new(challenge_response(
                    GateErrorCode::AuthInvalid,
                    "Invalid password",
                )))
            }
        }
    }

    /// Dispatch an `/admin` request
    pub async fn handle(
        &self,
        req: Request<Incoming>,
        client_ip: IpAddr,
    ) -> Response<GateBody> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        // The stylesheet is static content, served without the gate
        if method == Method::GET && path == "/admin/styles.css" {
            return Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/css")
                .body(full_body(STYLESHEET))
                .expect("valid response with StatusCode enum");
        }

        if let Err(denied) = self.authorize(&req, client_ip) {
            return *denied;
        }

        match (&method, path.as_str()) {
            (&Method::GET, "/admin") => Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/html; charset=utf-8")
                .body(full_body(SETUP_PAGE))
                .expect("valid response with StatusCode enum"),
            (&Method::GET, "/admin/status") => self.handle_status().await,
            (&Method::POST, "/admin/run") => self.handle_run(req).await,
            (&Method::POST, "/admin/pairing/approve") => self.handle_pairing(req).await,
            (&Method::POST, "/admin/reset") => self.handle_reset(),
            (&Method::GET, "/admin/debug") => self.handle_debug().await,
            _ => response(StatusCode::NOT_FOUND, "not found"),
        }
    }

    async fn handle_status(&self) -> Response<GateBody> {
        let info = self.cli.info().await;
        let body = json!({
            "configured": self.config.is_configured(),
            "gatewayTarget": self.config.gateway_target(),
            "openclawVersion": info.version,
            "channelsAddHelp": info.channels_help,
            "authGroups": onboard::auth_groups(),
        });
        json_response(StatusCode::OK, body.to_string())
    }

    async fn handle_run(&self, req: Request<Incoming>) -> Response<GateBody> {
        let payload: OnboardRequest = match read_json_body(req).await {
            Ok(payload) => payload,
            Err(message) => {
                return json_response(
                    StatusCode::BAD_REQUEST,
                    json!({ "ok": false, "output": message }).to_string(),
                );
            }
        };

        if self.config.is_configured() {
            return match self.supervisor.ensure_running().await {
                Ok(()) => json_response(
                    StatusCode::OK,
                    json!({
                        "ok": true,
                        "output": "Already configured.\nUse Reset setup if you want to rerun onboarding.\n",
                    })
                    .to_string(),
                ),
                Err(e) => json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "ok": false, "output": format!("Gateway not ready: {e}") }).to_string(),
                ),
            };
        }

        if let Err(e) = self.config.ensure_dirs() {
            error!(error = %e, "cannot create state directories for onboarding");
            return json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "ok": false, "output": format!("Cannot create state directories: {e}") })
                    .to_string(),
            );
        }

        let args = onboard::build_onboard_args(&self.config, &self.token, &payload);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let onboard_result = self.cli.run(&arg_refs).await;

        let mut extra = format!(
            "\n[setup] Onboarding exit={} configured={}\n",
            onboard_result.code,
            self.config.is_configured()
        );

        let ok = onboard_result.success() && self.config.is_configured();

        if ok {
            extra.push_str("\n[setup] Configuring gateway settings...\n");
            extra.push_str(&self.post_configure(&payload).await);

            extra.push_str("\n[setup] Starting gateway...\n");
            match self.supervisor.restart().await {
                Ok(()) => extra.push_str("[setup] Gateway started.\n"),
                Err(e) => {
                    error!(error = %e, "gateway failed to start after onboarding");
                    extra.push_str(&format!(
                        "[setup] Gateway failed to start: {e}\nIt will be retried on the next request.\n"
                    ));
                }
            }
        }

        let status = if ok {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        json_response(
            status,
            json!({ "ok": ok, "output": format!("{}{}", onboard_result.output, extra) })
                .to_string(),
        )
    }

    /// Follow-up `config set` calls after a successful onboard run
    async fn post_configure(&self, payload: &OnboardRequest) -> String {
        let mut transcript = String::new();

        let allow_insecure = self
            .cli
            .run(&["config", "set", "gateway.controlUi.allowInsecureAuth", "true"])
            .await;
        transcript.push_str(&format!(
            "[config] gateway.controlUi.allowInsecureAuth=true exit={}\n",
            allow_insecure.code
        ));

        let token_set = self
            .cli
            .run(&["config", "set", "gateway.auth.token", &*self.token])
            .await;
        transcript.push_str(&format!(
            "[config] gateway.auth.token exit={}\n",
            token_set.code
        ));

        let proxies = self
            .cli
            .run(&[
                "config",
                "set",
                "--json",
                "gateway.trustedProxies",
                "[\"127.0.0.1\"]",
            ])
            .await;
        transcript.push_str(&format!(
            "[config] gateway.trustedProxies exit={}\n",
            proxies.code
        ));

        if let Some(model) = payload.model_trimmed() {
            transcript.push_str(&format!("[setup] Setting model to {model}...\n"));
            let model_set = self.cli.run(&["models", "set", model]).await;
            transcript.push_str(&format!(
                "[models set] exit={}\n{}",
                model_set.code, model_set.output
            ));
        }

        for (name, config_value) in onboard::channel_configs(payload) {
            if !self.cli.supports_channel(name).await {
                transcript.push_str(&format!(
                    "\n[{name}] skipped (this gateway build does not list {name} in `channels add --help`)\n"
                ));
                continue;
            }
            let key = format!("channels.{name}");
            let value = config_value.to_string();
            let set = self
                .cli
                .run(&["config", "set", "--json", &key, &value])
                .await;
            let get = self.cli.run(&["config", "get", &key]).await;
            transcript.push_str(&format!(
                "\n[{name} config] exit={} (output {} chars)\n{}",
                set.code,
                set.output.len(),
                if set.output.is_empty() { "(no output)" } else { set.output.as_str() }
            ));
            transcript.push_str(&format!(
                "\n[{name} verify] exit={} (output {} chars)\n{}",
                get.code,
                get.output.len(),
                if get.output.is_empty() { "(no output)" } else { get.output.as_str() }
            ));
        }

        transcript
    }

    async fn handle_pairing(&self, req: Request<Incoming>) -> Response<GateBody> {
        let payload: PairingRequest = match read_json_body(req).await {
            Ok(payload) => payload,
            Err(message) => {
                return json_response(
                    StatusCode::BAD_REQUEST,
                    json!({ "ok": false, "error": message }).to_string(),
                );
            }
        };

        let (Some(channel), Some(code)) = (payload.channel, payload.code) else {
            return json_response(
                StatusCode::BAD_REQUEST,
                json!({ "ok": false, "error": "Missing channel or code" }).to_string(),
            );
        };

        let result = self
            .cli
            .run(&["pairing", "approve", &channel, &code])
            .await;
        let status = if result.success() {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        json_response(
            status,
            json!({ "ok": result.success(), "output": result.output }).to_string(),
        )
    }

    fn handle_reset(&self) -> Response<GateBody> {
        match self.config.reset_config() {
            Ok(()) => {
                info!(path = %self.config.config_path().display(), "configuration artifact deleted");
                response(
                    StatusCode::OK,
                    "OK - deleted config file. You can rerun setup now.",
                )
            }
            Err(e) => response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    async fn handle_debug(&self) -> Response<GateBody> {
        let info = self.cli.info().await;
        let body = json!({
            "wrapper": {
                "version": env!("CARGO_PKG_VERSION"),
                "port": self.config.public_port,
                "stateDir": self.config.state_dir.display().to_string(),
                "workspaceDir": self.config.workspace_dir.display().to_string(),
                "configPath": self.config.config_path().display().to_string(),
                // Token value never leaves the process; report provenance only
                "gatewayTokenFromEnv": std::env::var("OPENCLAW_GATEWAY_TOKEN")
                    .map(|v| !v.trim().is_empty())
                    .unwrap_or(false),
                "gatewayTokenPersisted": self.config.token_file().exists(),
                "gatewayState": self.supervisor.state(),
                "gatewayPid": self.supervisor.current_pid(),
            },
            "openclaw": {
                "entry": self.config.entry,
                "node": self.config.node,
                "version": info.version,
                "channelsAddHelpIncludesTelegram": info.channels_help.contains("telegram"),
            },
        });
        json_response(StatusCode::OK, body.to_string())
    }
}

/// Collect and deserialize a JSON request body, bounded to 1 MiB
async fn read_json_body<T: serde::de::DeserializeOwned>(
    req: Request<Incoming>,
) -> Result<T, String> {
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES);
    let bytes = body
        .collect()
        .await
        .map_err(|e| format!("could not read request body: {e}"))?
        .to_bytes();
    if bytes.is_empty() {
        return serde_json::from_slice(b"{}").map_err(|e| format!("invalid request: {e}"));
    }
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid request: {e}"))
}
