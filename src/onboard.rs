//! Onboarding request schema and gateway argument construction
//!
//! Request bodies are validated into a closed schema before anything reaches
//! the gateway's command line; an unknown flow or auth choice is a 400, not a
//! stray process argument.

use crate::config::Config;
use serde::Deserialize;
use serde_json::{json, Value};

/// Onboarding flow selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnboardFlow {
    #[default]
    Quickstart,
    Advanced,
    Manual,
}

impl OnboardFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardFlow::Quickstart => "quickstart",
            OnboardFlow::Advanced => "advanced",
            OnboardFlow::Manual => "manual",
        }
    }
}

/// Closed set of supported auth choices, matching the setup form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum AuthChoice {
    #[serde(rename = "codex-cli")]
    CodexCli,
    #[serde(rename = "openai-codex")]
    OpenaiCodex,
    #[serde(rename = "openai-api-key")]
    OpenaiApiKey,
    #[serde(rename = "claude-cli")]
    ClaudeCli,
    #[serde(rename = "token")]
    AnthropicToken,
    #[serde(rename = "apiKey")]
    AnthropicApiKey,
    #[serde(rename = "gemini-api-key")]
    GeminiApiKey,
    #[serde(rename = "google-antigravity")]
    GoogleAntigravity,
    #[serde(rename = "google-gemini-cli")]
    GoogleGeminiCli,
    #[serde(rename = "openrouter-api-key")]
    OpenrouterApiKey,
    #[serde(rename = "ai-gateway-api-key")]
    AiGatewayApiKey,
    #[serde(rename = "moonshot-api-key")]
    MoonshotApiKey,
    #[serde(rename = "kimi-code-api-key")]
    KimiCodeApiKey,
    #[serde(rename = "zai-api-key")]
    ZaiApiKey,
    #[serde(rename = "minimax-api")]
    MinimaxApi,
    #[serde(rename = "minimax-api-lightning")]
    MinimaxApiLightning,
    #[serde(rename = "qwen-portal")]
    QwenPortal,
    #[serde(rename = "github-copilot")]
    GithubCopilot,
    #[serde(rename = "copilot-proxy")]
    CopilotProxy,
    #[serde(rename = "synthetic-api-key")]
    SyntheticApiKey,
    #[serde(rename = "opencode-zen")]
    OpencodeZen,
}

impl AuthChoice {
    /// Wire name as it appears on the gateway command line
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthChoice::CodexCli => "codex-cli",
            AuthChoice::OpenaiCodex => "openai-codex",
            AuthChoice::OpenaiApiKey => "openai-api-key",
            AuthChoice::ClaudeCli => "claude-cli",
            AuthChoice::AnthropicToken => "token",
            AuthChoice::AnthropicApiKey => "apiKey",
            AuthChoice::GeminiApiKey => "gemini-api-key",
            AuthChoice::GoogleAntigravity => "google-antigravity",
            AuthChoice::GoogleGeminiCli => "google-gemini-cli",
            AuthChoice::OpenrouterApiKey => "openrouter-api-key",
            AuthChoice::AiGatewayApiKey => "ai-gateway-api-key",
            AuthChoice::MoonshotApiKey => "moonshot-api-key",
            AuthChoice::KimiCodeApiKey => "kimi-code-api-key",
            AuthChoice::ZaiApiKey => "zai-api-key",
            AuthChoice::MinimaxApi => "minimax-api",
            AuthChoice::MinimaxApiLightning => "minimax-api-lightning",
            AuthChoice::QwenPortal => "qwen-portal",
            AuthChoice::GithubCopilot => "github-copilot",
            AuthChoice::CopilotProxy => "copilot-proxy",
            AuthChoice::SyntheticApiKey => "synthetic-api-key",
            AuthChoice::OpencodeZen => "opencode-zen",
        }
    }

    /// Flag used to pass the supplied secret for this choice, if any.
    /// OAuth-style choices have no secret flag.
    fn secret_flag(&self) -> Option<&'static str> {
        match self {
            AuthChoice::OpenaiApiKey => Some("--openai-api-key"),
            AuthChoice::AnthropicApiKey => Some("--anthropic-api-key"),
            AuthChoice::OpenrouterApiKey => Some("--openrouter-api-key"),
            AuthChoice::AiGatewayApiKey => Some("--ai-gateway-api-key"),
            AuthChoice::MoonshotApiKey => Some("--moonshot-api-key"),
            AuthChoice::KimiCodeApiKey => Some("--kimi-code-api-key"),
            AuthChoice::GeminiApiKey => Some("--gemini-api-key"),
            AuthChoice::ZaiApiKey => Some("--zai-api-key"),
            AuthChoice::MinimaxApi | AuthChoice::MinimaxApiLightning => Some("--minimax-api-key"),
            AuthChoice::SyntheticApiKey => Some("--synthetic-api-key"),
            AuthChoice::OpencodeZen => Some("--opencode-zen-api-key"),
            _ => None,
        }
    }
}

/// Validated body of `POST /admin/run`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnboardRequest {
    pub flow: Option<OnboardFlow>,
    pub auth_choice: Option<AuthChoice>,
    pub auth_secret: Option<String>,
    pub telegram_token: Option<String>,
    pub discord_token: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_app_token: Option<String>,
    pub model: Option<String>,
}

impl OnboardRequest {
    pub fn model_trimmed(&self) -> Option<&str> {
        trimmed(&self.model)
    }
}

fn trimmed(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Build the full `onboard` argument list for a validated request.
pub fn build_onboard_args(config: &Config, token: &str, req: &OnboardRequest) -> Vec<String> {
    let mut args: Vec<String> = [
        "onboard",
        "--non-interactive",
        "--accept-risk",
        "--json",
        "--no-install-daemon",
        "--skip-health",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.push("--workspace".to_string());
    args.push(config.workspace_dir.to_string_lossy().into_owned());
    args.push("--gateway-bind".to_string());
    args.push("loopback".to_string());
    args.push("--gateway-port".to_string());
    args.push(config.internal_port.to_string());
    args.push("--gateway-auth".to_string());
    args.push("token".to_string());
    args.push("--gateway-token".to_string());
    args.push(token.to_string());
    args.push("--flow".to_string());
    args.push(req.flow.unwrap_or_default().as_str().to_string());

    if let Some(choice) = req.auth_choice {
        args.push("--auth-choice".to_string());
        args.push(choice.as_str().to_string());

        let secret = trimmed(&req.auth_secret);
        if let (Some(flag), Some(secret)) = (choice.secret_flag(), secret) {
            args.push(flag.to_string());
            args.push(secret.to_string());
        }
        if choice == AuthChoice::AnthropicToken {
            if let Some(secret) = secret {
                args.push("--token-provider".to_string());
                args.push("anthropic".to_string());
                args.push("--token".to_string());
                args.push(secret.to_string());
            }
        }
    }

    args
}

/// Channel configurations requested by the onboarding payload, as
/// `(channel name, config value)` pairs ready for `config set --json`.
pub fn channel_configs(req: &OnboardRequest) -> Vec<(&'static str, Value)> {
    let mut channels = Vec::new();

    if let Some(token) = trimmed(&req.telegram_token) {
        channels.push((
            "telegram",
            json!({
                "enabled": true,
                "dmPolicy": "pairing",
                "botToken": token,
                "groupPolicy": "allowlist",
                "streamMode": "partial",
            }),
        ));
    }

    if let Some(token) = trimmed(&req.discord_token) {
        channels.push((
            "discord",
            json!({
                "enabled": true,
                "token": token,
                "groupPolicy": "allowlist",
                "dm": { "policy": "pairing" },
            }),
        ));
    }

    let slack_bot = trimmed(&req.slack_bot_token);
    let slack_app = trimmed(&req.slack_app_token);
    if slack_bot.is_some() || slack_app.is_some() {
        let mut slack = serde_json::Map::new();
        slack.insert("enabled".to_string(), Value::Bool(true));
        if let Some(bot) = slack_bot {
            slack.insert("botToken".to_string(), Value::String(bot.to_string()));
        }
        if let Some(app) = slack_app {
            slack.insert("appToken".to_string(), Value::String(app.to_string()));
        }
        channels.push(("slack", Value::Object(slack)));
    }

    channels
}

/// Structured list of auth-provider groups shown by the setup form
pub fn auth_groups() -> Value {
    json!([
        {
            "value": "openai",
            "label": "OpenAI",
            "hint": "Codex OAuth + API key",
            "options": [
                { "value": "codex-cli", "label": "OpenAI Codex OAuth (Codex CLI)" },
                { "value": "openai-codex", "label": "OpenAI Codex (ChatGPT OAuth)" },
                { "value": "openai-api-key", "label": "OpenAI API key" },
            ],
        },
        {
            "value": "anthropic",
            "label": "Anthropic",
            "hint": "Claude Code CLI + API key",
            "options": [
                { "value": "claude-cli", "label": "Anthropic token (Claude Code CLI)" },
                { "value": "token", "label": "Anthropic token (paste setup-token)" },
                { "value": "apiKey", "label": "Anthropic API key" },
            ],
        },
        {
            "value": "google",
            "label": "Google",
            "hint": "Gemini API key + OAuth",
            "options": [
                { "value": "gemini-api-key", "label": "Google Gemini API key" },
                { "value": "google-antigravity", "label": "Google Antigravity OAuth" },
                { "value": "google-gemini-cli", "label": "Google Gemini CLI OAuth" },
            ],
        },
        {
            "value": "openrouter",
            "label": "OpenRouter",
            "hint": "API key",
            "options": [
                { "value": "openrouter-api-key", "label": "OpenRouter API key" },
            ],
        },
        {
            "value": "ai-gateway",
            "label": "Vercel AI Gateway",
            "hint": "API key",
            "options": [
                { "value": "ai-gateway-api-key", "label": "Vercel AI Gateway API key" },
            ],
        },
        {
            "value": "moonshot",
            "label": "Moonshot AI",
            "hint": "Kimi K2 + Kimi Code",
            "options": [
                { "value": "moonshot-api-key", "label": "Moonshot AI API key" },
                { "value": "kimi-code-api-key", "label": "Kimi Code API key" },
            ],
        },
        {
            "value": "zai",
            "label": "Z.AI (GLM 4.7)",
            "hint": "API key",
            "options": [
                { "value": "zai-api-key", "label": "Z.AI (GLM 4.7) API key" },
            ],
        },
        {
            "value": "minimax",
            "label": "MiniMax",
            "hint": "M2.1 (recommended)",
            "options": [
                { "value": "minimax-api", "label": "MiniMax M2.1" },
                { "value": "minimax-api-lightning", "label": "MiniMax M2.1 Lightning" },
            ],
        },
        {
            "value": "qwen",
            "label": "Qwen",
            "hint": "OAuth",
            "options": [
                { "value": "qwen-portal", "label": "Qwen OAuth" },
            ],
        },
        {
            "value": "copilot",
            "label": "Copilot",
            "hint": "GitHub + local proxy",
            "options": [
                { "value": "github-copilot", "label": "GitHub Copilot (GitHub device login)" },
                { "value": "copilot-proxy", "label": "Copilot Proxy (local)" },
            ],
        },
        {
            "value": "synthetic",
            "label": "Synthetic",
            "hint": "Anthropic-compatible (multi-model)",
            "options": [
                { "value": "synthetic-api-key", "label": "Synthetic API key" },
            ],
        },
        {
            "value": "opencode-zen",
            "label": "OpenCode Zen",
            "hint": "API key",
            "options": [
                { "value": "opencode-zen", "label": "OpenCode Zen (multi-model proxy)" },
            ],
        },
    ])
}
