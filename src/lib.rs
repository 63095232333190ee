//! Clawgate - a supervising reverse proxy for an OpenClaw gateway
//!
//! This library fronts a single long-running gateway process and exposes it
//! through one public port:
//! - Spawns the gateway on demand and restarts it after crashes
//! - Coordinates concurrent start requests through one shared attempt
//! - Polls the gateway's loopback listener until it is safe to forward
//! - Redirects to a password-protected setup surface until onboarded
//! - Proxies HTTP and WebSocket traffic with an injected bearer token

pub mod admin;
pub mod backend;
pub mod config;
pub mod error;
pub mod onboard;
pub mod pool;
pub mod proxy;
pub mod ratelimit;
pub mod ready;
pub mod server;
pub mod supervisor;
pub mod token;
