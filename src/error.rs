//! Error handling and JSON error responses for the wrapper

use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Outcome of a gateway start attempt.
///
/// Cloneable so a single in-flight attempt can broadcast its result to every
/// caller waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StartError {
    /// The gateway has not been onboarded; nothing was spawned
    #[error("gateway cannot start: not configured")]
    NotConfigured,
    /// The executable could not be spawned
    #[error("failed to spawn gateway: {0}")]
    Spawn(String),
    /// The process exited before becoming ready
    #[error("gateway exited during startup (code={code:?})")]
    Crashed { code: Option<i32> },
    /// The readiness poll timed out
    #[error("gateway did not become ready after {elapsed_secs} seconds")]
    NotReady { elapsed_secs: u64 },
}

/// Error codes carried on wrapper-generated HTTP error responses
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateErrorCode {
    /// The gateway has not been onboarded yet
    NotConfigured,
    /// The gateway did not become ready in time
    GatewayNotReady,
    /// The gateway process could not be started
    GatewayStartFailed,
    /// Transport failure talking to the gateway
    UpstreamUnreachable,
    /// Malformed admin request
    BadRequest,
    /// Basic credentials missing or malformed
    AuthRequired,
    /// Basic credentials did not match
    AuthInvalid,
    /// Too many admin attempts from one address
    RateLimited,
    /// Unexpected internal error
    InternalError,
}

impl GateErrorCode {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateErrorCode::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            GateErrorCode::GatewayNotReady => StatusCode::SERVICE_UNAVAILABLE,
            GateErrorCode::GatewayStartFailed => StatusCode::SERVICE_UNAVAILABLE,
            GateErrorCode::UpstreamUnreachable => StatusCode::BAD_GATEWAY,
            GateErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            GateErrorCode::AuthRequired => StatusCode::UNAUTHORIZED,
            GateErrorCode::AuthInvalid => StatusCode::UNAUTHORIZED,
            GateErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GateErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code as a string for the X-Proxy-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            GateErrorCode::NotConfigured => "NOT_CONFIGURED",
            GateErrorCode::GatewayNotReady => "GATEWAY_NOT_READY",
            GateErrorCode::GatewayStartFailed => "GATEWAY_START_FAILED",
            GateErrorCode::UpstreamUnreachable => "UPSTREAM_UNREACHABLE",
            GateErrorCode::BadRequest => "BAD_REQUEST",
            GateErrorCode::AuthRequired => "AUTH_REQUIRED",
            GateErrorCode::AuthInvalid => "AUTH_INVALID",
            GateErrorCode::RateLimited => "RATE_LIMITED",
            GateErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl From<&StartError> for GateErrorCode {
    fn from(err: &StartError) -> Self {
        match err {
            StartError::NotConfigured => GateErrorCode::NotConfigured,
            StartError::NotReady { .. } => GateErrorCode::GatewayNotReady,
            StartError::Spawn(_) | StartError::Crashed { .. } => GateErrorCode::GatewayStartFailed,
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// The error code
    pub code: GateErrorCode,
    /// Human-readable error message
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: GateErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Response body type used across the wrapper's handlers
pub type GateBody = BoxBody<Bytes, hyper::Error>;

/// Box a byte payload into the common body type
pub fn full_body(body: impl Into<Bytes>) -> GateBody {
    Full::new(body.into()).map_err(|never| match never {}).boxed()
}

/// Box an empty payload into the common body type
pub fn empty_body() -> GateBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

/// Create a JSON error response with X-Proxy-Error header
pub fn json_error_response(
    code: GateErrorCode,
    message: impl Into<String>,
) -> Response<GateBody> {
    let error = ErrorResponse::new(code, message);
    let status = code.status_code();
    let body = error.to_json();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("X-Proxy-Error", code.as_header_value())
        .body(full_body(body))
        .expect("valid response with StatusCode enum and static headers")
}
