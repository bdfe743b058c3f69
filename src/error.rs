//! Error taxonomy and dialect-appropriate error envelopes (spec §7, SPEC_FULL §10.1).
//!
//! Mirrors the teacher's `thiserror` library enum for typed, library-style
//! errors (see `arula_core/src/utils/error.rs`'s `ArulaError`).

use serde_json::{json, Value};
use thiserror::Error;

use crate::converters::Dialect;

/// The error kinds from spec §7. Each maps to exactly one HTTP status and one
/// dialect-appropriate envelope shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolbridgeError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("conversion failed: {0}")]
    ConversionFailed(String),

    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("bad gateway response from backend: {0}")]
    BackendGateway(String),

    #[error("backend returned {status}: {message}")]
    BackendHttp { status: u16, message: String },

    #[error("rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ToolbridgeError {
    /// The §7 error kind name, used verbatim in error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolbridgeError::InvalidRequest(_) => "invalid_request",
            ToolbridgeError::UnsupportedFeature(_) => "unsupported_feature",
            ToolbridgeError::ConversionFailed(_) => "conversion_failed",
            ToolbridgeError::BackendUnreachable(_) => "backend_unreachable",
            ToolbridgeError::BackendGateway(_) => "backend_gateway",
            ToolbridgeError::BackendHttp { .. } => "backend_http",
            ToolbridgeError::RateLimited { .. } => "rate_limited",
            ToolbridgeError::Unauthorized(_) => "unauthorized",
            ToolbridgeError::Internal(_) => "internal",
        }
    }

    /// The HTTP status code the §7 propagation policy assigns this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            ToolbridgeError::InvalidRequest(_) => 400,
            ToolbridgeError::Unauthorized(_) => 401,
            ToolbridgeError::RateLimited { .. } => 429,
            ToolbridgeError::BackendGateway(_) => 502,
            ToolbridgeError::BackendUnreachable(_) => 503,
            ToolbridgeError::BackendHttp { status, .. } => *status,
            ToolbridgeError::UnsupportedFeature(_)
            | ToolbridgeError::ConversionFailed(_)
            | ToolbridgeError::Internal(_) => 500,
        }
    }

    fn message(&self) -> String {
        match self {
            ToolbridgeError::BackendHttp { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for ToolbridgeError {
    fn from(err: serde_json::Error) -> Self {
        ToolbridgeError::ConversionFailed(err.to_string())
    }
}

/// Build the dialect-appropriate error payload described in §7:
/// OpenAI `{error:{message,type,code}}`, Ollama `{error,done:true}`.
pub fn envelope(err: &ToolbridgeError, dialect: Dialect) -> Value {
    match dialect {
        Dialect::Openai => json!({
            "error": {
                "message": err.message(),
                "type": err.kind(),
                "code": err.kind(),
            }
        }),
        Dialect::Ollama => json!({
            "error": err.message(),
            "done": true,
        }),
    }
}

/// The `type` used for a recoverable non-streaming conversion failure,
/// per §7 "User-visible failure behavior".
pub const PROXY_CONVERSION_ERROR_TYPE: &str = "proxy_conversion_error";

/// Build the non-streaming recoverable-conversion-failure envelope (§7).
pub fn conversion_error_envelope(message: &str, dialect: Dialect) -> Value {
    match dialect {
        Dialect::Openai => json!({
            "error": {
                "message": message,
                "type": PROXY_CONVERSION_ERROR_TYPE,
                "code": "conversion_failed",
            }
        }),
        Dialect::Ollama => json!({
            "error": message,
            "done": true,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(ToolbridgeError::InvalidRequest("x".into()).http_status(), 400);
        assert_eq!(ToolbridgeError::Unauthorized("x".into()).http_status(), 401);
        assert_eq!(
            ToolbridgeError::RateLimited { retry_after_secs: Some(5) }.http_status(),
            429
        );
        assert_eq!(ToolbridgeError::BackendGateway("x".into()).http_status(), 502);
        assert_eq!(ToolbridgeError::BackendUnreachable("x".into()).http_status(), 503);
        assert_eq!(ToolbridgeError::Internal("x".into()).http_status(), 500);
    }

    #[test]
    fn openai_envelope_shape() {
        let err = ToolbridgeError::InvalidRequest("bad field".into());
        let env = envelope(&err, Dialect::Openai);
        assert_eq!(env["error"]["type"], "invalid_request");
        assert!(env["error"]["message"].as_str().unwrap().contains("bad field"));
    }

    #[test]
    fn ollama_envelope_shape() {
        let err = ToolbridgeError::BackendUnreachable("connection refused".into());
        let env = envelope(&err, Dialect::Ollama);
        assert_eq!(env["done"], true);
        assert!(env["error"].as_str().unwrap().contains("connection refused"));
    }

    #[test]
    fn conversion_error_envelope_type() {
        let env = conversion_error_envelope("oops", Dialect::Openai);
        assert_eq!(env["error"]["type"], PROXY_CONVERSION_ERROR_TYPE);
    }
}
