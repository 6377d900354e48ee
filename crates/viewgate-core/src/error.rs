//! Gateway error taxonomy.
//!
//! Error codes mirror HTTP status semantics (400 validation, 404 not found,
//! 500 operation failure) even though no HTTP transport is involved; replies
//! on the bus carry them in the `{status: "error", code, message}` envelope.

use serde_json::{Value, json};

/// Errors surfaced through bus replies and send outcomes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// A required field is missing or malformed (400).
    #[error("{0}")]
    Validation(String),

    /// The addressed session or view does not exist (404).
    #[error("{0}")]
    NotFound(String),

    /// A collaborator call or client send failed; carries the code and
    /// message of the deepest cause available.
    #[error("{message}")]
    Operation { code: u16, message: String },

    /// An operation was attempted against a disconnected view (500).
    #[error("The client is disconnected.")]
    Disconnected,
}

impl GatewayError {
    /// Shorthand for a 500 operation failure.
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            code: 500,
            message: message.into(),
        }
    }

    /// HTTP-like status code for the error envelope.
    pub fn code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Operation { code, .. } => *code,
            Self::Disconnected => 500,
        }
    }

    /// Render as an error reply envelope.
    pub fn to_envelope(&self) -> Value {
        error_response(self.code(), &self.to_string())
    }
}

/// Reply envelope for a successfully processed request.
pub fn ok_response() -> Value {
    json!({"status": "ok"})
}

/// Reply envelope for a failed request.
pub fn error_response(code: u16, message: &str) -> Value {
    json!({"status": "error", "code": code, "message": message})
}

/// Interpret a reply envelope: `Ok(())` iff `status` is `"ok"`, otherwise the
/// error code and message carried by the reply (or a generic 500).
pub fn check_reply(body: &Value) -> Result<(), GatewayError> {
    if body.get("status").and_then(Value::as_str) == Some("ok") {
        return Ok(());
    }
    let code = body
        .get("code")
        .and_then(Value::as_u64)
        .map_or(500, |c| c as u16);
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Operation failed by unknown reason.")
        .to_string();
    Err(GatewayError::Operation { code, message })
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_http_semantics() {
        assert_eq!(GatewayError::Validation("x".into()).code(), 400);
        assert_eq!(GatewayError::NotFound("x".into()).code(), 404);
        assert_eq!(GatewayError::Disconnected.code(), 500);
        assert_eq!(
            GatewayError::Operation {
                code: 502,
                message: "x".into()
            }
            .code(),
            502
        );
    }

    #[test]
    fn disconnected_message_is_fixed() {
        assert_eq!(
            GatewayError::Disconnected.to_string(),
            "The client is disconnected."
        );
    }

    #[test]
    fn envelope_round_trip() {
        let err = GatewayError::Validation("Missing device identifier [deviceId].".into());
        let env = err.to_envelope();
        assert_eq!(env["status"], "error");
        assert_eq!(env["code"], 400);
        assert_eq!(env["message"], "Missing device identifier [deviceId].");
    }

    #[test]
    fn check_reply_accepts_ok() {
        assert!(check_reply(&ok_response()).is_ok());
    }

    #[test]
    fn check_reply_extracts_code_and_message() {
        let err = check_reply(&error_response(404, "View not found.")).unwrap_err();
        assert_eq!(
            err,
            GatewayError::Operation {
                code: 404,
                message: "View not found.".into()
            }
        );
    }

    #[test]
    fn check_reply_defaults_on_bare_error() {
        let err = check_reply(&json!({"status": "error"})).unwrap_err();
        assert_eq!(err.code(), 500);
        assert_eq!(err.to_string(), "Operation failed by unknown reason.");
    }
}
