//! Gateway error taxonomy.
//!
//! Every failure the request pipeline can produce maps onto one of these
//! variants; the HTTP surface derives the response status from
//! [`GatewayError::status`] and serializes the client-visible message through
//! the content negotiator. Internal detail is logged server-side and only
//! reaches the client when the gateway runs in debug mode.

use crate::engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed request body for the declared content type.
    #[error("invalid request body: {0}")]
    Decode(String),

    /// The declared request Content-Type has no registered decoder.
    #[error("content type not supported: {0}")]
    UnsupportedMediaType(String),

    /// No overlap between the Accept header and the supported wire formats.
    #[error("could not negotiate an acceptable response type")]
    NotAcceptable,

    /// The caller holds no valid session token.
    #[error("authentication required")]
    AuthRequired,

    /// Credential validation failed.
    #[error("could not authenticate using provided credentials")]
    AuthFailed,

    /// The request payload is not a well-formed lowstate batch.
    #[error("{0}")]
    BadRequest(String),

    /// Surfaced from the execution engine; reported, never dropped.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Anything unexpected. The client sees a generic message.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The HTTP status this error is reported as.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::Decode(_) | GatewayError::BadRequest(_) => 400,
            GatewayError::AuthRequired | GatewayError::AuthFailed => 401,
            GatewayError::UnsupportedMediaType(_) | GatewayError::NotAcceptable => 406,
            GatewayError::Engine(e) => e.status().unwrap_or(500),
            GatewayError::Internal(_) => 500,
        }
    }

    /// The message sent to the client. Internal errors are masked unless the
    /// gateway runs with `debug` enabled; everything else is already safe to
    /// show.
    pub fn client_message(&self, debug: bool) -> String {
        match self {
            GatewayError::Internal(detail) if debug => detail.clone(),
            GatewayError::Internal(_) => "An unexpected error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(GatewayError::Decode("x".into()).status(), 400);
        assert_eq!(GatewayError::BadRequest("x".into()).status(), 400);
        assert_eq!(GatewayError::AuthRequired.status(), 401);
        assert_eq!(GatewayError::NotAcceptable.status(), 406);
        assert_eq!(GatewayError::UnsupportedMediaType("a/b".into()).status(), 406);
        assert_eq!(GatewayError::Internal("boom".into()).status(), 500);
    }

    #[test]
    fn internal_detail_is_masked_outside_debug() {
        let err = GatewayError::Internal("stack trace".into());
        assert_eq!(err.client_message(false), "An unexpected error occurred");
        assert_eq!(err.client_message(true), "stack trace");
    }
}
