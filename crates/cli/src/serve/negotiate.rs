//! Content negotiation for responses.
//!
//! [`ReplyFormat`] picks the response wire format from the Accept header
//! before the handler body runs; when nothing overlaps, the 406 itself is
//! serialized in the default format. Handler failures are normalized into a
//! `{status, return}` envelope, except authentication failures on
//! browser-facing resources, which turn into the login prompt instead.

use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

use drover_core::error::GatewayError;
use drover_core::wire::{self, WireFormat};

/// The negotiated response format, resolved per request.
#[derive(Debug, Clone, Copy)]
pub struct ReplyFormat(pub WireFormat);

impl<S: Send + Sync> axum::extract::FromRequestParts<S> for ReplyFormat {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let accept = parts
            .headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok());
        match wire::negotiate(accept) {
            Ok(format) => Ok(ReplyFormat(format)),
            Err(err) => Err(default_error_response(&err)),
        }
    }
}

pub fn status_of(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Serialize `value` in `format` with the matching Content-Type.
pub fn serialize(format: WireFormat, status: StatusCode, value: &Value) -> Response {
    match format.encode(value) {
        Ok(body) => (
            status,
            [(header::CONTENT_TYPE, format.content_type())],
            body,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode response body");
            default_error_response(&err)
        }
    }
}

/// An error envelope in the default format, for failures that happen before
/// or during negotiation itself.
pub fn default_error_response(err: &GatewayError) -> Response {
    let status = err.status();
    let body = json!({
        "status": status,
        "return": err.client_message(false),
    });
    serialize(WireFormat::Json, status_of(status), &body)
}

impl ReplyFormat {
    /// A successful reply with the given status and payload.
    pub fn reply(&self, status: StatusCode, value: Value) -> Response {
        serialize(self.0, status, &value)
    }

    pub fn ok(&self, value: Value) -> Response {
        self.reply(StatusCode::OK, value)
    }

    /// The negotiated "please log in" prompt, target of the internal
    /// redirect for unauthenticated browser-facing requests.
    pub fn login_prompt(&self) -> Response {
        let mut response = self.reply(
            StatusCode::UNAUTHORIZED,
            json!({
                "status": 401,
                "return": "Please log in",
            }),
        );
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            header::HeaderValue::from_static("Session"),
        );
        response
    }

    /// Normalize a handler failure. Auth conditions become the login
    /// prompt; everything else becomes a `{status, return}` envelope.
    pub fn error(&self, err: &GatewayError, debug: bool) -> Response {
        match err {
            GatewayError::AuthRequired | GatewayError::AuthFailed => self.login_prompt(),
            _ => self.bare_error(err, debug),
        }
    }

    /// An error envelope with no login redirection, for programmatic
    /// endpoints.
    pub fn bare_error(&self, err: &GatewayError, debug: bool) -> Response {
        if matches!(err, GatewayError::Internal(_)) {
            tracing::error!(error = %err, "error while processing request");
        } else {
            tracing::debug!(error = %err, "request failed");
        }
        let status = err.status();
        let body = json!({
            "status": status,
            "return": err.client_message(debug),
        });
        serialize(self.0, status_of(status), &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_sets_negotiated_content_type() {
        let response = ReplyFormat(WireFormat::Yaml).ok(json!({"return": "Welcome"}));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/x-yaml"
        );
    }

    #[test]
    fn auth_failure_becomes_login_prompt() {
        let response = ReplyFormat(WireFormat::Json).error(&GatewayError::AuthRequired, false);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Session"
        );
    }

    #[test]
    fn not_acceptable_falls_back_to_default_format() {
        let response = default_error_response(&GatewayError::NotAcceptable);
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
