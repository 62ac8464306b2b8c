//! Request body decoding.
//!
//! [`Decoded`] inspects the declared Content-Type and produces the canonical
//! in-memory payload. Structured formats (JSON, YAML) decode as-is; the
//! form-encoded fallback builds exactly one descriptor and wraps it in a
//! one-element batch; plain text attempts a JSON parse and otherwise passes
//! the raw string through. A request with an empty body skips decoding
//! entirely and is not an error.

use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use axum::http::header;
use axum::response::Response;
use serde_json::{Map, Value};

use drover_core::error::GatewayError;
use drover_core::lowstate::Descriptor;
use drover_core::wire::{self, WireFormat};

use super::negotiate::{default_error_response, ReplyFormat};

/// The decoded request payload.
#[derive(Debug, Clone)]
pub struct Decoded {
    /// `None` when the request carried no body.
    pub value: Option<Value>,
    /// True when the form-encoded path wrapped a single descriptor; the
    /// webhook resource unwraps it to recover the posted fields.
    pub wrapped: bool,
}

impl Decoded {
    pub fn empty() -> Self {
        Decoded {
            value: None,
            wrapped: false,
        }
    }
}

/// Fold form key/value pairs into a mapping, collecting repeated keys into
/// arrays (`arg=one&arg=two`).
fn form_to_map(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            None => {
                map.insert(key, Value::String(value));
            }
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
        }
    }
    map
}

fn decode_body(content_type: Option<&str>, bytes: &Bytes) -> Result<Decoded, GatewayError> {
    if bytes.is_empty() {
        return Ok(Decoded::empty());
    }

    let media_type = match content_type {
        Some(ct) => wire::media_type_of(ct),
        None => {
            return Err(GatewayError::UnsupportedMediaType(
                "missing Content-Type".into(),
            ))
        }
    };

    match media_type.as_str() {
        "application/json" => Ok(Decoded {
            value: Some(WireFormat::Json.decode(bytes)?),
            wrapped: false,
        }),
        "application/x-yaml" | "text/yaml" => Ok(Decoded {
            value: Some(WireFormat::Yaml.decode(bytes)?),
            wrapped: false,
        }),
        "application/x-www-form-urlencoded" => {
            let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(bytes)
                .map_err(|_| GatewayError::Decode("Invalid form-encoded body".into()))?;
            let mut descriptor = Descriptor(form_to_map(pairs));
            descriptor.normalize_arg();
            Ok(Decoded {
                value: Some(Value::Array(vec![descriptor.into_value()])),
                wrapped: true,
            })
        }
        // Some services still send JSON as text/plain. Take the parse if it
        // works, otherwise pass the raw text through untouched.
        "text/plain" => {
            let value = serde_json::from_slice(bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()));
            Ok(Decoded {
                value: Some(value),
                wrapped: false,
            })
        }
        other => Err(GatewayError::UnsupportedMediaType(other.to_string())),
    }
}

impl<S: Send + Sync> FromRequest<S> for Decoded {
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let accept = req
            .headers()
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let render = move |err: &GatewayError| match wire::negotiate(accept.as_deref()) {
            Ok(format) => ReplyFormat(format).bare_error(err, false),
            Err(_) => default_error_response(err),
        };

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| render(&GatewayError::Decode(format!("failed to read body: {e}"))))?;

        decode_body(content_type.as_deref(), &bytes).map_err(|err| render(&err))
    }
}
