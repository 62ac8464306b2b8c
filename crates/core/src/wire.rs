//! The wire-format registry: maps negotiated media types to encode/decode
//! functions for request and response payloads.
//!
//! Two formats are supported, in declared preference order: JSON first, then
//! YAML. The form-encoded and plain-text request paths are handled by the
//! body decoder in the HTTP crate; they never appear as response formats.

use serde_json::Value;

use crate::error::GatewayError;

/// A supported wire format for structured payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Json,
    Yaml,
}

/// Supported output formats in preference order. Be conservative in what you
/// send.
pub const OUT_FORMATS: [WireFormat; 2] = [WireFormat::Json, WireFormat::Yaml];

impl WireFormat {
    /// The canonical Content-Type value for this format.
    pub fn content_type(self) -> &'static str {
        match self {
            WireFormat::Json => "application/json",
            WireFormat::Yaml => "application/x-yaml",
        }
    }

    /// Look up a format by media type (parameters stripped by the caller).
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type {
            "application/json" => Some(WireFormat::Json),
            "application/x-yaml" | "text/yaml" => Some(WireFormat::Yaml),
            _ => None,
        }
    }

    pub fn encode(self, value: &Value) -> Result<String, GatewayError> {
        match self {
            WireFormat::Json => serde_json::to_string(value)
                .map_err(|e| GatewayError::Internal(format!("json encode: {e}"))),
            WireFormat::Yaml => serde_yaml::to_string(value)
                .map_err(|e| GatewayError::Internal(format!("yaml encode: {e}"))),
        }
    }

    pub fn decode(self, body: &[u8]) -> Result<Value, GatewayError> {
        match self {
            WireFormat::Json => serde_json::from_slice(body)
                .map_err(|_| GatewayError::Decode("Invalid JSON document".into())),
            WireFormat::Yaml => serde_yaml::from_slice(body)
                .map_err(|_| GatewayError::Decode("Invalid YAML document".into())),
        }
    }
}

/// One entry of a parsed Accept header.
#[derive(Debug, Clone, PartialEq)]
struct AcceptEntry {
    media_type: String,
    quality: f32,
    position: usize,
}

/// Parse an Accept header into entries ordered by quality, then by position.
fn parse_accept(header: &str) -> Vec<AcceptEntry> {
    let mut entries: Vec<AcceptEntry> = header
        .split(',')
        .enumerate()
        .filter_map(|(position, part)| {
            let mut pieces = part.trim().split(';');
            let media_type = pieces.next()?.trim().to_ascii_lowercase();
            if media_type.is_empty() {
                return None;
            }
            let mut quality = 1.0_f32;
            for param in pieces {
                let mut kv = param.splitn(2, '=');
                if kv.next().map(str::trim) == Some("q") {
                    if let Some(q) = kv.next().and_then(|v| v.trim().parse::<f32>().ok()) {
                        quality = q;
                    }
                }
            }
            Some(AcceptEntry {
                media_type,
                quality,
                position,
            })
        })
        .collect();

    entries.sort_by(|a, b| {
        b.quality
            .partial_cmp(&a.quality)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.position.cmp(&b.position))
    });
    entries
}

/// Pick the best supported response format for an Accept header.
///
/// A missing or empty header means the client takes anything, which yields
/// the preferred format (JSON). Wildcards select the first supported format
/// at their precedence level. No overlap is a [`GatewayError::NotAcceptable`].
pub fn negotiate(accept: Option<&str>) -> Result<WireFormat, GatewayError> {
    let header = match accept {
        None => return Ok(WireFormat::Json),
        Some(h) if h.trim().is_empty() => return Ok(WireFormat::Json),
        Some(h) => h,
    };

    for entry in parse_accept(header) {
        if entry.quality <= 0.0 {
            continue;
        }
        match entry.media_type.as_str() {
            "*/*" | "application/*" => return Ok(WireFormat::Json),
            "text/*" => return Ok(WireFormat::Yaml),
            other => {
                if let Some(format) = WireFormat::from_media_type(other) {
                    return Ok(format);
                }
            }
        }
    }

    Err(GatewayError::NotAcceptable)
}

/// Strip parameters from a Content-Type header value.
pub fn media_type_of(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}
