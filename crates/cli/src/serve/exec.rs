//! The lowstate batch executor.
//!
//! Descriptors run strictly in submission order, one engine call at a time;
//! a descriptor whose engine answer is a stream delays later descriptors
//! until the stream drains. Partial failure preserves the results produced
//! so far and appends a structured error in the failing descriptor's slot;
//! the rest of the batch is not executed.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};

use drover_core::engine::{Engine, EngineError, EngineReturn};
use drover_core::error::GatewayError;
use drover_core::lowstate::batch_from_value;

/// The outcome of a batch run. `error` is set when a descriptor failed; its
/// structured form is already appended to `results`.
#[derive(Debug)]
pub struct ExecOutcome {
    pub results: Vec<Value>,
    pub error: Option<EngineError>,
}

impl ExecOutcome {
    /// The HTTP status the enclosing response should carry.
    pub fn status(&self) -> u16 {
        match &self.error {
            None => 200,
            Some(err) => err.status().unwrap_or(500),
        }
    }
}

/// Execute a lowstate batch.
///
/// `fixed_client` pins every descriptor's execution mode (the asynchronous
/// submission path); `token` is injected into each descriptor so the engine
/// can authorize it. The caller must have released any session lock before
/// calling this.
pub async fn execute(
    engine: &Arc<dyn Engine>,
    raw: Value,
    fixed_client: Option<&str>,
    token: Option<&str>,
) -> Result<ExecOutcome, GatewayError> {
    let batch = batch_from_value(raw)?;

    let mut results = Vec::with_capacity(batch.len());
    for mut chunk in batch {
        if let Some(token) = token {
            chunk.set("token", Value::String(token.to_string()));
        }
        if let Some(client) = fixed_client {
            chunk.set("client", Value::String(client.to_string()));
        }
        chunk.normalize_arg();

        match engine.run(chunk).await {
            Ok(EngineReturn::Single(value)) => results.push(value),
            Ok(EngineReturn::Stream(mut stream)) => {
                while let Some(value) = stream.next().await {
                    results.push(value);
                }
            }
            Err(err) => {
                results.push(json!({
                    "error": {
                        "message": err.to_string(),
                        "status": err.status().unwrap_or(500),
                    }
                }));
                return Ok(ExecOutcome {
                    results,
                    error: Some(err),
                });
            }
        }
    }

    Ok(ExecOutcome {
        results,
        error: None,
    })
}
