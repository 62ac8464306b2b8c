//! The lowstate data model: command descriptors and batches.
//!
//! A descriptor is an ordered mapping of string keys to values. The gateway
//! only interprets a handful of semantic fields (`client`, `fun`, `tgt`,
//! `arg`, `token`, `jid`); everything else passes through to the engine
//! untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GatewayError;

/// A single command descriptor (one "lowstate chunk").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(pub Map<String, Value>);

impl Descriptor {
    pub fn new() -> Self {
        Descriptor(Map::new())
    }

    /// Build a descriptor from field pairs. Values are converted with
    /// `serde_json::json!`-compatible inputs.
    pub fn from_pairs<I, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, V)>,
        V: Into<Value>,
    {
        let mut map = Map::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.into());
        }
        Descriptor(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    /// Set `key` only if the descriptor does not already carry it.
    pub fn set_default(&mut self, key: &str, value: Value) {
        self.0.entry(key.to_string()).or_insert(value);
    }

    pub fn client(&self) -> Option<&str> {
        self.get_str("client")
    }

    pub fn fun(&self) -> Option<&str> {
        self.get_str("fun")
    }

    pub fn jid(&self) -> Option<&str> {
        self.get_str("jid")
    }

    /// Coerce a scalar `arg` into a one-element sequence. A missing `arg` or
    /// an `arg` that is already a sequence is left alone. This papers over a
    /// deficiency of the form-encoded wire format, but is applied uniformly
    /// so every descriptor handed to the engine has a normalized shape.
    pub fn normalize_arg(&mut self) {
        if let Some(arg) = self.0.get_mut("arg") {
            if !arg.is_array() {
                let scalar = arg.take();
                *arg = Value::Array(vec![scalar]);
            }
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl Default for Descriptor {
    fn default() -> Self {
        Self::new()
    }
}

/// An ordered batch of command descriptors.
pub type Batch = Vec<Descriptor>;

/// Validate a decoded request payload as a lowstate batch.
///
/// The protocol requires a sequence of mappings. A lone object is rejected
/// rather than silently wrapped; only the form-encoded decode path wraps, and
/// it does so before this check runs.
pub fn batch_from_value(value: Value) -> Result<Batch, GatewayError> {
    let items = match value {
        Value::Array(items) => items,
        _ => return Err(GatewayError::BadRequest("lowstate must be a list".into())),
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(Descriptor(map)),
            other => Err(GatewayError::BadRequest(format!(
                "lowstate entries must be mappings, got: {other}"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_arg_becomes_one_element_list() {
        let mut desc = Descriptor::from_pairs([("fun", "test.echo"), ("arg", "hello")]);
        desc.normalize_arg();
        assert_eq!(desc.get("arg"), Some(&json!(["hello"])));
    }

    #[test]
    fn sequence_arg_is_preserved() {
        let mut desc = Descriptor::new();
        desc.set("arg", json!(["one=1", "two=2"]));
        desc.normalize_arg();
        assert_eq!(desc.get("arg"), Some(&json!(["one=1", "two=2"])));
    }

    #[test]
    fn missing_arg_stays_missing() {
        let mut desc = Descriptor::from_pairs([("fun", "test.ping")]);
        desc.normalize_arg();
        assert!(desc.get("arg").is_none());
    }

    #[test]
    fn batch_requires_a_list() {
        let err = batch_from_value(json!({"fun": "test.ping"})).unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[test]
    fn batch_entries_must_be_mappings() {
        let err = batch_from_value(json!(["test.ping"])).unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[test]
    fn batch_preserves_order_and_fields() {
        let batch = batch_from_value(json!([
            {"client": "local", "fun": "test.ping", "tgt": "*"},
            {"client": "runner", "fun": "jobs.list_jobs"},
        ]))
        .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].fun(), Some("test.ping"));
        assert_eq!(batch[1].client(), Some("runner"));
    }
}
