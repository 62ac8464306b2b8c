//! The execution-engine collaborator.
//!
//! The gateway does not schedule or dispatch work itself; it hands each
//! command descriptor to an [`Engine`] and relays whatever comes back. An
//! engine may answer with a single structured value or with a lazy stream of
//! values produced as workers report in.
//!
//! [`LoopbackEngine`] is the in-process implementation used by the demo
//! binary and the test suite. It simulates a small fleet of workers and a
//! job registry; it is not a stand-in for a real controller.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde_json::{json, Map, Value};
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::lowstate::Descriptor;

/// A lazy sequence of result values.
pub type ResultStream = Pin<Box<dyn Stream<Item = Value> + Send>>;

/// What an engine call yields: one value, or a stream of values delivered in
/// arrival order.
pub enum EngineReturn {
    Single(Value),
    Stream(ResultStream),
}

impl std::fmt::Debug for EngineReturn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineReturn::Single(value) => f.debug_tuple("Single").field(value).finish(),
            EngineReturn::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid command descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("unknown client interface: {0}")]
    UnknownClient(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    /// A more specific HTTP status, when the failure implies one.
    pub fn status(&self) -> Option<u16> {
        match self {
            EngineError::InvalidDescriptor(_) | EngineError::UnknownClient(_) => Some(400),
            EngineError::Unavailable(_) => None,
        }
    }
}

/// The execution engine interface consumed by the gateway.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Dispatch one command descriptor.
    async fn run(&self, low: Descriptor) -> Result<EngineReturn, EngineError>;

    /// The client interfaces this engine understands, for the capability
    /// listing at the API root.
    fn clients(&self) -> Vec<String>;
}

/// A completed or in-flight job held by the loopback registry.
#[derive(Debug, Clone)]
struct JobRecord {
    info: Value,
    returns: Value,
}

/// In-process engine simulating a worker fleet.
pub struct LoopbackEngine {
    minions: Vec<String>,
    jobs: Mutex<HashMap<String, JobRecord>>,
}

impl LoopbackEngine {
    pub fn new(minions: Vec<String>) -> Self {
        LoopbackEngine {
            minions,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Five workers named `ms-0` through `ms-4`.
    pub fn with_default_fleet() -> Self {
        Self::new((0..5).map(|n| format!("ms-{n}")).collect())
    }

    fn match_target(&self, tgt: &str) -> Vec<String> {
        if tgt == "*" {
            self.minions.clone()
        } else {
            self.minions.iter().filter(|m| *m == tgt).cloned().collect()
        }
    }

    fn apply_fun(minion: &str, fun: &str, arg: &Value) -> Value {
        match fun {
            "test.ping" => json!(true),
            "grains.items" => json!({"id": minion, "os": "Linux", "kernel": "Linux"}),
            "status.diskusage" => json!({"/": {"available": 524288, "total": 1048576}}),
            _ => json!({"fun": fun, "arg": arg}),
        }
    }

    fn new_jid() -> String {
        let fmt = format_description!(
            "[year][month][day][hour][minute][second][subsecond digits:6]"
        );
        OffsetDateTime::now_utc()
            .format(&fmt)
            .unwrap_or_else(|_| "0".repeat(20))
    }

    async fn run_local(&self, low: &Descriptor) -> Result<(String, Value, Value), EngineError> {
        let fun = low
            .fun()
            .ok_or_else(|| EngineError::InvalidDescriptor("missing 'fun'".into()))?
            .to_string();
        let tgt = low.get_str("tgt").unwrap_or("*").to_string();
        let arg = low.get("arg").cloned().unwrap_or(Value::Array(vec![]));

        let matched = self.match_target(&tgt);
        let mut returns = Map::new();
        for minion in &matched {
            returns.insert(minion.clone(), Self::apply_fun(minion, &fun, &arg));
        }

        let jid = Self::new_jid();
        let info = json!({
            "jid": jid,
            "Function": fun,
            "Arguments": arg,
            "Target": tgt,
            "Target-type": "glob",
            "Minions": matched,
        });
        let returns = Value::Object(returns);
        self.jobs.lock().await.insert(
            jid.clone(),
            JobRecord {
                info: info.clone(),
                returns: returns.clone(),
            },
        );
        Ok((jid, info, returns))
    }
}

#[async_trait]
impl Engine for LoopbackEngine {
    async fn run(&self, low: Descriptor) -> Result<EngineReturn, EngineError> {
        let client = low
            .client()
            .ok_or_else(|| EngineError::InvalidDescriptor("missing 'client'".into()))?
            .to_string();

        match client.as_str() {
            "local" => {
                let (_, _, returns) = self.run_local(&low).await?;
                Ok(EngineReturn::Single(returns))
            }
            // Like "local" but results trickle in one worker at a time.
            "local_batch" => {
                let (_, _, returns) = self.run_local(&low).await?;
                let chunks: Vec<Value> = match returns {
                    Value::Object(map) => map
                        .into_iter()
                        .map(|(minion, ret)| json!({ minion: ret }))
                        .collect(),
                    other => vec![other],
                };
                Ok(EngineReturn::Stream(Box::pin(stream::iter(chunks))))
            }
            "local_async" => {
                let (jid, info, _) = self.run_local(&low).await?;
                let minions = info.get("Minions").cloned().unwrap_or(Value::Null);
                Ok(EngineReturn::Single(json!({
                    "jid": jid,
                    "minions": minions,
                })))
            }
            "runner" => {
                let fun = low
                    .fun()
                    .ok_or_else(|| EngineError::InvalidDescriptor("missing 'fun'".into()))?;
                let jobs = self.jobs.lock().await;
                match fun {
                    "jobs.lookup_jid" => {
                        let ret = low
                            .jid()
                            .and_then(|jid| jobs.get(jid))
                            .map(|job| job.returns.clone())
                            .unwrap_or_else(|| json!({}));
                        Ok(EngineReturn::Single(ret))
                    }
                    "jobs.list_job" => {
                        let ret = low
                            .jid()
                            .and_then(|jid| jobs.get(jid))
                            .map(|job| job.info.clone())
                            .unwrap_or_else(|| json!({}));
                        Ok(EngineReturn::Single(ret))
                    }
                    "jobs.list_jobs" => {
                        let listing: Map<String, Value> = jobs
                            .iter()
                            .map(|(jid, job)| (jid.clone(), job.info.clone()))
                            .collect();
                        Ok(EngineReturn::Single(Value::Object(listing)))
                    }
                    other => Err(EngineError::InvalidDescriptor(format!(
                        "unknown runner function: {other}"
                    ))),
                }
            }
            other => Err(EngineError::UnknownClient(other.to_string())),
        }
    }

    fn clients(&self) -> Vec<String> {
        ["local", "local_async", "local_batch", "runner"]
            .into_iter()
            .map(String::from)
            .collect()
    }
}
