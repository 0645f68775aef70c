// SPDX-License-Identifier: Apache-2.0

//! Boundary between a logfile input and the pipeline that consumes it.
//!
//! The input fills reusable [`PipelinePack`]s drawn from its runner's
//! [`PackPool`], runs the configured [`Decoder`]s over them and hands the
//! result to [`InputRunner::inject`]. Packs that fail to decode go straight
//! back to the pool.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tower::BoxError;
use uuid::Uuid;

use crate::bounded_channel::{BoundedReceiver, BoundedSender, bounded};
use crate::logfile::diagnostics::DiagnosticSink;
use crate::logfile::error::{Error, Result};

/// Message type stamped on every line read from a file
pub const MESSAGE_TYPE: &str = "logfile";

/// Envelope version stamped on generated messages
pub const ENV_VERSION: &str = "0.8";

/// A pipeline message built from one log line
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Message {
    pub uuid: Uuid,
    /// Nanoseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub message_type: String,
    pub logger: String,
    pub severity: i32,
    pub env_version: String,
    pub pid: i32,
    pub payload: String,
    pub hostname: String,
    /// Structured fields added by decoders
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

/// Reusable container for a message travelling through the pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelinePack {
    pub message: Message,
}

impl PipelinePack {
    /// Clear the pack for reuse
    pub fn reset(&mut self) {
        self.message = Message::default();
    }
}

/// Fixed-size supply of packs. Taking a pack waits until one is recycled,
/// which throttles inputs to the pace of the pipeline.
pub struct PackPool {
    tx: BoundedSender<PipelinePack>,
    rx: BoundedReceiver<PipelinePack>,
    size: usize,
}

impl PackPool {
    pub fn new(size: usize) -> Self {
        let (tx, rx) = bounded(size);
        for _ in 0..size {
            // Capacity matches the number of packs, so this never waits.
            let _ = tx.send_blocking(PipelinePack::default());
        }
        Self { tx, rx, size }
    }

    /// Take a pack, waiting until one is available
    pub async fn get(&self) -> Option<PipelinePack> {
        self.rx.recv().await
    }

    /// Return a pack to the pool
    pub fn recycle(&self, mut pack: PipelinePack) {
        pack.reset();
        let _ = self.tx.send_blocking(pack);
    }

    /// Number of packs currently waiting in the pool
    pub fn available(&self) -> usize {
        self.rx.len()
    }
}

impl fmt::Debug for PackPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackPool")
            .field("size", &self.size)
            .field("available", &self.available())
            .finish()
    }
}

/// Turns a raw line into a structured message
pub trait Decoder: Send + Sync {
    fn decode(&self, pack: &mut PipelinePack) -> std::result::Result<(), BoxError>;
}

/// Parses the payload as a JSON object and copies its members into
/// `fields`. A string `"message"` member replaces the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, pack: &mut PipelinePack) -> std::result::Result<(), BoxError> {
        let value: Value = serde_json::from_str(pack.message.payload.trim_end())?;
        let Value::Object(mut obj) = value else {
            return Err("payload is not a JSON object".into());
        };

        if let Some(Value::String(msg)) = obj.remove("message") {
            pack.message.payload = msg;
        }
        pack.message.fields.extend(obj);
        Ok(())
    }
}

/// Named decoders available to inputs
#[derive(Clone, Default)]
pub struct DecoderSet {
    decoders: HashMap<String, Arc<dyn Decoder>>,
}

impl DecoderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding the decoders that ship with this crate
    pub fn with_builtin() -> Self {
        let mut set = Self::new();
        set.register("json", JsonDecoder);
        set
    }

    pub fn register(&mut self, name: impl Into<String>, decoder: impl Decoder + 'static) {
        self.decoders.insert(name.into(), Arc::new(decoder));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Decoder>> {
        self.decoders.get(name).cloned()
    }

    /// Look up every name in order; the first unknown name is an error
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<dyn Decoder>>> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .ok_or_else(|| Error::DecoderNotFound(name.clone()))
            })
            .collect()
    }
}

impl fmt::Debug for DecoderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("DecoderSet").field("decoders", &names).finish()
    }
}

/// What an input needs from the pipeline hosting it
pub trait InputRunner: DiagnosticSink {
    fn name(&self) -> &str;

    /// Supply of packs for this input
    fn packs(&self) -> &PackPool;

    /// Hand a filled pack to the pipeline
    fn inject(&self, pack: PipelinePack) -> std::result::Result<(), BoxError>;

    /// Return an unused pack
    fn recycle(&self, pack: PipelinePack) {
        self.packs().recycle(pack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pack_pool_recycles() {
        let pool = PackPool::new(2);
        assert_eq!(pool.available(), 2);

        let mut pack = pool.get().await.unwrap();
        pack.message.payload = "used".to_string();
        assert_eq!(pool.available(), 1);

        pool.recycle(pack);
        assert_eq!(pool.available(), 2);

        let pack = pool.get().await.unwrap();
        assert!(pack.message.payload.is_empty());
    }

    #[test]
    fn test_resolve_in_order() {
        let set = DecoderSet::with_builtin();
        assert_eq!(set.resolve(&["json".to_string()]).unwrap().len(), 1);
        assert!(set.resolve(&[]).unwrap().is_empty());

        let err = set
            .resolve(&["json".to_string(), "nginx".to_string()])
            .err()
            .unwrap();
        assert!(matches!(err, Error::DecoderNotFound(name) if name == "nginx"));
    }

    #[test]
    fn test_json_decoder() {
        let mut pack = PipelinePack::default();
        pack.message.payload = "{\"message\":\"hello\",\"status\":200}\n".to_string();

        JsonDecoder.decode(&mut pack).unwrap();
        assert_eq!(pack.message.payload, "hello");
        assert_eq!(pack.message.fields.get("status"), Some(&Value::from(200)));

        let mut pack = PipelinePack::default();
        pack.message.payload = "plain text\n".to_string();
        assert!(JsonDecoder.decode(&mut pack).is_err());

        pack.message.payload = "[1, 2]".to_string();
        assert!(JsonDecoder.decode(&mut pack).is_err());
    }

    #[test]
    fn test_message_serializes_type_field() {
        let message = Message {
            message_type: MESSAGE_TYPE.to_string(),
            payload: "line\n".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "logfile");
        assert_eq!(value["payload"], "line\n");
        assert!(value.get("fields").is_none());
    }
}
