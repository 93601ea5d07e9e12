//! Stock [`NativeBridge`] implementations.

use std::io::Write;

use weft_core::{BridgeError, CommitBatch, Effect, NativeBridge};

use crate::protocol::encode_batch;

/// Records every applied batch; the standard bridge for tests and for
/// inspecting what a host would receive.
#[derive(Default, Debug)]
pub struct RecordingBridge {
    batches: Vec<CommitBatch>,
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> &[CommitBatch] {
        &self.batches
    }

    pub fn take_batches(&mut self) -> Vec<CommitBatch> {
        std::mem::take(&mut self.batches)
    }

    /// All recorded effects, flattened in application order.
    pub fn effects(&self) -> Vec<Effect> {
        self.batches
            .iter()
            .flat_map(|batch| batch.effects.iter().cloned())
            .collect()
    }
}

impl NativeBridge for RecordingBridge {
    fn apply(&mut self, batch: &CommitBatch) -> Result<(), BridgeError> {
        self.batches.push(batch.clone());
        Ok(())
    }
}

/// Discards every batch. Useful for headless runs and benchmarks.
#[derive(Default, Debug, Clone, Copy)]
pub struct NullBridge;

impl NativeBridge for NullBridge {
    fn apply(&mut self, _batch: &CommitBatch) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// Encodes each batch as one JSON line, feeding a transport that carries
/// the stream to the platform renderer.
#[derive(Debug)]
pub struct JsonLinesBridge<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesBridge<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> NativeBridge for JsonLinesBridge<W> {
    fn apply(&mut self, batch: &CommitBatch) -> Result<(), BridgeError> {
        let wire = encode_batch(batch);
        let line = serde_json::to_string(&wire)
            .map_err(|err| BridgeError::new(0, None, err.to_string()))?;
        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .map_err(|err| BridgeError::new(0, None, err.to_string()))?;
        Ok(())
    }
}
