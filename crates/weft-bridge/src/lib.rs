//! Bridge protocol encoding and native-bridge adapters for Weft.
//!
//! The core emits ordered [`weft_core::CommitBatch`]es; this crate turns
//! them into the serialized wire form consumed by platform renderers and
//! provides the stock [`weft_core::NativeBridge`] implementations hosts and
//! tests plug in.

pub mod bridges;
pub mod protocol;

pub use bridges::{JsonLinesBridge, NullBridge, RecordingBridge};
pub use protocol::{encode_batch, encode_effect, WireBatch, WireEffect, WireOp};
