//! Tool payload and result codecs.
//!
//! Codecs produce canonical JSON bytes: the boundary type between the
//! planner, the transcript, and the activity layer. Typed values live on
//! either side; canonical bytes cross the seams, so identical payloads have
//! identical encodings and transcript idempotency checks are byte compares.

use std::sync::Arc;

use axon_types::CodecError;

/// A bidirectional JSON codec.
///
/// The law `decode(encode(v)) == v` must hold for every value the owning
/// tool accepts; the runtime's round-trip tests enforce it per registration.
pub trait ToolCodec: Send + Sync {
    /// Encode a value to canonical bytes.
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, CodecError>;
    /// Decode canonical bytes back to a value.
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, CodecError>;
}

/// The default codec: canonical `serde_json` encoding.
///
/// `serde_json` maps are ordered by key, so encoding is canonical without
/// extra normalization.
pub struct JsonCodec;

impl ToolCodec for JsonCodec {
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// A shared default codec instance.
pub fn json_codec() -> Arc<dyn ToolCodec> {
    Arc::new(JsonCodec)
}
