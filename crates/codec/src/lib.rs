//! The `Codec` port: JSON serialization is out of scope for the core (spec.md
//! §1), but the append engine's write-side integrity gate (spec.md §4.3 step
//! 2) depends on *some* codec that round-trips domain values. This crate
//! supplies the port plus a default JSON implementation.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Wire representation produced by a `Codec`. `serde_json::Value` matches
/// the `events.data JSON` column of the relational backend (spec.md §6).
pub type Wire = serde_json::Value;

/// Error returned when a value fails to encode or decode.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode value: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Serializes domain payloads to and from the storage-level wire
/// representation. Implementations must round-trip: `decode(encode(x)) = x`
/// for every payload (spec.md §8).
pub trait Codec: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Wire, CodecError>;
    fn decode<T: DeserializeOwned>(&self, wire: &Wire) -> Result<T, CodecError>;

    /// Write-side integrity gate used by the append engine (spec.md §4.3
    /// step 2): encode, then decode back into the same type, and fail if the
    /// round trip does not hold. Most implementations can accept the default.
    fn round_trips<T: Serialize + DeserializeOwned + PartialEq>(
        &self,
        value: &T,
    ) -> Result<bool, CodecError> {
        let wire = self.encode(value)?;
        let decoded: T = self.decode(&wire)?;
        Ok(&decoded == value)
    }
}

/// Default `Codec` backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Wire, CodecError> {
        serde_json::to_value(value).map_err(CodecError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, wire: &Wire) -> Result<T, CodecError> {
        serde_json::from_value(wire.clone()).map_err(CodecError::Decode)
    }
}
