//! Pluggable document serializers.

use crate::decoder::from_cbor;
use crate::encoder::to_canonical_cbor;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Converts attribute values to bytes and back.
///
/// Implementations must round-trip every value they accept, including
/// references, which travel as stub maps and come back as [`Value::Ref`].
pub trait Serializer: Send + Sync {
    /// Serializes a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented in this format.
    fn serialize(&self, value: &Value) -> CodecResult<Vec<u8>>;

    /// Deserializes bytes produced by [`Serializer::serialize`].
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are malformed.
    fn deserialize(&self, bytes: &[u8]) -> CodecResult<Value>;

    /// Short format name, as stored in configuration.
    fn name(&self) -> &'static str;
}

/// JSON serializer backed by `serde_json`.
///
/// Byte strings are written as arrays of integers and read back as
/// sequences. Infinite floats are rejected; use [`CborSerializer`] to
/// store them.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> CodecResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CodecError::encoding_failed(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> CodecResult<Value> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Canonical CBOR serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborSerializer;

impl Serializer for CborSerializer {
    fn serialize(&self, value: &Value) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(value)
    }

    fn deserialize(&self, bytes: &[u8]) -> CodecResult<Value> {
        from_cbor(bytes)
    }

    fn name(&self) -> &'static str {
        "cbor"
    }
}

/// Serializer selection, as persisted in database configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    /// [`JsonSerializer`].
    #[default]
    Json,
    /// [`CborSerializer`].
    Cbor,
}

impl SerializerKind {
    /// Instantiates the selected serializer.
    #[must_use]
    pub fn build(self) -> Box<dyn Serializer> {
        match self {
            SerializerKind::Json => Box::new(JsonSerializer),
            SerializerKind::Cbor => Box::new(CborSerializer),
        }
    }
}
