//! # shelfdb Codec
//!
//! Attribute values and pluggable serializers for shelfdb.
//!
//! Documents are schemaless attribute trees represented by [`Value`].
//! A [`Serializer`] turns a value into the bytes kept in a blob store and
//! back. Two interchangeable formats are provided:
//!
//! - [`JsonSerializer`] - human-readable, via `serde_json`
//! - [`CborSerializer`] - deterministic canonical CBOR
//!
//! Canonical CBOR doubles as the hashable form of a value
//! ([`Value::hash_key`]): equal values always produce identical bytes,
//! with map entries sorted, so it is used as the posting-list key of
//! secondary indexes.
//!
//! ## Canonical CBOR Rules
//!
//! - Map keys are text, sorted length-first then bytewise
//! - Integers use shortest encoding
//! - Floats are always 64-bit; NaN is rejected
//! - No indefinite-length items
//!
//! ## Usage
//!
//! ```
//! use shelfdb_codec::{JsonSerializer, Serializer, Value};
//!
//! let doc = Value::map([("name", Value::from("Al Pacino")), ("year", Value::from(1940))]);
//! let bytes = JsonSerializer.serialize(&doc).unwrap();
//! assert_eq!(JsonSerializer.deserialize(&bytes).unwrap(), doc);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod serde_impl;
mod serializer;
mod value;

pub use decoder::{from_cbor, CanonicalDecoder, MAX_NESTING_DEPTH};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use serializer::{CborSerializer, JsonSerializer, Serializer, SerializerKind};
pub use value::{Value, REF_COLLECTION_KEY, REF_PK_KEY};
