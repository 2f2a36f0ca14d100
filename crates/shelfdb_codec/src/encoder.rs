//! Canonical CBOR encoder.

use crate::error::{CodecError, CodecResult};
use crate::value::{Value, REF_COLLECTION_KEY, REF_PK_KEY};

/// Encode a value to canonical CBOR bytes.
///
/// Output is deterministic:
/// - Map keys are sorted by their encoded form (length-first, then bytewise)
/// - Integers use the shortest possible encoding
/// - Floats are always written as 64-bit
/// - No indefinite-length encoding
///
/// References are written as their stub maps.
///
/// # Errors
///
/// Returns [`CodecError::NaNForbidden`] if the value contains NaN.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// A canonical CBOR encoder.
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode a value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NaNForbidden`] if the value contains NaN.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => self.buffer.push(0xf6),
            Value::Bool(b) => self.buffer.push(if *b { 0xf5 } else { 0xf4 }),
            Value::Integer(n) => self.encode_integer(*n),
            Value::Float(f) => self.encode_float(*f)?,
            Value::Bytes(b) => self.encode_bytes(b),
            Value::Text(s) => self.encode_text(s),
            Value::Array(arr) => self.encode_array(arr)?,
            Value::Map(map) => self.encode_map(map.iter())?,
            Value::Ref { collection, pk } => {
                let collection = Value::Text(collection.clone());
                self.encode_map(
                    [
                        (&REF_COLLECTION_KEY.to_string(), &collection),
                        (&REF_PK_KEY.to_string(), pk.as_ref()),
                    ]
                    .into_iter(),
                )?;
            }
        }
        Ok(())
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[allow(clippy::cast_sign_loss)]
    fn encode_integer(&mut self, n: i64) {
        if n >= 0 {
            self.encode_unsigned(0, n as u64);
        } else {
            // major type 1 carries -(n+1), which fits u64 for every negative i64
            self.encode_unsigned(1, (-(n + 1)) as u64);
        }
    }

    fn encode_float(&mut self, f: f64) -> CodecResult<()> {
        if f.is_nan() {
            return Err(CodecError::NaNForbidden);
        }
        // -0.0 and 0.0 compare equal, so they must hash equal too
        let f = if f == 0.0 { 0.0 } else { f };
        self.buffer.push(0xfb);
        self.buffer.extend_from_slice(&f.to_be_bytes());
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_unsigned(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn encode_bytes(&mut self, bytes: &[u8]) {
        self.encode_unsigned(2, bytes.len() as u64);
        self.buffer.extend_from_slice(bytes);
    }

    fn encode_text(&mut self, text: &str) {
        self.encode_unsigned(3, text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
    }

    fn encode_array(&mut self, arr: &[Value]) -> CodecResult<()> {
        self.encode_unsigned(4, arr.len() as u64);
        for item in arr {
            self.encode(item)?;
        }
        Ok(())
    }

    fn encode_map<'a, I>(&mut self, pairs: I) -> CodecResult<()>
    where
        I: Iterator<Item = (&'a String, &'a Value)>,
    {
        let mut encoded_pairs: Vec<(Vec<u8>, &Value)> = pairs
            .map(|(key, value)| {
                let mut key_encoder = CanonicalEncoder::with_capacity(key.len() + 1);
                key_encoder.encode_text(key);
                (key_encoder.into_bytes(), value)
            })
            .collect();

        encoded_pairs.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(&b.0)));

        self.encode_unsigned(5, encoded_pairs.len() as u64);
        for (encoded_key, value) in encoded_pairs {
            self.buffer.extend_from_slice(&encoded_key);
            self.encode(value)?;
        }
        Ok(())
    }
}

impl Default for CanonicalEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn text_map(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn encode_simple_values() {
        assert_eq!(to_canonical_cbor(&Value::Null).unwrap(), vec![0xf6]);
        assert_eq!(to_canonical_cbor(&Value::Bool(false)).unwrap(), vec![0xf4]);
        assert_eq!(to_canonical_cbor(&Value::Bool(true)).unwrap(), vec![0xf5]);
    }

    #[test]
    fn encode_integers_shortest_form() {
        assert_eq!(to_canonical_cbor(&Value::Integer(0)).unwrap(), vec![0x00]);
        assert_eq!(to_canonical_cbor(&Value::Integer(23)).unwrap(), vec![0x17]);
        assert_eq!(
            to_canonical_cbor(&Value::Integer(24)).unwrap(),
            vec![0x18, 24]
        );
        assert_eq!(
            to_canonical_cbor(&Value::Integer(256)).unwrap(),
            vec![0x19, 0x01, 0x00]
        );
        assert_eq!(
            to_canonical_cbor(&Value::Integer(65536)).unwrap(),
            vec![0x1a, 0x00, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn encode_negative_integers() {
        assert_eq!(to_canonical_cbor(&Value::Integer(-1)).unwrap(), vec![0x20]);
        assert_eq!(to_canonical_cbor(&Value::Integer(-24)).unwrap(), vec![0x37]);
        assert_eq!(
            to_canonical_cbor(&Value::Integer(-25)).unwrap(),
            vec![0x38, 24]
        );
        let min = to_canonical_cbor(&Value::Integer(i64::MIN)).unwrap();
        assert_eq!(min[0], 0x3b);
        assert_eq!(&min[1..], &(i64::MAX as u64).to_be_bytes());
    }

    #[test]
    fn encode_float_as_64_bit() {
        let bytes = to_canonical_cbor(&Value::Float(1.5)).unwrap();
        assert_eq!(bytes[0], 0xfb);
        assert_eq!(&bytes[1..], &1.5f64.to_be_bytes());
    }

    #[test]
    fn encode_negative_zero_like_zero() {
        assert_eq!(
            to_canonical_cbor(&Value::Float(-0.0)).unwrap(),
            to_canonical_cbor(&Value::Float(0.0)).unwrap()
        );
    }

    #[test]
    fn encode_nan_rejected() {
        assert_eq!(
            to_canonical_cbor(&Value::Float(f64::NAN)),
            Err(CodecError::NaNForbidden)
        );
        let nested = Value::from(vec![Value::Float(f64::NAN)]);
        assert!(to_canonical_cbor(&nested).is_err());
    }

    #[test]
    fn encode_text_and_bytes() {
        assert_eq!(
            to_canonical_cbor(&Value::from("a")).unwrap(),
            vec![0x61, b'a']
        );
        assert_eq!(
            to_canonical_cbor(&Value::Bytes(vec![1, 2])).unwrap(),
            vec![0x42, 1, 2]
        );
    }

    #[test]
    fn encode_map_keys_length_first() {
        let map = text_map(&[
            ("bb", Value::Integer(2)),
            ("a", Value::Integer(1)),
            ("c", Value::Integer(3)),
        ]);
        let bytes = to_canonical_cbor(&map).unwrap();
        assert_eq!(
            bytes,
            vec![0xa3, 0x61, b'a', 0x01, 0x61, b'c', 0x03, 0x62, b'b', b'b', 0x02]
        );
    }

    #[test]
    fn encode_reference_as_stub() {
        let reference = Value::reference("person", 7);
        let bytes = to_canonical_cbor(&reference).unwrap();
        // "pk" (3 bytes encoded) sorts before "__collection__"
        assert_eq!(&bytes[..5], &[0xa2, 0x62, b'p', b'k', 0x07]);
        assert_eq!(bytes, to_canonical_cbor(&reference.to_wire()).unwrap());
    }

    mod properties {
        use super::*;
        use crate::decoder::from_cbor;
        use proptest::prelude::*;

        fn arb_value() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i64>().prop_map(Value::Integer),
                (-1e9f64..1e9).prop_map(Value::Float),
                "[a-z]{0,8}".prop_map(Value::Text),
                proptest::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
            ];
            leaf.prop_recursive(3, 24, 4, |inner| {
                prop_oneof![
                    proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                    proptest::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                        .prop_map(Value::Map),
                ]
            })
        }

        proptest! {
            #[test]
            fn canonical_bytes_decode_to_same_value(value in arb_value()) {
                let bytes = to_canonical_cbor(&value).unwrap();
                prop_assert_eq!(from_cbor(&bytes).unwrap(), value);
            }

            #[test]
            fn hash_key_is_stable_under_clone(value in arb_value()) {
                prop_assert_eq!(value.hash_key().unwrap(), value.clone().hash_key().unwrap());
            }
        }
    }
}
