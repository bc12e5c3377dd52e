//! CBOR helpers on top of cbor4ii
//!
//! CTAP2 request and response maps use small integer keys and must be
//! emitted in canonical order (RFC 7049 section 3.9): integer keys sorted by
//! their encoding, so every non-negative key precedes every negative one; text
//! keys sorted shorter first, then bytewise. [`MapBuilder`] and
//! [`TextMapBuilder`] take care of that ordering.

use crate::status::{Result, StatusCode};

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use core::cmp::Ordering;
use serde::{Deserialize, Serialize};

pub type Value = cbor4ii::core::Value;

/// Encode any serde value to CBOR bytes
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    cbor4ii::serde::to_vec(Vec::new(), value).map_err(|_| StatusCode::InvalidCbor)
}

/// Decode CBOR bytes into a serde value
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T> {
    cbor4ii::serde::from_slice(data).map_err(|_| StatusCode::InvalidCbor)
}

/// Convert a serde value to a dynamic CBOR value
pub fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    let bytes = encode(value)?;
    decode(&bytes)
}

/// Convert a dynamic CBOR value into a typed one
pub fn from_value<T: for<'de> Deserialize<'de>>(value: &Value) -> Result<T> {
    let bytes = encode(value)?;
    cbor4ii::serde::from_slice(&bytes).map_err(|_| StatusCode::CborUnexpectedType)
}

fn canonical_int_cmp(a: i64, b: i64) -> Ordering {
    match (a >= 0, b >= 0) {
        (true, true) => a.cmp(&b),
        // -1 encodes as 0x20, -2 as 0x21, ...
        (false, false) => b.cmp(&a),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
    }
}

fn canonical_text_cmp(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.as_bytes().cmp(b.as_bytes()))
}

/// Builder for integer-keyed CBOR maps
#[derive(Debug, Default)]
pub struct MapBuilder {
    entries: Vec<(i64, Value)>,
}

impl MapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Serialize>(self, key: i64, value: T) -> Result<Self> {
        let value = to_value(&value)?;
        Ok(self.insert_value(key, value))
    }

    pub fn insert_opt<T: Serialize>(self, key: i64, value: Option<T>) -> Result<Self> {
        match value {
            Some(v) => self.insert(key, v),
            None => Ok(self),
        }
    }

    /// Insert a CBOR byte string
    pub fn insert_bytes(self, key: i64, bytes: &[u8]) -> Self {
        self.insert_value(key, Value::Bytes(bytes.to_vec()))
    }

    pub fn insert_value(mut self, key: i64, value: Value) -> Self {
        self.entries.retain(|(k, _)| *k != key);
        self.entries.push((key, value));
        self
    }

    /// Build a dynamic map value with canonically ordered keys
    pub fn build_value(mut self) -> Value {
        self.entries.sort_by(|(a, _), (b, _)| canonical_int_cmp(*a, *b));
        Value::Map(
            self.entries
                .into_iter()
                .map(|(k, v)| (Value::Integer(i128::from(k)), v))
                .collect(),
        )
    }

    /// Build and encode the map
    pub fn build(self) -> Result<Vec<u8>> {
        encode(&self.build_value())
    }
}

/// Builder for text-keyed CBOR maps (`attStmt`, extension outputs, entities)
#[derive(Debug, Default)]
pub struct TextMapBuilder {
    entries: Vec<(String, Value)>,
}

impl TextMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_value(mut self, key: &str, value: Value) -> Self {
        self.entries.retain(|(k, _)| k != key);
        self.entries.push((String::from(key), value));
        self
    }

    pub fn insert_text(self, key: &str, text: &str) -> Self {
        self.insert_value(key, Value::Text(String::from(text)))
    }

    pub fn insert_bytes(self, key: &str, bytes: &[u8]) -> Self {
        self.insert_value(key, Value::Bytes(bytes.to_vec()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build_value(mut self) -> Value {
        self.entries.sort_by(|(a, _), (b, _)| canonical_text_cmp(a, b));
        Value::Map(
            self.entries
                .into_iter()
                .map(|(k, v)| (Value::Text(k), v))
                .collect(),
        )
    }

    pub fn build(self) -> Result<Vec<u8>> {
        encode(&self.build_value())
    }
}

/// Parsed integer-keyed request map
#[derive(Debug)]
pub struct MapParser {
    map: BTreeMap<i64, Value>,
}

impl MapParser {
    /// Parse a request body; anything but a map with integer keys is rejected
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let value: Value = decode(data)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Map(entries) = value else {
            return Err(StatusCode::CborUnexpectedType);
        };
        let mut map = BTreeMap::new();
        for (k, v) in entries {
            let Value::Integer(k) = k else {
                return Err(StatusCode::CborUnexpectedType);
            };
            let k = i64::try_from(k).map_err(|_| StatusCode::CborUnexpectedType)?;
            map.insert(k, v);
        }
        Ok(Self { map })
    }

    pub fn contains_key(&self, key: i64) -> bool {
        self.map.contains_key(&key)
    }

    pub fn get_raw(&self, key: i64) -> Option<&Value> {
        self.map.get(&key)
    }

    /// Required typed value
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: i64) -> Result<T> {
        let value = self.map.get(&key).ok_or(StatusCode::MissingParameter)?;
        from_value(value)
    }

    pub fn get_opt<T: for<'de> Deserialize<'de>>(&self, key: i64) -> Result<Option<T>> {
        self.map.get(&key).map(from_value).transpose()
    }

    /// Required byte string
    pub fn get_bytes(&self, key: i64) -> Result<Vec<u8>> {
        match self.map.get(&key) {
            Some(Value::Bytes(b)) => Ok(b.clone()),
            Some(_) => Err(StatusCode::CborUnexpectedType),
            None => Err(StatusCode::MissingParameter),
        }
    }

    pub fn get_bytes_opt(&self, key: i64) -> Result<Option<Vec<u8>>> {
        match self.map.get(&key) {
            Some(Value::Bytes(b)) => Ok(Some(b.clone())),
            Some(_) => Err(StatusCode::CborUnexpectedType),
            None => Ok(None),
        }
    }

    pub fn get_int_opt(&self, key: i64) -> Result<Option<i64>> {
        match self.map.get(&key) {
            Some(Value::Integer(i)) => i64::try_from(*i)
                .map(Some)
                .map_err(|_| StatusCode::CborUnexpectedType),
            Some(_) => Err(StatusCode::CborUnexpectedType),
            None => Ok(None),
        }
    }
}

/// Look up a text key in a dynamic map value
pub fn text_map_get<'a>(map: &'a Value, key: &str) -> Option<&'a Value> {
    match map {
        Value::Map(entries) => entries.iter().find_map(|(k, v)| match k {
            Value::Text(t) if t == key => Some(v),
            _ => None,
        }),
        _ => None,
    }
}

/// Look up an integer key in a dynamic map value
pub fn int_map_get(map: &Value, key: i64) -> Option<&Value> {
    match map {
        Value::Map(entries) => entries.iter().find_map(|(k, v)| match k {
            Value::Integer(i) if *i == i128::from(key) => Some(v),
            _ => None,
        }),
        _ => None,
    }
}

/// Build a COSE_Key map for an EC2 P-256 public key
pub fn cose_ec2_key(alg: i64, x: &[u8; 32], y: &[u8; 32]) -> Value {
    MapBuilder::new()
        .insert_value(1, Value::Integer(2))
        .insert_value(3, Value::Integer(i128::from(alg)))
        .insert_value(-1, Value::Integer(1))
        .insert_bytes(-2, x)
        .insert_bytes(-3, y)
        .build_value()
}

/// Extract `(x, y)` from a COSE EC2 P-256 key map
pub fn parse_cose_ec2_key(value: &Value) -> Result<([u8; 32], [u8; 32])> {
    let coord = |key: i64| -> Result<[u8; 32]> {
        match int_map_get(value, key) {
            Some(Value::Bytes(b)) if b.len() == 32 => {
                let mut out = [0u8; 32];
                out.copy_from_slice(b);
                Ok(out)
            }
            Some(_) => Err(StatusCode::InvalidParameter),
            None => Err(StatusCode::MissingParameter),
        }
    };
    match int_map_get(value, 1) {
        Some(Value::Integer(2)) => {}
        Some(_) => return Err(StatusCode::InvalidParameter),
        None => return Err(StatusCode::MissingParameter),
    }
    Ok((coord(-2)?, coord(-3)?))
}
