//! Value encoding for persisted entries
//!
//! Every attached computation declares one [`ValueKind`]. The kind is not
//! stored next to the bytes, so decoding needs the same kind that encoded.

use crate::error::{MemoError, Result};
use crate::memo::types::{Tensor, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of result kinds a computation can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// `Value::Int`, 8 bytes little-endian
    Integer,
    /// `Value::Float`, IEEE-754 bits little-endian
    Float,
    /// `Value::Text`, UTF-8
    Text,
    /// `Value::Bytes`, stored verbatim
    Bytes,
    /// `Value::Tensor`, bincode
    Tensor,
    /// Any `Value`, JSON
    Json,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::Text => "text",
            ValueKind::Bytes => "bytes",
            ValueKind::Tensor => "tensor",
            ValueKind::Json => "json",
        }
    }

    /// Whether `value` can be stored under this kind
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ValueKind::Integer, Value::Int(_))
                | (ValueKind::Float, Value::Float(_))
                | (ValueKind::Text, Value::Text(_))
                | (ValueKind::Bytes, Value::Bytes(_))
                | (ValueKind::Tensor, Value::Tensor(_))
                | (ValueKind::Json, _)
        )
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueKind {
    type Err = MemoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "integer" | "int" | "i64" => Ok(ValueKind::Integer),
            "float" | "f64" | "double" => Ok(ValueKind::Float),
            "text" | "str" | "string" => Ok(ValueKind::Text),
            "bytes" | "blob" => Ok(ValueKind::Bytes),
            "tensor" | "ndarray" | "array" => Ok(ValueKind::Tensor),
            "json" => Ok(ValueKind::Json),
            _ => Err(MemoError::UnsupportedKind(s.to_string())),
        }
    }
}

/// Encoder/decoder bound to one declared kind
#[derive(Debug, Clone, Copy)]
pub struct BlobCodec {
    kind: ValueKind,
}

impl BlobCodec {
    pub fn new(kind: ValueKind) -> Self {
        Self { kind }
    }

    /// Resolve a kind by name; unknown names fail here, before anything is attached
    pub fn for_kind_name(name: &str) -> Result<Self> {
        Ok(Self::new(name.parse()?))
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Reject values that cannot be stored under the declared kind
    pub fn check(&self, value: &Value) -> Result<()> {
        if !self.kind.accepts(value) {
            return Err(MemoError::SerializationError(format!(
                "expected {} result, got {}",
                self.kind,
                value.variant_name()
            )));
        }
        if self.kind == ValueKind::Json && contains_non_finite(value) {
            return Err(MemoError::SerializationError(
                "non-finite floats cannot be stored as json".to_string(),
            ));
        }
        if let Value::Tensor(t) = value {
            if !t.is_consistent() {
                return Err(MemoError::SerializationError(
                    "tensor data does not match its shape".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Encode a value into bytes
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        self.check(value)?;

        let bytes = match (self.kind, value) {
            (ValueKind::Integer, Value::Int(i)) => i.to_le_bytes().to_vec(),
            (ValueKind::Float, Value::Float(f)) => f.to_bits().to_le_bytes().to_vec(),
            (ValueKind::Text, Value::Text(s)) => s.as_bytes().to_vec(),
            (ValueKind::Bytes, Value::Bytes(b)) => b.clone(),
            (ValueKind::Tensor, Value::Tensor(t)) => bincode::serialize(t)
                .map_err(|e| MemoError::SerializationError(e.to_string()))?,
            (ValueKind::Json, v) => serde_json::to_vec(v)
                .map_err(|e| MemoError::SerializationError(e.to_string()))?,
            // check() has already matched kind and variant
            (kind, v) => {
                return Err(MemoError::SerializationError(format!(
                    "expected {} result, got {}",
                    kind,
                    v.variant_name()
                )))
            }
        };

        Ok(bytes)
    }

    /// Decode bytes written by [`BlobCodec::encode`] with the same kind
    pub fn decode(&self, bytes: &[u8]) -> Result<Value> {
        match self.kind {
            ValueKind::Integer => Ok(Value::Int(i64::from_le_bytes(fixed8(bytes, self.kind)?))),
            ValueKind::Float => Ok(Value::Float(f64::from_bits(u64::from_le_bytes(fixed8(
                bytes, self.kind,
            )?)))),
            ValueKind::Text => String::from_utf8(bytes.to_vec())
                .map(Value::Text)
                .map_err(|e| MemoError::SerializationError(e.to_string())),
            ValueKind::Bytes => Ok(Value::Bytes(bytes.to_vec())),
            ValueKind::Tensor => {
                let tensor: Tensor = bincode::deserialize(bytes)
                    .map_err(|e| MemoError::SerializationError(e.to_string()))?;
                if !tensor.is_consistent() {
                    return Err(MemoError::SerializationError(
                        "decoded tensor data does not match its shape".to_string(),
                    ));
                }
                Ok(Value::Tensor(tensor))
            }
            ValueKind::Json => serde_json::from_slice(bytes)
                .map_err(|e| MemoError::SerializationError(e.to_string())),
        }
    }
}

fn fixed8(bytes: &[u8], kind: ValueKind) -> Result<[u8; 8]> {
    bytes.try_into().map_err(|_| {
        MemoError::SerializationError(format!(
            "{} value needs 8 bytes, got {}",
            kind,
            bytes.len()
        ))
    })
}

fn contains_non_finite(value: &Value) -> bool {
    match value {
        Value::Float(f) => !f.is_finite(),
        Value::List(items) => items.iter().any(contains_non_finite),
        Value::Map(map) => map.values().any(contains_non_finite),
        Value::Tensor(t) => t.data().iter().any(|f| !f.is_finite()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn round_trip(kind: ValueKind, value: Value) -> Value {
        let codec = BlobCodec::new(kind);
        let bytes = codec.encode(&value).unwrap();
        codec.decode(&bytes).unwrap()
    }

    #[test]
    fn test_scalar_round_trips() {
        assert_eq!(round_trip(ValueKind::Integer, Value::Int(i64::MIN)), Value::Int(i64::MIN));
        assert_eq!(round_trip(ValueKind::Float, Value::Float(0.1)), Value::Float(0.1));
        assert_eq!(
            round_trip(ValueKind::Text, Value::Text("héllo".to_string())),
            Value::Text("héllo".to_string())
        );
    }

    #[test]
    fn test_float_bits_are_preserved() {
        let codec = BlobCodec::new(ValueKind::Float);
        let decoded = codec.decode(&codec.encode(&Value::Float(-0.0)).unwrap()).unwrap();
        assert!(decoded.as_float().unwrap().is_sign_negative());

        let decoded = codec.decode(&codec.encode(&Value::Float(f64::NAN)).unwrap()).unwrap();
        assert!(decoded.as_float().unwrap().is_nan());
    }

    #[test]
    fn test_bytes_are_stored_verbatim() {
        let codec = BlobCodec::new(ValueKind::Bytes);
        let raw = vec![0u8, 255, 7, 0];
        assert_eq!(codec.encode(&Value::Bytes(raw.clone())).unwrap(), raw);
        assert_eq!(codec.decode(&raw).unwrap(), Value::Bytes(raw));
    }

    #[test]
    fn test_tensor_round_trip() {
        let tensor = Tensor::matrix(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(
            round_trip(ValueKind::Tensor, Value::Tensor(tensor.clone())),
            Value::Tensor(tensor)
        );
    }

    #[test]
    fn test_json_round_trip_nested() {
        let mut map = BTreeMap::new();
        map.insert("ids".to_string(), Value::List(vec![Value::Int(1), Value::Null]));
        map.insert("ratio".to_string(), Value::Float(0.25));
        map.insert("raw".to_string(), Value::Bytes(vec![1, 2, 3]));
        let value = Value::Map(map);

        assert_eq!(round_trip(ValueKind::Json, value.clone()), value);
    }

    #[test]
    fn test_json_rejects_non_finite() {
        let codec = BlobCodec::new(ValueKind::Json);
        let result = codec.encode(&Value::List(vec![Value::Float(f64::INFINITY)]));
        assert!(matches!(result, Err(MemoError::SerializationError(_))));
    }

    #[test]
    fn test_kind_mismatch_is_serialization_error() {
        let codec = BlobCodec::new(ValueKind::Integer);
        let result = codec.encode(&Value::Text("4".to_string()));
        assert!(matches!(result, Err(MemoError::SerializationError(_))));
    }

    #[test]
    fn test_truncated_integer_fails_decode() {
        let codec = BlobCodec::new(ValueKind::Integer);
        assert!(matches!(
            codec.decode(&[1, 2, 3]),
            Err(MemoError::SerializationError(_))
        ));
    }

    #[test]
    fn test_tensor_with_overflowing_shape_fails_decode() {
        // same field layout as Tensor, without its constructor checks
        #[derive(Serialize)]
        struct RawTensor {
            shape: Vec<usize>,
            data: Vec<f64>,
        }

        let codec = BlobCodec::new(ValueKind::Tensor);
        for shape in [vec![usize::MAX, 3], vec![usize::MAX / 2 + 1, 2]] {
            let bytes = bincode::serialize(&RawTensor {
                shape,
                data: vec![],
            })
            .unwrap();
            assert!(matches!(
                codec.decode(&bytes),
                Err(MemoError::SerializationError(_))
            ));
        }
    }

    #[test]
    fn test_kind_names() {
        assert_eq!("int".parse::<ValueKind>().unwrap(), ValueKind::Integer);
        assert_eq!("ndarray".parse::<ValueKind>().unwrap(), ValueKind::Tensor);
        assert_eq!("JSON".parse::<ValueKind>().unwrap(), ValueKind::Json);
        assert!(matches!(
            BlobCodec::for_kind_name("pickle"),
            Err(MemoError::UnsupportedKind(_))
        ));
    }
}
