//! Conversions between typed payloads and dynamic MessagePack values
//!
//! Params travel as [`rmpv::Value`] so the codec can validate envelope
//! structure without knowing every method. Typed structs are converted
//! through `rmp-serde` with named fields, so structs become maps on the wire.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::ProtocolError;

pub use rmpv::Value;

/// Serialize a typed payload into a MessagePack value (structs as maps)
pub fn to_value<T: Serialize>(payload: &T) -> Result<Value, ProtocolError> {
    let bytes =
        rmp_serde::to_vec_named(payload).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    rmpv::decode::read_value(&mut bytes.as_slice())
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Validate a MessagePack value against the schema of `T`
pub fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T, ProtocolError> {
    let mut bytes = Vec::new();
    rmpv::encode::write_value(&mut bytes, value)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    rmp_serde::from_slice(&bytes).map_err(|e| ProtocolError::Schema(e.to_string()))
}

/// Build a map value from string keys
pub fn map<I, K>(entries: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::from(k.into()), v))
            .collect(),
    )
}

/// Empty params map
pub fn empty() -> Value {
    Value::Map(Vec::new())
}

/// Look up a string key in a map value
pub fn get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value
        .as_map()?
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct JoinParams {
        room_id: String,
        #[serde(with = "serde_bytes")]
        user_data: Vec<u8>,
        position: [f32; 2],
    }

    #[test]
    fn test_struct_becomes_map() {
        let params = JoinParams {
            room_id: "r1".into(),
            user_data: vec![1, 2],
            position: [0.0, 1.0],
        };
        let value = to_value(&params).unwrap();

        assert!(value.is_map());
        assert_eq!(get(&value, "room_id").and_then(Value::as_str), Some("r1"));
        assert_eq!(
            get(&value, "user_data"),
            Some(&Value::Binary(vec![1, 2]))
        );

        let back: JoinParams = from_value(&value).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn test_bytes_accept_integer_arrays() {
        let value = map([
            ("room_id", Value::from("r1")),
            ("user_data", Value::Array(vec![Value::from(7), Value::from(8)])),
            (
                "position",
                Value::Array(vec![Value::F32(0.0), Value::F32(0.0)]),
            ),
        ]);

        let params: JoinParams = from_value(&value).unwrap();
        assert_eq!(params.user_data, vec![7, 8]);
    }

    #[test]
    fn test_missing_field_is_schema_error() {
        let value = map([("room_id", Value::from("r1"))]);
        let result: Result<JoinParams, _> = from_value(&value);
        assert!(matches!(result, Err(ProtocolError::Schema(_))));
    }
}
