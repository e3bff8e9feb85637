//! RPC envelope encoding and validation

use rmpv::Value;

use crate::error::ProtocolError;

const TAG_REQUEST: u64 = 0;
const TAG_RESPONSE: u64 = 1;
const TAG_NOTIFICATION: u64 = 2;

/// One decoded RPC envelope
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request {
        id: u64,
        method: String,
        params: Value,
    },
    /// `Err` carries the server-supplied error value
    Response {
        id: u64,
        result: Result<Value, Value>,
    },
    Notification {
        method: String,
        params: Value,
    },
}

impl RpcMessage {
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self::Request {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    pub fn success(id: u64, result: Value) -> Self {
        Self::Response {
            id,
            result: Ok(result),
        }
    }

    pub fn failure(id: u64, error: impl Into<String>) -> Self {
        Self::Response {
            id,
            result: Err(Value::from(error.into())),
        }
    }

    /// Method name for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Response { .. } => None,
        }
    }
}

/// Encode an envelope into MessagePack bytes (without length prefix)
pub fn encode_message(message: &RpcMessage) -> Result<Vec<u8>, ProtocolError> {
    let value = match message {
        RpcMessage::Request { id, method, params } => Value::Array(vec![
            Value::from(TAG_REQUEST),
            Value::from(*id),
            Value::from(method.as_str()),
            params.clone(),
        ]),
        RpcMessage::Response { id, result } => {
            let (error, result) = match result {
                Ok(value) => (Value::Nil, value.clone()),
                Err(error) => (error.clone(), Value::Nil),
            };
            Value::Array(vec![Value::from(TAG_RESPONSE), Value::from(*id), error, result])
        }
        RpcMessage::Notification { method, params } => Value::Array(vec![
            Value::from(TAG_NOTIFICATION),
            Value::from(method.as_str()),
            params.clone(),
        ]),
    };

    let mut buffer = Vec::with_capacity(64);
    rmpv::encode::write_value(&mut buffer, &value)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(buffer)
}

/// Decode and validate an envelope
///
/// Rejects anything that is not one of the three shapes with the exact
/// arity and field types of its tag.
pub fn decode_message(data: &[u8]) -> Result<RpcMessage, ProtocolError> {
    let mut reader = data;
    let value =
        rmpv::decode::read_value(&mut reader).map_err(|e| ProtocolError::Decode(e.to_string()))?;
    if !reader.is_empty() {
        return Err(ProtocolError::Violation(format!(
            "{} trailing bytes after envelope",
            reader.len()
        )));
    }

    let Value::Array(fields) = value else {
        return Err(ProtocolError::Violation("envelope is not an array".into()));
    };

    let tag = fields
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| ProtocolError::Violation("missing integer type tag".into()))?;

    match (tag, fields.len()) {
        (TAG_REQUEST, 4) => {
            let mut fields = fields.into_iter().skip(1);
            let id = expect_id(fields.next())?;
            let method = expect_method(fields.next())?;
            let params = expect_params(fields.next())?;
            Ok(RpcMessage::Request { id, method, params })
        }
        (TAG_RESPONSE, 4) => {
            let mut fields = fields.into_iter().skip(1);
            let id = expect_id(fields.next())?;
            let error = fields.next().unwrap_or(Value::Nil);
            let result = fields.next().unwrap_or(Value::Nil);
            let result = match (error.is_nil(), result.is_nil()) {
                (true, _) => Ok(result),
                (false, true) => Err(error),
                (false, false) => {
                    return Err(ProtocolError::Violation(format!(
                        "response {} carries both error and result",
                        id
                    )))
                }
            };
            Ok(RpcMessage::Response { id, result })
        }
        (TAG_NOTIFICATION, 3) => {
            let mut fields = fields.into_iter().skip(1);
            let method = expect_method(fields.next())?;
            let params = expect_params(fields.next())?;
            Ok(RpcMessage::Notification { method, params })
        }
        (TAG_REQUEST | TAG_RESPONSE | TAG_NOTIFICATION, arity) => Err(ProtocolError::Violation(
            format!("tag {} with arity {}", tag, arity),
        )),
        (tag, _) => Err(ProtocolError::Violation(format!("unknown type tag {}", tag))),
    }
}

fn expect_id(value: Option<Value>) -> Result<u64, ProtocolError> {
    value
        .as_ref()
        .and_then(Value::as_u64)
        .ok_or_else(|| ProtocolError::Violation("id is not an unsigned integer".into()))
}

fn expect_method(value: Option<Value>) -> Result<String, ProtocolError> {
    match value {
        Some(Value::String(s)) => s
            .into_str()
            .ok_or_else(|| ProtocolError::Violation("method is not valid UTF-8".into())),
        _ => Err(ProtocolError::Violation("method is not a string".into())),
    }
}

fn expect_params(value: Option<Value>) -> Result<Value, ProtocolError> {
    match value {
        Some(params @ (Value::Map(_) | Value::Array(_))) => Ok(params),
        _ => Err(ProtocolError::Violation(
            "params is not a map or array".into(),
        )),
    }
}

/// Human-readable message for an error value sent by the server
pub fn error_message(error: &Value) -> String {
    if let Some(message) = error.as_str() {
        return message.to_string();
    }
    if let Some(message) = super::value::get(error, "message").and_then(Value::as_str) {
        return message.to_string();
    }
    error.to_string()
}
