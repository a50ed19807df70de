//! JSON-RPC 2.0 message definitions.
//!
//! A frame is one JSON value: a request object, a response object, or an
//! array (batch) of them. A request without an `id` is a notification.

use crate::error::{Error, Result};
use crate::rpc::Method;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Number, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Protocol version tag carried by every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// Error code used for failures raised by a call handler.
pub const HANDLER_ERROR: i64 = -1;
/// Error code for a method name the peer does not know.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Error code for a frame that is not valid JSON.
pub const PARSE_ERROR: i64 = -32700;
/// Error code for a call that expired locally. Never sent on the wire.
pub const CALL_TIMEOUT: i64 = -32000;

/// Correlation id binding a call to its response.
///
/// Numeric ids are kept as JSON numbers, so fractional or unsigned
/// 64-bit ids are echoed back exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(Number),
    Text(String),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n.into())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Error object of a failed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create an error without data.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Convert a handler failure into the error sent back to the caller.
    pub fn from_handler(err: &Error) -> Self {
        let code = match err {
            Error::UnknownMethod(_) => METHOD_NOT_FOUND,
            Error::InvalidFrame(_) => PARSE_ERROR,
            Error::Timeout { .. } => CALL_TIMEOUT,
            _ => HANDLER_ERROR,
        };
        Self {
            code,
            message: err.to_string(),
            data: Some(Value::String(format!("{err:?}"))),
        }
    }
}

/// A call or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, deserialize_with = "params_from_value")]
    pub params: Vec<Value>,
}

/// Accept `params` as an array, a single object, or null.
fn params_from_value<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<Value>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    })
}

impl Request {
    /// Build a call expecting a response.
    pub fn call(id: RequestId, method: Method, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.name().to_string(),
            params,
        }
    }

    /// Build a notification.
    pub fn notification(method: Method, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.name().to_string(),
            params,
        }
    }

    /// Whether this request expects no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Encode the request as a frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The answer to a call.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub outcome: std::result::Result<Value, RpcError>,
}

impl Response {
    /// A successful response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            outcome: Ok(result),
        }
    }

    /// A failed response.
    pub fn failure(id: RequestId, error: RpcError) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }

    /// Encode the response as a frame.
    ///
    /// A success always carries `result`, even when it is null.
    pub fn to_json(&self) -> Result<String> {
        let value = match &self.outcome {
            Ok(result) => json!({"jsonrpc": JSONRPC_VERSION, "id": self.id, "result": result}),
            Err(error) => json!({"jsonrpc": JSONRPC_VERSION, "id": self.id, "error": error}),
        };
        Ok(serde_json::to_string(&value)?)
    }

    fn from_object(mut map: Map<String, Value>) -> Result<Self> {
        let id = map
            .remove("id")
            .ok_or_else(|| Error::InvalidFrame("response without id".into()))
            .and_then(|id| Ok(serde_json::from_value::<RequestId>(id)?))?;
        let outcome = match map.remove("error") {
            Some(error) if !error.is_null() => Err(serde_json::from_value(error)?),
            _ => Ok(map.remove("result").unwrap_or(Value::Null)),
        };
        Ok(Self { id, outcome })
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    /// Batch elements, still undecoded so each one fails independently.
    Batch(Vec<Value>),
}

impl Message {
    /// Decode a frame from text.
    pub fn parse(frame: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(frame)?)
    }

    /// Classify a JSON value as request, response or batch.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) => Ok(Message::Batch(items)),
            Value::Object(map) if map.contains_key("method") => {
                Ok(Message::Request(serde_json::from_value(Value::Object(map))?))
            }
            Value::Object(map) => Ok(Message::Response(Response::from_object(map)?)),
            other => Err(Error::InvalidFrame(format!(
                "expected object or array, got {other}"
            ))),
        }
    }
}

static LAST_MILLIS: AtomicU64 = AtomicU64::new(0);

/// Create a time-ascending, unique correlation id.
///
/// The prefix is the base36 millisecond clock, never moving backwards
/// within this process; the suffix is random.
pub fn next_call_id() -> RequestId {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let millis = LAST_MILLIS.fetch_max(now, Ordering::Relaxed).max(now);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    RequestId::Text(format!("{}{}", to_base36(millis), &suffix[..12]))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    loop {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
        if n == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
