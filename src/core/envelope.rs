//! JSON-RPC request and response envelopes.
//!
//! Requests arrive as `{jsonrpc?, id, method, params}`. Responses leave as
//! `{jsonrpc, id, result}` or `{jsonrpc, id, error: {code, message}}`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::SessionId;
use crate::error::{RpcError, codes};

/// JSON-RPC protocol version emitted on every response.
pub const JSONRPC_VERSION: &str = "2.0";

/// Caller-supplied request identifier, echoed back on the response.
///
/// Not required to be unique across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// A request that failed to parse, with whatever id could be recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeError {
    /// Request id if the body carried a usable one.
    pub id: Option<RequestId>,
    /// Wire error.
    pub error: RpcError,
}

impl EnvelopeError {
    fn new(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            error: RpcError::new(code, message),
        }
    }

    /// Renders the failure as a response envelope.
    #[must_use]
    pub fn into_response(self) -> ResponseEnvelope {
        ResponseEnvelope::failure(self.id, self.error)
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

/// An accepted request. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    id: RequestId,
    method: String,
    params: Map<String, Value>,
    session_id: SessionId,
}

impl RequestEnvelope {
    /// Builds an envelope directly.
    #[must_use]
    pub fn new(
        id: impl Into<RequestId>,
        method: impl Into<String>,
        params: Map<String, Value>,
        session_id: SessionId,
    ) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
            session_id,
        }
    }

    /// Parses a raw request body received for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvelopeError`] with `-32700` for non-JSON bodies,
    /// `-32600` for envelopes missing `id`/`method` or with a wrong
    /// `jsonrpc` version, and `-32602` when `params` is not an object.
    pub fn parse(body: &[u8], session_id: SessionId) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(body).map_err(|e| {
            EnvelopeError::new(None, codes::PARSE_ERROR, format!("Invalid JSON: {e}"))
        })?;
        Self::from_value(value, session_id)
    }

    /// Converts an already-decoded JSON value into an envelope.
    ///
    /// # Errors
    ///
    /// See [`RequestEnvelope::parse`].
    pub fn from_value(value: Value, session_id: SessionId) -> Result<Self, EnvelopeError> {
        if !value.is_object() {
            return Err(EnvelopeError::new(
                None,
                codes::INVALID_REQUEST,
                "Request must be a JSON object",
            ));
        }

        let raw: RawEnvelope = serde_json::from_value(value).map_err(|e| {
            EnvelopeError::new(None, codes::INVALID_REQUEST, format!("Invalid request: {e}"))
        })?;

        if let Some(version) = raw.jsonrpc.as_deref()
            && version != JSONRPC_VERSION
        {
            return Err(EnvelopeError::new(
                raw.id,
                codes::INVALID_REQUEST,
                format!("Unsupported jsonrpc version: {version}"),
            ));
        }

        let Some(id) = raw.id else {
            return Err(EnvelopeError::new(
                None,
                codes::INVALID_REQUEST,
                "Request is missing an id",
            ));
        };

        let Some(method) = raw.method.filter(|m| !m.is_empty()) else {
            return Err(EnvelopeError::new(
                Some(id),
                codes::INVALID_REQUEST,
                "Request is missing a method",
            ));
        };

        let params = match raw.params {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(EnvelopeError::new(
                    Some(id),
                    codes::INVALID_PARAMS,
                    "params must be an object",
                ));
            }
        };

        Ok(Self {
            id,
            method,
            params,
            session_id,
        })
    }

    /// Request identifier.
    #[must_use]
    pub const fn id(&self) -> &RequestId {
        &self.id
    }

    /// Method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Parameter object.
    #[must_use]
    pub const fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Originating session.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

/// Outgoing JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    jsonrpc: &'static str,
    id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl ResponseEnvelope {
    /// A successful response.
    #[must_use]
    pub const fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// An error response. `id` is `null` when the request id was unreadable.
    #[must_use]
    pub const fn failure(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Returns the error object, if this is an error response.
    #[must_use]
    pub const fn error(&self) -> Option<&RpcError> {
        self.error.as_ref()
    }

    /// Renders the envelope as JSON.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("jsonrpc".to_string(), Value::from(self.jsonrpc));
        map.insert(
            "id".to_string(),
            match &self.id {
                Some(RequestId::Number(n)) => Value::from(*n),
                Some(RequestId::String(s)) => Value::from(s.clone()),
                None => Value::Null,
            },
        );
        if let Some(result) = &self.result {
            map.insert("result".to_string(), result.clone());
        }
        if let Some(error) = &self.error {
            let mut obj = Map::new();
            obj.insert("code".to_string(), Value::from(error.code));
            obj.insert("message".to_string(), Value::from(error.message.clone()));
            map.insert("error".to_string(), Value::Object(obj));
        }
        Value::Object(map)
    }
}
