//! Request parameter types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RpcError;

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name.
    pub name: String,

    /// Tool arguments. Absent or `null` means no arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
}

impl CallToolParams {
    /// Extracts call parameters from a request's `params` object.
    ///
    /// # Errors
    ///
    /// Returns an `-32602` error when `name` is missing or not a string, or
    /// when `arguments` is not an object.
    pub fn from_params(params: &Map<String, Value>) -> Result<Self, RpcError> {
        serde_json::from_value(Value::Object(params.clone()))
            .map_err(|e| RpcError::invalid_params(format!("Invalid tools/call params: {e}")))
    }

    /// The arguments, or an empty object.
    #[must_use]
    pub fn arguments(&self) -> Map<String, Value> {
        self.arguments.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::codes;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_parse_with_arguments() {
        let p = CallToolParams::from_params(&params(json!({
            "name": "list_tables",
            "arguments": {"database": "lsl"}
        })))
        .unwrap_or_else(|_| unreachable!());
        assert_eq!(p.name, "list_tables");
        assert_eq!(p.arguments()["database"], "lsl");
    }

    #[test]
    fn test_missing_or_null_arguments_are_empty() {
        for raw in [json!({"name": "t"}), json!({"name": "t", "arguments": null})] {
            let p = CallToolParams::from_params(&params(raw)).unwrap_or_else(|_| unreachable!());
            assert!(p.arguments().is_empty());
        }
    }

    #[test]
    fn test_missing_name_is_invalid_params() {
        let err = CallToolParams::from_params(&params(json!({"arguments": {}}))).err();
        assert_eq!(err.map(|e| e.code), Some(codes::INVALID_PARAMS));
    }

    #[test]
    fn test_non_object_arguments_is_invalid_params() {
        let err = CallToolParams::from_params(&params(json!({"name": "t", "arguments": [1]}))).err();
        assert_eq!(err.map(|e| e.code), Some(codes::INVALID_PARAMS));
    }
}
