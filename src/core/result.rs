//! Operation results produced by tool calls.
//!
//! The serialized form of a result is computed once, when the result is
//! built. Routing decisions read the memoized size and never re-serialize.

use std::sync::Arc;

use rmcp::model::{CallToolResult, Content};
use serde_json::{Map, Value};

/// One output item of a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputItem {
    /// Plain text.
    Text(String),
    /// Structured JSON (a row, an object, a scalar).
    Json(Value),
}

impl OutputItem {
    /// Text representation carried in the MCP `text` content block.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Json(Value::String(s)) => s.clone(),
            Self::Json(value) => value.to_string(),
        }
    }

    fn to_wire(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".to_string(), Value::from("text"));
        map.insert("text".to_string(), Value::from(self.text()));
        Value::Object(map)
    }
}

/// Completed result of a tool call: ordered items plus an error marker.
///
/// Failures from the query engine are still well-formed results; they carry
/// `is_error = true` and a single `"Error: ..."` text item.
#[derive(Debug, Clone)]
pub struct OperationResult {
    items: Vec<OutputItem>,
    is_error: bool,
    encoded: Arc<[u8]>,
}

impl OperationResult {
    /// A successful result.
    #[must_use]
    pub fn success(items: Vec<OutputItem>) -> Self {
        Self::build(items, false)
    }

    /// A failed result carrying `message`.
    #[must_use]
    pub fn failure(message: impl AsRef<str>) -> Self {
        Self::build(
            vec![OutputItem::Text(format!("Error: {}", message.as_ref()))],
            true,
        )
    }

    fn build(items: Vec<OutputItem>, is_error: bool) -> Self {
        let content: Vec<Value> = items.iter().map(OutputItem::to_wire).collect();
        let mut map = Map::new();
        map.insert("content".to_string(), Value::Array(content));
        map.insert("isError".to_string(), Value::Bool(is_error));
        let encoded: Arc<[u8]> = Arc::from(Value::Object(map).to_string().into_bytes());
        Self {
            items,
            is_error,
            encoded,
        }
    }

    /// Output items in order.
    #[must_use]
    pub fn items(&self) -> &[OutputItem] {
        &self.items
    }

    /// Whether the result carries the error marker.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.is_error
    }

    /// Byte size of the serialized result, computed at construction.
    #[must_use]
    pub fn size(&self) -> usize {
        self.encoded.len()
    }

    /// Serialized `result` object (`{"content": [...], "isError": ..}`).
    #[must_use]
    pub fn encoded(&self) -> &Arc<[u8]> {
        &self.encoded
    }

    /// The `result` object as JSON, decoded from the memoized bytes.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::from_slice(&self.encoded).unwrap_or(Value::Null)
    }

    /// Converts into the rmcp result type used by the stdio binding.
    #[must_use]
    pub fn to_call_tool_result(&self) -> CallToolResult {
        let content: Vec<Content> = self
            .items
            .iter()
            .map(|item| Content::text(item.text()))
            .collect();
        if self.is_error {
            CallToolResult::error(content)
        } else {
            CallToolResult::success(content)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_size_matches_encoded_bytes() {
        let result = OperationResult::success(vec![
            OutputItem::Text("a".to_string()),
            OutputItem::Json(json!({"row": 1})),
        ]);
        assert_eq!(result.size(), result.encoded().len());
        assert_eq!(
            result.to_value(),
            json!({
                "content": [
                    {"type": "text", "text": "a"},
                    {"type": "text", "text": "{\"row\":1}"}
                ],
                "isError": false
            })
        );
    }

    #[test]
    fn test_failure_carries_marker() {
        let result = OperationResult::failure("boom");
        assert!(result.is_error());
        assert_eq!(result.items(), &[OutputItem::Text("Error: boom".to_string())]);
        assert_eq!(result.to_value()["isError"], true);
    }

    #[test]
    fn test_call_tool_result_conversion() {
        let result = OperationResult::success(vec![OutputItem::Text("x".to_string())]);
        let converted = result.to_call_tool_result();
        assert_eq!(converted.content.len(), 1);
        assert_eq!(converted.is_error, Some(false));
    }
}
