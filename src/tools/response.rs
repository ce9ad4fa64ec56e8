//! Shaping of raw engine answers.
//!
//! Table listings come back as one row per registered table, each wrapped as
//! `{"table": {"dbms": .., "name": .., ..}}`. Tools that only need names
//! declare a parser that reduces the rows before they become output items.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::engine::EngineOutput;

/// Reduction applied to an engine answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseParser {
    /// Sorted, distinct database names.
    UniqueDatabases,
    /// Names of the tables belonging to the `database` argument.
    TablesForDatabase,
}

impl ResponseParser {
    /// Applies the parser. Answers that are not a JSON array pass through.
    #[must_use]
    pub fn apply(self, output: EngineOutput, arguments: &Map<String, Value>) -> EngineOutput {
        let EngineOutput::Json(Value::Array(rows)) = output else {
            debug!(parser = ?self, "answer is not a table listing, left as is");
            return output;
        };
        let tables = rows.iter().filter_map(|row| row.get("table"));
        let field = |table: &Value, key: &str| table.get(key).and_then(Value::as_str).map(String::from);

        let names: Vec<String> = match self {
            Self::UniqueDatabases => tables
                .filter_map(|t| field(t, "dbms"))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            Self::TablesForDatabase => {
                let database = arguments.get("database").and_then(Value::as_str);
                tables
                    .filter(|t| database.is_some() && field(t, "dbms").as_deref() == database)
                    .filter_map(|t| field(t, "name"))
                    .collect()
            }
        };
        EngineOutput::Json(Value::Array(names.into_iter().map(Value::from).collect()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn listing() -> EngineOutput {
        EngineOutput::Json(json!([
            {"table": {"dbms": "plant", "name": "sensors", "create": "..."}},
            {"table": {"dbms": "fleet", "name": "trucks"}},
            {"table": {"dbms": "plant", "name": "alarms"}},
            {"cluster": {"id": "c1"}},
            {"table": {"name": "orphan"}}
        ]))
    }

    fn names(output: EngineOutput) -> Vec<String> {
        match output {
            EngineOutput::Json(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn test_unique_databases_sorted() {
        let out = ResponseParser::UniqueDatabases.apply(listing(), &Map::new());
        assert_eq!(names(out), vec!["fleet", "plant"]);
    }

    #[test]
    fn test_tables_for_database() {
        let mut args = Map::new();
        args.insert("database".to_string(), json!("plant"));
        let out = ResponseParser::TablesForDatabase.apply(listing(), &args);
        assert_eq!(names(out), vec!["sensors", "alarms"]);

        let out = ResponseParser::TablesForDatabase.apply(listing(), &Map::new());
        assert!(names(out).is_empty());
    }

    #[test]
    fn test_text_answer_passes_through() {
        let text = EngineOutput::Text("no tables".to_string());
        assert_eq!(
            ResponseParser::UniqueDatabases.apply(text.clone(), &Map::new()),
            text
        );
    }
}
