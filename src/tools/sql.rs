//! SQL statements built from structured arguments.
//!
//! ```text
//! {database, table, select?, where?, group_by?, order_by?, limit?, format?}
//!   ─► sql <database> format = <format> "SELECT .. FROM .. [WHERE ..] .."
//! ```

use serde_json::{Map, Value};

/// Builds the engine command for a structured query.
///
/// # Errors
///
/// Returns a message when `database` or `table` is missing, a clause has
/// the wrong shape, or the statement would contain a double quote.
pub fn build_command(arguments: &Map<String, Value>) -> Result<String, String> {
    let database = required_str(arguments, "database")?;
    let format = match arguments.get("format") {
        None | Some(Value::Null) => "json",
        Some(Value::String(f)) if f == "json" || f == "table" => f.as_str(),
        Some(other) => return Err(format!("format must be \"json\" or \"table\", got {other}")),
    };
    let statement = build_select(arguments)?;
    if statement.contains('"') {
        return Err("statement must not contain '\"'".to_string());
    }
    Ok(format!("sql {database} format = {format} \"{statement}\""))
}

/// Builds the `SELECT` statement.
///
/// # Errors
///
/// As for [`build_command`], minus the `database` and quote checks.
pub fn build_select(arguments: &Map<String, Value>) -> Result<String, String> {
    let table = required_str(arguments, "table")?;

    let mut columns = list(arguments, "select")?;
    if columns.is_empty() {
        columns.push("*".to_string());
    }
    columns.extend(list(arguments, "extend_fields")?);

    let mut from = vec![table.to_string()];
    from.extend(list(arguments, "include_tables")?);

    let mut sql = format!("SELECT {} FROM {}", columns.join(", "), from.join(", "));

    if let Some(condition) = optional_str(arguments, "where")? {
        sql.push_str(" WHERE ");
        sql.push_str(condition);
    }

    let group_by = list(arguments, "group_by")?;
    if !group_by.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&group_by.join(", "));
    }

    let order_by = order_by(arguments)?;
    if !order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by.join(", "));
    }

    match arguments.get("limit") {
        None | Some(Value::Null) => {}
        Some(value) => match value.as_u64() {
            Some(0) | None => return Err(format!("limit must be a positive integer, got {value}")),
            Some(n) => sql.push_str(&format!(" LIMIT {n}")),
        },
    }

    Ok(sql)
}

fn required_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
    optional_str(arguments, key)?.ok_or_else(|| format!("'{key}' is required"))
}

fn optional_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>, String> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(format!("'{key}' must be a string, got {other}")),
    }
}

/// A string or an array of strings.
fn list(arguments: &Map<String, Value>, key: &str) -> Result<Vec<String>, String> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(String::from)
                    .ok_or_else(|| format!("'{key}' entries must be strings, got {item}"))
            })
            .collect(),
        Some(other) => Err(format!("'{key}' must be a string or a list, got {other}")),
    }
}

/// Entries are `"col"`, `"col DESC"` or `{"column": "col", "direction": "desc"}`.
fn order_by(arguments: &Map<String, Value>) -> Result<Vec<String>, String> {
    let items = match arguments.get("order_by") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items.as_slice(),
        Some(single) => std::slice::from_ref(single),
    };

    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            Value::Object(spec) => {
                let column = spec
                    .get("column")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "order_by entries need a 'column'".to_string())?;
                let direction = spec
                    .get("direction")
                    .and_then(Value::as_str)
                    .unwrap_or("ASC")
                    .to_ascii_uppercase();
                if direction != "ASC" && direction != "DESC" {
                    return Err(format!("order_by direction must be ASC or DESC, got {direction}"));
                }
                Ok(format!("{column} {direction}"))
            }
            other => Err(format!("order_by entries must be strings or objects, got {other}")),
        })
        .collect()
}
