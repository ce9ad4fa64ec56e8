//! Tool catalog.
//!
//! Tools are declared in a JSON file (or taken from the built-in set). Each
//! declaration names the tool, describes it for the model, gives its input
//! schema, and says how it is executed: an engine command template, a SQL
//! statement built from structured arguments, or an internal method answered
//! by the server itself.
//!
//! ```json
//! {
//!   "tools": [
//!     {
//!       "name": "list_tables",
//!       "description": "List tables of a database.",
//!       "input_schema": {
//!         "type": "object",
//!         "properties": { "database": { "type": "string" } },
//!         "required": ["database"]
//!       },
//!       "command": {
//!         "type": "engine",
//!         "template": "blockchain get table where dbms = {database}",
//!         "parse_response": "tables_for_database"
//!       }
//!     }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use jsonschema::Validator;
use rmcp::model::Tool;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use super::command::{TemplateSet, TemplateVariant};
use super::response::ResponseParser;
use crate::error::{ConfigError, DispatchError};

/// How a tool is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCommand {
    /// Render `template` and send it to the query engine.
    Engine {
        /// Command template, see [`CommandTemplate`](super::CommandTemplate).
        template: String,
        /// Conditional templates tried before `template`.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        variants: Vec<TemplateVariant>,
        /// Reduction applied to the engine answer.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parse_response: Option<ResponseParser>,
        /// Extra headers sent with the command.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    /// Build a `SELECT` from structured arguments and send it to the engine.
    BuildSql {
        /// Extra headers sent with the command.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    /// Answered by the server without contacting the engine.
    Internal {
        /// Which internal method.
        method: InternalMethod,
    },
}

/// Methods answered by the server itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalMethod {
    /// Version, tool count and configured limits.
    ServerInfo,
}

/// A tool as declared in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the `arguments` object.
    #[serde(rename = "inputSchema", alias = "input_schema")]
    pub input_schema: Value,
    /// Execution strategy.
    pub command: ToolCommand,
}

impl ToolDescriptor {
    /// Wire form used in `tools/list` results.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }

    /// Converts into the rmcp tool type used by the stdio binding.
    #[must_use]
    pub fn to_tool(&self) -> Tool {
        let schema = match &self.input_schema {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        Tool::new(self.name.clone(), self.description.clone(), Arc::new(schema))
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    tools: Vec<ToolDescriptor>,
}

/// Compiled per-tool state.
struct Compiled {
    validator: Validator,
    templates: Option<TemplateSet>,
}

/// Ordered, validated set of tools.
pub struct ToolCatalog {
    descriptors: Vec<ToolDescriptor>,
    compiled: Vec<Compiled>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCatalog")
            .field("tools", &self.index.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolCatalog {
    /// Loads a catalog file, optionally restricted to `enabled` tool names.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or if a
    /// declaration is invalid.
    pub fn load(path: &Path, enabled: Option<&[String]>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::CatalogRead {
            path: path.to_path_buf(),
            source,
        })?;
        let file: CatalogFile =
            serde_json::from_str(&text).map_err(|e| ConfigError::CatalogParse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let catalog = Self::from_descriptors(restrict(file.tools, enabled))?;
        info!(path = %path.display(), tools = catalog.len(), "loaded tool catalog");
        Ok(catalog)
    }

    /// Builds a catalog from declarations, keeping their order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateTool`], [`ConfigError::InvalidSchema`]
    /// or [`ConfigError::InvalidTemplate`].
    pub fn from_descriptors(descriptors: Vec<ToolDescriptor>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(descriptors.len());
        let mut compiled = Vec::with_capacity(descriptors.len());

        for (position, descriptor) in descriptors.iter().enumerate() {
            if index.insert(descriptor.name.clone(), position).is_some() {
                return Err(ConfigError::DuplicateTool {
                    name: descriptor.name.clone(),
                });
            }
            compiled.push(compile(descriptor)?);
        }

        Ok(Self {
            descriptors,
            compiled,
            index,
        })
    }

    /// The built-in catalog, optionally restricted to `enabled` tool names.
    ///
    /// # Errors
    ///
    /// Only fails if a built-in declaration is malformed.
    pub fn builtin(enabled: Option<&[String]>) -> Result<Self, ConfigError> {
        Self::from_descriptors(restrict(builtin_descriptors(), enabled))
    }

    /// Tools in catalog order.
    #[must_use]
    pub fn list(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    /// Looks up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.descriptors[i])
    }

    /// Number of tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns `true` if no tool is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Checks `arguments` against the tool's input schema.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ToolNotFound`] for unknown tools and
    /// [`DispatchError::InvalidArguments`] listing every schema violation.
    pub fn validate(&self, name: &str, arguments: &Map<String, Value>) -> Result<(), DispatchError> {
        let position = self
            .index
            .get(name)
            .copied()
            .ok_or_else(|| DispatchError::ToolNotFound {
                name: name.to_string(),
            })?;

        let instance = Value::Object(arguments.clone());
        let errors: Vec<String> = self.compiled[position]
            .validator
            .iter_errors(&instance)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::InvalidArguments {
                name: name.to_string(),
                message: errors.join("; "),
            })
        }
    }

    /// The parsed command templates of an engine tool.
    #[must_use]
    pub fn templates(&self, name: &str) -> Option<&TemplateSet> {
        self.index
            .get(name)
            .and_then(|&i| self.compiled[i].templates.as_ref())
    }
}

fn compile(descriptor: &ToolDescriptor) -> Result<Compiled, ConfigError> {
    if !descriptor.input_schema.is_object() {
        return Err(ConfigError::InvalidSchema {
            name: descriptor.name.clone(),
            message: "input schema must be a JSON object".to_string(),
        });
    }
    let validator =
        jsonschema::validator_for(&descriptor.input_schema).map_err(|e| {
            ConfigError::InvalidSchema {
                name: descriptor.name.clone(),
                message: e.to_string(),
            }
        })?;

    let templates = match &descriptor.command {
        ToolCommand::Engine {
            template, variants, ..
        } => Some(TemplateSet::parse(template, variants).map_err(|message| {
            ConfigError::InvalidTemplate {
                name: descriptor.name.clone(),
                message,
            }
        })?),
        ToolCommand::BuildSql { .. } | ToolCommand::Internal { .. } => None,
    };

    Ok(Compiled {
        validator,
        templates,
    })
}

pub(crate) fn restrict(descriptors: Vec<ToolDescriptor>, enabled: Option<&[String]>) -> Vec<ToolDescriptor> {
    let Some(enabled) = enabled else {
        return descriptors;
    };
    for name in enabled {
        if !descriptors.iter().any(|d| &d.name == name) {
            warn!(tool = %name, "enabled tool is not declared in the catalog");
        }
    }
    descriptors
        .into_iter()
        .filter(|d| enabled.contains(&d.name))
        .collect()
}

// ---------------------------------------------------------------------------
// Built-in tools
// ---------------------------------------------------------------------------

fn engine_tool(name: &str, description: &str, schema: Value, template: &str) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: schema,
        command: ToolCommand::Engine {
            template: template.to_string(),
            variants: Vec::new(),
            parse_response: None,
            headers: BTreeMap::new(),
        },
    }
}

fn parsed(mut tool: ToolDescriptor, parser: ResponseParser) -> ToolDescriptor {
    if let ToolCommand::Engine { parse_response, .. } = &mut tool.command {
        *parse_response = Some(parser);
    }
    tool
}

fn network_headers() -> BTreeMap<String, String> {
    BTreeMap::from([("destination".to_string(), "network".to_string())])
}

fn builtin_descriptors() -> Vec<ToolDescriptor> {
    let database = json!({
        "type": "object",
        "properties": {
            "database": { "type": "string", "description": "Logical database name." }
        },
        "required": ["database"],
        "additionalProperties": false
    });

    let mut query = engine_tool(
        "query",
        "Run a SQL query across the network. Results are returned one row per item.",
        json!({
            "type": "object",
            "properties": {
                "database": { "type": "string", "description": "Logical database name." },
                "query": { "type": "string", "description": "SQL SELECT statement." }
            },
            "required": ["database", "query"],
            "additionalProperties": false
        }),
        "sql {database} format = json and stat = false \"{query}\"",
    );
    if let ToolCommand::Engine { headers, .. } = &mut query.command {
        *headers = network_headers();
    }

    let strings = json!({
        "oneOf": [
            { "type": "string" },
            { "type": "array", "items": { "type": "string" } }
        ]
    });
    let select = ToolDescriptor {
        name: "select".to_string(),
        description: "Build and run a SELECT from its parts. Results are returned one row per item."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "database": { "type": "string", "description": "Logical database name." },
                "table": { "type": "string", "description": "Table to read." },
                "select": strings.clone(),
                "extend_fields": strings.clone(),
                "include_tables": strings.clone(),
                "where": { "type": "string", "description": "Condition, without the WHERE keyword." },
                "group_by": strings,
                "order_by": {
                    "type": "array",
                    "items": {
                        "oneOf": [
                            { "type": "string" },
                            {
                                "type": "object",
                                "properties": {
                                    "column": { "type": "string" },
                                    "direction": { "type": "string", "enum": ["ASC", "DESC", "asc", "desc"] }
                                },
                                "required": ["column"]
                            }
                        ]
                    }
                },
                "limit": { "type": "integer", "minimum": 1 },
                "format": { "type": "string", "enum": ["json", "table"] }
            },
            "required": ["database", "table"],
            "additionalProperties": false
        }),
        command: ToolCommand::BuildSql {
            headers: network_headers(),
        },
    };

    vec![
        parsed(
            engine_tool(
                "list_schema",
                "List the databases registered on the network.",
                json!({ "type": "object", "properties": {}, "additionalProperties": false }),
                "blockchain get table",
            ),
            ResponseParser::UniqueDatabases,
        ),
        parsed(
            engine_tool(
                "list_tables",
                "List the tables of a database.",
                database,
                "blockchain get table where dbms = {database}",
            ),
            ResponseParser::TablesForDatabase,
        ),
        engine_tool(
            "get_columns",
            "Describe the columns of a table.",
            json!({
                "type": "object",
                "properties": {
                    "database": { "type": "string" },
                    "table": { "type": "string" }
                },
                "required": ["database", "table"],
                "additionalProperties": false
            }),
            "get columns where dbms = {database} and table = {table} and format = json",
        ),
        query,
        select,
        engine_tool(
            "node_status",
            "Report the status of the connected engine node.",
            json!({ "type": "object", "properties": {}, "additionalProperties": false }),
            "get status where format = json",
        ),
        ToolDescriptor {
            name: "server_info".to_string(),
            description: "Report server version, tool count and configured limits.".to_string(),
            input_schema: json!({ "type": "object", "properties": {}, "additionalProperties": false }),
            command: ToolCommand::Internal {
                method: InternalMethod::ServerInfo,
            },
        },
    ]
}
