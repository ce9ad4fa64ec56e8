//! Engine command templates.
//!
//! A template is plain text with `{name}` placeholders, which must be present
//! in the call arguments, and `{name?}` placeholders, which render as an
//! empty string when absent. Doubled braces (`{{`, `}}`) are literal.
//!
//! A placeholder between double quotes is a quoted value: an argument that
//! would close the quotes early is rejected rather than rendered.
//!
//! A tool may declare variants next to its default template. The first
//! variant whose `when` arguments are all present and non-empty is used.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Placeholder syntax: `{name}` or `{name?}`, or an escaped brace.
static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)(\?)?\}").ok());

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder {
        name: String,
        optional: bool,
        quoted: bool,
    },
}

/// Why a template could not be rendered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// A required placeholder has no argument.
    #[error("missing argument '{0}' used by the command")]
    Missing(String),
    /// A quoted placeholder's value contains a double quote.
    #[error("argument '{0}' must not contain '\"'")]
    Unquotable(String),
}

/// A parsed command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl CommandTemplate {
    /// Parses `source`.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first unmatched brace.
    pub fn parse(source: &str) -> Result<Self, String> {
        let re = PLACEHOLDER
            .as_ref()
            .ok_or_else(|| "placeholder pattern failed to compile".to_string())?;

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut cursor = 0;
        let mut quoted = false;

        for caps in re.captures_iter(source) {
            let Some(whole) = caps.get(0) else { continue };
            push_literal(&mut literal, &source[cursor..whole.start()], cursor, &mut quoted)?;
            cursor = whole.end();

            match (caps.get(1), caps.get(2)) {
                (Some(name), optional) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder {
                        name: name.as_str().to_string(),
                        optional: optional.is_some(),
                        quoted,
                    });
                }
                (None, _) => literal.push_str(&whole.as_str()[..1]),
            }
        }
        push_literal(&mut literal, &source[cursor..], cursor, &mut quoted)?;
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Names of the required placeholders, in order of appearance.
    pub fn required(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder {
                name,
                optional: false,
                ..
            } => Some(name.as_str()),
            _ => None,
        })
    }

    /// Renders the template against call arguments.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Missing`] for the first required placeholder
    /// with no argument, and [`RenderError::Unquotable`] for a quoted value
    /// containing a double quote.
    pub fn render(&self, arguments: &Map<String, Value>) -> Result<String, RenderError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            let (name, optional, quoted) = match segment {
                Segment::Literal(text) => {
                    out.push_str(text);
                    continue;
                }
                Segment::Placeholder {
                    name,
                    optional,
                    quoted,
                } => (name, *optional, *quoted),
            };
            let Some(value) = arguments.get(name).filter(|v| !v.is_null()) else {
                if optional {
                    continue;
                }
                return Err(RenderError::Missing(name.clone()));
            };
            let text = render_value(value);
            if quoted && text.contains('"') {
                return Err(RenderError::Unquotable(name.clone()));
            }
            out.push_str(&text);
        }
        Ok(out)
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn push_literal(buf: &mut String, text: &str, offset: usize, quoted: &mut bool) -> Result<(), String> {
    if let Some(pos) = text.find(['{', '}']) {
        return Err(format!("unmatched brace at byte {}", offset + pos));
    }
    if text.matches('"').count() % 2 == 1 {
        *quoted = !*quoted;
    }
    buf.push_str(text);
    Ok(())
}

/// A default template plus conditional variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSet {
    default: CommandTemplate,
    variants: Vec<(Vec<String>, CommandTemplate)>,
}

impl TemplateSet {
    /// Parses the default template and every variant.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first malformed template.
    pub fn parse(default: &str, variants: &[TemplateVariant]) -> Result<Self, String> {
        let default = CommandTemplate::parse(default)?;
        let variants = variants
            .iter()
            .map(|v| {
                CommandTemplate::parse(&v.template)
                    .map(|t| (v.when.clone(), t))
                    .map_err(|e| format!("variant when {:?}: {e}", v.when))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { default, variants })
    }

    /// Picks the first variant whose `when` arguments are all supplied,
    /// falling back to the default.
    #[must_use]
    pub fn select(&self, arguments: &Map<String, Value>) -> &CommandTemplate {
        self.variants
            .iter()
            .find(|(when, _)| when.iter().all(|name| supplied(arguments.get(name))))
            .map_or(&self.default, |(_, template)| template)
    }
}

/// A conditional template as declared in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TemplateVariant {
    /// Arguments that must all be present and non-empty.
    pub when: Vec<String>,
    /// Template used when they are.
    pub template: String,
}

fn supplied(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}

/// Strings render bare; everything else renders as compact JSON.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
