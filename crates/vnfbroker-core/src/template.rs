//! Placeholder templates used for URLs, endpoints, bodies, and credentials.
//!
//! A template is parsed once, when its dictionary is loaded, and rendered many
//! times. Rendering is a pure function of the template and the
//! [`ExecutionContext`].
//!
//! # Syntax
//!
//! | Form | Meaning |
//! |------|---------|
//! | `{{ name }}` | value of `name` |
//! | `{{ a.b.c }}` | nested lookup |
//! | `{{ name \| json }}` | JSON-encoded value (`null` for null) |
//! | `{{ name \| urlencode }}` | percent-encoded value |
//! | `{{ name \| lower }}` / `upper` | case conversion |
//! | `{{ name \| default("x") }}` | `x` when `name` is missing or null |
//!
//! A placeholder whose variable is missing, and which has no `default`,
//! fails rendering instead of producing an empty string.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use crate::context::ExecutionContext;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unclosed placeholder starting at byte {offset}")]
    Unclosed { offset: usize },
    #[error("empty placeholder at byte {offset}")]
    EmptyPlaceholder { offset: usize },
    #[error("invalid variable path '{path}'")]
    InvalidPath { path: String },
    #[error("unknown filter '{name}'")]
    UnknownFilter { name: String },
    #[error("filter '{name}' expects a quoted string argument")]
    InvalidFilterArgument { name: String },
    #[error("unresolved template variable '{name}'")]
    Unresolved { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Filter {
    Json,
    UrlEncode,
    Lower,
    Upper,
    Default(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Placeholder {
    path: Vec<String>,
    filters: Vec<Filter>,
}

impl Placeholder {
    fn name(&self) -> String {
        self.path.join(".")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// Compiled placeholder template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_owned()));
            }
            let after_open = &rest[start + 2..];
            let end = after_open.find("}}").ok_or(TemplateError::Unclosed {
                offset: offset + start,
            })?;
            let inner = after_open[..end].trim();
            if inner.is_empty() {
                return Err(TemplateError::EmptyPlaceholder {
                    offset: offset + start,
                });
            }
            segments.push(Segment::Placeholder(parse_placeholder(inner)?));

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_owned()));
        }

        Ok(Self {
            source: source.to_owned(),
            segments,
        })
    }

    pub fn render(&self, context: &ExecutionContext) -> Result<String, TemplateError> {
        let mut output = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => output.push_str(text),
                Segment::Placeholder(placeholder) => {
                    output.push_str(&render_placeholder(placeholder, context)?);
                }
            }
        }
        Ok(output)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when the template renders to whitespace only regardless of context.
    pub fn is_blank(&self) -> bool {
        self.segments.iter().all(|segment| match segment {
            Segment::Literal(text) => text.trim().is_empty(),
            Segment::Placeholder(_) => false,
        })
    }

    /// Dotted names of every variable referenced by the template.
    pub fn variables(&self) -> Vec<String> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Placeholder(placeholder) => Some(placeholder.name()),
                Segment::Literal(_) => None,
            })
            .collect()
    }
}

impl FromStr for Template {
    type Err = TemplateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl Display for Template {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Template {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::parse(&source).map_err(serde::de::Error::custom)
    }
}

fn parse_placeholder(inner: &str) -> Result<Placeholder, TemplateError> {
    let mut parts = split_pipes(inner).into_iter();
    let path_text = parts.next().unwrap_or_default();
    let path = path_text
        .split('.')
        .map(str::trim)
        .map(str::to_owned)
        .collect::<Vec<_>>();
    let valid_path = path.iter().all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    });
    if !valid_path {
        return Err(TemplateError::InvalidPath {
            path: path_text.trim().to_owned(),
        });
    }

    let filters = parts
        .map(|part| parse_filter(part.trim()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Placeholder { path, filters })
}

fn parse_filter(text: &str) -> Result<Filter, TemplateError> {
    match text {
        "json" => return Ok(Filter::Json),
        "urlencode" => return Ok(Filter::UrlEncode),
        "lower" => return Ok(Filter::Lower),
        "upper" => return Ok(Filter::Upper),
        _ => {}
    }

    let Some(argument) = text
        .strip_prefix("default")
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.trim_end().strip_suffix(')'))
    else {
        let name = text.split('(').next().unwrap_or(text).trim().to_owned();
        return Err(TemplateError::UnknownFilter { name });
    };

    let argument = argument.trim();
    let unquoted = argument
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .or_else(|| {
            argument
                .strip_prefix('\'')
                .and_then(|rest| rest.strip_suffix('\''))
        })
        .ok_or_else(|| TemplateError::InvalidFilterArgument {
            name: String::from("default"),
        })?;
    Ok(Filter::Default(unquoted.to_owned()))
}

/// Splits on `|` outside of quoted filter arguments.
fn split_pipes(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (index, ch) in inner.char_indices() {
        match (quote, ch) {
            (None, '"' | '\'') => quote = Some(ch),
            (Some(open), _) if ch == open => quote = None,
            (None, '|') => {
                parts.push(&inner[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&inner[start..]);
    parts
}

fn render_placeholder(
    placeholder: &Placeholder,
    context: &ExecutionContext,
) -> Result<String, TemplateError> {
    let unresolved = || TemplateError::Unresolved {
        name: placeholder.name(),
    };

    let mut value = context.lookup(&placeholder.path).cloned();
    for filter in &placeholder.filters {
        if let Filter::Default(fallback) = filter {
            if matches!(value, None | Some(Value::Null)) {
                value = Some(Value::String(fallback.clone()));
            }
            continue;
        }

        let current = value.take().ok_or_else(unresolved)?;
        value = Some(match filter {
            Filter::Json => Value::String(current.to_string()),
            Filter::UrlEncode => {
                Value::String(urlencoding::encode(&stringify(&current)).into_owned())
            }
            Filter::Lower => Value::String(stringify(&current).to_lowercase()),
            Filter::Upper => Value::String(stringify(&current).to_uppercase()),
            Filter::Default(_) => current,
        });
    }

    value.map(|value| stringify(&value)).ok_or_else(unresolved)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
