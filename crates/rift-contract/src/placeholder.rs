//! `${...}` placeholder parsing and substitution.
//!
//! # Supported Placeholders
//!
//! - `${config.KEY}` - credential supplied to the runner
//! - `${param.NAME}` - value from the active parameter set
//! - `${capture.NAME}` - latest value captured as `NAME` earlier in the sequence
//! - `${step[N].NAME}` - value captured as `NAME` by step `N` of the sequence
//! - `${env.NAME}` - environment variable (configuration files only)
//!
//! A string consisting of exactly one placeholder is replaced by the typed JSON
//! value, so `"${capture.userId}"` in a body stays a number. Anywhere else the
//! value is rendered as text and interpolated.

use crate::error::ConfigError;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER_REGEX
        .get_or_init(|| Regex::new(r"\$\{[^}]*\}").expect("placeholder regex is valid"))
}

/// A reference to a value that is only known at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Config(String),
    Param(String),
    Capture(String),
    Step { index: usize, name: String },
    Env(String),
}

impl Placeholder {
    /// Parse a full token such as `${step[0].userId}`.
    pub fn parse(token: &str) -> Result<Self, ConfigError> {
        let malformed = || ConfigError::MalformedPlaceholder(token.to_string());

        let inner = token
            .strip_prefix("${")
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(malformed)?
            .trim();
        let (scope, name) = inner.split_once('.').ok_or_else(malformed)?;
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(malformed());
        }
        let name = name.to_string();

        match scope {
            "config" => Ok(Placeholder::Config(name)),
            "param" => Ok(Placeholder::Param(name)),
            "capture" => Ok(Placeholder::Capture(name)),
            "env" => Ok(Placeholder::Env(name)),
            _ => {
                let index = scope
                    .strip_prefix("step[")
                    .and_then(|s| s.strip_suffix(']'))
                    .and_then(|s| s.trim().parse::<usize>().ok())
                    .ok_or_else(malformed)?;
                Ok(Placeholder::Step { index, name })
            }
        }
    }

    /// Whether the value depends on an earlier step of a sequence.
    pub fn is_capture(&self) -> bool {
        matches!(self, Placeholder::Capture(_) | Placeholder::Step { .. })
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::Config(name) => write!(f, "${{config.{name}}}"),
            Placeholder::Param(name) => write!(f, "${{param.{name}}}"),
            Placeholder::Capture(name) => write!(f, "${{capture.{name}}}"),
            Placeholder::Step { index, name } => write!(f, "${{step[{index}].{name}}}"),
            Placeholder::Env(name) => write!(f, "${{env.{name}}}"),
        }
    }
}

/// Source of placeholder values.
///
/// `Ok(None)` leaves the placeholder in the output verbatim, which lets a
/// caller resolve some scopes now and defer the rest.
pub trait Resolve {
    fn resolve(&self, placeholder: &Placeholder) -> Result<Option<Value>, ConfigError>;
}

/// Render a JSON value as text for interpolation.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whether `input` contains any placeholder token.
pub fn has_placeholders(input: &str) -> bool {
    placeholder_regex().is_match(input)
}

/// Substitute every placeholder in `input` with its textual value.
pub fn render_str<R: Resolve + ?Sized>(input: &str, resolver: &R) -> Result<String, ConfigError> {
    if !has_placeholders(input) {
        return Ok(input.to_string());
    }

    let mut output = String::with_capacity(input.len());
    let mut last = 0;

    for token in placeholder_regex().find_iter(input) {
        output.push_str(&input[last..token.start()]);
        let placeholder = Placeholder::parse(token.as_str())?;
        match resolver.resolve(&placeholder)? {
            Some(value) => output.push_str(&value_to_text(&value)),
            None => output.push_str(token.as_str()),
        }
        last = token.end();
    }

    output.push_str(&input[last..]);
    Ok(output)
}

/// Substitute placeholders inside every string of a JSON document.
///
/// Object keys are interpolated as text; string values that are a single
/// placeholder keep the resolved value's JSON type.
pub fn render_value<R: Resolve + ?Sized>(value: &Value, resolver: &R) -> Result<Value, ConfigError> {
    match value {
        Value::String(s) => render_string_value(s, resolver),
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, resolver))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                rendered.insert(render_str(key, resolver)?, render_value(item, resolver)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

fn render_string_value<R: Resolve + ?Sized>(s: &str, resolver: &R) -> Result<Value, ConfigError> {
    if let Some(token) = placeholder_regex().find(s) {
        if token.start() == 0 && token.end() == s.len() {
            let placeholder = Placeholder::parse(token.as_str())?;
            return Ok(resolver
                .resolve(&placeholder)?
                .unwrap_or_else(|| Value::String(s.to_string())));
        }
    }
    render_str(s, resolver).map(Value::String)
}
