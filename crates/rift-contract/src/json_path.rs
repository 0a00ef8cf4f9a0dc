//! Typed locators over JSON response bodies.
//!
//! Supports:
//! - `result.name` - nested field
//! - `data[0].email` - array index
//! - `$.items[1]` - optional leading `$` / `$.`
//! - `headers["content.type"]` - quoted key for names containing `.` or `[`
//!
//! Resolution never panics: a missing key, an out-of-range index or a scalar
//! where a container was expected is reported as a [`PathError`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One step of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Why a path could not be parsed or resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid path '{path}': {reason}")]
    Syntax { path: String, reason: String },
    #[error("key '{key}' not found at '{at}'")]
    MissingKey { key: String, at: String },
    #[error("index {index} out of bounds at '{at}' (length {len})")]
    IndexOutOfBounds { index: usize, len: usize, at: String },
    #[error("expected {expected} at '{at}' but found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
        at: String,
    },
}

/// A parsed locator such as `data[0].email`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Parse a locator. An empty path (or `$`) addresses the whole body.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let trimmed = raw.trim();
        let syntax = |reason: &str| PathError::Syntax {
            path: trimmed.to_string(),
            reason: reason.to_string(),
        };

        let mut body = trimmed;
        if let Some(rest) = body.strip_prefix('$') {
            body = rest.strip_prefix('.').unwrap_or(rest);
        }

        let chars: Vec<char> = body.chars().collect();
        let mut segments = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '[' => {
                    let (segment, next) = parse_bracket(&chars, i).map_err(|r| syntax(&r))?;
                    segments.push(segment);
                    i = next;
                }
                '.' => {
                    if i == 0 {
                        return Err(syntax("path cannot start with '.'"));
                    }
                    i += 1;
                    match chars.get(i) {
                        None => return Err(syntax("path cannot end with '.'")),
                        Some('.') | Some('[') => return Err(syntax("empty segment")),
                        Some(_) => {}
                    }
                }
                ']' => return Err(syntax("unbalanced ']'")),
                _ => {
                    if i > 0 && chars[i - 1] == ']' {
                        return Err(syntax("expected '.' or '[' after ']'"));
                    }
                    let start = i;
                    while i < chars.len() && chars[i] != '.' && chars[i] != '[' && chars[i] != ']'
                    {
                        i += 1;
                    }
                    segments.push(Segment::Key(chars[start..i].iter().collect()));
                }
            }
        }

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Walk `value` along this path.
    pub fn resolve<'a>(&self, value: &'a Value) -> Result<&'a Value, PathError> {
        let mut current = value;
        let mut at = String::from("$");

        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => {
                    map.get(key).ok_or_else(|| PathError::MissingKey {
                        key: key.clone(),
                        at: at.clone(),
                    })?
                }
                (Segment::Index(index), Value::Array(items)) => {
                    items.get(*index).ok_or_else(|| PathError::IndexOutOfBounds {
                        index: *index,
                        len: items.len(),
                        at: at.clone(),
                    })?
                }
                (Segment::Key(_), other) => {
                    return Err(PathError::TypeMismatch {
                        expected: "an object",
                        found: type_name(other),
                        at,
                    })
                }
                (Segment::Index(_), other) => {
                    return Err(PathError::TypeMismatch {
                        expected: "an array",
                        found: type_name(other),
                        at,
                    })
                }
            };
            push_segment(&mut at, segment);
        }

        Ok(current)
    }
}

fn parse_bracket(chars: &[char], open: usize) -> Result<(Segment, usize), String> {
    let mut i = open + 1;
    match chars.get(i) {
        Some(&quote) if quote == '"' || quote == '\'' => {
            i += 1;
            let start = i;
            while i < chars.len() && chars[i] != quote {
                i += 1;
            }
            if i >= chars.len() {
                return Err("unterminated quoted key".to_string());
            }
            let key: String = chars[start..i].iter().collect();
            if chars.get(i + 1) != Some(&']') {
                return Err("expected ']' after quoted key".to_string());
            }
            Ok((Segment::Key(key), i + 2))
        }
        _ => {
            let start = i;
            while i < chars.len() && chars[i] != ']' {
                i += 1;
            }
            if i >= chars.len() {
                return Err("unterminated '['".to_string());
            }
            let inner: String = chars[start..i].iter().collect();
            let index = inner
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("'{inner}' is not an array index"))?;
            Ok((Segment::Index(index), i + 1))
        }
    }
}

fn push_segment(at: &mut String, segment: &Segment) {
    match segment {
        Segment::Index(index) => at.push_str(&format!("[{index}]")),
        Segment::Key(key) if key.contains(['.', '[', ']']) || key.is_empty() => {
            at.push_str(&format!("[\"{key}\"]"))
        }
        Segment::Key(key) => {
            at.push('.');
            at.push_str(key);
        }
    }
}

/// Human name of a JSON value's type, used in diagnostics.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            f.write_str("$")
        } else {
            f.write_str(&self.raw)
        }
    }
}

impl FromStr for JsonPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JsonPath::parse(s)
    }
}

impl TryFrom<String> for JsonPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        JsonPath::parse(&value)
    }
}

impl From<JsonPath> for String {
    fn from(path: JsonPath) -> Self {
        path.raw
    }
}
