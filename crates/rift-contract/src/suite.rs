//! Declarative suite definitions: cases, sequences, expectations and captures.
//!
//! Suites are YAML documents (JSON works too, being a YAML subset):
//!
//! ```yaml
//! name: reqres
//! base_url: https://reqres.in/api
//! cases:
//!   - id: obtain-user
//!     method: GET
//!     url: /users/2
//!     expect:
//!       - kind: status_equals
//!         expected: 200
//!       - kind: field_equals
//!         path: data.email
//!         expected: janet.weaver@reqres.in
//! sequences:
//!   - id: user-lifecycle
//!     abort_on_failure: true
//!     steps:
//!       - id: create
//!         method: POST
//!         url: /users
//!         body: {name: qa}
//!         capture:
//!           - name: userId
//!             path: id
//!       - id: delete
//!         method: DELETE
//!         url: /users/${capture.userId}
//! ```

use crate::error::{ConfigError, LoadError};
use crate::json_path::JsonPath;
use crate::placeholder::{render_value, Resolve};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// One set of values for a parametrized case.
pub type ParameterSet = BTreeMap<String, Value>;

/// HTTP method of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    pub fn parse(method: &str) -> Result<Self, String> {
        match method.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            _ => Err(format!("invalid HTTP method '{method}'")),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Method {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Method::parse(&value)
    }
}

impl From<Method> for String {
    fn from(method: Method) -> Self {
        method.as_str().to_string()
    }
}

/// A single declarative expectation on a response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expectation {
    /// Response status code equals `expected`.
    StatusEquals { expected: u16 },
    /// `path` resolves in the JSON body (a `null` value counts as present).
    FieldPresent { path: JsonPath },
    /// The value at `path` equals `expected`.
    FieldEquals { path: JsonPath, expected: Value },
    /// Substring of a string, element of an array, or value of an object.
    FieldContains { path: JsonPath, expected: Value },
}

impl Expectation {
    /// Resolve placeholders in the expected value.
    pub fn render<R: Resolve + ?Sized>(&self, resolver: &R) -> Result<Self, ConfigError> {
        Ok(match self {
            Expectation::FieldEquals { path, expected } => Expectation::FieldEquals {
                path: path.clone(),
                expected: render_value(expected, resolver)?,
            },
            Expectation::FieldContains { path, expected } => Expectation::FieldContains {
                path: path.clone(),
                expected: render_value(expected, resolver)?,
            },
            other => other.clone(),
        })
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::StatusEquals { expected } => write!(f, "status == {expected}"),
            Expectation::FieldPresent { path } => write!(f, "{path} present"),
            Expectation::FieldEquals { path, expected } => write!(f, "{path} == {expected}"),
            Expectation::FieldContains { path, expected } => {
                write!(f, "{path} contains {expected}")
            }
        }
    }
}

/// Named extraction applied to a step's response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Capture {
    pub name: String,
    pub path: JsonPath,
}

/// One declarative HTTP request plus its expectations.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Case {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub method: Method,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Only meaningful for sequence steps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capture: Vec<Capture>,
    #[serde(default, rename = "expect")]
    pub expectations: Vec<Expectation>,
    /// Each entry produces one concrete case (standalone cases only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterSet>,
}

impl Case {
    pub fn is_parametrized(&self) -> bool {
        !self.parameters.is_empty()
    }
}

/// Ordered group of cases sharing captured values.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Sequence {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Skip the remaining steps once one fails.
    #[serde(default)]
    pub abort_on_failure: bool,
    pub steps: Vec<Case>,
}

impl Sequence {
    pub fn step_id(&self, step: &Case) -> String {
        format!("{}/{}", self.id, step.id)
    }
}

/// A suite document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Suite {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Joined with relative case URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub cases: Vec<Case>,
    #[serde(default)]
    pub sequences: Vec<Sequence>,
    #[serde(skip)]
    pub source: PathBuf,
}

impl Suite {
    /// Parse and validate a suite document.
    pub fn from_yaml_str(content: &str, source: &Path) -> Result<Self, LoadError> {
        let mut suite: Suite = serde_yaml::from_str(content).map_err(|e| LoadError::Parse {
            path: source.to_path_buf(),
            source: e,
        })?;
        suite.source = source.to_path_buf();
        suite.validate()?;
        Ok(suite)
    }

    /// Structural checks that make a suite unloadable.
    pub fn validate(&self) -> Result<(), LoadError> {
        let path = &self.source;
        let mut ids = HashSet::new();

        if let Some(base) = &self.base_url {
            if !base.starts_with("http://") && !base.starts_with("https://") {
                return Err(LoadError::invalid(
                    path,
                    format!("base_url '{base}' must start with http:// or https://"),
                ));
            }
        }

        for case in &self.cases {
            check_id(path, &case.id, "case")?;
            if !ids.insert(case.id.as_str()) {
                return Err(LoadError::invalid(
                    path,
                    format!("duplicate id '{}'", case.id),
                ));
            }
            if !case.capture.is_empty() {
                return Err(LoadError::invalid(
                    path,
                    format!(
                        "case '{}': captures are only available to sequence steps",
                        case.id
                    ),
                ));
            }
        }

        for sequence in &self.sequences {
            check_id(path, &sequence.id, "sequence")?;
            if !ids.insert(sequence.id.as_str()) {
                return Err(LoadError::invalid(
                    path,
                    format!("duplicate id '{}'", sequence.id),
                ));
            }
            if sequence.steps.is_empty() {
                return Err(LoadError::invalid(
                    path,
                    format!("sequence '{}' has no steps", sequence.id),
                ));
            }

            let mut step_ids = HashSet::new();
            for step in &sequence.steps {
                check_id(path, &step.id, "step")?;
                if !step_ids.insert(step.id.as_str()) {
                    return Err(LoadError::invalid(
                        path,
                        format!("duplicate step id '{}'", sequence.step_id(step)),
                    ));
                }
                if step.is_parametrized() {
                    return Err(LoadError::invalid(
                        path,
                        format!(
                            "step '{}': parameters are only supported on standalone cases",
                            sequence.step_id(step)
                        ),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Runnable units in declaration order, parametrized cases expanded.
    pub fn units(&self) -> Vec<Unit> {
        let mut units = Vec::new();

        for case in &self.cases {
            if case.is_parametrized() {
                for (index, parameters) in case.parameters.iter().enumerate() {
                    units.push(Unit {
                        id: format!("{}[{index}]", case.id),
                        base_url: self.base_url.clone(),
                        kind: UnitKind::Case {
                            case: case.clone(),
                            parameters: Some(parameters.clone()),
                        },
                    });
                }
            } else {
                units.push(Unit {
                    id: case.id.clone(),
                    base_url: self.base_url.clone(),
                    kind: UnitKind::Case {
                        case: case.clone(),
                        parameters: None,
                    },
                });
            }
        }

        for sequence in &self.sequences {
            units.push(Unit {
                id: sequence.id.clone(),
                base_url: self.base_url.clone(),
                kind: UnitKind::Sequence(sequence.clone()),
            });
        }

        units
    }
}

fn check_id(path: &Path, id: &str, what: &str) -> Result<(), LoadError> {
    if id.trim().is_empty() {
        return Err(LoadError::invalid(path, format!("{what} with an empty id")));
    }
    if id.contains('/') {
        return Err(LoadError::invalid(
            path,
            format!("{what} id '{id}' must not contain '/'"),
        ));
    }
    Ok(())
}

/// What a unit executes.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitKind {
    Case {
        case: Case,
        parameters: Option<ParameterSet>,
    },
    Sequence(Sequence),
}

/// An independently schedulable piece of work: a standalone case or a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub id: String,
    pub base_url: Option<String>,
    pub kind: UnitKind,
}

impl Unit {
    pub fn tags(&self) -> &[String] {
        match &self.kind {
            UnitKind::Case { case, .. } => &case.tags,
            UnitKind::Sequence(sequence) => &sequence.tags,
        }
    }

    /// Ids a selection pattern is matched against.
    pub fn selectable_ids(&self) -> Vec<String> {
        let mut ids = vec![self.id.clone()];
        if let UnitKind::Sequence(sequence) = &self.kind {
            ids.extend(sequence.steps.iter().map(|step| sequence.step_id(step)));
        }
        ids
    }
}

/// Which units to run.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub pattern: Option<Regex>,
    pub tags: Vec<String>,
}

impl Selection {
    pub fn matches(&self, unit: &Unit) -> bool {
        let id_matches = self.pattern.as_ref().is_none_or(|pattern| {
            unit.selectable_ids()
                .iter()
                .any(|id| pattern.is_match(id))
        });
        let tag_matches =
            self.tags.is_empty() || unit.tags().iter().any(|tag| self.tags.contains(tag));
        id_matches && tag_matches
    }

    pub fn apply(&self, units: Vec<Unit>) -> Vec<Unit> {
        units.into_iter().filter(|unit| self.matches(unit)).collect()
    }
}

/// Load a single suite file.
pub fn load_suite(path: &Path) -> Result<Suite, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Suite::from_yaml_str(&content, path)
}

fn is_suite_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml" || ext == "json")
}

/// Load a suite file, or every suite file in a directory (non-recursive, sorted).
pub fn load_suites(path: &Path) -> Result<Vec<Suite>, LoadError> {
    if path.is_file() {
        return Ok(vec![load_suite(path)?]);
    }

    let entries = std::fs::read_dir(path).map_err(|e| LoadError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_suite_file(p))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(LoadError::Empty(path.to_path_buf()));
    }

    files.iter().map(|file| load_suite(file)).collect()
}

/// Load every path and reject unit ids declared more than once.
pub fn load_all(paths: &[PathBuf]) -> Result<Vec<Suite>, LoadError> {
    let mut suites = Vec::new();
    for path in paths {
        suites.extend(load_suites(path)?);
    }

    let mut seen: BTreeMap<String, PathBuf> = BTreeMap::new();
    for suite in &suites {
        let ids = suite
            .cases
            .iter()
            .map(|c| &c.id)
            .chain(suite.sequences.iter().map(|s| &s.id));
        for id in ids {
            if let Some(first) = seen.insert(id.clone(), suite.source.clone()) {
                return Err(LoadError::invalid(
                    &suite.source,
                    format!("id '{id}' is already declared in {}", first.display()),
                ));
            }
        }
    }

    Ok(suites)
}

/// Units of all suites, in load order.
pub fn collect_units(suites: &[Suite]) -> Vec<Unit> {
    suites.iter().flat_map(Suite::units).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const SUITE: &str = r#"
name: reqres
base_url: https://reqres.in/api
cases:
  - id: obtain-user
    tags: [smoke]
    url: /users/2
    expect:
      - kind: status_equals
        expected: 200
      - kind: field_equals
        path: data.email
        expected: janet.weaver@reqres.in
  - id: geocode
    url: /geocode/json
    query:
      address: "${param.address}"
    parameters:
      - {address: "residencial villa bonita, cartago"}
      - {address: "UCR, Cartago"}
sequences:
  - id: lifecycle
    tags: [crud]
    abort_on_failure: true
    steps:
      - id: create
        method: post
        url: /users
        body: {name: qa}
        capture:
          - name: userId
            path: id
      - id: delete
        method: DELETE
        url: /users/${capture.userId}
"#;

    fn parse(content: &str) -> Result<Suite, LoadError> {
        Suite::from_yaml_str(content, Path::new("suite.yaml"))
    }

    #[test]
    fn test_parse_suite() {
        let suite = parse(SUITE).unwrap();
        assert_eq!(suite.name.as_deref(), Some("reqres"));
        assert_eq!(suite.cases.len(), 2);
        assert_eq!(suite.cases[0].method, Method::Get);
        assert_eq!(
            suite.cases[0].expectations[1],
            Expectation::FieldEquals {
                path: JsonPath::parse("data.email").unwrap(),
                expected: json!("janet.weaver@reqres.in"),
            }
        );
        let sequence = &suite.sequences[0];
        assert!(sequence.abort_on_failure);
        assert_eq!(sequence.steps[0].method, Method::Post);
        assert_eq!(sequence.steps[0].capture[0].name, "userId");
    }

    #[test]
    fn test_units_expand_parameters_in_order() {
        let suite = parse(SUITE).unwrap();
        let ids: Vec<_> = suite.units().into_iter().map(|u| u.id).collect();
        assert_eq!(ids, ["obtain-user", "geocode[0]", "geocode[1]", "lifecycle"]);
    }

    #[test]
    fn test_units_carry_their_parameter_set() {
        let suite = parse(SUITE).unwrap();
        let units = suite.units();
        match &units[2].kind {
            UnitKind::Case { parameters, .. } => {
                assert_eq!(
                    parameters.as_ref().unwrap().get("address"),
                    Some(&json!("UCR, Cartago"))
                );
            }
            other => panic!("expected a case, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_invalid_method() {
        let err = parse("cases:\n  - id: a\n    method: FETCH\n    url: /x\n").unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
    }

    #[test]
    fn test_rejects_invalid_path() {
        let content = "cases:\n  - id: a\n    url: /x\n    expect:\n      - kind: field_present\n        path: a..b\n";
        assert!(matches!(parse(content), Err(LoadError::Parse { .. })));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let content = "cases:\n  - id: a\n    url: /x\nsequences:\n  - id: a\n    steps:\n      - id: s\n        url: /y\n";
        let err = parse(content).unwrap_err();
        assert!(err.to_string().contains("duplicate id 'a'"));
    }

    #[test]
    fn test_rejects_parameters_on_steps() {
        let content = "sequences:\n  - id: s\n    steps:\n      - id: a\n        url: /x\n        parameters:\n          - {x: 1}\n";
        let err = parse(content).unwrap_err();
        assert!(err.to_string().contains("parameters are only supported"));
    }

    #[test]
    fn test_rejects_captures_on_standalone_cases() {
        let content = "cases:\n  - id: a\n    url: /x\n    capture:\n      - name: id\n        path: id\n";
        let err = parse(content).unwrap_err();
        assert!(err.to_string().contains("only available to sequence steps"));
    }

    #[test]
    fn test_rejects_empty_sequences_and_bad_base_url() {
        assert!(parse("sequences:\n  - id: s\n    steps: []\n").is_err());
        assert!(parse("base_url: reqres.in\n").is_err());
    }

    #[test]
    fn test_selection_by_pattern_and_tag() {
        let units = parse(SUITE).unwrap().units();

        let by_step = Selection {
            pattern: Some(Regex::new("lifecycle/delete").unwrap()),
            tags: vec![],
        };
        let ids: Vec<_> = by_step.apply(units.clone()).into_iter().map(|u| u.id).collect();
        assert_eq!(ids, ["lifecycle"]);

        let by_tag = Selection {
            pattern: None,
            tags: vec!["smoke".into()],
        };
        let ids: Vec<_> = by_tag.apply(units.clone()).into_iter().map(|u| u.id).collect();
        assert_eq!(ids, ["obtain-user"]);

        let everything = Selection::default();
        assert_eq!(everything.apply(units).len(), 4);
    }

    #[test]
    fn test_load_directory_sorted_and_rejects_cross_file_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = std::fs::File::create(dir.path().join("b.yaml")).unwrap();
        writeln!(b, "cases:\n  - id: second\n    url: http://localhost/b").unwrap();
        let mut a = std::fs::File::create(dir.path().join("a.yml")).unwrap();
        writeln!(a, "cases:\n  - id: first\n    url: http://localhost/a").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let suites = load_suites(dir.path()).unwrap();
        let ids: Vec<_> = collect_units(&suites).into_iter().map(|u| u.id).collect();
        assert_eq!(ids, ["first", "second"]);

        let dup = dir.path().join("dup.json");
        std::fs::write(&dup, r#"{"cases": [{"id": "first", "url": "http://localhost/c"}]}"#)
            .unwrap();
        let err = load_all(&[dir.path().to_path_buf()]).unwrap_err();
        assert!(err.to_string().contains("id 'first' is already declared"));
    }

    #[test]
    fn test_load_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_suites(dir.path()),
            Err(LoadError::Empty(_))
        ));
    }
}
