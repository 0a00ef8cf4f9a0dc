//! Request builder: turns a declarative [`Case`] into a concrete [`RequestSpec`].
//!
//! Building is pure. The same case, credentials, parameters and captures always
//! produce the same request, and a case that cannot be resolved yields a
//! [`ConfigError`] without ever reaching the execution engine.

use crate::capture::CaptureStore;
use crate::config::Credentials;
use crate::error::ConfigError;
use crate::placeholder::{render_str, render_value, Placeholder, Resolve};
use crate::suite::{Case, Expectation, Method, ParameterSet};
use reqwest::header::{HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// A fully resolved request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSpec {
    pub method: Method,
    /// Absolute URL including the encoded query string.
    pub url: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl RequestSpec {
    /// Equivalent curl command, single-quoted for POSIX shells.
    pub fn to_curl(&self) -> String {
        let mut cmd = format!("curl -X {}", self.method);

        for (name, value) in &self.headers {
            cmd.push_str(&format!(" -H {}", shell_quote(&format!("{name}: {value}"))));
        }

        if let Some(body) = &self.body {
            if !self
                .headers
                .keys()
                .any(|name| name.eq_ignore_ascii_case("content-type"))
            {
                cmd.push_str(" -H 'Content-Type: application/json'");
            }
            cmd.push_str(&format!(" -d {}", shell_quote(&body.to_string())));
        }

        cmd.push(' ');
        cmd.push_str(&shell_quote(&self.url));
        cmd
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Values available while building one case.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub credentials: &'a Credentials,
    pub parameters: Option<&'a ParameterSet>,
    /// `None` outside a sequence.
    pub captures: Option<&'a CaptureStore>,
    pub base_url: Option<&'a str>,
    /// Leave capture placeholders verbatim instead of resolving them (dry runs).
    pub defer_captures: bool,
}

impl<'a> BuildContext<'a> {
    pub fn new(credentials: &'a Credentials) -> Self {
        Self {
            credentials,
            parameters: None,
            captures: None,
            base_url: None,
            defer_captures: false,
        }
    }

    pub fn with_parameters(mut self, parameters: Option<&'a ParameterSet>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_captures(mut self, captures: &'a CaptureStore) -> Self {
        self.captures = Some(captures);
        self
    }

    pub fn with_base_url(mut self, base_url: Option<&'a str>) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn deferring_captures(mut self) -> Self {
        self.defer_captures = true;
        self
    }
}

impl Resolve for BuildContext<'_> {
    fn resolve(&self, placeholder: &Placeholder) -> Result<Option<Value>, ConfigError> {
        if placeholder.is_capture() && self.defer_captures {
            return Ok(None);
        }

        match placeholder {
            Placeholder::Config(key) => self
                .credentials
                .get(key)
                .map(|value| Some(Value::String(value.to_string())))
                .ok_or_else(|| ConfigError::UnknownCredential(key.clone())),
            Placeholder::Param(name) => {
                let value = self
                    .parameters
                    .and_then(|set| set.get(name))
                    .ok_or_else(|| ConfigError::UnknownParameter(name.clone()))?;
                // Parameter values may reference credentials, never other parameters.
                let scope = BuildContext {
                    parameters: None,
                    ..*self
                };
                render_value(value, &scope).map(Some)
            }
            Placeholder::Capture(name) => self
                .capture_store(placeholder)?
                .latest(name)
                .map(|value| Some(value.clone())),
            Placeholder::Step { index, name } => self
                .capture_store(placeholder)?
                .from_step(*index, name)
                .map(|value| Some(value.clone())),
            Placeholder::Env(_) => Err(ConfigError::PlaceholderNotAllowed {
                placeholder: placeholder.to_string(),
                context: "in case definitions",
            }),
        }
    }
}

impl BuildContext<'_> {
    fn capture_store(&self, placeholder: &Placeholder) -> Result<&CaptureStore, ConfigError> {
        self.captures
            .ok_or_else(|| ConfigError::PlaceholderNotAllowed {
                placeholder: placeholder.to_string(),
                context: "outside a sequence",
            })
    }
}

/// Resolve `case` into a request.
pub fn build_request(case: &Case, ctx: &BuildContext<'_>) -> Result<RequestSpec, ConfigError> {
    let mut url = join_url(ctx.base_url, &render_str(&case.url, ctx)?)?;

    if !case.query.is_empty() {
        let mut query = Vec::with_capacity(case.query.len());
        for (name, value) in &case.query {
            let value = render_str(value, ctx)?;
            query.push(format!(
                "{}={}",
                urlencoding::encode(name),
                urlencoding::encode(&value)
            ));
        }
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&query.join("&"));
    }

    let mut headers = BTreeMap::new();
    for (name, value) in &case.headers {
        let value = render_str(value, ctx)?;
        HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        HeaderValue::from_str(&value).map_err(|e| ConfigError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        headers.insert(name.clone(), value);
    }

    let body = case
        .body
        .as_ref()
        .map(|body| render_value(body, ctx))
        .transpose()?;

    Ok(RequestSpec {
        method: case.method,
        url,
        headers,
        body,
    })
}

/// Resolve placeholders in the case's expected values.
pub fn build_expectations(
    case: &Case,
    ctx: &BuildContext<'_>,
) -> Result<Vec<Expectation>, ConfigError> {
    case.expectations
        .iter()
        .map(|expectation| expectation.render(ctx))
        .collect()
}

fn join_url(base_url: Option<&str>, url: &str) -> Result<String, ConfigError> {
    let joined = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        let base = base_url.ok_or_else(|| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: "relative URL and no base_url configured".to_string(),
        })?;
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    };

    reqwest::Url::parse(&joined).map_err(|e| ConfigError::InvalidUrl {
        url: joined.clone(),
        reason: e.to_string(),
    })?;
    Ok(joined)
}
