//! Error types shared across the contract runner.
//!
//! Three families exist and they never mix:
//! - [`LoadError`] is fatal and only raised while reading suites or configuration.
//! - [`ConfigError`] is reported against a single case and stops it before any
//!   network call.
//! - [`TransportError`] is recorded on an `ExecutionResult` and turned into
//!   failed expectations by the evaluator.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to load suites or the configuration file.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{}: {message}", path.display())]
    Invalid { path: PathBuf, message: String },
    #[error("{}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
    #[error("no suite files found in {}", .0.display())]
    Empty(PathBuf),
}

impl LoadError {
    pub(crate) fn invalid(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        LoadError::Invalid {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A case that cannot be turned into a concrete request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("malformed placeholder '{0}'")]
    MalformedPlaceholder(String),
    #[error("unknown credential '{0}'")]
    UnknownCredential(String),
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("environment variable '{0}' is not set")]
    UnknownEnvironmentVariable(String),
    #[error("unknown capture '{0}': no earlier step in the sequence declares it")]
    UnknownCapture(String),
    #[error("placeholder references step {index}, which has not executed (current step is {current})")]
    StepNotExecuted { index: usize, current: usize },
    #[error("capture source unavailable: step '{step}' did not yield a value for '{name}'")]
    CaptureUnavailable { step: String, name: String },
    #[error("placeholder '{placeholder}' cannot be used {context}")]
    PlaceholderNotAllowed {
        placeholder: String,
        context: &'static str,
    },
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },
}

/// Connection-level failure of a request.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Whether the engine may transparently retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::Timeout(_))
    }
}
