//! Credentials and run settings.
//!
//! The core never reads files on its own: the CLI loads a [`ConfigFile`], turns
//! it into [`Credentials`] and [`RunSettings`], and hands both to the runner.
//!
//! ```yaml
//! credentials:
//!   GOOGLE_API_KEY: ${env.GOOGLE_API_KEY}
//!   PLACE_ID: ChIJ...
//! settings:
//!   timeout_secs: 10
//!   workers: 4
//!   retry: true
//!   deadline_secs: 300
//! ```

use crate::error::{ConfigError, LoadError};
use crate::placeholder::{render_str, Placeholder, Resolve};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default number of units executed concurrently.
pub const DEFAULT_WORKERS: usize = 4;

/// Resolved secrets and fixed identifiers, addressed as `${config.KEY}`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    values: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Later entries win.
    pub fn extend<I, K, V>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in entries {
            self.values.insert(key.into(), value.into());
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Credentials {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut credentials = Credentials::new();
        credentials.extend(iter);
        credentials
    }
}

// Values are secrets; only keys are printed.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Runner knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub request_timeout: Duration,
    pub workers: usize,
    /// Retry once on connect failures and timeouts.
    pub retry_connect_failures: bool,
    /// Global deadline for scheduling new units, measured from run start.
    pub deadline: Option<Duration>,
    /// Overrides every suite's `base_url`.
    pub base_url: Option<String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_TIMEOUT,
            workers: DEFAULT_WORKERS,
            retry_connect_failures: true,
            deadline: None,
            base_url: None,
        }
    }
}

/// `settings:` block of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsFile {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub retry: Option<bool>,
    #[serde(default)]
    pub deadline_secs: Option<u64>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// On-disk configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
    #[serde(default)]
    pub settings: SettingsFile,
}

impl ConfigFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml_str(&contents, path)
    }

    pub fn from_yaml_str(contents: &str, source: &Path) -> Result<Self, LoadError> {
        // An empty document deserializes as unit; treat it as an empty config.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: ConfigFile = serde_yaml::from_str(contents).map_err(|e| LoadError::Parse {
            path: source.to_path_buf(),
            source: e,
        })?;
        if config.settings.workers == Some(0) {
            return Err(LoadError::invalid(source, "settings.workers must be at least 1"));
        }
        if config.settings.timeout_secs == Some(0) {
            return Err(LoadError::invalid(source, "settings.timeout_secs must be at least 1"));
        }
        Ok(config)
    }

    /// Credentials with `${env.NAME}` references expanded.
    pub fn credentials(&self, source: &Path) -> Result<Credentials, LoadError> {
        let resolver = EnvResolver;
        self.credentials
            .iter()
            .map(|(key, value)| {
                render_str(value, &resolver)
                    .map(|rendered| (key.clone(), rendered))
                    .map_err(|e| LoadError::Config {
                        path: source.to_path_buf(),
                        source: e,
                    })
            })
            .collect()
    }

    /// Overlay file settings onto `settings`.
    pub fn apply_to(&self, settings: &mut RunSettings) {
        let file = &self.settings;
        if let Some(secs) = file.timeout_secs {
            settings.request_timeout = Duration::from_secs(secs);
        }
        if let Some(workers) = file.workers {
            settings.workers = workers;
        }
        if let Some(retry) = file.retry {
            settings.retry_connect_failures = retry;
        }
        if let Some(secs) = file.deadline_secs {
            settings.deadline = Some(Duration::from_secs(secs));
        }
        if let Some(base_url) = &file.base_url {
            settings.base_url = Some(base_url.clone());
        }
    }
}

/// Resolves `${env.NAME}` only.
struct EnvResolver;

impl Resolve for EnvResolver {
    fn resolve(&self, placeholder: &Placeholder) -> Result<Option<Value>, ConfigError> {
        match placeholder {
            Placeholder::Env(name) => std::env::var(name)
                .map(|value| Some(Value::String(value)))
                .map_err(|_| ConfigError::UnknownEnvironmentVariable(name.clone())),
            other => Err(ConfigError::PlaceholderNotAllowed {
                placeholder: other.to_string(),
                context: "in configuration files",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = RunSettings::default();
        assert_eq!(settings.request_timeout, Duration::from_secs(10));
        assert_eq!(settings.workers, 4);
        assert!(settings.retry_connect_failures);
        assert!(settings.deadline.is_none());
    }

    #[test]
    fn test_config_file_applies_settings() {
        let config = ConfigFile::from_yaml_str(
            "settings:\n  timeout_secs: 3\n  workers: 2\n  retry: false\n  deadline_secs: 60\n",
            Path::new("config.yaml"),
        )
        .unwrap();
        let mut settings = RunSettings::default();
        config.apply_to(&mut settings);
        assert_eq!(settings.request_timeout, Duration::from_secs(3));
        assert_eq!(settings.workers, 2);
        assert!(!settings.retry_connect_failures);
        assert_eq!(settings.deadline, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_credentials_expand_environment() {
        std::env::set_var("RIFT_CONTRACT_TEST_TOKEN", "t0k3n");
        let config = ConfigFile::from_yaml_str(
            "credentials:\n  BEARER_TOKEN: \"${env.RIFT_CONTRACT_TEST_TOKEN}\"\n  PLACE_ID: abc\n",
            Path::new("config.yaml"),
        )
        .unwrap();
        let credentials = config.credentials(Path::new("config.yaml")).unwrap();
        assert_eq!(credentials.get("BEARER_TOKEN"), Some("t0k3n"));
        assert_eq!(credentials.get("PLACE_ID"), Some("abc"));
    }

    #[test]
    fn test_credentials_reject_missing_env_and_other_scopes() {
        let config = ConfigFile::from_yaml_str(
            "credentials:\n  A: \"${env.RIFT_CONTRACT_SURELY_UNSET_VAR}\"\n",
            Path::new("config.yaml"),
        )
        .unwrap();
        assert!(config.credentials(Path::new("config.yaml")).is_err());

        let config = ConfigFile::from_yaml_str(
            "credentials:\n  A: \"${capture.id}\"\n",
            Path::new("config.yaml"),
        )
        .unwrap();
        let err = config.credentials(Path::new("config.yaml")).unwrap_err();
        assert!(err.to_string().contains("cannot be used in configuration files"));
    }

    #[test]
    fn test_rejects_unknown_keys_and_zero_workers() {
        assert!(ConfigFile::from_yaml_str("credential: {}\n", Path::new("c.yaml")).is_err());
        assert!(
            ConfigFile::from_yaml_str("settings:\n  workers: 0\n", Path::new("c.yaml")).is_err()
        );
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = ConfigFile::from_yaml_str("settings:\n  timeout_secs: 0\n", Path::new("c.yaml"))
            .unwrap_err();
        assert!(err.to_string().contains("timeout_secs must be at least 1"), "{err}");
        assert!(
            ConfigFile::from_yaml_str("settings:\n  timeout_secs: 1\n", Path::new("c.yaml")).is_ok()
        );
    }

    #[test]
    fn test_empty_file_is_empty_config() {
        let config = ConfigFile::from_yaml_str("  \n", Path::new("c.yaml")).unwrap();
        assert!(config.credentials.is_empty());
    }

    #[test]
    fn test_credentials_debug_hides_values() {
        let credentials = Credentials::new().with("API_KEY", "super-secret");
        let debug = format!("{credentials:?}");
        assert!(debug.contains("API_KEY"));
        assert!(!debug.contains("super-secret"));
    }
}
