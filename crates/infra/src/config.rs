//! Worker configuration loaded from the environment.

use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_secs(60);

pub const ENV_IDLE_BACKOFF_SECS: &str = "JOBLOOM_IDLE_BACKOFF_SECS";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_WORKER_NAME: &str = "JOBLOOM_WORKER_NAME";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// How long to sleep when a poll finds no candidates
    pub idle_backoff: Duration,
    /// PostgreSQL connection string; `None` selects the in-memory store
    pub database_url: Option<String>,
    /// Name for logging
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            database_url: None,
            name: "jobloom-worker".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_IDLE_BACKOFF_SECS) {
            let secs = raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                var: ENV_IDLE_BACKOFF_SECS,
                value: raw.clone(),
                reason: e.to_string(),
            })?;
            config.idle_backoff = Duration::from_secs(secs);
        }

        if let Some(url) = lookup(ENV_DATABASE_URL).filter(|u| !u.trim().is_empty()) {
            config.database_url = Some(url);
        }

        if let Some(name) = lookup(ENV_WORKER_NAME).filter(|n| !n.trim().is_empty()) {
            config.name = name;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = WorkerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.idle_backoff, Duration::from_secs(60));
    }

    #[test]
    fn reads_all_variables() {
        let config = WorkerConfig::from_lookup(lookup(&[
            (ENV_IDLE_BACKOFF_SECS, " 5 "),
            (ENV_DATABASE_URL, "postgres://localhost/jobs"),
            (ENV_WORKER_NAME, "mailer-1"),
        ]))
        .unwrap();
        assert_eq!(config.idle_backoff, Duration::from_secs(5));
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/jobs"));
        assert_eq!(config.name, "mailer-1");
    }

    #[test]
    fn rejects_non_numeric_backoff() {
        let err = WorkerConfig::from_lookup(lookup(&[(ENV_IDLE_BACKOFF_SECS, "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: ENV_IDLE_BACKOFF_SECS, .. }));
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        let config = WorkerConfig::from_lookup(lookup(&[(ENV_DATABASE_URL, "")])).unwrap();
        assert_eq!(config.database_url, None);
    }
}
