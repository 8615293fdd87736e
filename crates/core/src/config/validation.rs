//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use std::collections::HashSet;

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `generation` is empty or contains whitespace
    /// - a `manifest` entry is empty or not an absolute path
    /// - a `manifest` entry is listed twice
    /// - `origin` is not an http(s) URL
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `max_bytes` is 0 or exceeds 100MB
    /// - `user_agent` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.is_empty() {
            return Err(invalid("generation", "must not be empty"));
        }
        if self.generation.chars().any(char::is_whitespace) {
            return Err(invalid("generation", "must not contain whitespace"));
        }

        for path in &self.manifest {
            if !path.starts_with('/') {
                return Err(invalid("manifest", format!("{path:?} must be an absolute path")));
            }
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.manifest.iter().find(|path| !seen.insert(path.as_str())) {
            return Err(invalid("manifest", format!("{dup:?} is listed more than once")));
        }

        self.origin_url()?;

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 100 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 100MB"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        Ok(())
    }
}
