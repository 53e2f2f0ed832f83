// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

/// Strata engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Maximum accepted state payload size in bytes
    pub max_state_bytes: usize,
    /// Default page size for list operations
    pub default_page_size: i64,
}

/// Default maximum state payload size (10 MiB).
pub const DEFAULT_MAX_STATE_BYTES: usize = 10 * 1024 * 1024;

/// Default page size for list operations.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `STRATA_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `STRATA_MAX_STATE_BYTES`: maximum state payload size (default: 10485760)
    /// - `STRATA_PAGE_SIZE`: default list page size (default: 20)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("STRATA_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("STRATA_DATABASE_URL"))?;

        let max_state_bytes: usize = std::env::var("STRATA_MAX_STATE_BYTES")
            .unwrap_or_else(|_| DEFAULT_MAX_STATE_BYTES.to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("STRATA_MAX_STATE_BYTES", "must be a positive integer")
            })?;

        let default_page_size: i64 = std::env::var("STRATA_PAGE_SIZE")
            .unwrap_or_else(|_| DEFAULT_PAGE_SIZE.to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("STRATA_PAGE_SIZE", "must be a positive integer"))?;
        if default_page_size <= 0 {
            return Err(ConfigError::Invalid(
                "STRATA_PAGE_SIZE",
                "must be a positive integer",
            ));
        }

        Ok(Self {
            database_url,
            max_state_bytes,
            default_page_size,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_state_bytes: DEFAULT_MAX_STATE_BYTES,
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
