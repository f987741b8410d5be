//! Repository configuration.
//!
//! [`RepositoryConfig`] holds the limits the query compiler enforces and the
//! defaults a repository applies. It can be built programmatically or read
//! from the environment.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `ARENA_DEFAULT_PAGE_SIZE` | 50 | Limit used when a search asks for 0 |
//! | `ARENA_MAX_PAGE_SIZE` | 200 | Largest accepted limit |
//! | `ARENA_MAX_RECURSION_DEPTH` | 10 | Deepest accepted aggregation nesting |
//! | `ARENA_DEPTH_OVERFLOW` | reject | `reject` or `drop` |
//! | `ARENA_DEFAULT_AUDIENCE` | UserAudience | Audience of searches built by `compile` |
//! | `ARENA_QUERY_TIMEOUT` | unset | Per-call store timeout, e.g. `5s` or `250ms` |
//!
//! # Example
//!
//! ```rust
//! use arena_persistence::config::{DepthOverflow, RepositoryConfig};
//!
//! let config = RepositoryConfig {
//!     max_page_size: 100,
//!     depth_overflow: DepthOverflow::Reject,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, StorageResult};
use crate::tenant::IntendedAudience;

/// Page size used when a search does not ask for one.
pub const DEFAULT_PAGE_SIZE: u64 = 50;

/// Largest page size a search may ask for.
pub const MAX_PAGE_SIZE: u64 = 200;

/// Deepest nesting of aggregations the compiler accepts.
pub const MAX_RECURSION_DEPTH: usize = 10;

/// What the compiler does with aggregations nested too deeply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DepthOverflow {
    /// Fail compilation with `SearchError::MaxDepthExceeded`.
    #[default]
    Reject,
    /// Drop the offending subtree and log a warning.
    DropWithWarning,
}

/// Configuration shared by the query compiler and repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Limit applied when a search asks for 0.
    pub default_page_size: u64,

    /// Largest accepted limit.
    pub max_page_size: u64,

    /// Deepest accepted aggregation nesting.
    pub max_recursion_depth: usize,

    /// Behaviour when nesting exceeds `max_recursion_depth`.
    pub depth_overflow: DepthOverflow,

    /// Audience of searches built through `Repository::compile`.
    pub default_audience: IntendedAudience,

    /// Timeout applied to every store call, on top of any request deadline.
    pub query_timeout: Option<Duration>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            max_recursion_depth: MAX_RECURSION_DEPTH,
            depth_overflow: DepthOverflow::Reject,
            default_audience: IntendedAudience::User,
            query_timeout: None,
        }
    }
}

impl RepositoryConfig {
    /// Reads the configuration from `ARENA_*` environment variables.
    ///
    /// Unset variables keep their defaults. The result is validated.
    pub fn from_env() -> StorageResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> StorageResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("ARENA_DEFAULT_PAGE_SIZE") {
            config.default_page_size = parse_number("ARENA_DEFAULT_PAGE_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("ARENA_MAX_PAGE_SIZE") {
            config.max_page_size = parse_number("ARENA_MAX_PAGE_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("ARENA_MAX_RECURSION_DEPTH") {
            config.max_recursion_depth = parse_number("ARENA_MAX_RECURSION_DEPTH", &raw)?;
        }
        if let Some(raw) = lookup("ARENA_DEPTH_OVERFLOW") {
            config.depth_overflow = match raw.trim().to_ascii_lowercase().as_str() {
                "reject" => DepthOverflow::Reject,
                "drop" | "drop_with_warning" => DepthOverflow::DropWithWarning,
                _ => return Err(invalid("ARENA_DEPTH_OVERFLOW", "expected 'reject' or 'drop'")),
            };
        }
        if let Some(raw) = lookup("ARENA_DEFAULT_AUDIENCE") {
            config.default_audience = match raw.trim().parse::<IntendedAudience>() {
                Ok(IntendedAudience::Unknown) | Err(_) => {
                    return Err(invalid("ARENA_DEFAULT_AUDIENCE", "unknown audience"));
                }
                Ok(audience) => audience,
            };
        }
        if let Some(raw) = lookup("ARENA_QUERY_TIMEOUT") {
            let timeout = humantime::parse_duration(raw.trim())
                .map_err(|e| invalid("ARENA_QUERY_TIMEOUT", &e.to_string()))?;
            config.query_timeout = Some(timeout);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates configuration invariants.
    pub fn validate(&self) -> StorageResult<()> {
        if self.max_page_size == 0 {
            return Err(invalid("max_page_size", "must be positive"));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(invalid(
                "default_page_size",
                "must be positive and at most max_page_size",
            ));
        }
        if self.max_recursion_depth == 0 {
            return Err(invalid("max_recursion_depth", "must be positive"));
        }
        if matches!(
            self.default_audience,
            IntendedAudience::Tenant | IntendedAudience::Unknown
        ) {
            return Err(invalid(
                "default_audience",
                "tenant-wide and unknown audiences cannot be a default",
            ));
        }
        if self.query_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("query_timeout", "must be non-zero"));
        }
        Ok(())
    }
}

fn parse_number<N: std::str::FromStr>(key: &str, raw: &str) -> StorageResult<N> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(key, "expected a non-negative integer"))
}

fn invalid(key: &str, message: &str) -> crate::error::StorageError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
    .into()
}
