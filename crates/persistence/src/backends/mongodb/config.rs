//! MongoDB connection settings.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Connection settings for [`MongoStore`](super::MongoStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MongoConfig {
    /// Connection string.
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Database holding the collections.
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_database() -> String {
    "arena".to_string()
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            database: default_database(),
        }
    }
}

impl MongoConfig {
    /// Creates settings for a connection string and database.
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
        }
    }

    /// Reads `ARENA_MONGODB_URI` and `ARENA_MONGODB_DATABASE`, falling back
    /// to the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            uri: lookup("ARENA_MONGODB_URI").unwrap_or_else(default_uri),
            database: lookup("ARENA_MONGODB_DATABASE").unwrap_or_else(default_database),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that the settings can be used to connect.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.uri.starts_with("mongodb://") && !self.uri.starts_with("mongodb+srv://") {
            return Err(ConfigError::InvalidValue {
                key: "ARENA_MONGODB_URI".to_string(),
                message: "expected a mongodb:// or mongodb+srv:// connection string".to_string(),
            });
        }
        if self.database.is_empty() || self.database.contains(['/', '.', ' ', '$']) {
            return Err(ConfigError::InvalidValue {
                key: "ARENA_MONGODB_DATABASE".to_string(),
                message: "invalid database name".to_string(),
            });
        }
        Ok(())
    }
}
