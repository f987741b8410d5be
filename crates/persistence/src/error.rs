//! Error types for the persistence layer.
//!
//! This module defines all error types used throughout the persistence layer,
//! following a hierarchy that separates schema errors, tenancy errors, search
//! compilation errors, resource state errors and store errors.
//!
//! Messages produced by [`SchemaError`] and [`TenancyError`] name the check
//! that failed. They never contain storage paths or identifiers taken from
//! the caller's identity.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all persistence operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Field access schema errors
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Tenant and audience isolation errors
    #[error(transparent)]
    Tenancy(#[from] TenancyError),

    /// Search compilation errors
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Resource state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Multi-document transaction errors
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Document store errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Request lifecycle errors (cancellation, deadlines)
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Input validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StorageError {
    /// Returns `true` if the store reported a unique-constraint violation.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StorageError::Backend(BackendError::DuplicateKey { .. }))
    }

    /// Returns `true` if the error is a tenancy rejection.
    pub fn is_tenancy(&self) -> bool {
        matches!(self, StorageError::Tenancy(_))
    }

    /// Returns `true` if retrying the same call may succeed.
    ///
    /// Only connectivity failures qualify. Retrying is always the caller's
    /// decision; nothing in this crate retries internally.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Backend(
                BackendError::Unavailable { .. } | BackendError::ConnectionFailed { .. }
            )
        )
    }
}

/// Errors raised while resolving or validating fields against a
/// [`FieldAccessSchema`](crate::schema::FieldAccessSchema).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A search term named no field.
    #[error("empty field name is not allowed")]
    EmptyField,

    /// The logical field does not exist on the entity.
    #[error("unknown field: {field}")]
    UnknownField { field: String },

    /// The field exists but is not whitelisted for querying.
    #[error("field not queryable: {field}")]
    FieldNotQueryable { field: String },

    /// No whitelisted field shares the wildcard's prefix.
    #[error("filtering on fields matching '{prefix}.*' is not permitted")]
    InvalidWildcard { prefix: String },

    /// Both pick and omit fields were requested.
    #[error("cannot specify both pick and omit fields")]
    PickOmitConflict,

    /// A schema declaration is inconsistent.
    #[error("invalid mapping for field {field}: {message}")]
    InvalidMapping { field: String, message: String },

    /// No schema was registered for the entity type.
    #[error("no field access schema registered for {entity_type}")]
    NotRegistered { entity_type: String },

    /// A schema was registered twice for the same entity type.
    #[error("field access schema already registered for {entity_type}")]
    AlreadyRegistered { entity_type: String },
}

/// Tenant and audience isolation failures.
///
/// Every variant aborts the operation before the store is contacted. The
/// variant identifies the level at which the check failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TenancyError {
    /// The tenant of the request could not be established or does not match.
    #[error("tenancy check failed at request-source level: {reason}")]
    RequestSource { reason: &'static str },

    /// The client application check failed.
    #[error("tenancy check failed at application level: {reason}")]
    ApplicationLevel { reason: &'static str },

    /// The group check failed.
    #[error("tenancy check failed at group level: {reason}")]
    GroupLevel { reason: &'static str },

    /// The user check failed.
    #[error("tenancy check failed at user level: {reason}")]
    UserLevel { reason: &'static str },

    /// Tenant-wide audiences are never served through the search compiler.
    #[error("tenancy check failed at admin level: tenant audience is not allowed")]
    Admin,

    /// The intended audience is not recognized.
    #[error("tenancy check failed: intended audience is invalid")]
    Unknown,
}

/// Errors raised while compiling a search into a pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// The requested page size is above the configured maximum.
    #[error("given page size {requested} exceeds the maximum limit of {max} records per request")]
    PageSizeExceeded { requested: u64, max: u64 },

    /// The operator is not part of the supported operator set.
    #[error("unsupported search operator: {operator}")]
    UnsupportedOperator { operator: String },

    /// A single-value operator was given no value.
    #[error("operator '{operator}' on field {field} requires at least one value")]
    MissingOperand { field: String, operator: String },

    /// Aggregations are nested deeper than the configured maximum.
    #[error("maximum aggregation depth {max} exceeded")]
    MaxDepthExceeded { max: usize },
}

/// Errors related to resource state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// The requested resource was not found (or is not visible to the caller).
    #[error("resource not found: {entity_type}/{id}")]
    NotFound { entity_type: String, id: String },

    /// A resource with the given key already exists.
    #[error("resource already exists: {entity_type}/{key}")]
    AlreadyExists { entity_type: String, key: String },

    /// The resource carries no owning tenant.
    #[error("resource {entity_type} has no owning tenant")]
    MissingTenant { entity_type: String },
}

/// Errors related to multi-document transactions.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// The transaction was rolled back; none of its writes were applied.
    #[error("transaction rolled back: {reason}")]
    RolledBack { reason: String },

    /// A transaction was requested with no operations.
    #[error("transaction has no operations")]
    EmptyBatch,
}

/// Errors originating from the document store.
#[derive(Error, Debug)]
pub enum BackendError {
    /// A unique constraint rejected the write.
    #[error("duplicate key in collection {collection}")]
    DuplicateKey { collection: String },

    /// The backend is currently unavailable.
    #[error("backend unavailable: {backend_name}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Query execution error.
    #[error("query execution failed: {message}")]
    QueryError { message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Errors related to the lifetime of a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// The request deadline passed before the store answered.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

/// Validation errors for caller-supplied input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing.
    #[error("missing required field: {field}")]
    MissingRequiredField { field: String },

    /// A value failed validation.
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Errors in repository configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Result type alias for persistence operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for StorageError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::{ErrorKind, WriteFailure};

        let duplicate = match err.kind.as_ref() {
            ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == 11000,
            ErrorKind::InsertMany(insert) => insert
                .write_errors
                .as_ref()
                .is_some_and(|errors| errors.iter().any(|e| e.code == 11000)),
            _ => false,
        };
        if duplicate {
            return StorageError::Backend(BackendError::DuplicateKey {
                collection: "unknown".to_string(),
            });
        }

        match err.kind.as_ref() {
            ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => {
                StorageError::Backend(BackendError::ConnectionFailed {
                    backend_name: "mongodb".to_string(),
                    message: err.to_string(),
                })
            }
            _ => StorageError::Backend(BackendError::Internal {
                backend_name: "mongodb".to_string(),
                message: err.to_string(),
                source: Some(Box::new(err)),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_error_display() {
        let err = StorageError::Resource(ResourceError::NotFound {
            entity_type: "players".to_string(),
            id: "123".to_string(),
        });
        assert_eq!(err.to_string(), "resource not found: players/123");
    }

    #[test]
    fn test_tenancy_error_display_names_level() {
        let err = TenancyError::RequestSource {
            reason: "tenant mismatch",
        };
        assert_eq!(
            err.to_string(),
            "tenancy check failed at request-source level: tenant mismatch"
        );
        assert!(TenancyError::Admin.to_string().contains("admin level"));
    }

    #[test]
    fn test_page_size_error_display() {
        let err = SearchError::PageSizeExceeded {
            requested: 201,
            max: 200,
        };
        assert!(err.to_string().contains("201"));
        assert!(err.to_string().contains("200"));
    }

    #[test]
    fn test_classification() {
        let dup: StorageError = BackendError::DuplicateKey {
            collection: "wallets".to_string(),
        }
        .into();
        assert!(dup.is_duplicate_key());
        assert!(!dup.is_transient());

        let down: StorageError = BackendError::Unavailable {
            backend_name: "memory".to_string(),
            message: "closed".to_string(),
        }
        .into();
        assert!(down.is_transient());

        let tenancy: StorageError = TenancyError::Unknown.into();
        assert!(tenancy.is_tenancy());
    }

    #[test]
    fn test_serde_error_maps_to_serialization() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        let storage: StorageError = err.into();
        assert!(matches!(
            storage,
            StorageError::Backend(BackendError::SerializationError { .. })
        ));
    }
}
