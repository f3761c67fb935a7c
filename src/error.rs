//! Error types for the idempotency engine.
//!
//! Two layers of errors exist:
//!
//! - [`StoreError`] is the vocabulary of the persistence contract. Adapters
//!   return it; the engine interprets it. `AlreadyExists` is the engine's
//!   mutual-exclusion signal and never reaches callers.
//! - [`IdempotencyError`] is what [`Coordinator::execute`](crate::Coordinator::execute)
//!   returns. Every variant carries an explicit [`ErrorKind`] tag so retry
//!   decisions never depend on inspecting concrete types.

use std::error::Error as StdError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::Record;

/// Boxed error type used for wrapped-operation failures and adapter causes.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors returned by a [`PersistenceStore`](crate::persistence::PersistenceStore) adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A live record already exists for this key; the conditional create lost.
    ///
    /// Adapters whose conditional write returns the conflicting item (for
    /// example DynamoDB's `ReturnValuesOnConditionCheckFailure`) should attach
    /// it so the engine can skip a read.
    #[error("Record already exists for idempotency key: {key}")]
    AlreadyExists {
        /// The contested key
        key: String,
        /// The existing record, when the store returned it
        existing: Option<Box<Record>>,
    },

    /// No record exists for the key.
    #[error("Record not found for idempotency key: {key}")]
    NotFound {
        /// The key that was looked up
        key: String,
    },

    /// Any other adapter failure.
    #[error("Persistence backend error: {message}")]
    Backend {
        /// Description of the failure
        message: String,
        /// The adapter's underlying error, if any
        #[source]
        source: Option<BoxError>,
    },
}

impl StoreError {
    /// Creates an `AlreadyExists` error without the existing record.
    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            key: key.into(),
            existing: None,
        }
    }

    /// Creates an `AlreadyExists` error carrying the existing record.
    pub fn already_exists_with(record: Record) -> Self {
        Self::AlreadyExists {
            key: record.key.clone(),
            existing: Some(Box::new(record)),
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a `Backend` error with no underlying cause.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a `Backend` error wrapping the adapter's original error.
    pub fn backend_with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns true if this is the conditional-create conflict.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns true if the record was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Explicit classification of an [`IdempotencyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Another execution holds the key and is within its time budget
    AlreadyInProgress,
    /// The stored record contradicts the outcome of the conditional create
    InconsistentState,
    /// Same key, different payload
    Validation,
    /// The key expression produced no data and a key was required
    MissingKey,
    /// Unexpected persistence failure
    Persistence,
    /// Invalid engine configuration
    Configuration,
    /// Input or response could not be represented as JSON
    Serialization,
    /// The wrapped operation itself failed
    Operation,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AlreadyInProgress => "IdempotencyAlreadyInProgressError",
            Self::InconsistentState => "IdempotencyInconsistentStateError",
            Self::Validation => "IdempotencyValidationError",
            Self::MissingKey => "IdempotencyKeyError",
            Self::Persistence => "IdempotencyPersistenceLayerError",
            Self::Configuration => "IdempotencyConfigurationError",
            Self::Serialization => "IdempotencySerializationError",
            Self::Operation => "OperationError",
        };
        f.write_str(name)
    }
}

/// The main error type returned by the idempotency engine.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// A concurrent duplicate is executing. Surfaced after the bounded retry
    /// budget is exhausted.
    #[error("Execution already in progress with idempotency key: {key}")]
    AlreadyInProgress {
        /// The contested key
        key: String,
    },

    /// An orphaned lock, an expired-yet-exclusive record, or a record that
    /// vanished between create and read. Never auto-recovered.
    #[error("Inconsistent idempotency record for key {key}: {message}")]
    InconsistentState {
        /// The affected key
        key: String,
        /// What was observed
        message: String,
    },

    /// The stored payload hash differs from the current request's.
    #[error("Payload does not match stored record for idempotency key: {key}")]
    Validation {
        /// The affected key
        key: String,
    },

    /// The key expression extracted nothing and a key is required.
    #[error("No data found to create a hashed idempotency key using expression: {expression}")]
    MissingKey {
        /// The configured key expression
        expression: String,
    },

    /// Unexpected persistence failure, with the store's error attached.
    #[error("Persistence layer error: {message}")]
    Persistence {
        /// What the engine was doing
        message: String,
        /// The store's error
        #[source]
        source: StoreError,
    },

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the invalid setting
        message: String,
    },

    /// JSON conversion failure for input or response data.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the failure
        message: String,
    },

    /// The wrapped operation failed; its error is carried unchanged.
    #[error("{0}")]
    Operation(#[source] BoxError),
}

impl IdempotencyError {
    /// Creates an `AlreadyInProgress` error.
    pub fn already_in_progress(key: impl Into<String>) -> Self {
        Self::AlreadyInProgress { key: key.into() }
    }

    /// Creates an `InconsistentState` error.
    pub fn inconsistent_state(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InconsistentState {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a `Validation` error.
    pub fn validation(key: impl Into<String>) -> Self {
        Self::Validation { key: key.into() }
    }

    /// Creates a `MissingKey` error.
    pub fn missing_key(expression: impl Into<String>) -> Self {
        Self::MissingKey {
            expression: expression.into(),
        }
    }

    /// Creates a `Persistence` error wrapping a store failure.
    pub fn persistence(message: impl Into<String>, source: StoreError) -> Self {
        Self::Persistence {
            message: message.into(),
            source,
        }
    }

    /// Creates a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a `Serialization` error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns the explicit kind tag.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyInProgress { .. } => ErrorKind::AlreadyInProgress,
            Self::InconsistentState { .. } => ErrorKind::InconsistentState,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::MissingKey { .. } => ErrorKind::MissingKey,
            Self::Persistence { .. } => ErrorKind::Persistence,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Serialization { .. } => ErrorKind::Serialization,
            Self::Operation(_) => ErrorKind::Operation,
        }
    }

    /// Returns true for the one kind the bounded retry wrapper retries.
    pub fn is_retriable(&self) -> bool {
        self.kind() == ErrorKind::AlreadyInProgress
    }

    /// Returns true if a concurrent duplicate holds the key.
    pub fn is_already_in_progress(&self) -> bool {
        self.kind() == ErrorKind::AlreadyInProgress
    }

    /// Returns true if this error came from the wrapped operation.
    pub fn is_operation_error(&self) -> bool {
        self.kind() == ErrorKind::Operation
    }

    /// Borrows the wrapped operation's error as its concrete type.
    pub fn operation_error<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Operation(error) => error.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Takes the wrapped operation's error out, or returns `self` unchanged.
    pub fn into_operation_error(self) -> Result<BoxError, Self> {
        match self {
            Self::Operation(error) => Ok(error),
            other => Err(other),
        }
    }
}

impl From<serde_json::Error> for IdempotencyError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            message: error.to_string(),
        }
    }
}
