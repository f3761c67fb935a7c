//! Configuration for the idempotency engine.
//!
//! [`IdempotencyConfig`] is passed to the [`Coordinator`](crate::Coordinator)
//! once at construction and never mutated afterwards. All settings have
//! defaults suitable for a Lambda function writing to a TTL-enabled table:
//!
//! | Setting | Default |
//! |---|---|
//! | `key_expression` | none (whole input is hashed) |
//! | `require_extracted_key` | `false` |
//! | `ttl_seconds` | 3600 |
//! | `enable_local_cache` | `false` |
//! | `local_cache_max_entries` | 256 |
//! | `payload_validation_expression` | none |
//! | `hash_algorithm` | `md5` |
//! | `retry_attempts` | 1 |
//! | `retry_delay` | 50 ms |
//! | `response_hook` | none |

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::IdempotencyError;
use crate::record::Record;

pub use crate::fingerprint::HashAlgorithm;

/// Default record lifetime in seconds.
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

/// Default local cache capacity.
pub const DEFAULT_LOCAL_CACHE_MAX_ENTRIES: usize = 256;

/// Default number of retries on `AlreadyInProgress`.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 1;

/// Default pause between retries.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Hook applied to every replayed response before it is returned.
///
/// Receives the stored response and the record it came from.
pub type ResponseHook = Arc<dyn Fn(Value, &Record) -> Value + Send + Sync>;

/// Settings for one [`Coordinator`](crate::Coordinator).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use aws_lambda_idempotency::{HashAlgorithm, IdempotencyConfig};
///
/// let config = IdempotencyConfig::default()
///     .with_key_expression("body.order_id")
///     .with_require_extracted_key(true)
///     .with_ttl_seconds(600)
///     .with_hash_algorithm(HashAlgorithm::Sha256)
///     .with_retry_delay(Duration::from_millis(100));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct IdempotencyConfig {
    /// Path selecting the part of the input that identifies the request.
    pub key_expression: Option<String>,
    /// Fail with `MissingKey` instead of hashing the whole input when the
    /// key expression selects nothing.
    pub require_extracted_key: bool,
    /// Lifetime of a record after it is written.
    pub ttl_seconds: u64,
    /// Keep recently read records in process memory.
    pub enable_local_cache: bool,
    /// Capacity of the local cache.
    pub local_cache_max_entries: usize,
    /// Path selecting the part of the input whose hash must match on replay.
    pub payload_validation_expression: Option<String>,
    /// Digest for keys and payload hashes.
    pub hash_algorithm: HashAlgorithm,
    /// Retries after an `AlreadyInProgress` outcome.
    pub retry_attempts: u32,
    /// Pause before each retry.
    pub retry_delay: Duration,
    /// Transforms replayed responses.
    pub response_hook: Option<ResponseHook>,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            key_expression: None,
            require_extracted_key: false,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            enable_local_cache: false,
            local_cache_max_entries: DEFAULT_LOCAL_CACHE_MAX_ENTRIES,
            payload_validation_expression: None,
            hash_algorithm: HashAlgorithm::default(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            response_hook: None,
        }
    }
}

impl std::fmt::Debug for IdempotencyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyConfig")
            .field("key_expression", &self.key_expression)
            .field("require_extracted_key", &self.require_extracted_key)
            .field("ttl_seconds", &self.ttl_seconds)
            .field("enable_local_cache", &self.enable_local_cache)
            .field("local_cache_max_entries", &self.local_cache_max_entries)
            .field(
                "payload_validation_expression",
                &self.payload_validation_expression,
            )
            .field("hash_algorithm", &self.hash_algorithm)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("response_hook", &self.response_hook.is_some())
            .finish()
    }
}

impl IdempotencyConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key extraction expression.
    pub fn with_key_expression(mut self, expression: impl Into<String>) -> Self {
        self.key_expression = Some(expression.into());
        self
    }

    /// Sets whether a missing extracted key is an error.
    pub fn with_require_extracted_key(mut self, require: bool) -> Self {
        self.require_extracted_key = require;
        self
    }

    /// Sets the record lifetime.
    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Enables the local cache with the given capacity.
    pub fn with_local_cache(mut self, max_entries: usize) -> Self {
        self.enable_local_cache = true;
        self.local_cache_max_entries = max_entries;
        self
    }

    /// Sets the payload validation expression.
    pub fn with_payload_validation(mut self, expression: impl Into<String>) -> Self {
        self.payload_validation_expression = Some(expression.into());
        self
    }

    /// Sets the hash algorithm.
    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// Sets the number of retries on `AlreadyInProgress`.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Sets the pause between retries.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the replay response hook.
    pub fn with_response_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value, &Record) -> Value + Send + Sync + 'static,
    {
        self.response_hook = Some(Arc::new(hook));
        self
    }

    /// Checks the settings that cannot be enforced by types.
    pub fn validate(&self) -> Result<(), IdempotencyError> {
        if self.ttl_seconds == 0 {
            return Err(IdempotencyError::configuration(
                "ttl_seconds must be greater than zero",
            ));
        }
        if i64::try_from(self.ttl_seconds).is_err() {
            return Err(IdempotencyError::configuration("ttl_seconds is too large"));
        }
        if self.enable_local_cache && self.local_cache_max_entries == 0 {
            return Err(IdempotencyError::configuration(
                "local_cache_max_entries must be greater than zero when the local cache is enabled",
            ));
        }
        for (name, expression) in [
            ("key_expression", &self.key_expression),
            (
                "payload_validation_expression",
                &self.payload_validation_expression,
            ),
        ] {
            if matches!(expression, Some(e) if e.trim().is_empty()) {
                return Err(IdempotencyError::configuration(format!(
                    "{} must not be empty",
                    name
                )));
            }
        }
        Ok(())
    }
}
