//! Orchestration above a [`PersistenceStore`]: timestamps, payload
//! validation, local caching and error translation.

use std::num::NonZeroUsize;
use std::sync::Arc;

use serde_json::Value;

use super::SharedPersistenceStore;
use crate::cache::LocalCache;
use crate::clock::SharedClock;
use crate::config::IdempotencyConfig;
use crate::error::{IdempotencyError, StoreError};
use crate::extract::KeyExtractor;
use crate::fingerprint::Fingerprinter;
use crate::record::{Record, RecordStatus};

/// Outcome of trying to take a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    /// The in-progress record was written; the caller now holds the key.
    Acquired(Record),
    /// A live record already exists. Carries it when it came with the
    /// conflict or from the local cache.
    AlreadyExists(Option<Record>),
}

/// Persistence orchestration shared by every execution of one coordinator.
pub struct PersistenceLayer {
    store: SharedPersistenceStore,
    fingerprinter: Fingerprinter,
    cache: Option<LocalCache>,
    clock: SharedClock,
    ttl_seconds: i64,
}

impl std::fmt::Debug for PersistenceLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceLayer")
            .field("fingerprinter", &self.fingerprinter)
            .field("cache", &self.cache)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

impl PersistenceLayer {
    /// Builds the layer from a validated configuration.
    pub fn new(
        store: SharedPersistenceStore,
        config: &IdempotencyConfig,
        extractor: Arc<dyn KeyExtractor>,
        clock: SharedClock,
    ) -> Result<Self, IdempotencyError> {
        config.validate()?;

        let fingerprinter = Fingerprinter::new(
            config.hash_algorithm,
            config.key_expression.clone(),
            config.require_extracted_key,
            config.payload_validation_expression.clone(),
            extractor,
        )?;

        let cache = if config.enable_local_cache {
            let capacity = NonZeroUsize::new(config.local_cache_max_entries).ok_or_else(|| {
                IdempotencyError::configuration("local_cache_max_entries must be greater than zero")
            })?;
            Some(LocalCache::new(capacity))
        } else {
            None
        };

        let ttl_seconds = i64::try_from(config.ttl_seconds)
            .map_err(|_| IdempotencyError::configuration("ttl_seconds is too large"))?;

        Ok(Self {
            store,
            fingerprinter,
            cache,
            clock,
            ttl_seconds,
        })
    }

    /// Current time from the configured clock.
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// The local cache, when enabled.
    pub fn cache(&self) -> Option<&LocalCache> {
        self.cache.as_ref()
    }

    /// Derives the idempotency key for `input` under `scope`.
    pub fn idempotency_key(&self, scope: &str, input: &Value) -> Result<String, IdempotencyError> {
        self.fingerprinter.idempotency_key(scope, input)
    }

    /// Derives the payload hash for `input`, when validation is enabled.
    pub fn payload_hash(&self, input: &Value) -> Result<Option<String>, IdempotencyError> {
        self.fingerprinter.payload_hash(input)
    }

    fn expiry_seconds(&self, now_millis: i64) -> i64 {
        now_millis.div_euclid(1000).saturating_add(self.ttl_seconds)
    }

    /// Attempts to take `key` by writing an `INPROGRESS` record.
    ///
    /// `remaining_millis` is the caller's remaining budget; without it the
    /// record gets no in-progress expiry and a crashed holder keeps the key
    /// until the record expires.
    pub async fn save_in_progress(
        &self,
        key: &str,
        payload_hash: Option<String>,
        remaining_millis: Option<i64>,
    ) -> Result<Acquisition, IdempotencyError> {
        let now = self.now_millis();

        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(key, now)) {
            tracing::debug!(idempotency_key = %key, "Found unexpired record in local cache, skipping create");
            return Ok(Acquisition::AlreadyExists(Some(cached)));
        }

        let mut record = Record::in_progress(key).with_expiry(self.expiry_seconds(now));
        record.payload_hash = payload_hash;
        match remaining_millis {
            Some(remaining) => {
                record.in_progress_expiry = Some(now.saturating_add(remaining.max(0)));
            }
            None => {
                tracing::warn!(
                    idempotency_key = %key,
                    "Couldn't determine the remaining time left. \
                     Did you call execute_with_context with an invocation context?"
                );
            }
        }

        match self.store.create(&record).await {
            Ok(()) => {
                tracing::debug!(idempotency_key = %key, "Saved in progress record");
                Ok(Acquisition::Acquired(record))
            }
            Err(StoreError::AlreadyExists { existing, .. }) => {
                tracing::debug!(idempotency_key = %key, "Record already exists");
                Ok(Acquisition::AlreadyExists(existing.map(|r| *r)))
            }
            Err(error) => Err(IdempotencyError::persistence(
                "Failed to save in progress record",
                error,
            )),
        }
    }

    /// Returns the record for `key` from the cache or the store.
    ///
    /// `Ok(None)` means the store has no record. The payload is validated
    /// against `payload_hash` and completed records read from the store are
    /// cached.
    pub async fn get_record(
        &self,
        key: &str,
        payload_hash: Option<&str>,
    ) -> Result<Option<Record>, IdempotencyError> {
        let now = self.now_millis();

        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(key, now)) {
            tracing::debug!(idempotency_key = %key, "Record found in local cache");
            self.validate_payload(&cached, payload_hash)?;
            return Ok(Some(cached));
        }

        let record = match self.store.read(key).await {
            Ok(record) => record,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => {
                return Err(IdempotencyError::persistence(
                    "Failed to get record from idempotency store",
                    error,
                ))
            }
        };

        self.process_existing_record(record, payload_hash).map(Some)
    }

    /// Validates a record found in the store against `payload_hash` and
    /// caches it if it is completed.
    ///
    /// Used for records read back and for records handed back by a failed
    /// conditional create.
    pub fn process_existing_record(
        &self,
        record: Record,
        payload_hash: Option<&str>,
    ) -> Result<Record, IdempotencyError> {
        self.validate_payload(&record, payload_hash)?;
        if let Some(cache) = &self.cache {
            let now = self.now_millis();
            if record.status_at(now) == RecordStatus::Completed {
                cache.put(record.clone(), now);
            }
        }
        Ok(record)
    }

    /// Fails with `Validation` when validation is enabled and the stored
    /// payload hash differs from `payload_hash`.
    pub fn validate_payload(
        &self,
        record: &Record,
        payload_hash: Option<&str>,
    ) -> Result<(), IdempotencyError> {
        if !self.fingerprinter.validates_payload() {
            return Ok(());
        }
        if record.payload_hash.as_deref() != payload_hash {
            return Err(IdempotencyError::validation(record.key.clone()));
        }
        Ok(())
    }

    /// Marks `key` completed with `response`.
    pub async fn save_success(
        &self,
        key: &str,
        response: Value,
        payload_hash: Option<String>,
    ) -> Result<Record, IdempotencyError> {
        let now = self.now_millis();
        let mut record = Record::completed(key, response).with_expiry(self.expiry_seconds(now));
        record.payload_hash = payload_hash;

        self.store.update(&record).await.map_err(|error| {
            IdempotencyError::persistence("Failed to update record state to success", error)
        })?;
        tracing::debug!(idempotency_key = %key, "Saved completed record");

        if let Some(cache) = &self.cache {
            cache.put(record.clone(), now);
        }
        Ok(record)
    }

    /// Releases `key` by deleting its record.
    pub async fn delete_record(&self, key: &str) -> Result<(), IdempotencyError> {
        if let Some(cache) = &self.cache {
            cache.remove(key);
        }
        self.store
            .delete(key)
            .await
            .map_err(|error| IdempotencyError::persistence("Failed to delete record", error))?;
        tracing::debug!(idempotency_key = %key, "Deleted record");
        Ok(())
    }
}
