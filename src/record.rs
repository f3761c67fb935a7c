//! The persisted state of one idempotent execution attempt.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stored status of a [`Record`].
///
/// `Expired` is normally derived at read time from `expiry`; stores may also
/// persist it verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    /// An execution holds the key
    #[serde(rename = "INPROGRESS")]
    InProgress,
    /// The execution finished and its response is stored
    #[serde(rename = "COMPLETED")]
    Completed,
    /// The record outlived its TTL
    #[serde(rename = "EXPIRED")]
    Expired,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "INPROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// One idempotency record as exchanged with the persistence store.
///
/// Timestamps follow the conventions of TTL-enabled table stores: `expiry`
/// is in epoch seconds, `in_progress_expiry` in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// `<scope>#<hash>`
    pub key: String,

    /// Status as written; see [`Record::status_at`] for the effective status
    pub status: RecordStatus,

    /// Epoch seconds after which the record is stale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,

    /// Epoch milliseconds after which an in-progress holder is presumed dead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_progress_expiry: Option<i64>,

    /// Hash of the validated payload subset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_hash: Option<String>,

    /// Serialized response, only for completed records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
}

impl Record {
    /// Creates an in-progress record with no timestamps.
    pub fn in_progress(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status: RecordStatus::InProgress,
            expiry: None,
            in_progress_expiry: None,
            payload_hash: None,
            response_data: None,
        }
    }

    /// Creates a completed record holding `response`.
    pub fn completed(key: impl Into<String>, response: Value) -> Self {
        Self {
            key: key.into(),
            status: RecordStatus::Completed,
            expiry: None,
            in_progress_expiry: None,
            payload_hash: None,
            response_data: Some(response),
        }
    }

    /// Sets the expiry (epoch seconds).
    pub fn with_expiry(mut self, expiry_seconds: i64) -> Self {
        self.expiry = Some(expiry_seconds);
        self
    }

    /// Sets the in-progress expiry (epoch milliseconds).
    pub fn with_in_progress_expiry(mut self, expiry_millis: i64) -> Self {
        self.in_progress_expiry = Some(expiry_millis);
        self
    }

    /// Sets the payload hash.
    pub fn with_payload_hash(mut self, payload_hash: impl Into<String>) -> Self {
        self.payload_hash = Some(payload_hash.into());
        self
    }

    /// Returns true once `expiry` has passed at `now_millis`. The expiry
    /// second is compared at millisecond resolution.
    ///
    /// A record without an expiry never expires.
    pub fn is_expired(&self, now_millis: i64) -> bool {
        match self.expiry {
            Some(expiry) => expiry.saturating_mul(1000) < now_millis,
            None => false,
        }
    }

    /// Effective status at `now_millis`: expired records read as `Expired`
    /// whatever was written.
    pub fn status_at(&self, now_millis: i64) -> RecordStatus {
        if self.is_expired(now_millis) {
            RecordStatus::Expired
        } else {
            self.status
        }
    }

    /// Returns true if this is an in-progress record whose holder ran past
    /// its time budget. Records without an in-progress expiry are never
    /// considered orphaned.
    pub fn is_orphaned(&self, now_millis: i64) -> bool {
        self.status == RecordStatus::InProgress
            && matches!(self.in_progress_expiry, Some(deadline) if now_millis >= deadline)
    }

    /// Returns true if another execution may legitimately take this key:
    /// the record expired or its in-progress holder is orphaned.
    ///
    /// Stores with expiry-aware conditional writes use this as their
    /// overwrite condition.
    pub fn is_reclaimable(&self, now_millis: i64) -> bool {
        self.is_expired(now_millis) || self.is_orphaned(now_millis)
    }
}
