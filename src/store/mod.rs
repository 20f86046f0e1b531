mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::FlowError,
    flow::{FlowKey, FlowRecord, Transition},
};

pub use memory::MemoryFlowStore;
pub use sqlite::SqliteFlowStore;

/// Keyed flow records with per-record TTL. An expired record is never
/// returned, whether or not it has been removed yet, and `transition` is an
/// atomic compare-and-set out of `Pending`.
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Inserts `record`. Fails with `AlreadyExists` when a live record holds the
    /// key and `overwrite` is false; an expired record is always replaced.
    async fn put(&self, record: FlowRecord, overwrite: bool, now: DateTime<Utc>) -> Result<(), FlowError>;

    async fn get(&self, key: &FlowKey, now: DateTime<Utc>) -> Result<Option<FlowRecord>, FlowError>;

    /// Idempotent.
    async fn delete(&self, key: &FlowKey) -> Result<(), FlowError>;

    /// Moves a live `Pending` record to the transition's terminal status and
    /// returns the updated record.
    async fn transition(
        &self,
        key: &FlowKey,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<FlowRecord, FlowError>;

    /// Physically removes expired records and returns what was removed.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<FlowRecord>, FlowError>;

    async fn ping(&self) -> Result<(), FlowError>;
}

/// Error for a transition that found the record but could not apply.
pub(crate) fn rejected_transition(key: &FlowKey, current: Option<&FlowRecord>) -> FlowError {
    match current {
        Some(record) => FlowError::InvalidTransition {
            key: key.to_string(),
            current: record.status,
        },
        None => FlowError::NotFound(key.to_string()),
    }
}
