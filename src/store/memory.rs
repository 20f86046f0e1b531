use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{FlowStore, rejected_transition};
use crate::{
    error::FlowError,
    flow::{FlowKey, FlowRecord, Transition},
};

/// Process-local store. Expired entries linger until overwritten or swept but
/// are invisible to every read.
#[derive(Debug, Default)]
pub struct MemoryFlowStore {
    records: RwLock<HashMap<FlowKey, FlowRecord>>,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStore for MemoryFlowStore {
    async fn put(&self, record: FlowRecord, overwrite: bool, now: DateTime<Utc>) -> Result<(), FlowError> {
        let key = record.key();
        let mut records = self.records.write().await;
        if !overwrite {
            if let Some(existing) = records.get(&key) {
                if !existing.is_expired(now) {
                    return Err(FlowError::AlreadyExists(key.to_string()));
                }
            }
        }
        records.insert(key, record);
        Ok(())
    }

    async fn get(&self, key: &FlowKey, now: DateTime<Utc>) -> Result<Option<FlowRecord>, FlowError> {
        let records = self.records.read().await;
        Ok(records
            .get(key)
            .filter(|record| !record.is_expired(now))
            .cloned())
    }

    async fn delete(&self, key: &FlowKey) -> Result<(), FlowError> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn transition(
        &self,
        key: &FlowKey,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<FlowRecord, FlowError> {
        let mut records = self.records.write().await;
        match records.get_mut(key) {
            Some(record) if !record.is_expired(now) && !record.is_terminal() => {
                record.apply(transition, now);
                Ok(record.clone())
            }
            Some(record) if !record.is_expired(now) => Err(rejected_transition(key, Some(&*record))),
            _ => Err(rejected_transition(key, None)),
        }
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<FlowRecord>, FlowError> {
        let mut records = self.records.write().await;
        let expired: Vec<FlowKey> = records
            .iter()
            .filter(|(_, record)| record.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        Ok(expired
            .into_iter()
            .filter_map(|key| records.remove(&key))
            .collect())
    }

    async fn ping(&self) -> Result<(), FlowError> {
        Ok(())
    }
}
