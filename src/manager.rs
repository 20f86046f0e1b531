use std::{collections::HashMap, sync::Arc, time::Duration as StdDuration};

use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    error::FlowError,
    flow::{FlowEvent, FlowFailure, FlowKey, FlowRecord, FlowStatus, Transition},
    store::FlowStore,
};

type Waiters = HashMap<FlowKey, Vec<oneshot::Sender<FlowRecord>>>;

/// Layers transition rules, waiter wake-ups and event emission over a
/// [`FlowStore`]. Shared as `Arc<FlowStateManager>`; every terminal transition
/// is a compare-and-set in the store, so callers need no locking of their own.
pub struct FlowStateManager {
    store: Arc<dyn FlowStore>,
    clock: Arc<dyn Clock>,
    waiters: Mutex<Waiters>,
    events: Option<mpsc::UnboundedSender<FlowEvent>>,
}

impl FlowStateManager {
    pub fn new(store: Arc<dyn FlowStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            waiters: Mutex::new(HashMap::new()),
            events: None,
        }
    }

    /// Every terminal transition and every swept pending flow is reported here.
    pub fn with_event_sink(mut self, sink: mpsc::UnboundedSender<FlowEvent>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn ping(&self) -> Result<(), FlowError> {
        self.store.ping().await
    }

    /// Registers a new `Pending` flow that expires `ttl` from now.
    pub async fn create_flow<M: Serialize>(
        &self,
        id: &str,
        flow_type: &str,
        metadata: &M,
        ttl: Duration,
    ) -> Result<FlowRecord, FlowError> {
        if ttl <= Duration::zero() {
            return Err(FlowError::InvalidTtl(format!(
                "ttl must be positive, got {}ms",
                ttl.num_milliseconds()
            )));
        }

        let now = self.clock.now();
        let record = FlowRecord::pending(
            FlowKey::new(id, flow_type),
            serde_json::to_value(metadata)?,
            now,
            now + ttl,
        );
        self.store.put(record.clone(), false, now).await?;

        debug!(flow_id = id, flow_type, expires_at = %record.expires_at, "flow created");
        Ok(record)
    }

    pub async fn get_flow_state<R: DeserializeOwned>(
        &self,
        id: &str,
        flow_type: &str,
    ) -> Result<Option<FlowRecord<R>>, FlowError> {
        let key = FlowKey::new(id, flow_type);
        self.store
            .get(&key, self.clock.now())
            .await?
            .map(FlowRecord::decode)
            .transpose()
    }

    pub async fn complete_flow<R: Serialize + DeserializeOwned>(
        &self,
        id: &str,
        flow_type: &str,
        result: R,
    ) -> Result<FlowRecord<R>, FlowError> {
        let transition = Transition::Complete(serde_json::to_value(result)?);
        let record = self.transition(FlowKey::new(id, flow_type), transition).await?;
        info!(flow_id = id, flow_type, "flow completed");
        record.decode()
    }

    pub async fn fail_flow(
        &self,
        id: &str,
        flow_type: &str,
        failure: FlowFailure,
    ) -> Result<FlowRecord, FlowError> {
        let kind = failure.kind.clone();
        let record = self
            .transition(FlowKey::new(id, flow_type), Transition::Fail(failure))
            .await?;
        info!(flow_id = id, flow_type, kind = %kind, "flow failed");
        Ok(record)
    }

    /// Explicit cleanup once the terminal consumer has read the outcome.
    pub async fn delete_flow(&self, id: &str, flow_type: &str) -> Result<(), FlowError> {
        let key = FlowKey::new(id, flow_type);
        self.store.delete(&key).await?;
        self.waiters.lock().await.remove(&key);
        Ok(())
    }

    /// Suspends until the flow is terminal, `timeout` elapses (`Timeout`), or
    /// the flow expires or disappears (`NotFound`).
    pub async fn await_completion<R: DeserializeOwned>(
        &self,
        id: &str,
        flow_type: &str,
        timeout: StdDuration,
    ) -> Result<FlowRecord<R>, FlowError> {
        let key = FlowKey::new(id, flow_type);

        // Registering before the read closes the gap where a completion lands
        // between our read and our wait.
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.entry(key.clone()).or_default().push(tx);

        let outcome = self.wait_registered(&key, rx, timeout).await;
        self.prune_waiters(&key).await;
        outcome?.decode()
    }

    async fn wait_registered(
        &self,
        key: &FlowKey,
        rx: oneshot::Receiver<FlowRecord>,
        timeout: StdDuration,
    ) -> Result<FlowRecord, FlowError> {
        let now = self.clock.now();
        let record = self
            .store
            .get(key, now)
            .await?
            .ok_or_else(|| FlowError::NotFound(key.to_string()))?;
        if record.is_terminal() {
            return Ok(record);
        }

        let until_expiry = (record.expires_at - now).to_std().unwrap_or(StdDuration::ZERO);
        if let Ok(Ok(settled)) = tokio::time::timeout(timeout.min(until_expiry), rx).await {
            return Ok(settled);
        }

        // Timed out, or the waiter was dropped by a sweep or delete.
        match self.store.get(key, self.clock.now()).await? {
            Some(record) if record.is_terminal() => Ok(record),
            Some(_) => Err(FlowError::Timeout(key.to_string())),
            None => Err(FlowError::NotFound(key.to_string())),
        }
    }

    async fn prune_waiters(&self, key: &FlowKey) {
        let mut waiters = self.waiters.lock().await;
        if let Some(pending) = waiters.get_mut(key) {
            pending.retain(|tx| !tx.is_closed());
            if pending.is_empty() {
                waiters.remove(key);
            }
        }
    }

    async fn transition(&self, key: FlowKey, transition: Transition) -> Result<FlowRecord, FlowError> {
        let now = self.clock.now();
        let record = self.store.transition(&key, &transition, now).await?;

        if let Some(pending) = self.waiters.lock().await.remove(&key) {
            for tx in pending {
                let _ = tx.send(record.clone());
            }
        }
        self.emit(FlowEvent::for_record(&record, record.status, now));

        Ok(record)
    }

    /// Removes expired flows from the store, reporting pending ones as expired.
    pub async fn sweep_expired(&self) -> Result<usize, FlowError> {
        let now = self.clock.now();
        let swept = self.store.sweep_expired(now).await?;
        if swept.is_empty() {
            return Ok(0);
        }

        {
            let mut waiters = self.waiters.lock().await;
            for record in &swept {
                waiters.remove(&record.key());
            }
        }

        for record in swept.iter().filter(|record| record.status == FlowStatus::Pending) {
            self.emit(FlowEvent::for_record(record, FlowStatus::Expired, now));
        }

        Ok(swept.len())
    }

    fn emit(&self, event: FlowEvent) {
        if let Some(sink) = &self.events {
            if sink.send(event).is_err() {
                warn!("flow event sink closed; dropping event");
            }
        }
    }
}
