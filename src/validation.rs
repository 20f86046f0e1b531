use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    db::random_token,
    error::FlowError,
    flow::{FlowFailure, FlowRecord, FlowStatus},
    manager::FlowStateManager,
};

pub const FLOW_TYPE: &str = "mcp_tool_validation";
pub const FLOW_TTL_MS: i64 = 600_000;
pub const STATE_TOKEN_BYTES: usize = 32;
pub(crate) const ID_SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationMetadata {
    pub user_id: String,
    pub server_name: String,
    pub tool_name: String,
    pub tool_arguments: Value,
    /// Binds the flow to the external confirmation channel. Never sent to pollers.
    pub state: String,
    pub created_at: i64,
}

/// What status pollers get to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStatus {
    pub status: FlowStatus,
    pub completed: bool,
    pub failed: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl ValidationStatus {
    pub fn from_record<R>(record: &FlowRecord<R>) -> Self {
        Self {
            status: record.status,
            completed: record.status == FlowStatus::Completed,
            failed: record.status == FlowStatus::Failed,
            error: record.error.as_ref().map(|failure| failure.message.clone()),
        }
    }
}

pub fn validation_id(user_id: &str, server_name: &str, tool_name: &str, at: DateTime<Utc>) -> String {
    format!(
        "{user_id}{sep}{server_name}{sep}{tool_name}{sep}{millis}",
        sep = ID_SEPARATOR,
        millis = at.timestamp_millis()
    )
}

pub async fn initiate_validation_flow(
    manager: &FlowStateManager,
    user_id: &str,
    server_name: &str,
    tool_name: &str,
    tool_arguments: Value,
) -> Result<(String, ValidationMetadata), FlowError> {
    for (field, value) in [("user_id", user_id), ("server_name", server_name), ("tool_name", tool_name)] {
        if value.trim().is_empty() {
            return Err(FlowError::InvalidArgument(format!("{field} is required")));
        }
    }
    if user_id.contains(ID_SEPARATOR) {
        return Err(FlowError::InvalidArgument(
            "user_id must not contain ':'".to_string(),
        ));
    }

    let now = manager.now();
    let id = validation_id(user_id, server_name, tool_name, now);
    let metadata = ValidationMetadata {
        user_id: user_id.to_string(),
        server_name: server_name.to_string(),
        tool_name: tool_name.to_string(),
        tool_arguments,
        state: random_token(STATE_TOKEN_BYTES),
        created_at: now.timestamp_millis(),
    };

    manager
        .create_flow(&id, FLOW_TYPE, &metadata, Duration::milliseconds(FLOW_TTL_MS))
        .await?;

    info!(validation_id = %id, server_name, tool_name, "validation flow initiated");
    Ok((id, metadata))
}

/// Confirms the flow. Any failure after the lookup marks the flow failed on a
/// best-effort basis and the original error is returned.
pub async fn complete_validation_flow(
    validation_id: &str,
    manager: &FlowStateManager,
) -> Result<bool, FlowError> {
    if manager.get_flow_state::<Value>(validation_id, FLOW_TYPE).await?.is_none() {
        return Err(FlowError::NotFound(validation_id.to_string()));
    }

    match manager.complete_flow(validation_id, FLOW_TYPE, true).await {
        Ok(_) => {
            info!(validation_id, "validation flow confirmed");
            Ok(true)
        }
        Err(err) => {
            if let Err(mark_err) = manager
                .fail_flow(validation_id, FLOW_TYPE, FlowFailure::from(&err))
                .await
            {
                warn!(
                    validation_id,
                    error = %mark_err,
                    "could not mark validation flow as failed"
                );
            }
            Err(err)
        }
    }
}

pub async fn deny_validation_flow(
    validation_id: &str,
    reason: Option<String>,
    manager: &FlowStateManager,
) -> Result<(), FlowError> {
    let message = reason
        .filter(|reason| !reason.trim().is_empty())
        .unwrap_or_else(|| "tool call denied by user".to_string());
    manager
        .fail_flow(validation_id, FLOW_TYPE, FlowFailure::new("denied", message))
        .await?;
    info!(validation_id, "validation flow denied");
    Ok(())
}

/// Domain metadata for a live flow, `None` when absent or expired.
pub async fn get_flow_state(
    validation_id: &str,
    manager: &FlowStateManager,
) -> Result<Option<ValidationMetadata>, FlowError> {
    let Some(record) = manager.get_flow_state::<bool>(validation_id, FLOW_TYPE).await? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_value(record.metadata)?))
}

pub async fn get_validation_status(
    validation_id: &str,
    manager: &FlowStateManager,
) -> Result<Option<ValidationStatus>, FlowError> {
    Ok(manager
        .get_flow_state::<bool>(validation_id, FLOW_TYPE)
        .await?
        .map(|record| ValidationStatus::from_record(&record)))
}

/// Long-poll variant of [`get_validation_status`]; reports `pending` when the
/// wait times out.
pub async fn await_validation(
    validation_id: &str,
    timeout: StdDuration,
    manager: &FlowStateManager,
) -> Result<ValidationStatus, FlowError> {
    match manager
        .await_completion::<bool>(validation_id, FLOW_TYPE, timeout)
        .await
    {
        Ok(record) => Ok(ValidationStatus::from_record(&record)),
        Err(FlowError::Timeout(_)) => get_validation_status(validation_id, manager)
            .await?
            .ok_or_else(|| FlowError::NotFound(validation_id.to_string())),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration as StdDuration};

    use async_trait::async_trait;
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    use super::{
        FLOW_TTL_MS, FLOW_TYPE, await_validation, complete_validation_flow, deny_validation_flow,
        get_flow_state, get_validation_status, initiate_validation_flow,
    };
    use crate::{
        clock::{Clock, ManualClock},
        error::FlowError,
        flow::{FlowFailure, FlowKey, FlowRecord, FlowStatus, Transition},
        manager::FlowStateManager,
        store::{FlowStore, MemoryFlowStore},
    };

    /// Memory store whose completions always hit a storage error.
    #[derive(Default)]
    struct CompletionFailingStore {
        inner: MemoryFlowStore,
    }

    #[async_trait]
    impl FlowStore for CompletionFailingStore {
        async fn put(&self, record: FlowRecord, overwrite: bool, now: DateTime<Utc>) -> Result<(), FlowError> {
            self.inner.put(record, overwrite, now).await
        }

        async fn get(&self, key: &FlowKey, now: DateTime<Utc>) -> Result<Option<FlowRecord>, FlowError> {
            self.inner.get(key, now).await
        }

        async fn delete(&self, key: &FlowKey) -> Result<(), FlowError> {
            self.inner.delete(key).await
        }

        async fn transition(
            &self,
            key: &FlowKey,
            transition: &Transition,
            now: DateTime<Utc>,
        ) -> Result<FlowRecord, FlowError> {
            match transition {
                Transition::Complete(_) => Err(FlowError::Storage("disk full".to_string())),
                Transition::Fail(_) => self.inner.transition(key, transition, now).await,
            }
        }

        async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<FlowRecord>, FlowError> {
            self.inner.sweep_expired(now).await
        }

        async fn ping(&self) -> Result<(), FlowError> {
            self.inner.ping().await
        }
    }

    fn manager() -> (Arc<FlowStateManager>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let manager = FlowStateManager::new(Arc::new(MemoryFlowStore::new()), clock.clone());
        (Arc::new(manager), clock)
    }

    #[tokio::test]
    async fn initiate_derives_prefixed_id_and_state_token() {
        let (manager, clock) = manager();
        let (id, metadata) = initiate_validation_flow(&manager, "u1", "srv", "tool", json!({"a": 1}))
            .await
            .unwrap();

        let millis = clock.now().timestamp_millis();
        assert_eq!(id, format!("u1:srv:tool:{millis}"));
        assert!(id.starts_with("u1:"));
        assert_eq!(metadata.created_at, millis);
        assert_eq!(URL_SAFE_NO_PAD.decode(&metadata.state).unwrap().len(), 32);

        let record = manager
            .get_flow_state::<bool>(&id, FLOW_TYPE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, FlowStatus::Pending);
        assert_eq!(
            record.expires_at - record.created_at,
            Duration::milliseconds(FLOW_TTL_MS)
        );
        assert_eq!(record.metadata["serverName"], json!("srv"));
    }

    #[tokio::test]
    async fn initiate_rejects_blank_fields() {
        let (manager, _clock) = manager();
        let err = initiate_validation_flow(&manager, "u1", " ", "tool", json!({}))
            .await
            .expect_err("blank server name");
        assert!(matches!(err, FlowError::InvalidArgument(_)));

        let err = initiate_validation_flow(&manager, "u:1", "srv", "tool", json!({}))
            .await
            .expect_err("separator in user id");
        assert!(matches!(err, FlowError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn confirm_then_read_metadata_and_status() {
        let (manager, _clock) = manager();
        let (id, _) = initiate_validation_flow(&manager, "u1", "srv", "tool", json!({"a": 1}))
            .await
            .unwrap();

        assert!(complete_validation_flow(&id, &manager).await.unwrap());

        let metadata = get_flow_state(&id, &manager).await.unwrap().unwrap();
        assert_eq!(metadata.tool_arguments, json!({"a": 1}));

        let status = get_validation_status(&id, &manager).await.unwrap().unwrap();
        assert!(status.completed);
        assert!(!status.failed);
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn confirming_unknown_flow_is_not_found() {
        let (manager, _clock) = manager();
        let err = complete_validation_flow("u1:srv:tool:1", &manager)
            .await
            .expect_err("unknown flow");
        assert!(matches!(err, FlowError::NotFound(_)));
        assert!(get_validation_status("u1:srv:tool:1", &manager).await.unwrap().is_none());
        assert!(get_flow_state("u1:srv:tool:1", &manager).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn confirming_a_terminal_flow_surfaces_error_and_keeps_outcome() {
        let (manager, _clock) = manager();
        let (id, _) = initiate_validation_flow(&manager, "u1", "srv", "tool", json!({}))
            .await
            .unwrap();
        manager
            .fail_flow(&id, FLOW_TYPE, FlowFailure::new("denied", "nope"))
            .await
            .unwrap();

        let err = complete_validation_flow(&id, &manager)
            .await
            .expect_err("already failed");
        assert!(matches!(err, FlowError::InvalidTransition { .. }));

        let status = get_validation_status(&id, &manager).await.unwrap().unwrap();
        assert!(status.failed);
        assert_eq!(status.error.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn failed_completion_marks_flow_failed_and_returns_original_error() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let manager = FlowStateManager::new(Arc::new(CompletionFailingStore::default()), clock);
        let (id, _) = initiate_validation_flow(&manager, "u1", "srv", "tool", json!({}))
            .await
            .unwrap();

        let err = complete_validation_flow(&id, &manager)
            .await
            .expect_err("completion write fails");
        assert!(matches!(err, FlowError::Storage(_)));

        let record = manager
            .get_flow_state::<bool>(&id, FLOW_TYPE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, FlowStatus::Failed);
        let failure = record.error.expect("failure recorded");
        assert_eq!(failure.kind, "storage_failure");
        assert!(failure.message.contains("disk full"));
    }

    #[tokio::test]
    async fn denial_fails_the_flow_with_reason() {
        let (manager, _clock) = manager();
        let (id, _) = initiate_validation_flow(&manager, "u1", "srv", "tool", json!({}))
            .await
            .unwrap();
        deny_validation_flow(&id, None, &manager).await.unwrap();

        let status = get_validation_status(&id, &manager).await.unwrap().unwrap();
        assert_eq!(status.status, FlowStatus::Failed);
        assert_eq!(status.error.as_deref(), Some("tool call denied by user"));
    }

    #[tokio::test]
    async fn flows_expire_after_ten_minutes() {
        let (manager, clock) = manager();
        let (id, _) = initiate_validation_flow(&manager, "u1", "srv", "tool", json!({}))
            .await
            .unwrap();

        clock.advance(Duration::milliseconds(FLOW_TTL_MS - 1));
        assert!(get_flow_state(&id, &manager).await.unwrap().is_some());

        clock.advance(Duration::milliseconds(2));
        assert!(get_flow_state(&id, &manager).await.unwrap().is_none());
        let err = complete_validation_flow(&id, &manager).await.expect_err("expired");
        assert!(matches!(err, FlowError::NotFound(_)));
    }

    #[tokio::test]
    async fn await_validation_reports_pending_on_timeout() {
        let (manager, _clock) = manager();
        let (id, _) = initiate_validation_flow(&manager, "u1", "srv", "tool", json!({}))
            .await
            .unwrap();
        let status = await_validation(&id, StdDuration::from_millis(10), &manager)
            .await
            .unwrap();
        assert_eq!(status.status, FlowStatus::Pending);
        assert!(!status.completed && !status.failed);
    }
}
