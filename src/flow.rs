use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{db::new_id, error::FlowError};

/// Identity of a flow: ids are only unique inside their type namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub id: String,
    pub flow_type: String,
}

impl FlowKey {
    pub fn new(id: impl Into<String>, flow_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            flow_type: flow_type.into(),
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.flow_type, self.id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

impl FlowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowStatus::Pending => "pending",
            FlowStatus::Completed => "completed",
            FlowStatus::Failed => "failed",
            FlowStatus::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Result<Self, FlowError> {
        match value {
            "pending" => Ok(FlowStatus::Pending),
            "completed" => Ok(FlowStatus::Completed),
            "failed" => Ok(FlowStatus::Failed),
            "expired" => Ok(FlowStatus::Expired),
            other => Err(FlowError::storage(format!("unknown flow status: {other}"))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FlowStatus::Completed | FlowStatus::Failed)
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason a flow ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowFailure {
    pub kind: String,
    pub message: String,
}

impl FlowFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&FlowError> for FlowFailure {
    fn from(err: &FlowError) -> Self {
        FlowFailure::new(err.kind(), err.to_string())
    }
}

/// A tracked flow. `R` is the completion payload; stores keep it as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord<R = Value> {
    pub id: String,
    pub flow_type: String,
    pub status: FlowStatus,
    pub metadata: Value,
    #[serde(default)]
    pub result: Option<R>,
    #[serde(default)]
    pub error: Option<FlowFailure>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl<R> FlowRecord<R> {
    pub fn key(&self) -> FlowKey {
        FlowKey::new(self.id.clone(), self.flow_type.clone())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl FlowRecord<Value> {
    pub fn pending(key: FlowKey, metadata: Value, created_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: key.id,
            flow_type: key.flow_type,
            status: FlowStatus::Pending,
            metadata,
            result: None,
            error: None,
            created_at,
            expires_at,
            completed_at: None,
        }
    }

    /// Reinterprets the stored JSON result as `T`.
    pub fn decode<T: DeserializeOwned>(self) -> Result<FlowRecord<T>, FlowError> {
        let result = match self.result {
            Some(value) => Some(serde_json::from_value(value)?),
            None => None,
        };
        Ok(FlowRecord {
            id: self.id,
            flow_type: self.flow_type,
            status: self.status,
            metadata: self.metadata,
            result,
            error: self.error,
            created_at: self.created_at,
            expires_at: self.expires_at,
            completed_at: self.completed_at,
        })
    }

    /// Applies a terminal transition in place. Callers must have checked `Pending`.
    pub(crate) fn apply(&mut self, transition: &Transition, now: DateTime<Utc>) {
        match transition {
            Transition::Complete(result) => {
                self.status = FlowStatus::Completed;
                self.result = Some(result.clone());
                self.error = None;
            }
            Transition::Fail(failure) => {
                self.status = FlowStatus::Failed;
                self.result = None;
                self.error = Some(failure.clone());
            }
        }
        self.completed_at = Some(now);
    }
}

/// The only mutations a flow ever sees: `Pending` to one terminal status.
#[derive(Debug, Clone)]
pub enum Transition {
    Complete(Value),
    Fail(FlowFailure),
}

impl Transition {
    pub fn target(&self) -> FlowStatus {
        match self {
            Transition::Complete(_) => FlowStatus::Completed,
            Transition::Fail(_) => FlowStatus::Failed,
        }
    }
}

/// Notification emitted when a flow leaves `Pending`. Never carries metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEvent {
    pub event_id: String,
    pub event_type: String,
    pub flow_id: String,
    pub flow_type: String,
    pub status: FlowStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<FlowFailure>,
}

impl FlowEvent {
    pub fn for_record(record: &FlowRecord<Value>, status: FlowStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: new_id("evt"),
            event_type: format!("flow.{status}"),
            flow_id: record.id.clone(),
            flow_type: record.flow_type.clone(),
            status,
            timestamp,
            error: record.error.clone(),
        }
    }
}
