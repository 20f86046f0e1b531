use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateValidationRequest {
    pub server_name: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateValidationResponse {
    pub validation_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmValidationResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DenyValidationRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwaitValidationQuery {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}
