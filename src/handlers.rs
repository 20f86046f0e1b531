use std::time::Duration;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::{
    auth::{AuthUser, ensure_validation_access, user_auth_middleware},
    error::{AppError, FlowError},
    models::{
        AwaitValidationQuery, ConfirmValidationResponse, DenyValidationRequest,
        InitiateValidationRequest, InitiateValidationResponse,
    },
    state::AppState,
    validation::{self, FLOW_TTL_MS, ValidationStatus},
};

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/validation", post(initiate_validation))
        .route("/validation/confirm/:validation_id", post(confirm_validation))
        .route("/validation/deny/:validation_id", post(deny_validation))
        .route("/validation/status/:validation_id", get(validation_status))
        .route("/validation/await/:validation_id", get(await_validation))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            user_auth_middleware,
        ));

    Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/readyz", get(readyz))
        .merge(protected)
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn readyz(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.flows.ping().await?;
    Ok(Json(json!({"ready": true})))
}

async fn initiate_validation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<InitiateValidationRequest>,
) -> Result<(StatusCode, Json<InitiateValidationResponse>), AppError> {
    let (validation_id, metadata) = validation::initiate_validation_flow(
        &state.flows,
        &auth.user_id,
        &payload.server_name,
        &payload.tool_name,
        payload.tool_arguments,
    )
    .await?;

    let expires_at = chrono::DateTime::from_timestamp_millis(metadata.created_at + FLOW_TTL_MS)
        .ok_or_else(|| AppError::internal("flow expiry out of range"))?;

    Ok((
        StatusCode::CREATED,
        Json(InitiateValidationResponse {
            validation_id,
            expires_at,
        }),
    ))
}

async fn confirm_validation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(validation_id): Path<String>,
) -> Result<Json<ConfirmValidationResponse>, AppError> {
    ensure_validation_access(&auth, &validation_id)?;

    let success = validation::complete_validation_flow(&validation_id, &state.flows).await?;
    Ok(Json(ConfirmValidationResponse { success }))
}

async fn deny_validation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(validation_id): Path<String>,
    payload: Option<Json<DenyValidationRequest>>,
) -> Result<Json<ConfirmValidationResponse>, AppError> {
    ensure_validation_access(&auth, &validation_id)?;

    let reason = payload.and_then(|Json(body)| body.reason);
    validation::deny_validation_flow(&validation_id, reason, &state.flows).await?;
    Ok(Json(ConfirmValidationResponse { success: true }))
}

async fn validation_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(validation_id): Path<String>,
) -> Result<Json<ValidationStatus>, AppError> {
    ensure_validation_access(&auth, &validation_id)?;

    let status = validation::get_validation_status(&validation_id, &state.flows)
        .await?
        .ok_or_else(|| AppError::from(FlowError::NotFound(validation_id.clone())))?;
    Ok(Json(status))
}

async fn await_validation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(validation_id): Path<String>,
    Query(query): Query<AwaitValidationQuery>,
) -> Result<Json<ValidationStatus>, AppError> {
    ensure_validation_access(&auth, &validation_id)?;

    let max = state.config.await_max_timeout_ms;
    let timeout_ms = query.timeout_ms.unwrap_or(max).min(max);
    let status = validation::await_validation(
        &validation_id,
        Duration::from_millis(timeout_ms),
        &state.flows,
    )
    .await?;
    Ok(Json(status))
}
