use axum::{
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, state::AppState, validation::ID_SEPARATOR};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

/// Identity established by the bearer token; inserted as a request extension.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: String,
}

pub async fn user_auth_middleware(
    State(state): State<AppState>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers())?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[state.config.jwt_audience.clone()]);
    validation.set_issuer(&[state.config.jwt_issuer.clone()]);
    validation.leeway = 30;

    let decoded = decode::<UserClaims>(
        &token,
        &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| AppError::Unauthorized(format!("invalid token: {e}")))?;

    let user_id = decoded.claims.sub.trim().to_string();
    if user_id.is_empty() {
        return Err(AppError::Unauthorized("token has no subject".to_string()));
    }

    request.extensions_mut().insert(AuthUser { user_id });

    Ok(next.run(request).await)
}

pub fn bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing Authorization header".to_string()))?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("authorization must be Bearer token".to_string()))?;

    Ok(token.to_string())
}

pub fn issue_user_token(claims: &UserClaims, jwt_secret: &str) -> Result<String, AppError> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::internal(format!("failed to sign user token: {e}")))
}

pub fn make_user_claims(issuer: &str, audience: &str, user_id: &str, ttl_seconds: i64) -> UserClaims {
    let now = Utc::now();
    UserClaims {
        iss: issuer.to_string(),
        sub: user_id.to_string(),
        aud: audience.to_string(),
        iat: now.timestamp() as usize,
        exp: (now + chrono::Duration::seconds(ttl_seconds)).timestamp() as usize,
    }
}

/// A validation id is owned by the user whose id prefixes it, followed by `:`.
pub fn ensure_validation_access(auth: &AuthUser, validation_id: &str) -> Result<(), AppError> {
    let owned = validation_id
        .strip_prefix(auth.user_id.as_str())
        .is_some_and(|rest| rest.starts_with(ID_SEPARATOR));
    // A subject containing the separator could claim a prefix of someone else's id.
    if auth.user_id.is_empty() || auth.user_id.contains(ID_SEPARATOR) || !owned {
        return Err(AppError::Forbidden(
            "validation flow belongs to another user".to_string(),
        ));
    }
    Ok(())
}
