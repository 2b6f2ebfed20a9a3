use axum::{
    extract::State,
    routing::post,
    Json, Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::{CustomerClaims, CUSTOMER_ROLE},
    state::{AppState, AuthConfig},
};

#[derive(Debug, Serialize)]
struct AuthResponse {
    user_id: Uuid,
    token: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/auth/guest", post(login_guest))
}

/// Sign a customer token whose subject is `user_id`.
pub fn issue_token(auth: &AuthConfig, user_id: Uuid) -> Result<String, AppError> {
    let claims = CustomerClaims {
        sub: user_id.to_string(),
        role: CUSTOMER_ROLE.to_owned(),
        exp: (Utc::now() + Duration::seconds(auth.expiration as i64)).timestamp() as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(auth.secret.as_bytes()))
        .map_err(|e| AppError::InternalServerError(format!("Token encoding failed: {}", e)))
}

async fn login_guest(State(state): State<AppState>) -> Result<Json<AuthResponse>, AppError> {
    let user_id = Uuid::new_v4();
    let token = issue_token(&state.auth, user_id)?;
    tracing::debug!(%user_id, "Issued guest token");

    Ok(Json(AuthResponse { user_id, token }))
}
