use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use tessera_core::{Reservation, ReservationError, ReservationStatus};

use crate::{
    error::AppError,
    middleware::{
        auth::{customer_auth_middleware, CustomerClaims},
        idempotency::idempotency_middleware,
    },
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct HoldResponse {
    pub message: String,
    pub reservation_id: Uuid,
    pub status: ReservationStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub message: String,
    pub reservation_id: Uuid,
    pub status: ReservationStatus,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub message: String,
    pub reservation_id: Uuid,
    pub status: ReservationStatus,
    pub canceled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub id: Uuid,
    pub event_id: Uuid,
    pub status: ReservationStatus,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl From<Reservation> for ReservationResponse {
    fn from(r: Reservation) -> Self {
        Self {
            id: r.id,
            event_id: r.event_id,
            status: r.status,
            reserved_at: r.reserved_at,
            expires_at: r.expires_at,
            canceled_at: r.canceled_at,
        }
    }
}

pub fn routes(state: AppState) -> Router<AppState> {
    // Retried writes must not run twice
    let idempotent = Router::new()
        .route("/v1/events/{event_id}/reserve-pending", post(reserve_pending))
        .route("/v1/reservations/{reservation_id}/confirm", post(confirm_reservation))
        .route_layer(middleware::from_fn_with_state(state.clone(), idempotency_middleware));

    Router::new()
        .route("/v1/reservations/{reservation_id}", get(get_reservation))
        .route("/v1/reservations/{reservation_id}/cancel", post(cancel_reservation))
        .merge(idempotent)
        .route_layer(middleware::from_fn_with_state(state, customer_auth_middleware))
}

fn rejected(state: &AppState, err: ReservationError) -> AppError {
    state.metrics.record_rejection(&err);
    AppError::from(err)
}

async fn reserve_pending(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(event_id): Path<Uuid>,
) -> Result<(StatusCode, Json<HoldResponse>), AppError> {
    let user_id = claims.user_id()?;

    let reservation = state
        .reservations
        .hold(event_id, user_id)
        .await
        .map_err(|e| rejected(&state, e))?;
    state.metrics.holds.inc();

    Ok((
        StatusCode::CREATED,
        Json(HoldResponse {
            message: "Seat reserved pending confirmation".to_string(),
            reservation_id: reservation.id,
            status: reservation.status,
            expires_at: reservation.expires_at,
        }),
    ))
}

async fn confirm_reservation(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<ConfirmResponse>, AppError> {
    let user_id = claims.user_id()?;

    let reservation = state
        .reservations
        .confirm(reservation_id, user_id)
        .await
        .map_err(|e| rejected(&state, e))?;
    state.metrics.confirmations.inc();

    Ok(Json(ConfirmResponse {
        message: "Reservation confirmed".to_string(),
        reservation_id: reservation.id,
        status: reservation.status,
    }))
}

async fn cancel_reservation(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, AppError> {
    let user_id = claims.user_id()?;

    let reservation = state
        .reservations
        .cancel(reservation_id, user_id)
        .await
        .map_err(|e| rejected(&state, e))?;
    state.metrics.cancellations.inc();

    Ok(Json(CancelResponse {
        message: "Reservation canceled".to_string(),
        reservation_id: reservation.id,
        status: reservation.status,
        canceled_at: reservation.canceled_at,
    }))
}

async fn get_reservation(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<ReservationResponse>, AppError> {
    let user_id = claims.user_id()?;

    let reservation = state
        .reservations
        .get(reservation_id, user_id)
        .await
        .map_err(|e| rejected(&state, e))?;

    Ok(Json(reservation.into()))
}
