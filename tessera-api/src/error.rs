use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tessera_core::ReservationError;

#[derive(Debug)]
pub enum AppError {
    Reservation(ReservationError),
    AuthenticationError(String),
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, error_code) = match self {
            AppError::Reservation(err) => {
                let details = err.details();
                let status = StatusCode::from_u16(details.status)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                if status.is_server_error() {
                    tracing::error!("Internal Server Error: {}", err);
                } else {
                    tracing::debug!(
                        error_code = details.code,
                        retryable = err.is_retryable(),
                        "Request rejected"
                    );
                }
                (status, details.message.to_string(), details.code)
            }
            AppError::AuthenticationError(msg) => {
                (StatusCode::UNAUTHORIZED, msg, "unauthenticated")
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                    "internal_error",
                )
            }
        };

        let body = Json(json!({
            "message": message,
            "error_code": error_code,
        }));

        (status, body).into_response()
    }
}

impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        Self::Reservation(err)
    }
}
