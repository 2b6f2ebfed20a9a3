/// Failure raised by a storage backend (database, cache, lock server).
///
/// These are never part of the reservation taxonomy: callers see them as a
/// generic internal failure and may retry the whole operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid stored value: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Client-facing metadata attached to every reservation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorDetails {
    pub message: &'static str,
    pub code: &'static str,
    pub status: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("event or reservation not found")]
    NotFound,

    #[error("caller does not own the reservation")]
    Unauthorized,

    #[error("event has no remaining seats")]
    SeatsFull,

    #[error("user already holds a confirmed reservation for this event")]
    AlreadyConfirmed,

    #[error("reservation is expired or canceled")]
    ExpiredOrCanceled,

    #[error("event has already started")]
    CancellationNotAllowed,

    #[error("request has no idempotency key")]
    MissingIdempotencyKey,

    #[error("a request with the same idempotency key is in flight")]
    RequestInProgress,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReservationError {
    /// Static `(message, code, status)` table for every error kind.
    pub const fn details(&self) -> ErrorDetails {
        let (message, code, status) = match self {
            Self::NotFound => ("The requested resource was not found.", "not_found", 404),
            Self::Unauthorized => (
                "You are not allowed to modify this reservation.",
                "unauthorized",
                403,
            ),
            Self::SeatsFull => ("This event is sold out.", "seats_full", 409),
            Self::AlreadyConfirmed => (
                "You already have a confirmed reservation for this event.",
                "already_confirmed",
                409,
            ),
            Self::ExpiredOrCanceled => (
                "This reservation has expired or was canceled. Please reserve again.",
                "expired_or_canceled",
                400,
            ),
            Self::CancellationNotAllowed => (
                "The event has already started and can no longer be canceled.",
                "cancellation_not_allowed",
                400,
            ),
            Self::MissingIdempotencyKey => (
                "The Idempotency-Key header is required.",
                "missing_idempotency_key",
                400,
            ),
            Self::RequestInProgress => (
                "A request with this Idempotency-Key is already being processed. Retry shortly.",
                "request_in_progress",
                429,
            ),
            Self::Store(_) => ("Internal Server Error", "internal_error", 500),
        };

        ErrorDetails { message, code, status }
    }

    pub const fn code(&self) -> &'static str {
        self.details().code
    }

    /// Whether the same request may succeed if sent again later.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SeatsFull | Self::RequestInProgress | Self::Store(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_table_matches_wire_contract() {
        let cases = [
            (ReservationError::Unauthorized, "unauthorized", 403),
            (ReservationError::ExpiredOrCanceled, "expired_or_canceled", 400),
            (ReservationError::AlreadyConfirmed, "already_confirmed", 409),
            (ReservationError::SeatsFull, "seats_full", 409),
            (ReservationError::CancellationNotAllowed, "cancellation_not_allowed", 400),
            (ReservationError::MissingIdempotencyKey, "missing_idempotency_key", 400),
            (ReservationError::RequestInProgress, "request_in_progress", 429),
            (ReservationError::NotFound, "not_found", 404),
        ];

        for (err, code, status) in cases {
            let details = err.details();
            assert_eq!(details.code, code);
            assert_eq!(details.status, status);
            assert!(!details.message.is_empty());
        }
    }

    #[test]
    fn test_store_errors_are_masked() {
        let err: ReservationError = StoreError::Corrupt("status 'held'".to_string()).into();
        assert_eq!(err.details().status, 500);
        assert_eq!(err.details().message, "Internal Server Error");
        assert!(err.is_retryable());
        assert!(!ReservationError::Unauthorized.is_retryable());
    }
}
