use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tessera_core::CachedResponse;

use crate::{error::AppError, middleware::auth::CustomerClaims, state::AppState};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REPLAYED_HEADER: &str = "idempotent-replayed";

// Handler bodies here are small JSON documents.
const MAX_CACHED_BODY_BYTES: usize = 64 * 1024;

const INTERNAL_ERROR_BODY: &[u8] =
    br#"{"message":"Internal Server Error","error_code":"internal_error"}"#;

/// Runs the wrapped route through the idempotency guard, keyed by the
/// caller's `Idempotency-Key` header and scoped to the authenticated user.
pub async fn idempotency_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let key = req
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned);

    let requester = match req.extensions().get::<CustomerClaims>() {
        Some(claims) => claims.sub.clone(),
        None => {
            return AppError::AuthenticationError("Missing customer claims".to_string())
                .into_response()
        }
    };

    let outcome = state
        .idempotency
        .execute(&requester, key.as_deref(), move || async move {
            capture(next.run(req).await).await
        })
        .await;

    match outcome {
        Ok(guarded) => {
            let replayed = guarded.is_replay();
            if replayed {
                state.metrics.replays.inc();
            }
            rebuild(guarded.into_response(), replayed)
        }
        Err(err) => {
            state.metrics.record_rejection(&err);
            AppError::from(err).into_response()
        }
    }
}

async fn capture(response: Response) -> CachedResponse {
    let (parts, body) = response.into_parts();
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned);

    match to_bytes(body, MAX_CACHED_BODY_BYTES).await {
        Ok(bytes) => CachedResponse {
            status: parts.status.as_u16(),
            content_type,
            body: bytes.to_vec(),
        },
        Err(e) => {
            // a 5xx is never cached, so the client can retry with the same key
            tracing::error!("Failed to buffer response body: {}", e);
            CachedResponse {
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                content_type: Some("application/json".to_string()),
                body: INTERNAL_ERROR_BODY.to_vec(),
            }
        }
    }
}

fn rebuild(cached: CachedResponse, replayed: bool) -> Response {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Body::from(cached.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    if let Some(content_type) = cached
        .content_type
        .and_then(|v| HeaderValue::from_str(&v).ok())
    {
        headers.insert(header::CONTENT_TYPE, content_type);
    }
    if replayed {
        headers.insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
    }
    response
}
