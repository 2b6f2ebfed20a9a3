use std::sync::Arc;

use axum::{
    body::{to_bytes, Body, Bytes},
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use tessera_api::{
    app,
    auth::issue_token,
    metrics::Metrics,
    state::{AppState, AuthConfig},
};
use tessera_core::{
    CapacityStore, Event, IdempotencyGuard, InMemoryCapacityStore, InMemoryIdempotencyStore,
    ReservationService, ReservationStatus, ReservationTx,
};

struct Harness {
    app: Router,
    state: AppState,
    store: InMemoryCapacityStore,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

fn harness() -> Harness {
    let store = InMemoryCapacityStore::new();
    let state = AppState {
        reservations: Arc::new(ReservationService::new(
            Arc::new(store.clone()),
            Duration::minutes(5),
        )),
        idempotency: Arc::new(IdempotencyGuard::new(Arc::new(InMemoryIdempotencyStore::new()))),
        metrics: Arc::new(Metrics::new().unwrap()),
        auth: AuthConfig {
            secret: "test-secret".to_string(),
            expiration: 3600,
        },
    };

    Harness {
        app: app(state.clone()),
        state,
        store,
    }
}

impl Harness {
    async fn event(&self, total_seats: i32, starts_in: Duration) -> Event {
        let event = Event::new("Launch Party", total_seats).starting_at(Utc::now() + starts_in);
        self.store.insert_event(event.clone()).await;
        event
    }

    fn token(&self, user_id: Uuid) -> String {
        issue_token(&self.state.auth, user_id).unwrap()
    }

    fn post_request(&self, uri: &str, user_id: Option<Uuid>, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(user_id) = user_id {
            builder = builder.header("Authorization", format!("Bearer {}", self.token(user_id)));
        }
        if let Some(key) = key {
            builder = builder.header("Idempotency-Key", key);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn post(&self, uri: &str, user_id: Option<Uuid>, key: Option<&str>) -> Reply {
        self.send(self.post_request(uri, user_id, key)).await
    }

    async fn get(&self, uri: &str, user_id: Uuid) -> Reply {
        let request = Request::builder()
            .uri(uri)
            .header("Authorization", format!("Bearer {}", self.token(user_id)))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        Reply { status, headers, body }
    }

    async fn hold(&self, event_id: Uuid, user_id: Uuid) -> Reply {
        let key = Uuid::new_v4().to_string();
        self.post(&format!("/v1/events/{event_id}/reserve-pending"), Some(user_id), Some(&key))
            .await
    }
}

#[tokio::test]
async fn test_two_seat_event_end_to_end() {
    let h = harness();
    let event = h.event(2, Duration::days(3)).await;
    let (a, b, c, d) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let hold_a = h.hold(event.id, a).await;
    assert_eq!(hold_a.status, StatusCode::CREATED);
    assert_eq!(hold_a.json()["status"], "pending");
    assert!(hold_a.json()["expires_at"].is_string());

    let hold_b = h.hold(event.id, b).await;
    assert_eq!(hold_b.status, StatusCode::CREATED);

    let hold_c = h.hold(event.id, c).await;
    assert_eq!(hold_c.status, StatusCode::CONFLICT);
    assert_eq!(hold_c.json()["error_code"], "seats_full");

    let a_id = hold_a.json()["reservation_id"].as_str().unwrap().to_string();
    let confirmed = h
        .post(&format!("/v1/reservations/{a_id}/confirm"), Some(a), Some("confirm-a"))
        .await;
    assert_eq!(confirmed.status, StatusCode::OK);
    assert_eq!(confirmed.json()["status"], "confirmed");

    let b_id = hold_b.json()["reservation_id"].as_str().unwrap().to_string();
    let canceled = h.post(&format!("/v1/reservations/{b_id}/cancel"), Some(b), None).await;
    assert_eq!(canceled.status, StatusCode::OK);
    assert_eq!(canceled.json()["status"], "canceled");
    assert!(canceled.json()["canceled_at"].is_string());

    let hold_d = h.hold(event.id, d).await;
    assert_eq!(hold_d.status, StatusCode::CREATED);

    let text = h.send(Request::builder().uri("/metrics").body(Body::empty()).unwrap()).await;
    let text = String::from_utf8(text.body.to_vec()).unwrap();
    assert!(text.contains("tessera_holds_total 3"));
    assert!(text.contains("tessera_rejections_total{code=\"seats_full\"} 1"));
}

#[tokio::test]
async fn test_retried_hold_is_replayed_verbatim() {
    let h = harness();
    let event = h.event(5, Duration::days(1)).await;
    let user_id = Uuid::new_v4();
    let uri = format!("/v1/events/{}/reserve-pending", event.id);

    let first = h.post(&uri, Some(user_id), Some("hold-once")).await;
    let second = h.post(&uri, Some(user_id), Some("hold-once")).await;

    assert_eq!(first.status, StatusCode::CREATED);
    assert_eq!(second.status, StatusCode::CREATED);
    assert_eq!(first.body, second.body);
    assert!(first.headers.get("idempotent-replayed").is_none());
    assert_eq!(second.headers["idempotent-replayed"], "true");
    assert_eq!(second.headers["content-type"], "application/json");

    assert_eq!(h.state.metrics.holds.get(), 1);
    assert_eq!(h.state.metrics.replays.get(), 1);
    assert_eq!(h.store.reservations_for(event.id).await.len(), 1);
}

#[tokio::test]
async fn test_same_key_is_scoped_per_user() {
    let h = harness();
    let event = h.event(5, Duration::days(1)).await;
    let uri = format!("/v1/events/{}/reserve-pending", event.id);

    let first = h.post(&uri, Some(Uuid::new_v4()), Some("shared-key")).await;
    let second = h.post(&uri, Some(Uuid::new_v4()), Some("shared-key")).await;

    assert_eq!(second.status, StatusCode::CREATED);
    assert!(second.headers.get("idempotent-replayed").is_none());
    assert_ne!(first.json()["reservation_id"], second.json()["reservation_id"]);
}

#[tokio::test]
async fn test_failed_request_does_not_burn_the_key() {
    let h = harness();
    let event = h.event(1, Duration::days(1)).await;
    let holder = Uuid::new_v4();
    let waiting = Uuid::new_v4();
    let uri = format!("/v1/events/{}/reserve-pending", event.id);

    let held = h.hold(event.id, holder).await;
    let full = h.post(&uri, Some(waiting), Some("retry-me")).await;
    assert_eq!(full.status, StatusCode::CONFLICT);

    let held_id = held.json()["reservation_id"].as_str().unwrap().to_string();
    h.post(&format!("/v1/reservations/{held_id}/cancel"), Some(holder), None)
        .await;

    let retry = h.post(&uri, Some(waiting), Some("retry-me")).await;
    assert_eq!(retry.status, StatusCode::CREATED);
    assert!(retry.headers.get("idempotent-replayed").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_sent_while_first_is_running_gets_429() {
    let h = harness();
    let event = h.event(3, Duration::days(1)).await;
    let user_id = Uuid::new_v4();
    let uri = format!("/v1/events/{}/reserve-pending", event.id);

    // park the first request on the event row lock
    let mut blocker = h.store.begin().await.unwrap();
    blocker.lock_event(event.id).await.unwrap();

    let first = {
        let app = h.app.clone();
        let request = h.post_request(&uri, Some(user_id), Some("double-click"));
        tokio::spawn(async move { app.oneshot(request).await.unwrap() })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let second = h.post(&uri, Some(user_id), Some("double-click")).await;
    assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.json()["error_code"], "request_in_progress");

    blocker.commit().await.unwrap();
    let first = first.await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let third = h.post(&uri, Some(user_id), Some("double-click")).await;
    assert_eq!(third.status, StatusCode::CREATED);
    assert_eq!(third.headers["idempotent-replayed"], "true");
    assert_eq!(h.store.reservations_for(event.id).await.len(), 1);
    assert_eq!(h.state.metrics.holds.get(), 1);
}

#[tokio::test]
async fn test_write_routes_require_idempotency_key() {
    let h = harness();
    let event = h.event(1, Duration::days(1)).await;
    let user_id = Uuid::new_v4();

    let hold = h
        .post(&format!("/v1/events/{}/reserve-pending", event.id), Some(user_id), None)
        .await;
    assert_eq!(hold.status, StatusCode::BAD_REQUEST);
    assert_eq!(hold.json()["error_code"], "missing_idempotency_key");

    let confirm = h
        .post(&format!("/v1/reservations/{}/confirm", Uuid::new_v4()), Some(user_id), None)
        .await;
    assert_eq!(confirm.status, StatusCode::BAD_REQUEST);

    assert!(h.store.reservations_for(event.id).await.is_empty());
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let h = harness();
    let event = h.event(1, Duration::days(1)).await;

    let reply = h
        .post(&format!("/v1/events/{}/reserve-pending", event.id), None, Some("k"))
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.json()["error_code"], "unauthenticated");

    let forged = Request::builder()
        .method("POST")
        .uri(format!("/v1/events/{}/reserve-pending", event.id))
        .header("Authorization", "Bearer not-a-jwt")
        .header("Idempotency-Key", "k")
        .body(Body::empty())
        .unwrap();
    assert_eq!(h.send(forged).await.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_guest_token_can_reserve() {
    let h = harness();
    let event = h.event(1, Duration::days(1)).await;

    let login = h.post("/v1/auth/guest", None, None).await;
    assert_eq!(login.status, StatusCode::OK);
    let token = login.json()["token"].as_str().unwrap().to_string();
    let user_id: Uuid = login.json()["user_id"].as_str().unwrap().parse().unwrap();

    let request = Request::builder()
        .method("POST")
        .uri(format!("/v1/events/{}/reserve-pending", event.id))
        .header("Authorization", format!("Bearer {token}"))
        .header("Idempotency-Key", "guest-hold")
        .body(Body::empty())
        .unwrap();
    let reply = h.send(request).await;
    assert_eq!(reply.status, StatusCode::CREATED);

    let rows = h.store.reservations_for(event.id).await;
    assert_eq!(rows[0].user_id, user_id);
}

#[tokio::test]
async fn test_domain_rejections_map_to_status_codes() {
    let h = harness();
    let event = h.event(2, Duration::days(1)).await;
    let owner = Uuid::new_v4();

    let missing = h.hold(Uuid::new_v4(), owner).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.json()["error_code"], "not_found");

    let hold = h.hold(event.id, owner).await;
    let id = hold.json()["reservation_id"].as_str().unwrap().to_string();

    let stranger = h
        .post(&format!("/v1/reservations/{id}/confirm"), Some(Uuid::new_v4()), Some("steal"))
        .await;
    assert_eq!(stranger.status, StatusCode::FORBIDDEN);
    assert_eq!(stranger.json()["error_code"], "unauthorized");

    h.post(&format!("/v1/reservations/{id}/confirm"), Some(owner), Some("confirm")).await;
    let again = h.hold(event.id, owner).await;
    assert_eq!(again.status, StatusCode::CONFLICT);
    assert_eq!(again.json()["error_code"], "already_confirmed");
}

#[tokio::test]
async fn test_cancel_after_event_start_is_refused() {
    let h = harness();
    let event = h.event(2, -Duration::minutes(30)).await;
    let owner = Uuid::new_v4();

    let hold = h.hold(event.id, owner).await;
    assert_eq!(hold.status, StatusCode::CREATED);
    let id = hold.json()["reservation_id"].as_str().unwrap().to_string();

    let reply = h.post(&format!("/v1/reservations/{id}/cancel"), Some(owner), None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["error_code"], "cancellation_not_allowed");
}

#[tokio::test]
async fn test_confirm_of_canceled_hold_is_refused() {
    let h = harness();
    let event = h.event(2, Duration::days(1)).await;
    let owner = Uuid::new_v4();

    let hold = h.hold(event.id, owner).await;
    let id = hold.json()["reservation_id"].as_str().unwrap().to_string();
    h.post(&format!("/v1/reservations/{id}/cancel"), Some(owner), None).await;

    let reply = h
        .post(&format!("/v1/reservations/{id}/confirm"), Some(owner), Some("late"))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["error_code"], "expired_or_canceled");
}

#[tokio::test]
async fn test_reservation_is_visible_to_owner_only() {
    let h = harness();
    let event = h.event(1, Duration::days(1)).await;
    let owner = Uuid::new_v4();

    let hold = h.hold(event.id, owner).await;
    let id = hold.json()["reservation_id"].as_str().unwrap().to_string();

    let mine = h.get(&format!("/v1/reservations/{id}"), owner).await;
    assert_eq!(mine.status, StatusCode::OK);
    assert_eq!(mine.json()["event_id"], event.id.to_string());
    assert_eq!(mine.json()["status"], ReservationStatus::Pending.as_str());

    let theirs = h.get(&format!("/v1/reservations/{id}"), Uuid::new_v4()).await;
    assert_eq!(theirs.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_health_is_public() {
    let h = harness();
    let reply = h.send(Request::builder().uri("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(&reply.body[..], b"OK");
}
