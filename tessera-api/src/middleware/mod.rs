pub mod auth;
pub mod idempotency;
