pub mod allocation;
pub mod cancellation;
pub mod confirmation;
pub mod error;
pub mod idempotency;
pub mod lifecycle;
pub mod memory;
pub mod models;
pub mod repository;
pub mod seeding;
pub mod service;
pub mod sweeper;

pub use error::{ErrorDetails, ReservationError, StoreError, StoreResult};
pub use idempotency::{CachedResponse, Guarded, IdempotencyGuard, IdempotencyStore};
pub use memory::{InMemoryCapacityStore, InMemoryIdempotencyStore};
pub use models::{Event, Reservation, ReservationStatus};
pub use repository::{CapacityStore, ReservationTx};
pub use seeding::EventSeed;
pub use service::ReservationService;
