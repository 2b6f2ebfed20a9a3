//! Reservation state machine.
//!
//! ```text
//! (none) ──hold──▶ Pending ──confirm──▶ Confirmed
//!                   │  │                    │
//!                   │  └──sweep (ttl)──▶ Expired
//!                   └──cancel──▶ Canceled ◀─┘ cancel
//! Canceled | Expired | stale Pending ──hold──▶ Pending (same row)
//! ```
//!
//! Everything here is a pure function of the reservation value and an
//! explicit `now`; persistence lives behind [`crate::repository`].

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::ReservationError;
use crate::models::{Event, Reservation, ReservationStatus};

/// Source of the current time. Transactions call it only once their row
/// locks are held, so time spent waiting on a lock counts against a hold.
pub type Clock = fn() -> DateTime<Utc>;

impl Reservation {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }

    /// Pending and not yet past its expiry.
    pub fn is_hold_live(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && self.expires_at.is_some_and(|at| at > now)
    }

    /// Counted against the event's capacity.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Confirmed || self.is_hold_live(now)
    }

    /// Canceled, expired, or a pending hold whose ttl has lapsed.
    pub fn is_invalid(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ReservationStatus::Canceled | ReservationStatus::Expired => true,
            ReservationStatus::Pending => !self.is_hold_live(now),
            ReservationStatus::Confirmed => false,
        }
    }

    /// Matches the sweeper's selection predicate.
    pub fn is_stale_hold(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && self.expires_at.is_some_and(|at| at < now)
    }
}

/// What a hold request should do with the caller's existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldPlan {
    /// No row yet for this (event, user).
    Create,
    /// Caller already holds a live seat; hand the row back untouched.
    Replay,
    /// Dead row that gets reused for the new hold.
    Reactivate(Uuid),
}

/// Outcome of a confirm/cancel decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Apply,
    Unchanged,
}

pub fn plan_hold(
    existing: Option<&Reservation>,
    now: DateTime<Utc>,
) -> Result<HoldPlan, ReservationError> {
    let Some(current) = existing else {
        return Ok(HoldPlan::Create);
    };

    if current.status == ReservationStatus::Confirmed {
        return Err(ReservationError::AlreadyConfirmed);
    }

    if current.is_hold_live(now) {
        return Ok(HoldPlan::Replay);
    }

    Ok(HoldPlan::Reactivate(current.id))
}

pub fn plan_confirm(
    current: &Reservation,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Transition, ReservationError> {
    if !current.is_owned_by(user_id) {
        return Err(ReservationError::Unauthorized);
    }

    if current.status == ReservationStatus::Confirmed {
        return Ok(Transition::Unchanged);
    }

    if current.is_invalid(now) {
        return Err(ReservationError::ExpiredOrCanceled);
    }

    Ok(Transition::Apply)
}

/// Cancellation is pre-event only, whatever the current status.
pub fn plan_cancel(
    current: &Reservation,
    event: &Event,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Transition, ReservationError> {
    if !current.is_owned_by(user_id) {
        return Err(ReservationError::Unauthorized);
    }

    if current.status == ReservationStatus::Canceled {
        return Ok(Transition::Unchanged);
    }

    if event.is_started(now) {
        return Err(ReservationError::CancellationNotAllowed);
    }

    Ok(Transition::Apply)
}

/// Reset a dead row into a fresh pending hold, keeping its id.
pub fn activate_hold(
    mut reservation: Reservation,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Reservation {
    reservation.status = ReservationStatus::Pending;
    reservation.reserved_at = now;
    reservation.expires_at = Some(now + ttl);
    reservation.canceled_at = None;
    reservation
}

pub fn confirm(mut reservation: Reservation, now: DateTime<Utc>) -> Reservation {
    reservation.status = ReservationStatus::Confirmed;
    reservation.reserved_at = now;
    reservation.expires_at = None;
    reservation
}

pub fn cancel(mut reservation: Reservation, now: DateTime<Utc>) -> Reservation {
    reservation.status = ReservationStatus::Canceled;
    reservation.canceled_at = Some(now);
    reservation
}

pub fn expire(mut reservation: Reservation) -> Reservation {
    reservation.status = ReservationStatus::Expired;
    reservation
}
