//! Environment traits for the waitlist's external collaborators.
//!
//! The admission engine never talks to the outside world directly. Time, the
//! event registry's capacity bookkeeping, notification delivery and
//! authorization are injected through the traits in this module:
//!
//! - [`Clock`]: wall-clock time, swappable for deterministic tests
//! - [`CapacityTracker`]: capacity and confirmed participants of an event
//! - [`NotificationGateway`]: fire-and-forget invitation and decision messages
//! - [`AccessPolicy`]: whether an actor may manage an event's waitlist
//!
//! Production and test implementations live in other crates; see
//! `waitlist-postgres`, `waitlist-server` and `waitlist-testing`.

use crate::entry::WaitlistStatus;
use crate::ids::{EventId, UserId};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```
/// use waitlist_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let before = clock.now();
/// assert!(clock.now() >= before);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ============================================================================
// Capacity tracker
// ============================================================================

/// Boxed future returned by [`CapacityTracker`] methods.
pub type TrackerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TrackerError>> + Send + 'a>>;

/// Errors reported by the event registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// The registry does not know the event.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// The registry could not be reached or failed internally.
    #[error("Capacity tracker unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a participant registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The participant now holds a confirmed slot.
    Registered,
    /// The participant already held a slot; nothing changed.
    AlreadyRegistered,
    /// Every slot is already confirmed; nothing changed.
    Full,
}

/// Capacity bookkeeping owned by the external event registry.
///
/// The registry owns `confirmed_count`; the waitlist only reads it and
/// registers participants when an invitation is accepted or an admin approves
/// an entry.
pub trait CapacityTracker: Send + Sync {
    /// Maximum number of confirmed participants.
    ///
    /// # Errors
    ///
    /// `EventNotFound` for unknown events, `Unavailable` on registry failure.
    fn capacity(&self, event_id: EventId) -> TrackerFuture<'_, u32>;

    /// Current number of confirmed participants.
    ///
    /// # Errors
    ///
    /// `EventNotFound` for unknown events, `Unavailable` on registry failure.
    fn confirmed_count(&self, event_id: EventId) -> TrackerFuture<'_, u32>;

    /// Register a participant, consuming one slot.
    ///
    /// A participant who is already registered consumes nothing and is
    /// reported as `AlreadyRegistered`, even when the event is full.
    ///
    /// # Errors
    ///
    /// `EventNotFound` for unknown events, `Unavailable` on registry failure.
    fn register_participant(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> TrackerFuture<'_, Registration>;

    /// Undo a registration made by the waitlist.
    ///
    /// Used only to compensate a `Registered` outcome whose entry transition
    /// lost a concurrency race. Must not report a participant cancellation back to
    /// the waitlist.
    ///
    /// # Errors
    ///
    /// `EventNotFound` for unknown events, `Unavailable` on registry failure.
    fn release_participant(&self, event_id: EventId, user_id: UserId) -> TrackerFuture<'_, ()>;
}

// ============================================================================
// Notification gateway
// ============================================================================

/// Boxed future returned by [`NotificationGateway`] methods.
pub type NotificationFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + 'a>>;

/// Delivery failure reported by a notification gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Notification delivery failed: {0}")]
pub struct NotificationError(pub String);

/// Outbound messages to waitlisted users.
///
/// Calls are fire-and-forget from the engine's point of view: a delivery
/// failure is logged and counted but never rolls back the entry's transition.
pub trait NotificationGateway: Send + Sync {
    /// Tell a user a slot is reserved for them until `deadline`.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError` if delivery fails.
    fn send_invitation(
        &self,
        event_id: EventId,
        user_id: UserId,
        deadline: DateTime<Utc>,
    ) -> NotificationFuture<'_>;

    /// Confirm the final outcome of a user's entry.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError` if delivery fails.
    fn send_decision_confirmation(
        &self,
        event_id: EventId,
        user_id: UserId,
        decision: WaitlistStatus,
    ) -> NotificationFuture<'_>;
}

// ============================================================================
// Access policy
// ============================================================================

/// Failure to evaluate an authorization query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Access policy unavailable: {0}")]
pub struct AccessError(pub String);

/// Capability query for waitlist administration.
///
/// The engine asks a yes/no question per actor and event; it never inspects
/// role names itself.
pub trait AccessPolicy: Send + Sync {
    /// Whether `actor` may approve or reject entries of `event_id`.
    ///
    /// # Errors
    ///
    /// Returns `AccessError` if the policy backend cannot answer.
    fn can_manage_waitlist(
        &self,
        actor: UserId,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, AccessError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn tracker_error_display() {
        let id = EventId::new();
        assert!(TrackerError::EventNotFound(id).to_string().contains(&id.to_string()));
        assert_eq!(
            TrackerError::Unavailable("timeout".to_string()).to_string(),
            "Capacity tracker unavailable: timeout"
        );
    }
}
