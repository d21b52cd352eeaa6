//! Waitlist store trait and related types.
//!
//! The store owns persisted waitlist entries. It offers ordered queries and a
//! single mutation primitive for existing entries, [`WaitlistStore::transition`],
//! which is a compare-and-swap on `(status, version)`.
//!
//! # Design
//!
//! Every caller that changes an entry (promotion, response, expiry sweep,
//! leave, admin override) goes through `transition` with the status and
//! version it last observed. Two racing callers can therefore never both win:
//! the loser receives [`StoreError::ConcurrencyConflict`] and decides whether to
//! re-read and retry or to give up.
//!
//! The store also enforces the remaining invariants of the data model:
//!
//! - At most one active (`Waiting`/`Notified`) entry per `(event, user)` pair
//! - Terminal statuses never change again
//! - Entries are never deleted
//!
//! # Implementations
//!
//! - `InMemoryWaitlistStore` (in `waitlist-testing`): a locked map for tests
//! - `PostgresWaitlistStore` (in `waitlist-postgres`): production storage
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
//! engine can hold an `Arc<dyn WaitlistStore>`.

use crate::entry::{ResponseWindow, WaitlistEntry, WaitlistStatus};
use crate::ids::{EntryId, EventId, UserId, Version};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency conflict: the entry is no longer in the
    /// observed status or version.
    #[error(
        "Concurrency conflict on entry {entry_id}: expected {expected_status}@v{expected_version}, found {actual_status}@v{actual_version}"
    )]
    ConcurrencyConflict {
        /// The entry being transitioned.
        entry_id: EntryId,
        /// Status the caller observed.
        expected_status: WaitlistStatus,
        /// Version the caller observed.
        expected_version: Version,
        /// Status currently stored.
        actual_status: WaitlistStatus,
        /// Version currently stored.
        actual_version: Version,
    },

    /// The pair already has a `Waiting` or `Notified` entry.
    #[error("User {user_id} already has an active entry for event {event_id}")]
    DuplicateActive {
        /// Event ID
        event_id: EventId,
        /// User ID
        user_id: UserId,
        /// The existing active entry
        existing: EntryId,
    },

    /// No entry with this id exists.
    #[error("Entry not found: {0}")]
    EntryNotFound(EntryId),

    /// The requested edge is not part of the state machine.
    #[error("Illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Source status
        from: WaitlistStatus,
        /// Target status
        to: WaitlistStatus,
    },

    /// Backend failure (connection, query, decoding).
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether re-reading the entry and trying again may succeed.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// A guarded status change for one entry.
///
/// Built from the entry as last observed by the caller so the store can
/// check that nothing moved in between.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Entry to change
    pub entry_id: EntryId,
    /// Status the caller observed
    pub from: WaitlistStatus,
    /// Status to move to
    pub to: WaitlistStatus,
    /// Version the caller observed
    pub expected_version: Version,
    /// Response window to stamp (promotions only)
    pub window: Option<ResponseWindow>,
    /// Transition time, recorded as `updated_at`
    pub at: DateTime<Utc>,
}

impl Transition {
    /// `Waiting → Notified`, stamping the response window.
    #[must_use]
    pub fn promote(entry: &WaitlistEntry, window: ResponseWindow) -> Self {
        Self {
            entry_id: entry.id,
            from: entry.status,
            to: WaitlistStatus::Notified,
            expected_version: entry.version,
            window: Some(window),
            at: window.notified_at,
        }
    }

    /// Any other edge out of the entry's current status.
    #[must_use]
    pub fn resolve(entry: &WaitlistEntry, to: WaitlistStatus, at: DateTime<Utc>) -> Self {
        Self {
            entry_id: entry.id,
            from: entry.status,
            to,
            expected_version: entry.version,
            window: None,
            at,
        }
    }

    /// Check the edge against the state machine.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IllegalTransition`] when `from → to` is not an edge.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.from.can_transition_to(self.to) {
            Ok(())
        } else {
            Err(StoreError::IllegalTransition {
                from: self.from,
                to: self.to,
            })
        }
    }

    /// Apply the transition to a stored entry after the guard passed.
    pub fn apply(&self, entry: &mut WaitlistEntry) {
        entry.status = self.to;
        entry.version = entry.version.next();
        entry.updated_at = self.at;
        if let Some(window) = self.window {
            entry.notified_at = Some(window.notified_at);
            entry.response_deadline = Some(window.deadline);
        }
    }

    /// Compare the guard against the stored entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConcurrencyConflict`] if status or version moved.
    pub fn check_guard(&self, stored: &WaitlistEntry) -> Result<(), StoreError> {
        if stored.status == self.from && stored.version == self.expected_version {
            Ok(())
        } else {
            Err(StoreError::ConcurrencyConflict {
                entry_id: self.entry_id,
                expected_status: self.from,
                expected_version: self.expected_version,
                actual_status: stored.status,
                actual_version: stored.version,
            })
        }
    }
}

/// Waitlist store abstraction.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the engine shares one store across
/// request handlers and the background sweeper.
///
/// # Ordering
///
/// Per-event lists are ordered by `joined_at` ascending, ties broken by entry
/// id. Lists are finite snapshots: calling the method again restarts the
/// iteration against current state.
pub trait WaitlistStore: Send + Sync {
    /// Create a `Waiting` entry for the pair.
    ///
    /// # Errors
    ///
    /// - `DuplicateActive`: the pair already has an active entry
    /// - `Database`: backend failure
    fn insert_waiting(
        &self,
        event_id: EventId,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> StoreFuture<'_, WaitlistEntry>;

    /// Apply a guarded transition and return the updated entry.
    ///
    /// This is the only way an existing entry changes. The stored version is
    /// incremented by one on success.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: status or version no longer match
    /// - `IllegalTransition`: the edge is not in the state machine
    /// - `EntryNotFound`: unknown entry id
    /// - `Database`: backend failure
    fn transition(&self, transition: Transition) -> StoreFuture<'_, WaitlistEntry>;

    /// Load one entry by id.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn get(&self, entry_id: EntryId) -> StoreFuture<'_, Option<WaitlistEntry>>;

    /// The active entry of the pair, if any.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn find_active(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Option<WaitlistEntry>>;

    /// The most recently joined entry of the pair, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn find_latest(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Option<WaitlistEntry>>;

    /// Entries of one event in queue order, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn list_by_event(
        &self,
        event_id: EventId,
        status: Option<WaitlistStatus>,
    ) -> StoreFuture<'_, Vec<WaitlistEntry>>;

    /// 1-based rank of the user's `Waiting` entry, `None` if not waiting.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn position_of(&self, event_id: EventId, user_id: UserId) -> StoreFuture<'_, Option<usize>>;

    /// Number of entries of one event in the given status.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn count_by_status(
        &self,
        event_id: EventId,
        status: WaitlistStatus,
    ) -> StoreFuture<'_, usize>;

    /// All `Notified` entries whose deadline is strictly before `now`,
    /// across events, ordered by deadline.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn list_overdue(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<WaitlistEntry>>;

    /// Events that currently have at least one `Waiting` entry.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn events_with_waiting(&self) -> StoreFuture<'_, Vec<EventId>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry() -> WaitlistEntry {
        WaitlistEntry::waiting(EventId::new(), UserId::new(), Utc::now())
    }

    #[test]
    fn promote_stamps_window_and_bumps_version() {
        let mut stored = entry();
        let window = ResponseWindow::open(Utc::now(), Duration::hours(1));
        let transition = Transition::promote(&stored, window);

        assert!(transition.validate().is_ok());
        assert!(transition.check_guard(&stored).is_ok());
        transition.apply(&mut stored);

        assert_eq!(stored.status, WaitlistStatus::Notified);
        assert_eq!(stored.version, Version::new(1));
        assert_eq!(stored.response_deadline, Some(window.deadline));
        assert_eq!(stored.notified_at, Some(window.notified_at));
    }

    #[test]
    fn stale_version_is_a_conflict() {
        let mut stored = entry();
        let stale = Transition::resolve(&stored, WaitlistStatus::Removed, Utc::now());
        stored.version = stored.version.next();

        let err = stale.check_guard(&stored).err();
        assert!(err.as_ref().is_some_and(StoreError::is_conflict), "{err:?}");
    }

    #[test]
    fn illegal_edge_is_rejected() {
        let stored = entry();
        let transition = Transition::resolve(&stored, WaitlistStatus::Expired, Utc::now());
        assert_eq!(
            transition.validate(),
            Err(StoreError::IllegalTransition {
                from: WaitlistStatus::Waiting,
                to: WaitlistStatus::Expired,
            })
        );
    }

    #[test]
    fn conflict_error_display() {
        let id = EntryId::new();
        let error = StoreError::ConcurrencyConflict {
            entry_id: id,
            expected_status: WaitlistStatus::Notified,
            expected_version: Version::new(1),
            actual_status: WaitlistStatus::Accepted,
            actual_version: Version::new(2),
        };
        let display = error.to_string();
        assert!(display.contains("expected notified@v1"));
        assert!(display.contains("found accepted@v2"));
    }
}
