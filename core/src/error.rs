//! Errors surfaced by waitlist operations.
//!
//! Every command of the engine returns `Result<_, WaitlistError>`. The variants
//! correspond one-to-one to the error kinds callers are expected to handle;
//! [`WaitlistError::kind`] gives the stable machine-readable code.

use crate::environment::{AccessError, TrackerError};
use crate::ids::{EventId, UserId};
use crate::store::StoreError;
use std::fmt;
use thiserror::Error;

/// Stable error codes, suitable for transports and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown event or entry
    NotFound,
    /// Duplicate active join, or a stale version that exhausted its retries
    Conflict,
    /// Response to an entry that is not awaiting one
    InvalidState,
    /// Admin operation without the capability
    Forbidden,
    /// Promotion refused because the event has no free capacity
    CapacityInconsistent,
    /// Store, registry or policy backend failure
    Unavailable,
}

impl ErrorKind {
    /// Upper-case code used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::InvalidState => "INVALID_STATE",
            Self::Forbidden => "FORBIDDEN",
            Self::CapacityInconsistent => "CAPACITY_INCONSISTENT",
            Self::Unavailable => "UNAVAILABLE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by waitlist commands.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitlistError {
    /// Unknown event or entry.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate active entry, or a concurrent modification won the race.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The entry is not in a state that allows the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The actor may not manage this event's waitlist.
    #[error("User {actor} may not manage the waitlist of event {event_id}")]
    Forbidden {
        /// Acting user
        actor: UserId,
        /// Target event
        event_id: EventId,
    },

    /// Admitting another participant would oversubscribe the event.
    #[error(
        "Capacity inconsistent for event {event_id}: capacity {capacity}, confirmed {confirmed}, outstanding invitations {outstanding}"
    )]
    CapacityInconsistent {
        /// Event ID
        event_id: EventId,
        /// Event capacity
        capacity: u32,
        /// Confirmed participants reported by the registry
        confirmed: u32,
        /// `Notified` entries holding a slot
        outstanding: usize,
    },

    /// A backend could not be reached.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl WaitlistError {
    /// The stable code for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::CapacityInconsistent { .. } => ErrorKind::CapacityInconsistent,
            Self::Unavailable(_) => ErrorKind::Unavailable,
        }
    }

    /// `NotFound` for an unknown event.
    #[must_use]
    pub fn event_not_found(event_id: EventId) -> Self {
        Self::NotFound(format!("event {event_id}"))
    }

    /// `NotFound` for a pair without a matching entry.
    #[must_use]
    pub fn entry_not_found(event_id: EventId, user_id: UserId) -> Self {
        Self::NotFound(format!("waitlist entry of user {user_id} for event {event_id}"))
    }
}

impl From<StoreError> for WaitlistError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConcurrencyConflict { .. } | StoreError::DuplicateActive { .. } => {
                Self::Conflict(err.to_string())
            },
            StoreError::EntryNotFound(_) => Self::NotFound(err.to_string()),
            StoreError::IllegalTransition { .. } => Self::InvalidState(err.to_string()),
            StoreError::Database(message) => Self::Unavailable(message),
        }
    }
}

impl From<TrackerError> for WaitlistError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::EventNotFound(event_id) => Self::event_not_found(event_id),
            TrackerError::Unavailable(message) => Self::Unavailable(message),
        }
    }
}

impl From<AccessError> for WaitlistError {
    fn from(err: AccessError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::WaitlistStatus;
    use crate::ids::{EntryId, Version};

    #[test]
    fn store_conflicts_map_to_conflict() {
        let err: WaitlistError = StoreError::ConcurrencyConflict {
            entry_id: EntryId::new(),
            expected_status: WaitlistStatus::Waiting,
            expected_version: Version::new(0),
            actual_status: WaitlistStatus::Notified,
            actual_version: Version::new(1),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let dup: WaitlistError = StoreError::DuplicateActive {
            event_id: EventId::new(),
            user_id: UserId::new(),
            existing: EntryId::new(),
        }
        .into();
        assert_eq!(dup.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn illegal_transition_maps_to_invalid_state() {
        let err: WaitlistError = StoreError::IllegalTransition {
            from: WaitlistStatus::Accepted,
            to: WaitlistStatus::Declined,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn tracker_errors_map_by_kind() {
        let event_id = EventId::new();
        let err: WaitlistError = TrackerError::EventNotFound(event_id).into();
        assert_eq!(err, WaitlistError::event_not_found(event_id));

        let err: WaitlistError = TrackerError::Unavailable("down".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn kind_codes() {
        assert_eq!(ErrorKind::CapacityInconsistent.as_str(), "CAPACITY_INCONSISTENT");
        assert_eq!(ErrorKind::InvalidState.to_string(), "INVALID_STATE");
    }
}
