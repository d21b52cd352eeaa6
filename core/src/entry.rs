//! Waitlist entries and their lifecycle.
//!
//! An entry records one user's intent to join one capacity-limited event.
//! Its status moves through a small state machine:
//!
//! ```text
//! Waiting ──promote──▶ Notified ──accept──▶ Accepted
//!    │                    ├─────decline──▶ Declined
//!    │                    ├─────timeout──▶ Expired
//!    │                    └─────leave────▶ Removed
//!    ├──leave──▶ Removed
//!    └──admin approve / reject──▶ Accepted / Declined
//! ```
//!
//! The four terminal statuses are sinks. Queue position is never stored; it
//! is derived from `joined_at` (ties broken by entry id) among the `Waiting`
//! entries of one event.

use crate::ids::{EntryId, EventId, UserId, Version};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a status or decision string is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind}: {value}")]
pub struct ParseStatusError {
    kind: &'static str,
    value: String,
}

/// Status of a waitlist entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitlistStatus {
    /// Queued, waiting for a slot to free up
    Waiting,
    /// Offered a slot; must respond before the deadline
    Notified,
    /// Took the slot (terminal)
    Accepted,
    /// Turned the slot down or was rejected by an admin (terminal)
    Declined,
    /// Let the response window lapse (terminal)
    Expired,
    /// Left the waitlist voluntarily (terminal)
    Removed,
}

impl WaitlistStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Waiting,
        Self::Notified,
        Self::Accepted,
        Self::Declined,
        Self::Expired,
        Self::Removed,
    ];

    /// Whether the entry still occupies the (event, user) pair.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Waiting | Self::Notified)
    }

    /// Whether the status is a sink of the state machine.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Whether `self → next` is an edge of the state machine.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Waiting => matches!(
                next,
                Self::Notified | Self::Accepted | Self::Declined | Self::Removed
            ),
            Self::Notified => matches!(
                next,
                Self::Accepted | Self::Declined | Self::Expired | Self::Removed
            ),
            Self::Accepted | Self::Declined | Self::Expired | Self::Removed => false,
        }
    }

    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Notified => "notified",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Expired => "expired",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for WaitlistStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WaitlistStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseStatusError {
                kind: "status",
                value: s.to_string(),
            })
    }
}

/// A user's answer to an invitation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Take the offered slot
    Accept,
    /// Turn the offered slot down
    Decline,
}

impl Decision {
    /// The terminal status a successful response lands in.
    #[must_use]
    pub const fn target_status(self) -> WaitlistStatus {
        match self {
            Self::Accept => WaitlistStatus::Accepted,
            Self::Decline => WaitlistStatus::Declined,
        }
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Decline => "decline",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accept" => Ok(Self::Accept),
            "decline" => Ok(Self::Decline),
            _ => Err(ParseStatusError {
                kind: "decision",
                value: s.to_string(),
            }),
        }
    }
}

/// The time-boxed response window opened by a promotion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseWindow {
    /// When the invitation was issued
    pub notified_at: DateTime<Utc>,
    /// Last instant at which a response is still accepted
    pub deadline: DateTime<Utc>,
}

impl ResponseWindow {
    /// Open a window of length `window` starting at `now`.
    #[must_use]
    pub fn open(now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            notified_at: now,
            deadline: now + window,
        }
    }

    /// A response at `now` is accepted while `now <= deadline`.
    #[must_use]
    pub fn accepts_response_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.deadline
    }

    /// The sweep expires the invitation once `deadline < now`.
    #[must_use]
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.deadline < now
    }
}

/// A persisted waitlist entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    /// Entry ID
    pub id: EntryId,
    /// Event the user is queued for
    pub event_id: EventId,
    /// Queued user
    pub user_id: UserId,
    /// Current status
    pub status: WaitlistStatus,
    /// When the user joined; defines queue order
    pub joined_at: DateTime<Utc>,
    /// When the entry was promoted (only once `Notified` has been reached)
    pub notified_at: Option<DateTime<Utc>>,
    /// Response deadline (only once `Notified` has been reached)
    pub response_deadline: Option<DateTime<Utc>>,
    /// Optimistic concurrency version
    pub version: Version,
    /// Time of the last transition
    pub updated_at: DateTime<Utc>,
}

impl WaitlistEntry {
    /// Create a fresh `Waiting` entry.
    #[must_use]
    pub fn waiting(event_id: EventId, user_id: UserId, joined_at: DateTime<Utc>) -> Self {
        Self {
            id: EntryId::new(),
            event_id,
            user_id,
            status: WaitlistStatus::Waiting,
            joined_at,
            notified_at: None,
            response_deadline: None,
            version: Version::INITIAL,
            updated_at: joined_at,
        }
    }

    /// Sort key of the queue: join time, then entry id.
    #[must_use]
    pub fn queue_key(&self) -> (DateTime<Utc>, EntryId) {
        (self.joined_at, self.id)
    }

    /// Whether the entry is `Waiting` or `Notified`.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// The response window, if the entry was ever promoted.
    #[must_use]
    pub fn window(&self) -> Option<ResponseWindow> {
        match (self.notified_at, self.response_deadline) {
            (Some(notified_at), Some(deadline)) => Some(ResponseWindow {
                notified_at,
                deadline,
            }),
            _ => None,
        }
    }

    /// `Notified` and still inside the response window at `now`.
    #[must_use]
    pub fn can_respond_at(&self, now: DateTime<Utc>) -> bool {
        self.status == WaitlistStatus::Notified
            && self.window().is_some_and(|w| w.accepts_response_at(now))
    }

    /// `Notified` with a deadline strictly before `now`.
    #[must_use]
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.status == WaitlistStatus::Notified
            && self.window().is_some_and(|w| w.is_overdue_at(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    #[test]
    fn active_and_terminal_partition_statuses() {
        for status in WaitlistStatus::ALL {
            assert_ne!(status.is_active(), status.is_terminal(), "{status}");
        }
        assert!(WaitlistStatus::Waiting.is_active());
        assert!(WaitlistStatus::Notified.is_active());
    }

    #[test]
    fn terminal_statuses_are_sinks() {
        for from in WaitlistStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in WaitlistStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn state_machine_edges() {
        use WaitlistStatus::{Accepted, Declined, Expired, Notified, Removed, Waiting};

        assert!(Waiting.can_transition_to(Notified));
        assert!(Waiting.can_transition_to(Removed));
        assert!(Waiting.can_transition_to(Accepted));
        assert!(Waiting.can_transition_to(Declined));
        assert!(!Waiting.can_transition_to(Expired));
        assert!(!Waiting.can_transition_to(Waiting));

        assert!(Notified.can_transition_to(Accepted));
        assert!(Notified.can_transition_to(Declined));
        assert!(Notified.can_transition_to(Expired));
        assert!(Notified.can_transition_to(Removed));
        assert!(!Notified.can_transition_to(Waiting));
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("NOTIFIED".parse::<WaitlistStatus>(), Ok(WaitlistStatus::Notified));
        assert_eq!("removed".parse::<WaitlistStatus>(), Ok(WaitlistStatus::Removed));
        assert!("pending".parse::<WaitlistStatus>().is_err());
    }

    #[test]
    fn decision_maps_to_terminal_status() {
        assert_eq!(Decision::Accept.target_status(), WaitlistStatus::Accepted);
        assert_eq!(Decision::Decline.target_status(), WaitlistStatus::Declined);
        assert_eq!("Decline".parse::<Decision>(), Ok(Decision::Decline));
    }

    #[test]
    fn response_window_boundaries() {
        let window = ResponseWindow::open(t0(), Duration::hours(24));
        let deadline = t0() + Duration::hours(24);

        assert_eq!(window.deadline, deadline);
        assert!(window.accepts_response_at(deadline));
        assert!(!window.is_overdue_at(deadline));
        assert!(!window.accepts_response_at(deadline + Duration::seconds(1)));
        assert!(window.is_overdue_at(deadline + Duration::seconds(1)));
    }

    #[test]
    fn waiting_entry_has_no_window() {
        let entry = WaitlistEntry::waiting(EventId::new(), UserId::new(), t0());
        assert_eq!(entry.status, WaitlistStatus::Waiting);
        assert_eq!(entry.version, Version::INITIAL);
        assert!(entry.window().is_none());
        assert!(!entry.can_respond_at(t0()));
        assert!(!entry.is_overdue_at(t0() + Duration::days(365)));
    }
}
