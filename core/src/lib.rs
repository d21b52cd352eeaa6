//! # Waitlist Core
//!
//! Core types and traits for the event waitlist admission engine.
//!
//! The engine manages an ordered queue of users waiting for a slot in a
//! capacity-limited event, promotes queued users into time-boxed invitations
//! when a slot frees up, and resolves each invitation (accept, decline,
//! expire) while cascading freed slots to the next user in line.
//!
//! This crate holds everything that is shared between the engine and its
//! storage and transport adapters:
//!
//! - [`ids`]: `EventId`, `UserId`, `EntryId` and the concurrency `Version`
//! - [`entry`]: `WaitlistEntry`, `WaitlistStatus`, `Decision`, `ResponseWindow`
//! - [`store`]: the `WaitlistStore` trait and its compare-and-swap `Transition`
//! - [`environment`]: `Clock`, `CapacityTracker`, `NotificationGateway`, `AccessPolicy`
//! - [`error`]: `WaitlistError` and its stable `ErrorKind` codes
//!
//! ## Architecture Principles
//!
//! - Position is derived, never stored
//! - Every mutation is a guarded `(status, version)` compare-and-swap
//! - External systems are injected through traits
//! - Deadlines are plain wall-clock comparisons, no timers

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod entry;
pub mod environment;
pub mod error;
pub mod ids;
pub mod store;

pub use entry::{Decision, ResponseWindow, WaitlistEntry, WaitlistStatus};
pub use error::{ErrorKind, WaitlistError};
pub use ids::{EntryId, EventId, UserId, Version};
pub use store::{StoreError, Transition, WaitlistStore};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_serializes_with_snake_case_status() {
        let entry = WaitlistEntry::waiting(EventId::new(), UserId::new(), Utc::now());
        let json = serde_json::to_value(&entry).unwrap_or_default();
        assert_eq!(json["status"], "waiting");
        assert!(json["response_deadline"].is_null());
    }
}
