//! # Waitlist Testing
//!
//! Testing utilities for the waitlist admission engine.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - An in-memory [`WaitlistStore`](waitlist_core::WaitlistStore)
//! - Mock registry, notification gateway and access policy
//! - [`TestHarness`], an engine wired to all of the above
//! - proptest strategies for engine operations
//!
//! ## Example
//!
//! ```ignore
//! use waitlist_testing::TestHarness;
//!
//! #[tokio::test]
//! async fn freed_slot_invites_head_of_queue() {
//!     let harness = TestHarness::new();
//!     let event = harness.full_event(10);
//!     let users = harness.join_in_order(event, 2).await;
//!
//!     harness.cancel_participant(event).await;
//!
//!     assert_eq!(harness.notifications.invited(event), vec![users[0]]);
//! }
//! ```

use chrono::{DateTime, Utc};
use waitlist_core::environment::Clock;

pub mod collaborators;
pub mod harness;
pub mod memory_store;

/// Mock clocks.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use waitlist_testing::mocks::FixedClock;
    /// use waitlist_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// # Example
    ///
    /// ```
    /// use waitlist_testing::mocks::{ManualClock, test_time};
    /// use waitlist_core::environment::Clock;
    /// use chrono::Duration;
    ///
    /// let clock = ManualClock::new(test_time());
    /// clock.advance(Duration::hours(25));
    /// assert_eq!(clock.now(), test_time() + Duration::hours(25));
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move forward by `by`.
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// 2025-01-01 00:00:00 UTC, the start of every test timeline.
    #[must_use]
    pub fn test_time() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_time())
    }
}

/// proptest strategies for engine operations.
pub mod properties {
    use proptest::prelude::*;

    /// One step of a randomized waitlist history, over a small pool of users.
    #[derive(Clone, Debug)]
    pub enum Op {
        /// User `n` joins
        Join(usize),
        /// User `n` leaves
        Leave(usize),
        /// User `n` accepts their invitation
        Accept(usize),
        /// User `n` declines their invitation
        Decline(usize),
        /// Admin approves user `n`
        Approve(usize),
        /// Admin rejects user `n`
        Reject(usize),
        /// A confirmed participant cancels
        Cancel,
        /// Time moves forward by this many hours
        Advance(i64),
        /// The periodic sweep runs
        Sweep,
    }

    /// A single operation against a pool of `users` users.
    pub fn op(users: usize) -> impl Strategy<Value = Op> {
        let user = 0..users;
        prop_oneof![
            4 => user.clone().prop_map(Op::Join),
            1 => user.clone().prop_map(Op::Leave),
            2 => user.clone().prop_map(Op::Accept),
            2 => user.clone().prop_map(Op::Decline),
            1 => user.clone().prop_map(Op::Approve),
            1 => user.prop_map(Op::Reject),
            2 => Just(Op::Cancel),
            2 => (1_i64..=30).prop_map(Op::Advance),
            2 => Just(Op::Sweep),
        ]
    }

    /// A history of up to `len` operations.
    pub fn history(users: usize, len: usize) -> impl Strategy<Value = Vec<Op>> {
        proptest::collection::vec(op(users), 1..=len)
    }
}

pub use collaborators::{
    ConflictingStore, InMemoryCapacityTracker, RecordingNotificationGateway, StaticAccessPolicy,
};
pub use harness::TestHarness;
pub use memory_store::InMemoryWaitlistStore;
pub use mocks::{FixedClock, ManualClock, test_clock, test_time};
