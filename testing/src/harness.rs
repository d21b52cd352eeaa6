//! An engine wired to in-memory collaborators.

use crate::collaborators::{
    InMemoryCapacityTracker, RecordingNotificationGateway, StaticAccessPolicy,
};
use crate::memory_store::InMemoryWaitlistStore;
use crate::mocks::{ManualClock, test_time};
use chrono::Duration;
use std::sync::Arc;
use waitlist_core::{EventId, UserId, WaitlistStore};
use waitlist_runtime::retry::RetryPolicy;
use waitlist_runtime::{EngineConfig, PromotionReport, WaitlistEngine, WaitlistEnvironment};

/// Admission window used by [`TestHarness::config`].
pub const TEST_WINDOW_HOURS: i64 = 24;

/// Engine plus handles to every mock behind it.
pub struct TestHarness {
    /// The engine under test
    pub engine: WaitlistEngine,
    /// Backing store (the engine may see it through a wrapper)
    pub store: Arc<InMemoryWaitlistStore>,
    /// Event registry
    pub tracker: Arc<InMemoryCapacityTracker>,
    /// Recorded notifications
    pub notifications: Arc<RecordingNotificationGateway>,
    /// Admin grants
    pub access: Arc<StaticAccessPolicy>,
    /// Test timeline
    pub clock: Arc<ManualClock>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Engine tuned for tests: 24h window, fast conflict retries.
    #[must_use]
    pub fn config() -> EngineConfig {
        EngineConfig::default()
            .with_admission_window(Duration::hours(TEST_WINDOW_HOURS))
            .with_conflict_retry(
                RetryPolicy::builder()
                    .max_retries(3)
                    .initial_delay(std::time::Duration::from_millis(1))
                    .max_delay(std::time::Duration::from_millis(2))
                    .build(),
            )
    }

    /// Harness over a fresh in-memory store.
    #[must_use]
    pub fn new() -> Self {
        let store = Arc::new(InMemoryWaitlistStore::new());
        let engine_store: Arc<dyn WaitlistStore> = Arc::clone(&store) as _;
        Self::build(engine_store, store)
    }

    /// Harness whose engine talks to `engine_store`, which must wrap `store`.
    #[must_use]
    pub fn with_store(engine_store: Arc<dyn WaitlistStore>, store: Arc<InMemoryWaitlistStore>) -> Self {
        Self::build(engine_store, store)
    }

    fn build(engine_store: Arc<dyn WaitlistStore>, store: Arc<InMemoryWaitlistStore>) -> Self {
        let tracker = Arc::new(InMemoryCapacityTracker::new());
        let notifications = Arc::new(RecordingNotificationGateway::new());
        let access = Arc::new(StaticAccessPolicy::new());
        let clock = Arc::new(ManualClock::new(test_time()));

        let env = WaitlistEnvironment {
            store: engine_store,
            tracker: Arc::clone(&tracker) as _,
            notifications: Arc::clone(&notifications) as _,
            access: Arc::clone(&access) as _,
            clock: Arc::clone(&clock) as _,
        };

        Self {
            engine: WaitlistEngine::new(env, Self::config()),
            store,
            tracker,
            notifications,
            access,
            clock,
        }
    }

    /// Register an event with `capacity` slots and `confirmed` participants.
    #[must_use]
    pub fn event(&self, capacity: u32, confirmed: u32) -> EventId {
        let event_id = EventId::new();
        self.tracker.add_event(event_id, capacity, confirmed);
        event_id
    }

    /// Register a sold-out event.
    #[must_use]
    pub fn full_event(&self, capacity: u32) -> EventId {
        self.event(capacity, capacity)
    }

    /// An actor allowed to manage `event_id`.
    #[must_use]
    pub fn admin_for(&self, event_id: EventId) -> UserId {
        let admin = UserId::new();
        self.access.grant(admin, event_id);
        admin
    }

    /// Join `n` fresh users one second apart, returning them in join order.
    ///
    /// # Panics
    ///
    /// Panics if a join fails.
    #[allow(clippy::expect_used)]
    pub async fn join_in_order(&self, event_id: EventId, n: usize) -> Vec<UserId> {
        let mut users = Vec::with_capacity(n);
        for _ in 0..n {
            let user = UserId::new();
            self.engine
                .join(event_id, user)
                .await
                .expect("join should succeed");
            self.clock.advance(Duration::seconds(1));
            users.push(user);
        }
        users
    }

    /// A confirmed participant cancels and the registry reports it.
    ///
    /// # Panics
    ///
    /// Panics if the engine rejects the callback.
    #[allow(clippy::expect_used)]
    pub async fn cancel_participant(&self, event_id: EventId) -> PromotionReport {
        self.tracker.cancel_external(event_id);
        self.engine
            .on_participant_canceled(event_id)
            .await
            .expect("cancellation callback should succeed")
    }

    /// Move past the admission window.
    pub fn let_window_lapse(&self) {
        self.clock
            .advance(Duration::hours(TEST_WINDOW_HOURS) + Duration::seconds(1));
    }
}
