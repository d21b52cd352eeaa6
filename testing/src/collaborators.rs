//! Mock collaborators: event registry, notification gateway, access policy,
//! and a store wrapper that injects version conflicts.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use waitlist_core::environment::{
    AccessError, AccessPolicy, CapacityTracker, NotificationError, NotificationFuture,
    NotificationGateway, Registration, TrackerError, TrackerFuture,
};
use waitlist_core::store::StoreFuture;
use waitlist_core::{
    EntryId, EventId, StoreError, Transition, UserId, WaitlistEntry, WaitlistStatus,
    WaitlistStore,
};
use waitlist_runtime::notifier::Notice;

// ============================================================================
// Capacity tracker
// ============================================================================

#[derive(Debug, Default)]
struct EventSlots {
    capacity: u32,
    /// Participants confirmed outside the waitlist.
    external: u32,
    /// Participants registered by user, through the waitlist or directly.
    registered: BTreeSet<UserId>,
}

impl EventSlots {
    fn confirmed(&self) -> u32 {
        self.external + u32::try_from(self.registered.len()).unwrap_or(u32::MAX)
    }
}

/// In-memory event registry.
///
/// Events are created with a capacity and a number of participants confirmed
/// outside the waitlist; registrations made by the engine are tracked per
/// user so tests can assert on them.
#[derive(Debug, Default)]
pub struct InMemoryCapacityTracker {
    events: Mutex<HashMap<EventId, EventSlots>>,
    unavailable: AtomicBool,
}

impl InMemoryCapacityTracker {
    /// Create a registry without events.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event with `confirmed` participants already registered.
    pub fn add_event(&self, event_id: EventId, capacity: u32, confirmed: u32) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).insert(
            event_id,
            EventSlots {
                capacity,
                external: confirmed,
                registered: BTreeSet::new(),
            },
        );
    }

    /// A participant confirmed outside the waitlist cancels.
    ///
    /// The registry only updates its count; reporting the cancellation to
    /// the engine is the caller's job.
    pub fn cancel_external(&self, event_id: EventId) {
        if let Some(slots) = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&event_id)
        {
            slots.external = slots.external.saturating_sub(1);
        }
    }

    /// Register `user_id` the way the events service would, bypassing the
    /// capacity check.
    pub fn register_directly(&self, event_id: EventId, user_id: UserId) {
        if let Some(slots) = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&event_id)
        {
            slots.registered.insert(user_id);
        }
    }

    /// Users holding a registration.
    #[must_use]
    pub fn registered(&self, event_id: EventId) -> BTreeSet<UserId> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event_id)
            .map(|slots| slots.registered.clone())
            .unwrap_or_default()
    }

    /// Current confirmed count.
    #[must_use]
    pub fn confirmed(&self, event_id: EventId) -> u32 {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event_id)
            .map_or(0, EventSlots::confirmed)
    }

    /// Make every call fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn with_event<T>(
        &self,
        event_id: EventId,
        f: impl FnOnce(&mut EventSlots) -> T,
    ) -> Result<T, TrackerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TrackerError::Unavailable("registry offline".to_string()));
        }
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events
            .get_mut(&event_id)
            .map(f)
            .ok_or(TrackerError::EventNotFound(event_id))
    }
}

impl CapacityTracker for InMemoryCapacityTracker {
    fn capacity(&self, event_id: EventId) -> TrackerFuture<'_, u32> {
        Box::pin(async move { self.with_event(event_id, |slots| slots.capacity) })
    }

    fn confirmed_count(&self, event_id: EventId) -> TrackerFuture<'_, u32> {
        Box::pin(async move { self.with_event(event_id, |slots| slots.confirmed()) })
    }

    fn register_participant(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> TrackerFuture<'_, Registration> {
        Box::pin(async move {
            self.with_event(event_id, |slots| {
                if slots.registered.contains(&user_id) {
                    Registration::AlreadyRegistered
                } else if slots.confirmed() >= slots.capacity {
                    Registration::Full
                } else {
                    slots.registered.insert(user_id);
                    Registration::Registered
                }
            })
        })
    }

    fn release_participant(&self, event_id: EventId, user_id: UserId) -> TrackerFuture<'_, ()> {
        Box::pin(async move {
            self.with_event(event_id, |slots| {
                slots.registered.remove(&user_id);
            })
        })
    }
}

// ============================================================================
// Notification gateway
// ============================================================================

/// Gateway that records every delivery attempt.
#[derive(Debug, Default)]
pub struct RecordingNotificationGateway {
    sent: Mutex<Vec<Notice>>,
    failing: AtomicBool,
}

impl RecordingNotificationGateway {
    /// Create a gateway that accepts every delivery.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deliveries fail (they are still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every attempted delivery, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<Notice> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Users invited for `event_id`, in invitation order.
    #[must_use]
    pub fn invited(&self, event_id: EventId) -> Vec<UserId> {
        self.sent()
            .into_iter()
            .filter_map(|notice| match notice {
                Notice::Invitation {
                    event_id: invited_for,
                    user_id,
                    ..
                } if invited_for == event_id => Some(user_id),
                _ => None,
            })
            .collect()
    }

    /// Decision confirmations sent for `event_id`.
    #[must_use]
    pub fn decisions(&self, event_id: EventId) -> Vec<(UserId, WaitlistStatus)> {
        self.sent()
            .into_iter()
            .filter_map(|notice| match notice {
                Notice::Decision {
                    event_id: decided_for,
                    user_id,
                    status,
                } if decided_for == event_id => Some((user_id, status)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, notice: Notice) -> Result<(), NotificationError> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(notice);
        if self.failing.load(Ordering::SeqCst) {
            Err(NotificationError("smtp relay refused".to_string()))
        } else {
            Ok(())
        }
    }
}

impl NotificationGateway for RecordingNotificationGateway {
    fn send_invitation(
        &self,
        event_id: EventId,
        user_id: UserId,
        deadline: DateTime<Utc>,
    ) -> NotificationFuture<'_> {
        Box::pin(async move {
            self.record(Notice::Invitation {
                event_id,
                user_id,
                deadline,
            })
        })
    }

    fn send_decision_confirmation(
        &self,
        event_id: EventId,
        user_id: UserId,
        decision: WaitlistStatus,
    ) -> NotificationFuture<'_> {
        Box::pin(async move {
            self.record(Notice::Decision {
                event_id,
                user_id,
                status: decision,
            })
        })
    }
}

// ============================================================================
// Access policy
// ============================================================================

/// Allow-list of `(actor, event)` pairs that may manage a waitlist.
#[derive(Debug, Default)]
pub struct StaticAccessPolicy {
    grants: Mutex<HashSet<(UserId, EventId)>>,
}

impl StaticAccessPolicy {
    /// Create a policy that denies everyone.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `actor` manage `event_id`.
    pub fn grant(&self, actor: UserId, event_id: EventId) {
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((actor, event_id));
    }
}

impl AccessPolicy for StaticAccessPolicy {
    fn can_manage_waitlist(
        &self,
        actor: UserId,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, AccessError>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .grants
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&(actor, event_id)))
        })
    }
}

// ============================================================================
// Conflict injection
// ============================================================================

/// Store wrapper whose next `n` transitions fail with a version conflict.
///
/// Simulates another engine instance winning the race without actually
/// changing the entry.
pub struct ConflictingStore {
    inner: Arc<dyn WaitlistStore>,
    pending: AtomicUsize,
    attempts: AtomicUsize,
}

impl ConflictingStore {
    /// Wrap `inner`; no conflicts are pending initially.
    #[must_use]
    pub fn new(inner: Arc<dyn WaitlistStore>) -> Self {
        Self {
            inner,
            pending: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` transitions.
    pub fn inject_conflicts(&self, n: usize) {
        self.pending.store(n, Ordering::SeqCst);
    }

    /// Transitions attempted so far, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn take_conflict(&self) -> bool {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl WaitlistStore for ConflictingStore {
    fn insert_waiting(
        &self,
        event_id: EventId,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> StoreFuture<'_, WaitlistEntry> {
        self.inner.insert_waiting(event_id, user_id, joined_at)
    }

    fn transition(&self, transition: Transition) -> StoreFuture<'_, WaitlistEntry> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.take_conflict() {
            return Box::pin(async move {
                Err(StoreError::ConcurrencyConflict {
                    entry_id: transition.entry_id,
                    expected_status: transition.from,
                    expected_version: transition.expected_version,
                    actual_status: transition.from,
                    actual_version: transition.expected_version.next(),
                })
            });
        }
        self.inner.transition(transition)
    }

    fn get(&self, entry_id: EntryId) -> StoreFuture<'_, Option<WaitlistEntry>> {
        self.inner.get(entry_id)
    }

    fn find_active(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Option<WaitlistEntry>> {
        self.inner.find_active(event_id, user_id)
    }

    fn find_latest(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Option<WaitlistEntry>> {
        self.inner.find_latest(event_id, user_id)
    }

    fn list_by_event(
        &self,
        event_id: EventId,
        status: Option<WaitlistStatus>,
    ) -> StoreFuture<'_, Vec<WaitlistEntry>> {
        self.inner.list_by_event(event_id, status)
    }

    fn position_of(&self, event_id: EventId, user_id: UserId) -> StoreFuture<'_, Option<usize>> {
        self.inner.position_of(event_id, user_id)
    }

    fn count_by_status(
        &self,
        event_id: EventId,
        status: WaitlistStatus,
    ) -> StoreFuture<'_, usize> {
        self.inner.count_by_status(event_id, status)
    }

    fn list_overdue(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<WaitlistEntry>> {
        self.inner.list_overdue(now)
    }

    fn events_with_waiting(&self) -> StoreFuture<'_, Vec<EventId>> {
        self.inner.events_with_waiting()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory_store::InMemoryWaitlistStore;

    #[tokio::test]
    async fn registry_refuses_past_capacity() {
        let tracker = InMemoryCapacityTracker::new();
        let event_id = EventId::new();
        tracker.add_event(event_id, 2, 1);

        let user = UserId::new();
        assert_eq!(
            tracker.register_participant(event_id, user).await,
            Ok(Registration::Registered)
        );
        assert_eq!(
            tracker.register_participant(event_id, UserId::new()).await,
            Ok(Registration::Full)
        );
        assert_eq!(tracker.confirmed(event_id), 2);

        tracker.release_participant(event_id, user).await.unwrap();
        assert_eq!(tracker.confirmed(event_id), 1);
        assert!(tracker.registered(event_id).is_empty());
    }

    #[tokio::test]
    async fn registering_twice_consumes_one_slot() {
        let tracker = InMemoryCapacityTracker::new();
        let event_id = EventId::new();
        tracker.add_event(event_id, 1, 0);
        let user = UserId::new();
        tracker.register_directly(event_id, user);

        assert_eq!(
            tracker.register_participant(event_id, user).await,
            Ok(Registration::AlreadyRegistered)
        );
        assert_eq!(tracker.confirmed(event_id), 1);
    }

    #[tokio::test]
    async fn registry_outage_and_unknown_event() {
        let tracker = InMemoryCapacityTracker::new();
        let event_id = EventId::new();
        assert_eq!(
            tracker.capacity(event_id).await,
            Err(TrackerError::EventNotFound(event_id))
        );

        tracker.add_event(event_id, 1, 0);
        tracker.set_unavailable(true);
        assert!(matches!(
            tracker.confirmed_count(event_id).await,
            Err(TrackerError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn failing_gateway_still_records() {
        let gateway = RecordingNotificationGateway::new();
        let event_id = EventId::new();
        let user = UserId::new();
        gateway.set_failing(true);

        assert!(gateway.send_invitation(event_id, user, Utc::now()).await.is_err());
        assert_eq!(gateway.invited(event_id), vec![user]);
        assert!(gateway.decisions(event_id).is_empty());
    }

    #[tokio::test]
    async fn access_policy_is_per_event() {
        let policy = StaticAccessPolicy::new();
        let actor = UserId::new();
        let event_id = EventId::new();
        policy.grant(actor, event_id);

        assert_eq!(policy.can_manage_waitlist(actor, event_id).await, Ok(true));
        assert_eq!(policy.can_manage_waitlist(actor, EventId::new()).await, Ok(false));
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed_in_order() {
        let inner = Arc::new(InMemoryWaitlistStore::new());
        let store = ConflictingStore::new(inner);
        let entry = store
            .insert_waiting(EventId::new(), UserId::new(), Utc::now())
            .await
            .unwrap();
        store.inject_conflicts(1);

        let transition = Transition::resolve(&entry, WaitlistStatus::Removed, Utc::now());
        assert!(store.transition(transition.clone()).await.unwrap_err().is_conflict());
        assert_eq!(
            store.transition(transition).await.unwrap().status,
            WaitlistStatus::Removed
        );
        assert_eq!(store.attempts(), 2);
    }
}
