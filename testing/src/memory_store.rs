//! In-memory waitlist store for fast, deterministic tests.
//!
//! Implements the full [`WaitlistStore`] contract, including the
//! compare-and-swap on `(status, version)` and the one-active-entry-per-pair
//! rule, behind a single lock.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use waitlist_core::store::StoreFuture;
use waitlist_core::{
    EntryId, EventId, StoreError, Transition, UserId, WaitlistEntry, WaitlistStatus,
    WaitlistStore,
};

#[derive(Debug, Default)]
struct State {
    entries: HashMap<EntryId, WaitlistEntry>,
    by_event: HashMap<EventId, Vec<EntryId>>,
}

impl State {
    fn event_entries(&self, event_id: EventId) -> impl Iterator<Item = &WaitlistEntry> {
        self.by_event
            .get(&event_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.entries.get(id))
    }

    fn queue(&self, event_id: EventId, status: Option<WaitlistStatus>) -> Vec<WaitlistEntry> {
        let mut entries: Vec<WaitlistEntry> = self
            .event_entries(event_id)
            .filter(|entry| status.is_none_or(|s| entry.status == s))
            .cloned()
            .collect();
        entries.sort_by_key(WaitlistEntry::queue_key);
        entries
    }

    fn active(&self, event_id: EventId, user_id: UserId) -> Option<&WaitlistEntry> {
        self.event_entries(event_id)
            .find(|entry| entry.user_id == user_id && entry.is_active())
    }
}

/// HashMap-backed [`WaitlistStore`].
///
/// # Example
///
/// ```
/// use waitlist_testing::InMemoryWaitlistStore;
/// use waitlist_core::{EventId, UserId, WaitlistStore};
/// use chrono::Utc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryWaitlistStore::new();
/// let (event, user) = (EventId::new(), UserId::new());
///
/// store.insert_waiting(event, user, Utc::now()).await?;
/// assert_eq!(store.position_of(event, user).await?, Some(1));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryWaitlistStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryWaitlistStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry as-is, bypassing the insert rules.
    pub fn seed(&self, entry: WaitlistEntry) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.by_event.entry(entry.event_id).or_default().push(entry.id);
        state.entries.insert(entry.id, entry);
    }

    /// Every stored entry of one event, in queue order.
    #[must_use]
    pub fn entries(&self, event_id: EventId) -> Vec<WaitlistEntry> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .queue(event_id, None)
    }

    /// Current status of the user's latest entry.
    #[must_use]
    pub fn status_of(&self, event_id: EventId, user_id: UserId) -> Option<WaitlistStatus> {
        self.entries(event_id)
            .into_iter()
            .rev()
            .find(|entry| entry.user_id == user_id)
            .map(|entry| entry.status)
    }

    /// Number of stored entries across all events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).entries.len()
    }

    /// Whether no entry is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WaitlistStore for InMemoryWaitlistStore {
    fn insert_waiting(
        &self,
        event_id: EventId,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> StoreFuture<'_, WaitlistEntry> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = state.active(event_id, user_id) {
                return Err(StoreError::DuplicateActive {
                    event_id,
                    user_id,
                    existing: existing.id,
                });
            }

            let entry = WaitlistEntry::waiting(event_id, user_id, joined_at);
            state.by_event.entry(event_id).or_default().push(entry.id);
            state.entries.insert(entry.id, entry.clone());
            Ok(entry)
        })
    }

    fn transition(&self, transition: Transition) -> StoreFuture<'_, WaitlistEntry> {
        Box::pin(async move {
            transition.validate()?;
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let stored = state
                .entries
                .get_mut(&transition.entry_id)
                .ok_or(StoreError::EntryNotFound(transition.entry_id))?;
            transition.check_guard(stored)?;
            transition.apply(stored);
            Ok(stored.clone())
        })
    }

    fn get(&self, entry_id: EntryId) -> StoreFuture<'_, Option<WaitlistEntry>> {
        Box::pin(async move {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            Ok(state.entries.get(&entry_id).cloned())
        })
    }

    fn find_active(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Option<WaitlistEntry>> {
        Box::pin(async move {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            Ok(state.active(event_id, user_id).cloned())
        })
    }

    fn find_latest(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Option<WaitlistEntry>> {
        Box::pin(async move {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            Ok(state
                .event_entries(event_id)
                .filter(|entry| entry.user_id == user_id)
                .max_by_key(|entry| entry.queue_key())
                .cloned())
        })
    }

    fn list_by_event(
        &self,
        event_id: EventId,
        status: Option<WaitlistStatus>,
    ) -> StoreFuture<'_, Vec<WaitlistEntry>> {
        Box::pin(async move {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            Ok(state.queue(event_id, status))
        })
    }

    fn position_of(&self, event_id: EventId, user_id: UserId) -> StoreFuture<'_, Option<usize>> {
        Box::pin(async move {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            Ok(state
                .queue(event_id, Some(WaitlistStatus::Waiting))
                .iter()
                .position(|entry| entry.user_id == user_id)
                .map(|index| index + 1))
        })
    }

    fn count_by_status(
        &self,
        event_id: EventId,
        status: WaitlistStatus,
    ) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            Ok(state
                .event_entries(event_id)
                .filter(|entry| entry.status == status)
                .count())
        })
    }

    fn list_overdue(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<WaitlistEntry>> {
        Box::pin(async move {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            let mut overdue: Vec<WaitlistEntry> = state
                .entries
                .values()
                .filter(|entry| entry.is_overdue_at(now))
                .cloned()
                .collect();
            overdue.sort_by_key(|entry| (entry.response_deadline, entry.id));
            Ok(overdue)
        })
    }

    fn events_with_waiting(&self) -> StoreFuture<'_, Vec<EventId>> {
        Box::pin(async move {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            let events: BTreeSet<EventId> = state
                .entries
                .values()
                .filter(|entry| entry.status == WaitlistStatus::Waiting)
                .map(|entry| entry.event_id)
                .collect();
            Ok(events.into_iter().collect())
        })
    }
}
