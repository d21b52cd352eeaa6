//! Per-event serialization.
//!
//! Every mutating operation on an event's waitlist runs while holding that
//! event's lock, so queue order and the capacity check never observe an
//! interleaved write. Different events never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use waitlist_core::EventId;

/// Unused locks are dropped from the table once it grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

/// Keyed async mutexes, one per event.
#[derive(Debug, Default)]
pub struct EventLocks {
    locks: Mutex<HashMap<EventId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Proof that the holder has exclusive access to one event's waitlist.
///
/// Functions that must only run under the lock take `&EventGuard`, which
/// keeps nested calls from locking the same event twice.
#[derive(Debug)]
pub struct EventGuard {
    event_id: EventId,
    _guard: OwnedMutexGuard<()>,
}

impl EventGuard {
    /// The locked event.
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        self.event_id
    }
}

impl EventLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `event_id`.
    pub async fn lock(&self, event_id: EventId) -> EventGuard {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() > PRUNE_THRESHOLD {
                // Only the table holds a reference: nobody is waiting or locked.
                locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            }
            Arc::clone(locks.entry(event_id).or_default())
        };

        EventGuard {
            event_id,
            _guard: mutex.lock_owned().await,
        }
    }

    /// Number of events with a lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no event has a lock entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_event_is_exclusive() {
        let locks = Arc::new(EventLocks::new());
        let event_id = EventId::new();

        let guard = locks.lock(event_id).await;
        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.lock(event_id).await.event_id() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        let locked = tokio::time::timeout(Duration::from_secs(1), contender).await;
        assert!(matches!(locked, Ok(Ok(id)) if id == event_id));
    }

    #[tokio::test]
    async fn different_events_do_not_contend() {
        let locks = EventLocks::new();
        let first = locks.lock(EventId::new()).await;
        let second = tokio::time::timeout(Duration::from_millis(100), locks.lock(EventId::new())).await;

        assert!(second.is_ok());
        assert_ne!(first.event_id(), second.map(|g| g.event_id()).unwrap_or_default());
        assert_eq!(locks.len(), 2);
    }
}
