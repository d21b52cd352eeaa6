//! Invitation responses and expiry.
//!
//! Deadlines are plain wall-clock comparisons. A response is accepted while
//! `now <= deadline`; the sweep expires invitations once `deadline < now`.
//! No timers exist per entry, so an invitation past its deadline is simply
//! no longer actionable, whether or not a sweep has run yet.

use crate::admission::{AdmissionController, PromotionReport};
use crate::locks::EventGuard;
use crate::metrics::WaitlistMetrics;
use crate::notifier::Outbox;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use waitlist_core::{
    Decision, EntryId, ErrorKind, EventId, Transition, UserId, WaitlistEntry, WaitlistError,
    WaitlistStatus,
};

/// Outcome of one expiry sweep or maintenance cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entries moved from `Notified` to `Expired`
    pub expired: Vec<EntryId>,
    /// Entries promoted into the freed slots
    pub promoted: Vec<EntryId>,
    /// Transitions given up after exhausting conflict retries
    pub conflicts: usize,
}

impl SweepReport {
    /// Add the outcome of a promotion round.
    pub fn absorb(&mut self, report: PromotionReport) {
        self.promoted.extend(report.promoted.iter().map(|entry| entry.id));
        self.conflicts += report.abandoned;
    }

    /// Whether the cycle changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.promoted.is_empty() && self.conflicts == 0
    }
}

enum Response {
    Resolved(WaitlistEntry),
    Replayed(WaitlistEntry),
    Lapsed,
}

/// Owns the response window of notified entries.
#[derive(Debug, Clone)]
pub struct InvitationScheduler {
    admission: Arc<AdmissionController>,
}

impl InvitationScheduler {
    /// Create a scheduler that cascades through `admission`.
    #[must_use]
    pub const fn new(admission: Arc<AdmissionController>) -> Self {
        Self { admission }
    }

    /// Answer an invitation.
    ///
    /// Accepting registers the user with the event; declining immediately
    /// promotes the next queued user. Repeating a response that already took
    /// effect returns the resolved entry.
    ///
    /// # Errors
    ///
    /// - `InvalidState`: the entry is still waiting, already ended otherwise,
    ///   or its deadline has passed (the entry is expired on the spot)
    /// - `NotFound`: the user never joined this event's waitlist
    /// - `CapacityInconsistent`: accepting would oversubscribe the event
    /// - `Conflict`: a concurrent change kept winning
    pub async fn respond(
        &self,
        event_id: EventId,
        user_id: UserId,
        decision: Decision,
    ) -> Result<WaitlistEntry, WaitlistError> {
        let guard = self.admission.lock(event_id).await;
        let mut outbox = Outbox::new();

        let result = self
            .admission
            .with_conflict_retry(|| self.respond_once(&guard, user_id, decision))
            .await;

        let result = match result {
            Ok(Response::Resolved(entry)) => {
                outbox.confirm(&entry);
                if decision == Decision::Decline {
                    let now = self.admission.environment().clock.now();
                    self.admission.cascade_locked(&guard, now, &mut outbox).await;
                }
                WaitlistMetrics::record_response(decision.as_str());
                tracing::info!(%event_id, %user_id, %decision, "Invitation answered");
                Ok(entry)
            },
            Ok(Response::Replayed(entry)) => Ok(entry),
            Ok(Response::Lapsed) => {
                self.expire_locked(&guard, user_id, &mut outbox).await;
                Err(WaitlistError::InvalidState(format!(
                    "response deadline for user {user_id} on event {event_id} has passed"
                )))
            },
            Err(err) => Err(err),
        };

        drop(guard);
        self.admission.dispatch(outbox).await;
        result
    }

    async fn respond_once(
        &self,
        guard: &EventGuard,
        user_id: UserId,
        decision: Decision,
    ) -> Result<Response, WaitlistError> {
        let event_id = guard.event_id();
        let env = self.admission.environment();

        let Some(entry) = env.store.find_active(event_id, user_id).await? else {
            return self
                .admission
                .settled(event_id, user_id, decision.target_status())
                .await
                .map(Response::Replayed);
        };

        if entry.status == WaitlistStatus::Waiting {
            return Err(WaitlistError::InvalidState(format!(
                "user {user_id} has not been invited for event {event_id}"
            )));
        }
        if !entry.can_respond_at(env.clock.now()) {
            return Ok(Response::Lapsed);
        }

        let resolved = match decision {
            Decision::Accept => self.admission.admit_locked(guard, &entry).await?,
            Decision::Decline => {
                let transition =
                    Transition::resolve(&entry, WaitlistStatus::Declined, env.clock.now());
                env.store.transition(transition).await?
            },
        };
        Ok(Response::Resolved(resolved))
    }

    /// Expire the user's lapsed invitation found while answering it.
    async fn expire_locked(&self, guard: &EventGuard, user_id: UserId, outbox: &mut Outbox) {
        let env = self.admission.environment();
        let now = env.clock.now();
        let active = env.store.find_active(guard.event_id(), user_id).await;
        if let Ok(Some(entry)) = active {
            let mut report = SweepReport::default();
            self.expire_entry_locked(guard, entry.id, now, outbox, &mut report)
                .await;
        }
    }

    /// Expire every invitation whose deadline is strictly before `now`.
    ///
    /// Each expiry cascades to the next queued user, exactly like a decline;
    /// the promoted entry's window opens at `now`, not at the clock's time.
    /// Running it twice with the same `now` changes nothing the second time.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the overdue entries cannot be listed.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<SweepReport, WaitlistError> {
        let overdue = self.admission.environment().store.list_overdue(now).await?;

        let mut by_event: BTreeMap<EventId, Vec<EntryId>> = BTreeMap::new();
        for entry in overdue {
            by_event.entry(entry.event_id).or_default().push(entry.id);
        }

        let mut report = SweepReport::default();
        for (event_id, entry_ids) in by_event {
            let guard = self.admission.lock(event_id).await;
            let mut outbox = Outbox::new();
            for entry_id in entry_ids {
                self.expire_entry_locked(&guard, entry_id, now, &mut outbox, &mut report)
                    .await;
            }
            drop(guard);
            self.admission.dispatch(outbox).await;
        }

        if !report.expired.is_empty() {
            tracing::info!(
                expired = report.expired.len(),
                promoted = report.promoted.len(),
                "Expired overdue invitations"
            );
        }
        Ok(report)
    }

    async fn expire_entry_locked(
        &self,
        guard: &EventGuard,
        entry_id: EntryId,
        now: DateTime<Utc>,
        outbox: &mut Outbox,
        report: &mut SweepReport,
    ) {
        let result = self
            .admission
            .with_conflict_retry(|| self.try_expire(entry_id, now))
            .await;

        match result {
            Ok(Some(expired)) => {
                WaitlistMetrics::record_expiration();
                tracing::info!(
                    event_id = %expired.event_id,
                    user_id = %expired.user_id,
                    "Invitation expired"
                );
                outbox.confirm(&expired);
                report.expired.push(expired.id);
                let promotion = self.admission.cascade_locked(guard, now, outbox).await;
                report.absorb(promotion);
            },
            Ok(None) => {},
            Err(err) if err.kind() == ErrorKind::Conflict => {
                WaitlistMetrics::record_conflict();
                tracing::warn!(%entry_id, error = %err, "Expiry deferred to the next sweep");
                report.conflicts += 1;
            },
            Err(err) => {
                tracing::warn!(%entry_id, error = %err, "Expiry failed");
            },
        }
    }

    async fn try_expire(
        &self,
        entry_id: EntryId,
        now: DateTime<Utc>,
    ) -> Result<Option<WaitlistEntry>, WaitlistError> {
        let store = &self.admission.environment().store;
        // Re-read: a response may have landed since the entry was listed.
        let Some(current) = store.get(entry_id).await? else {
            return Ok(None);
        };
        if !current.is_overdue_at(now) {
            return Ok(None);
        }
        let transition = Transition::resolve(&current, WaitlistStatus::Expired, now);
        Ok(Some(store.transition(transition).await?))
    }
}
