//! Promotion from the queue and admin overrides.
//!
//! [`AdmissionController`] decides who gets a slot when one frees up. Each
//! freed slot is handled on its own: re-read the head of the queue, check the
//! event still has room, then compare-and-swap the head from `Waiting` to
//! `Notified`. A promotion that keeps losing version races is abandoned for
//! this cycle and picked up again by the next sweep.

use crate::config::EngineConfig;
use crate::locks::{EventGuard, EventLocks};
use crate::metrics::WaitlistMetrics;
use crate::notifier::{Notifier, Outbox};
use crate::retry::retry_with_predicate;
use crate::WaitlistEnvironment;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use waitlist_core::environment::Registration;
use waitlist_core::{
    ErrorKind, EventId, ResponseWindow, Transition, UserId, WaitlistEntry, WaitlistError,
    WaitlistStatus,
};

/// Outcome of promoting into freed slots.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    /// Entries moved to `Notified`, in queue order
    pub promoted: Vec<WaitlistEntry>,
    /// Slots given up after exhausting conflict retries
    pub abandoned: usize,
    /// Promotion stopped because the event had no free capacity
    pub capacity_blocked: bool,
}

impl PromotionReport {
    /// Fold another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.promoted.extend(other.promoted);
        self.abandoned += other.abandoned;
        self.capacity_blocked |= other.capacity_blocked;
    }
}

enum Promotion {
    Promoted(WaitlistEntry),
    QueueEmpty,
    Blocked,
}

/// Fills freed slots from the queue and applies admin overrides.
#[derive(Debug)]
pub struct AdmissionController {
    env: WaitlistEnvironment,
    config: EngineConfig,
    locks: EventLocks,
    notifier: Notifier,
}

impl AdmissionController {
    /// Create a controller over the given collaborators.
    #[must_use]
    pub fn new(env: WaitlistEnvironment, config: EngineConfig) -> Self {
        let notifier = Notifier::new(Arc::clone(&env.notifications));
        Self {
            env,
            config,
            locks: EventLocks::new(),
            notifier,
        }
    }

    /// Injected collaborators.
    #[must_use]
    pub const fn environment(&self) -> &WaitlistEnvironment {
        &self.env
    }

    /// Engine tunables.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Take the event's lock.
    pub async fn lock(&self, event_id: EventId) -> EventGuard {
        self.locks.lock(event_id).await
    }

    /// Send notices collected under a lock.
    pub async fn dispatch(&self, outbox: Outbox) {
        self.notifier.dispatch(outbox).await;
    }

    /// Run `operation` again while it fails with a version conflict.
    pub(crate) async fn with_conflict_retry<F, Fut, T>(&self, operation: F) -> Result<T, WaitlistError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, WaitlistError>>,
    {
        retry_with_predicate(&self.config.conflict_retry, operation, |err: &WaitlistError| {
            err.kind() == ErrorKind::Conflict
        })
        .await
    }

    // ========================================================================
    // Promotion
    // ========================================================================

    /// Promote up to `freed_slots` queued entries of `event_id`.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the store or registry fails, `NotFound` when the
    /// registry does not know the event.
    pub async fn on_capacity_freed(
        &self,
        event_id: EventId,
        freed_slots: usize,
    ) -> Result<PromotionReport, WaitlistError> {
        let guard = self.lock(event_id).await;
        let now = self.env.clock.now();
        let mut outbox = Outbox::new();
        let result = self.promote_locked(&guard, freed_slots, now, &mut outbox).await;
        drop(guard);
        self.dispatch(outbox).await;
        result
    }

    /// Promote into every slot that is neither confirmed nor held by an
    /// outstanding invitation.
    ///
    /// Repairs events whose cascades were abandoned or never reported.
    /// Response windows of promoted entries open at `now`.
    ///
    /// # Errors
    ///
    /// Same as [`on_capacity_freed`](Self::on_capacity_freed).
    pub async fn fill_open_slots(
        &self,
        event_id: EventId,
        now: DateTime<Utc>,
    ) -> Result<PromotionReport, WaitlistError> {
        let guard = self.lock(event_id).await;
        let (capacity, confirmed, outstanding) = self.occupancy(event_id).await?;
        let free = (capacity as usize).saturating_sub(confirmed as usize + outstanding);
        if free == 0 {
            return Ok(PromotionReport::default());
        }

        tracing::debug!(%event_id, free, "Filling open slots");
        let mut outbox = Outbox::new();
        let result = self.promote_locked(&guard, free, now, &mut outbox).await;
        drop(guard);
        self.dispatch(outbox).await;
        result
    }

    /// Promote up to `slots` entries while the caller holds the event lock.
    ///
    /// Each response window opens at `now`.
    pub(crate) async fn promote_locked(
        &self,
        guard: &EventGuard,
        slots: usize,
        now: DateTime<Utc>,
        outbox: &mut Outbox,
    ) -> Result<PromotionReport, WaitlistError> {
        let event_id = guard.event_id();
        let mut report = PromotionReport::default();

        for _ in 0..slots {
            match self.with_conflict_retry(|| self.promote_head(event_id, now)).await {
                Ok(Promotion::Promoted(entry)) => {
                    outbox.invite(&entry);
                    report.promoted.push(entry);
                },
                Ok(Promotion::QueueEmpty) => break,
                Ok(Promotion::Blocked) => {
                    report.capacity_blocked = true;
                    break;
                },
                Err(err) if err.kind() == ErrorKind::Conflict => {
                    WaitlistMetrics::record_conflict();
                    tracing::warn!(%event_id, error = %err, "Promotion abandoned for this cycle");
                    report.abandoned += 1;
                },
                Err(err) => return Err(err),
            }
        }

        if !report.promoted.is_empty() {
            WaitlistMetrics::record_promotions(report.promoted.len());
            tracing::info!(
                %event_id,
                promoted = report.promoted.len(),
                "Promoted waitlisted users"
            );
        }
        Ok(report)
    }

    /// Promote one freed slot after a decline, expiry or leave.
    ///
    /// The triggering transition is already committed, so a failure here is
    /// logged and left to the next sweep.
    pub(crate) async fn cascade_locked(
        &self,
        guard: &EventGuard,
        now: DateTime<Utc>,
        outbox: &mut Outbox,
    ) -> PromotionReport {
        match self.promote_locked(guard, 1, now, outbox).await {
            Ok(report) => report,
            Err(error) => {
                tracing::warn!(
                    event_id = %guard.event_id(),
                    %error,
                    "Cascade failed, deferring to the next sweep"
                );
                PromotionReport::default()
            },
        }
    }

    async fn promote_head(
        &self,
        event_id: EventId,
        now: DateTime<Utc>,
    ) -> Result<Promotion, WaitlistError> {
        let waiting = self
            .env
            .store
            .list_by_event(event_id, Some(WaitlistStatus::Waiting))
            .await?;
        let Some(head) = waiting.into_iter().next() else {
            return Ok(Promotion::QueueEmpty);
        };

        if let Err(err) = self.ensure_free_slot(event_id, false).await {
            return match err {
                WaitlistError::CapacityInconsistent { .. } => Ok(Promotion::Blocked),
                other => Err(other),
            };
        }

        let window = ResponseWindow::open(now, self.config.admission_window);
        let promoted = self.env.store.transition(Transition::promote(&head, window)).await?;
        tracing::debug!(
            %event_id,
            user_id = %promoted.user_id,
            deadline = %window.deadline,
            "Entry notified"
        );
        Ok(Promotion::Promoted(promoted))
    }

    // ========================================================================
    // Capacity
    // ========================================================================

    async fn occupancy(&self, event_id: EventId) -> Result<(u32, u32, usize), WaitlistError> {
        let capacity = self.env.tracker.capacity(event_id).await?;
        let confirmed = self.env.tracker.confirmed_count(event_id).await?;
        let outstanding = self
            .env
            .store
            .count_by_status(event_id, WaitlistStatus::Notified)
            .await?;
        Ok((capacity, confirmed, outstanding))
    }

    /// Check that one more participant fits.
    ///
    /// `holds_slot` is true when the candidate is itself an outstanding
    /// invitation, whose slot is already counted.
    async fn ensure_free_slot(&self, event_id: EventId, holds_slot: bool) -> Result<(), WaitlistError> {
        let (capacity, confirmed, outstanding) = self.occupancy(event_id).await?;
        let others = outstanding.saturating_sub(usize::from(holds_slot));
        if confirmed as usize + others < capacity as usize {
            return Ok(());
        }

        WaitlistMetrics::record_capacity_inconsistent();
        tracing::error!(
            %event_id,
            capacity,
            confirmed,
            outstanding,
            "No free capacity, admission refused; needs manual review"
        );
        Err(WaitlistError::CapacityInconsistent {
            event_id,
            capacity,
            confirmed,
            outstanding,
        })
    }

    /// Register the entry's user with the registry and mark it `Accepted`.
    ///
    /// A registration made here is released again if the transition loses
    /// its race. A registration that predates this call is left alone.
    pub(crate) async fn admit_locked(
        &self,
        guard: &EventGuard,
        entry: &WaitlistEntry,
    ) -> Result<WaitlistEntry, WaitlistError> {
        let event_id = guard.event_id();
        self.ensure_free_slot(event_id, entry.status == WaitlistStatus::Notified)
            .await?;

        let registration = self
            .env
            .tracker
            .register_participant(event_id, entry.user_id)
            .await?;
        match registration {
            Registration::Registered => {},
            Registration::AlreadyRegistered => {
                tracing::debug!(
                    %event_id,
                    user_id = %entry.user_id,
                    "Participant was already registered"
                );
            },
            Registration::Full => {
                let (capacity, confirmed, outstanding) = self.occupancy(event_id).await?;
                WaitlistMetrics::record_capacity_inconsistent();
                tracing::error!(
                    %event_id,
                    user_id = %entry.user_id,
                    "Registry reported the event full after the capacity check"
                );
                return Err(WaitlistError::CapacityInconsistent {
                    event_id,
                    capacity,
                    confirmed,
                    outstanding,
                });
            },
        }

        let transition = Transition::resolve(entry, WaitlistStatus::Accepted, self.env.clock.now());
        match self.env.store.transition(transition).await {
            Ok(accepted) => Ok(accepted),
            Err(err) if registration == Registration::AlreadyRegistered => Err(err.into()),
            Err(err) => {
                if let Err(release) = self
                    .env
                    .tracker
                    .release_participant(event_id, entry.user_id)
                    .await
                {
                    tracing::error!(
                        %event_id,
                        user_id = %entry.user_id,
                        error = %release,
                        "Failed to release registration after a lost transition"
                    );
                }
                Err(err.into())
            },
        }
    }

    // ========================================================================
    // Admin overrides
    // ========================================================================

    async fn authorize(&self, actor: UserId, event_id: EventId) -> Result<(), WaitlistError> {
        if self.env.access.can_manage_waitlist(actor, event_id).await? {
            Ok(())
        } else {
            tracing::warn!(%actor, %event_id, "Waitlist admin action forbidden");
            Err(WaitlistError::Forbidden { actor, event_id })
        }
    }

    /// Admit `user_id` directly, bypassing queue order.
    ///
    /// Entries ahead of the approved one stay queued in their order.
    /// Approving an already accepted entry returns it unchanged.
    ///
    /// # Errors
    ///
    /// - `Forbidden`: `actor` may not manage the event
    /// - `NotFound`: the user has no entry for the event
    /// - `InvalidState`: the entry ended in another terminal status
    /// - `CapacityInconsistent`: the event has no free slot
    /// - `Conflict`: a concurrent change kept winning
    pub async fn approve(
        &self,
        actor: UserId,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<WaitlistEntry, WaitlistError> {
        self.override_entry(actor, event_id, user_id, WaitlistStatus::Accepted)
            .await
    }

    /// Decline `user_id`'s entry without consuming capacity.
    ///
    /// A freed invitation slot is not cascaded here; the next sweep fills it.
    /// Rejecting an already declined entry returns it unchanged.
    ///
    /// # Errors
    ///
    /// Same as [`approve`](Self::approve), minus `CapacityInconsistent`.
    pub async fn reject(
        &self,
        actor: UserId,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<WaitlistEntry, WaitlistError> {
        self.override_entry(actor, event_id, user_id, WaitlistStatus::Declined)
            .await
    }

    async fn override_entry(
        &self,
        actor: UserId,
        event_id: EventId,
        user_id: UserId,
        target: WaitlistStatus,
    ) -> Result<WaitlistEntry, WaitlistError> {
        self.authorize(actor, event_id).await?;
        let action = if target == WaitlistStatus::Accepted {
            "approve"
        } else {
            "reject"
        };

        let guard = self.lock(event_id).await;
        let result = self
            .with_conflict_retry(|| self.override_once(&guard, user_id, target))
            .await;
        drop(guard);

        let entry = match result? {
            Resolution::Changed(entry) => {
                let mut outbox = Outbox::new();
                outbox.confirm(&entry);
                self.dispatch(outbox).await;
                WaitlistMetrics::record_admin_action(action);
                tracing::info!(%actor, %event_id, %user_id, entry_id = %entry.id, action, "Admin override applied");
                entry
            },
            Resolution::Unchanged(entry) => entry,
        };
        Ok(entry)
    }

    async fn override_once(
        &self,
        guard: &EventGuard,
        user_id: UserId,
        target: WaitlistStatus,
    ) -> Result<Resolution, WaitlistError> {
        let event_id = guard.event_id();
        let Some(entry) = self.env.store.find_active(event_id, user_id).await? else {
            return self.settled(event_id, user_id, target).await.map(Resolution::Unchanged);
        };

        let resolved = if target == WaitlistStatus::Accepted {
            self.admit_locked(guard, &entry).await?
        } else {
            let transition = Transition::resolve(&entry, target, self.env.clock.now());
            self.env.store.transition(transition).await?
        };
        Ok(Resolution::Changed(resolved))
    }

    /// The pair's latest entry when it already ended in `target`.
    ///
    /// Repeating a command whose outcome already happened returns that outcome.
    ///
    /// # Errors
    ///
    /// `NotFound` without any entry, `InvalidState` when the latest entry
    /// ended differently.
    pub(crate) async fn settled(
        &self,
        event_id: EventId,
        user_id: UserId,
        target: WaitlistStatus,
    ) -> Result<WaitlistEntry, WaitlistError> {
        match self.env.store.find_latest(event_id, user_id).await? {
            Some(entry) if entry.status == target => Ok(entry),
            Some(entry) => Err(WaitlistError::InvalidState(format!(
                "entry of user {user_id} for event {event_id} is already {}",
                entry.status
            ))),
            None => Err(WaitlistError::entry_not_found(event_id, user_id)),
        }
    }
}

enum Resolution {
    Changed(WaitlistEntry),
    Unchanged(WaitlistEntry),
}
