//! The command surface of the admission engine.

use crate::admission::{AdmissionController, PromotionReport};
use crate::config::EngineConfig;
use crate::metrics::WaitlistMetrics;
use crate::notifier::Outbox;
use crate::scheduler::{InvitationScheduler, SweepReport};
use crate::WaitlistEnvironment;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use waitlist_core::{
    Decision, EventId, StoreError, Transition, UserId, WaitlistEntry, WaitlistError,
    WaitlistStatus,
};

/// Waitlist admission engine.
///
/// Cheap to clone; clones share locks and collaborators.
///
/// # Example
///
/// ```ignore
/// let engine = WaitlistEngine::new(environment, EngineConfig::default());
///
/// let entry = engine.join(event_id, user_id).await?;
/// assert_eq!(engine.position_of(event_id, user_id).await?, 1);
///
/// // A confirmed participant cancels: the head of the queue is invited.
/// engine.on_participant_canceled(event_id).await?;
/// engine.respond(event_id, user_id, Decision::Accept).await?;
/// ```
#[derive(Debug, Clone)]
pub struct WaitlistEngine {
    admission: Arc<AdmissionController>,
    scheduler: InvitationScheduler,
}

impl WaitlistEngine {
    /// Create an engine over the given collaborators.
    #[must_use]
    pub fn new(env: WaitlistEnvironment, config: EngineConfig) -> Self {
        let admission = Arc::new(AdmissionController::new(env, config));
        let scheduler = InvitationScheduler::new(Arc::clone(&admission));
        Self {
            admission,
            scheduler,
        }
    }

    /// Injected collaborators.
    #[must_use]
    pub fn environment(&self) -> &WaitlistEnvironment {
        self.admission.environment()
    }

    /// Engine tunables.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        self.admission.config()
    }

    /// Queue `user_id` for `event_id`.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the registry does not know the event
    /// - `Conflict`: the user already has a waiting or notified entry
    #[tracing::instrument(skip_all, fields(%event_id, %user_id))]
    pub async fn join(&self, event_id: EventId, user_id: UserId) -> Result<WaitlistEntry, WaitlistError> {
        let env = self.environment();
        env.tracker.capacity(event_id).await?;

        let guard = self.admission.lock(event_id).await;
        let entry = match env.store.insert_waiting(event_id, user_id, env.clock.now()).await {
            Ok(entry) => entry,
            Err(err @ StoreError::DuplicateActive { .. }) => {
                tracing::debug!(error = %err, "Duplicate join rejected");
                return Err(err.into());
            },
            Err(err) => return Err(err.into()),
        };
        drop(guard);

        WaitlistMetrics::record_join();
        tracing::info!(entry_id = %entry.id, "Joined waitlist");
        Ok(entry)
    }

    /// Leave the waitlist.
    ///
    /// Leaving while notified gives the slot to the next queued user at once.
    /// Leaving again after a successful leave returns the removed entry.
    ///
    /// # Errors
    ///
    /// `NotFound` when the user has no active entry for the event.
    #[tracing::instrument(skip_all, fields(%event_id, %user_id))]
    pub async fn leave(&self, event_id: EventId, user_id: UserId) -> Result<WaitlistEntry, WaitlistError> {
        let guard = self.admission.lock(event_id).await;

        let result = self
            .admission
            .with_conflict_retry(|| self.remove_once(event_id, user_id))
            .await;

        let mut outbox = Outbox::new();
        let result = match result {
            Ok((Some(previous), removed)) => {
                outbox.confirm(&removed);
                if previous == WaitlistStatus::Notified {
                    let now = self.environment().clock.now();
                    self.admission.cascade_locked(&guard, now, &mut outbox).await;
                }
                WaitlistMetrics::record_removal();
                tracing::info!(was = %previous, "Left waitlist");
                Ok(removed)
            },
            Ok((None, removed)) => Ok(removed),
            Err(err) => Err(err),
        };

        drop(guard);
        self.admission.dispatch(outbox).await;
        result
    }

    /// Remove the active entry, or find the removal a previous call made.
    ///
    /// Returns the status the entry had before, `None` for a replay.
    async fn remove_once(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<(Option<WaitlistStatus>, WaitlistEntry), WaitlistError> {
        let env = self.environment();
        if let Some(entry) = env.store.find_active(event_id, user_id).await? {
            let transition = Transition::resolve(&entry, WaitlistStatus::Removed, env.clock.now());
            let removed = env.store.transition(transition).await?;
            return Ok((Some(entry.status), removed));
        }

        match env.store.find_latest(event_id, user_id).await? {
            Some(entry) if entry.status == WaitlistStatus::Removed => Ok((None, entry)),
            _ => Err(WaitlistError::entry_not_found(event_id, user_id)),
        }
    }

    /// 1-based queue position of the user's waiting entry.
    ///
    /// # Errors
    ///
    /// `NotFound` when the user is not waiting for the event.
    pub async fn position_of(&self, event_id: EventId, user_id: UserId) -> Result<usize, WaitlistError> {
        self.environment()
            .store
            .position_of(event_id, user_id)
            .await?
            .ok_or_else(|| WaitlistError::entry_not_found(event_id, user_id))
    }

    /// Entries of the event in queue order, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the store fails.
    pub async fn list_waitlist(
        &self,
        event_id: EventId,
        status: Option<WaitlistStatus>,
    ) -> Result<Vec<WaitlistEntry>, WaitlistError> {
        Ok(self.environment().store.list_by_event(event_id, status).await?)
    }

    /// Answer an invitation. See [`InvitationScheduler::respond`].
    ///
    /// # Errors
    ///
    /// See [`InvitationScheduler::respond`].
    #[tracing::instrument(skip_all, fields(%event_id, %user_id, %decision))]
    pub async fn respond(
        &self,
        event_id: EventId,
        user_id: UserId,
        decision: Decision,
    ) -> Result<WaitlistEntry, WaitlistError> {
        self.scheduler.respond(event_id, user_id, decision).await
    }

    /// Admin override: admit the user. See [`AdmissionController::approve`].
    ///
    /// # Errors
    ///
    /// See [`AdmissionController::approve`].
    #[tracing::instrument(skip_all, fields(%actor, %event_id, %user_id))]
    pub async fn approve(
        &self,
        actor: UserId,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<WaitlistEntry, WaitlistError> {
        self.admission.approve(actor, event_id, user_id).await
    }

    /// Admin override: decline the user. See [`AdmissionController::reject`].
    ///
    /// # Errors
    ///
    /// See [`AdmissionController::reject`].
    #[tracing::instrument(skip_all, fields(%actor, %event_id, %user_id))]
    pub async fn reject(
        &self,
        actor: UserId,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<WaitlistEntry, WaitlistError> {
        self.admission.reject(actor, event_id, user_id).await
    }

    /// Promote up to `freed_slots` queued users.
    ///
    /// # Errors
    ///
    /// See [`AdmissionController::on_capacity_freed`].
    pub async fn on_capacity_freed(
        &self,
        event_id: EventId,
        freed_slots: usize,
    ) -> Result<PromotionReport, WaitlistError> {
        self.admission.on_capacity_freed(event_id, freed_slots).await
    }

    /// Registry callback: a confirmed participant canceled.
    ///
    /// # Errors
    ///
    /// See [`AdmissionController::on_capacity_freed`].
    #[tracing::instrument(skip_all, fields(%event_id))]
    pub async fn on_participant_canceled(&self, event_id: EventId) -> Result<PromotionReport, WaitlistError> {
        self.admission.on_capacity_freed(event_id, 1).await
    }

    /// Expire invitations overdue at `now`. See [`InvitationScheduler::expire_overdue`].
    ///
    /// # Errors
    ///
    /// See [`InvitationScheduler::expire_overdue`].
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<SweepReport, WaitlistError> {
        self.scheduler.expire_overdue(now).await
    }

    /// One maintenance cycle: expire overdue invitations, then fill any
    /// slot left open by abandoned or unreported cascades.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the store cannot be read. Failures for a single
    /// event are logged and skipped.
    pub async fn run_maintenance(&self) -> Result<SweepReport, WaitlistError> {
        let started = Instant::now();
        let env = self.environment();

        let now = env.clock.now();
        let mut report = self.expire_overdue(now).await?;
        for event_id in env.store.events_with_waiting().await? {
            match self.admission.fill_open_slots(event_id, now).await {
                Ok(promotion) => report.absorb(promotion),
                Err(error) => {
                    tracing::warn!(%event_id, %error, "Skipping event during maintenance");
                },
            }
        }

        WaitlistMetrics::record_sweep(started.elapsed());
        if !report.is_empty() {
            tracing::info!(
                expired = report.expired.len(),
                promoted = report.promoted.len(),
                conflicts = report.conflicts,
                "Maintenance cycle finished"
            );
        }
        Ok(report)
    }
}
