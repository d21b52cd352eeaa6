//! Event registry adapters over the `events`, `event_participants` and
//! `event_managers` tables.
//!
//! The registry is owned by the events service; the waitlist reads
//! capacities, counts participants, and inserts or deletes the rows of the
//! participants it admits.

use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;
use waitlist_core::environment::{
    AccessError, AccessPolicy, CapacityTracker, Registration, TrackerError, TrackerFuture,
};
use waitlist_core::{EventId, UserId};

fn unavailable(operation: &'static str, err: &sqlx::Error) -> TrackerError {
    tracing::error!(operation, error = %err, "Event registry query failed");
    metrics::counter!("waitlist_registry_errors_total", "operation" => operation).increment(1);
    TrackerError::Unavailable(err.to_string())
}

fn to_u32(value: i64) -> Result<u32, TrackerError> {
    u32::try_from(value)
        .map_err(|_| TrackerError::Unavailable(format!("Registry count out of range: {value}")))
}

/// [`CapacityTracker`] backed by the registry tables.
#[derive(Debug, Clone)]
pub struct PostgresCapacityTracker {
    pool: PgPool,
}

impl PostgresCapacityTracker {
    /// Create a tracker over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_capacity(&self, event_id: EventId) -> Result<u32, TrackerError> {
        let capacity: Option<i32> = sqlx::query_scalar("SELECT capacity FROM events WHERE id = $1")
            .bind(event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| unavailable("capacity", &e))?;

        capacity
            .ok_or(TrackerError::EventNotFound(event_id))
            .and_then(|c| to_u32(i64::from(c)))
    }

    async fn count_confirmed(&self, event_id: EventId) -> Result<u32, TrackerError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r"
            SELECT COUNT(p.user_id)
            FROM events e
            LEFT JOIN event_participants p ON p.event_id = e.id
            WHERE e.id = $1
            GROUP BY e.id
            ",
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unavailable("confirmed_count", &e))?;

        row.ok_or(TrackerError::EventNotFound(event_id))
            .and_then(|(count,)| to_u32(count))
    }

    async fn register(&self, event_id: EventId, user_id: UserId) -> Result<Registration, TrackerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| unavailable("register_participant", &e))?;

        // Row lock on the event serializes registrations across instances.
        let capacity: Option<i32> =
            sqlx::query_scalar("SELECT capacity FROM events WHERE id = $1 FOR UPDATE")
                .bind(event_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| unavailable("register_participant", &e))?;
        let capacity = capacity.ok_or(TrackerError::EventNotFound(event_id))?;

        let existing: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM event_participants WHERE event_id = $1 AND user_id = $2)",
        )
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| unavailable("register_participant", &e))?;
        if existing {
            tx.rollback()
                .await
                .map_err(|e| unavailable("register_participant", &e))?;
            return Ok(Registration::AlreadyRegistered);
        }

        let confirmed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM event_participants WHERE event_id = $1")
                .bind(event_id.as_uuid())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| unavailable("register_participant", &e))?;

        if confirmed >= i64::from(capacity) {
            tx.rollback()
                .await
                .map_err(|e| unavailable("register_participant", &e))?;
            return Ok(Registration::Full);
        }

        let inserted = sqlx::query(
            r"
            INSERT INTO event_participants (event_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (event_id, user_id) DO NOTHING
            ",
        )
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| unavailable("register_participant", &e))?
        .rows_affected();

        tx.commit()
            .await
            .map_err(|e| unavailable("register_participant", &e))?;

        if inserted == 0 {
            tracing::debug!(%event_id, %user_id, "Participant already registered");
            return Ok(Registration::AlreadyRegistered);
        }
        tracing::debug!(%event_id, %user_id, "Participant registered");
        Ok(Registration::Registered)
    }

    async fn release(&self, event_id: EventId, user_id: UserId) -> Result<(), TrackerError> {
        sqlx::query("DELETE FROM event_participants WHERE event_id = $1 AND user_id = $2")
            .bind(event_id.as_uuid())
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| unavailable("release_participant", &e))?;

        tracing::debug!(%event_id, %user_id, "Participant released");
        Ok(())
    }
}

impl CapacityTracker for PostgresCapacityTracker {
    fn capacity(&self, event_id: EventId) -> TrackerFuture<'_, u32> {
        Box::pin(self.load_capacity(event_id))
    }

    fn confirmed_count(&self, event_id: EventId) -> TrackerFuture<'_, u32> {
        Box::pin(self.count_confirmed(event_id))
    }

    fn register_participant(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> TrackerFuture<'_, Registration> {
        Box::pin(self.register(event_id, user_id))
    }

    fn release_participant(&self, event_id: EventId, user_id: UserId) -> TrackerFuture<'_, ()> {
        Box::pin(self.release(event_id, user_id))
    }
}

/// [`AccessPolicy`] over the `event_managers` table.
#[derive(Debug, Clone)]
pub struct PostgresAccessPolicy {
    pool: PgPool,
}

impl PostgresAccessPolicy {
    /// Create a policy over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AccessPolicy for PostgresAccessPolicy {
    fn can_manage_waitlist(
        &self,
        actor: UserId,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, AccessError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM event_managers WHERE event_id = $1 AND user_id = $2)",
            )
            .bind(event_id.as_uuid())
            .bind(actor.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AccessError(e.to_string()))
        })
    }
}
