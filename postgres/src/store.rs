//! `PostgreSQL` implementation of [`WaitlistStore`].
//!
//! Every mutation of an existing row is a single guarded `UPDATE`:
//!
//! ```sql
//! UPDATE waitlist_entries SET status = $4, version = version + 1, ...
//! WHERE id = $1 AND status = $2 AND version = $3
//! RETURNING ...
//! ```
//!
//! A missing row in the `RETURNING` set means the guard failed; the store then
//! re-reads the entry to report either `EntryNotFound` or the conflicting
//! status and version. The partial unique index on active `(event_id, user_id)`
//! pairs backs the single-active-entry rule even across engine instances.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use waitlist_core::store::StoreFuture;
use waitlist_core::{
    EntryId, EventId, StoreError, Transition, UserId, Version, WaitlistEntry, WaitlistStatus,
    WaitlistStore,
};

/// `SELECT` over every entry column, followed by the given clauses.
macro_rules! select_entries {
    ($($clause:literal),* $(,)?) => {
        concat!(
            "SELECT id, event_id, user_id, status, joined_at, notified_at, ",
            "response_deadline, version, updated_at FROM waitlist_entries ",
            $($clause),*
        )
    };
}

const UNIQUE_VIOLATION: &str = "23505";

/// `PostgreSQL`-backed waitlist store.
///
/// # Example
///
/// ```no_run
/// use waitlist_postgres::PostgresWaitlistStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresWaitlistStore::connect("postgres://localhost/waitlist").await?;
/// waitlist_postgres::run_migrations(store.pool()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PostgresWaitlistStore {
    pool: PgPool,
}

impl PostgresWaitlistStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with a default pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection cannot be established.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| db_error("connect", &e))?;
        Ok(Self { pool })
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_active(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Result<Option<WaitlistEntry>, StoreError> {
        let row = sqlx::query(select_entries!(
            "WHERE event_id = $1 AND user_id = $2 AND status IN ('waiting', 'notified')"
        ))
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("find_active", &e))?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn fetch_entry(&self, entry_id: EntryId) -> Result<Option<WaitlistEntry>, StoreError> {
        let row = sqlx::query(select_entries!("WHERE id = $1"))
            .bind(entry_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get", &e))?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn insert(&self, entry: WaitlistEntry) -> Result<WaitlistEntry, StoreError> {
        let inserted = sqlx::query(
            r"
            INSERT INTO waitlist_entries (id, event_id, user_id, status, joined_at, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.event_id.as_uuid())
        .bind(entry.user_id.as_uuid())
        .bind(entry.status.as_str())
        .bind(entry.joined_at)
        .bind(version_to_db(entry.version)?)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {
                tracing::debug!(entry_id = %entry.id, event_id = %entry.event_id, "Inserted waitlist entry");
                Ok(entry)
            },
            Err(err) if is_unique_violation(&err) => {
                // Lost the race against a concurrent join of the same pair.
                let existing = self
                    .fetch_active(entry.event_id, entry.user_id)
                    .await?
                    .map_or(entry.id, |active| active.id);
                Err(StoreError::DuplicateActive {
                    event_id: entry.event_id,
                    user_id: entry.user_id,
                    existing,
                })
            },
            Err(err) => Err(db_error("insert_waiting", &err)),
        }
    }

    async fn apply(&self, transition: Transition) -> Result<WaitlistEntry, StoreError> {
        transition.validate()?;

        let (notified_at, deadline) = transition
            .window
            .map_or((None, None), |w| (Some(w.notified_at), Some(w.deadline)));

        let row = sqlx::query(
            r"
            UPDATE waitlist_entries
            SET status = $4,
                version = version + 1,
                updated_at = $5,
                notified_at = COALESCE($6, notified_at),
                response_deadline = COALESCE($7, response_deadline)
            WHERE id = $1 AND status = $2 AND version = $3
            RETURNING id, event_id, user_id, status, joined_at, notified_at,
                      response_deadline, version, updated_at
            ",
        )
        .bind(transition.entry_id.as_uuid())
        .bind(transition.from.as_str())
        .bind(version_to_db(transition.expected_version)?)
        .bind(transition.to.as_str())
        .bind(transition.at)
        .bind(notified_at)
        .bind(deadline)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("transition", &e))?;

        if let Some(row) = row {
            return row_to_entry(&row);
        }

        let stored = self
            .fetch_entry(transition.entry_id)
            .await?
            .ok_or(StoreError::EntryNotFound(transition.entry_id))?;
        transition.check_guard(&stored)?;

        // The guard matched on re-read, so the row moved and came back between
        // the two statements. Report it as a conflict all the same.
        Err(StoreError::ConcurrencyConflict {
            entry_id: transition.entry_id,
            expected_status: transition.from,
            expected_version: transition.expected_version,
            actual_status: stored.status,
            actual_version: stored.version,
        })
    }
}

impl WaitlistStore for PostgresWaitlistStore {
    fn insert_waiting(
        &self,
        event_id: EventId,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> StoreFuture<'_, WaitlistEntry> {
        Box::pin(async move {
            if let Some(existing) = self.fetch_active(event_id, user_id).await? {
                return Err(StoreError::DuplicateActive {
                    event_id,
                    user_id,
                    existing: existing.id,
                });
            }
            self.insert(WaitlistEntry::waiting(event_id, user_id, joined_at))
                .await
        })
    }

    fn transition(&self, transition: Transition) -> StoreFuture<'_, WaitlistEntry> {
        Box::pin(self.apply(transition))
    }

    fn get(&self, entry_id: EntryId) -> StoreFuture<'_, Option<WaitlistEntry>> {
        Box::pin(self.fetch_entry(entry_id))
    }

    fn find_active(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Option<WaitlistEntry>> {
        Box::pin(self.fetch_active(event_id, user_id))
    }

    fn find_latest(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Option<WaitlistEntry>> {
        Box::pin(async move {
            let row = sqlx::query(select_entries!(
                "WHERE event_id = $1 AND user_id = $2 ",
                "ORDER BY joined_at DESC, id DESC LIMIT 1"
            ))
            .bind(event_id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find_latest", &e))?;

            row.as_ref().map(row_to_entry).transpose()
        })
    }

    fn list_by_event(
        &self,
        event_id: EventId,
        status: Option<WaitlistStatus>,
    ) -> StoreFuture<'_, Vec<WaitlistEntry>> {
        Box::pin(async move {
            let rows = sqlx::query(select_entries!(
                "WHERE event_id = $1 AND ($2::TEXT IS NULL OR status = $2) ",
                "ORDER BY joined_at, id"
            ))
            .bind(event_id.as_uuid())
            .bind(status.map(WaitlistStatus::as_str))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list_by_event", &e))?;

            rows.iter().map(row_to_entry).collect()
        })
    }

    fn position_of(&self, event_id: EventId, user_id: UserId) -> StoreFuture<'_, Option<usize>> {
        Box::pin(async move {
            let rank: i64 = sqlx::query_scalar(
                r"
                SELECT COUNT(*)
                FROM waitlist_entries w,
                     (SELECT joined_at, id FROM waitlist_entries
                      WHERE event_id = $1 AND user_id = $2 AND status = 'waiting') me
                WHERE w.event_id = $1
                  AND w.status = 'waiting'
                  AND (w.joined_at, w.id) <= (me.joined_at, me.id)
                ",
            )
            .bind(event_id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("position_of", &e))?;

            match count_to_usize(rank)? {
                0 => Ok(None),
                rank => Ok(Some(rank)),
            }
        })
    }

    fn count_by_status(
        &self,
        event_id: EventId,
        status: WaitlistStatus,
    ) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM waitlist_entries WHERE event_id = $1 AND status = $2",
            )
            .bind(event_id.as_uuid())
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("count_by_status", &e))?;

            count_to_usize(count)
        })
    }

    fn list_overdue(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<WaitlistEntry>> {
        Box::pin(async move {
            let rows = sqlx::query(select_entries!(
                "WHERE status = 'notified' AND response_deadline < $1 ",
                "ORDER BY response_deadline, id"
            ))
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list_overdue", &e))?;

            rows.iter().map(row_to_entry).collect()
        })
    }

    fn events_with_waiting(&self) -> StoreFuture<'_, Vec<EventId>> {
        Box::pin(async move {
            let ids: Vec<uuid::Uuid> = sqlx::query_scalar(
                "SELECT DISTINCT event_id FROM waitlist_entries WHERE status = 'waiting' ORDER BY event_id",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("events_with_waiting", &e))?;

            Ok(ids.into_iter().map(EventId::from_uuid).collect())
        })
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn row_to_entry(row: &PgRow) -> Result<WaitlistEntry, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Database(format!("Failed to decode entry: {e}"));

    let status: String = row.try_get("status").map_err(decode)?;
    let status = status
        .parse::<WaitlistStatus>()
        .map_err(|e| StoreError::Database(e.to_string()))?;
    let version: i64 = row.try_get("version").map_err(decode)?;

    Ok(WaitlistEntry {
        id: EntryId::from_uuid(row.try_get("id").map_err(decode)?),
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(decode)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(decode)?),
        status,
        joined_at: row.try_get("joined_at").map_err(decode)?,
        notified_at: row.try_get("notified_at").map_err(decode)?,
        response_deadline: row.try_get("response_deadline").map_err(decode)?,
        version: version_from_db(version)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn version_to_db(version: Version) -> Result<i64, StoreError> {
    i64::try_from(version.value())
        .map_err(|_| StoreError::Database(format!("Version {version} out of range")))
}

fn version_from_db(version: i64) -> Result<Version, StoreError> {
    u64::try_from(version)
        .map(Version::new)
        .map_err(|_| StoreError::Database(format!("Negative version {version}")))
}

fn count_to_usize(count: i64) -> Result<usize, StoreError> {
    usize::try_from(count).map_err(|_| StoreError::Database(format!("Invalid count {count}")))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(sqlx::error::DatabaseError::code)
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

fn db_error(operation: &'static str, err: &sqlx::Error) -> StoreError {
    tracing::error!(operation, error = %err, "Waitlist store query failed");
    metrics::counter!("waitlist_store_errors_total", "operation" => operation).increment(1);
    StoreError::Database(err.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn versions_round_trip_through_bigint() {
        let version = Version::new(41).next();
        assert_eq!(version_from_db(version_to_db(version).unwrap()).unwrap(), version);
    }

    #[test]
    fn negative_version_is_rejected() {
        assert!(matches!(version_from_db(-1), Err(StoreError::Database(_))));
    }

    #[test]
    fn oversized_version_is_rejected() {
        assert!(version_to_db(Version::new(u64::MAX)).is_err());
    }

    #[test]
    fn select_macro_appends_clauses() {
        let sql = select_entries!("WHERE id = $1 ", "LIMIT 1");
        assert!(sql.starts_with("SELECT id, event_id"));
        assert!(sql.ends_with("FROM waitlist_entries WHERE id = $1 LIMIT 1"));
    }
}
