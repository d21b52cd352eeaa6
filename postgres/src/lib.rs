//! `PostgreSQL` adapters for the waitlist admission engine.
//!
//! This crate provides:
//!
//! - [`PostgresWaitlistStore`]: the production [`WaitlistStore`](waitlist_core::WaitlistStore)
//! - [`PostgresCapacityTracker`] and [`PostgresAccessPolicy`]: read-mostly
//!   adapters over the event registry tables
//! - [`run_migrations`]: the embedded schema
//!
//! # Example
//!
//! ```no_run
//! use waitlist_postgres::{PostgresCapacityTracker, PostgresWaitlistStore, run_migrations};
//!
//! # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! run_migrations(&pool).await?;
//! let store = PostgresWaitlistStore::from_pool(pool.clone());
//! let tracker = PostgresCapacityTracker::new(pool);
//! # Ok(())
//! # }
//! ```

mod registry;
mod store;

pub use registry::{PostgresAccessPolicy, PostgresCapacityTracker};
pub use store::PostgresWaitlistStore;

/// Schema migrations under `postgres/migrations`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Apply pending schema migrations.
///
/// # Errors
///
/// Returns the migration error if a script fails or the history diverged.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await?;
    tracing::info!("Waitlist schema up to date");
    Ok(())
}
