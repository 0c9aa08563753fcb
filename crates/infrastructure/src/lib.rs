//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_consent_store;
mod postgres_consent_store;
mod system_clock;
mod uuid_id_generator;

use obconsent_application::StoreError;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use tracing::info;

pub use in_memory_consent_store::InMemoryConsentStore;
pub use postgres_consent_store::PostgresConsentStore;
pub use system_clock::SystemClock;
pub use uuid_id_generator::UuidIdGenerator;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Applies pending consent store migrations to the database behind `pool`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    MIGRATOR.run(pool).await.map_err(|error| {
        StoreError::Transaction(format!("failed to run consent store migrations: {error}"))
    })?;

    info!(
        migrations = MIGRATOR.iter().count(),
        "consent store migrations applied"
    );
    Ok(())
}
