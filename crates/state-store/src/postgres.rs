use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    PgPool, Row,
    postgres::{PgPoolOptions, PgRow},
};
use uuid::Uuid;

use crate::{
    Result, SagaId, StoreError, StoredState, Version,
    store::{SaveOptions, StateStore},
};

/// PostgreSQL-backed state store implementation.
#[derive(Clone)]
pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    /// Creates a new PostgreSQL state store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to the given database URL.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<StoredState> {
        Ok(StoredState {
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            saga_type: row.try_get("saga_type")?,
            version: Version::new(row.try_get("version")?),
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            state: row.try_get("state")?,
        })
    }

    async fn stored_version(&self, saga_type: &str, saga_id: SagaId) -> Result<Version> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM saga_states WHERE saga_type = $1 AND saga_id = $2",
        )
        .bind(saga_type)
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(version.map(Version::new).unwrap_or_default())
    }
}

#[async_trait]
impl StateStore for PostgresStateStore {
    async fn load(&self, saga_type: &str, saga_id: SagaId) -> Result<Option<StoredState>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT saga_type, saga_id, version, updated_at, state
            FROM saga_states
            WHERE saga_type = $1 AND saga_id = $2
            "#,
        )
        .bind(saga_type)
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn save(&self, record: StoredState, options: SaveOptions) -> Result<Version> {
        let result = match options.expected_version {
            Some(expected) if expected == Version::initial() => {
                sqlx::query(
                    r#"
                    INSERT INTO saga_states (saga_type, saga_id, version, updated_at, state)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (saga_type, saga_id) DO NOTHING
                    "#,
                )
                .bind(&record.saga_type)
                .bind(record.saga_id.as_uuid())
                .bind(record.version.as_i64())
                .bind(record.updated_at)
                .bind(&record.state)
                .execute(&self.pool)
                .await?
            }
            Some(expected) => {
                sqlx::query(
                    r#"
                    UPDATE saga_states
                    SET version = $3, updated_at = $4, state = $5
                    WHERE saga_type = $1 AND saga_id = $2 AND version = $6 AND version < $3
                    "#,
                )
                .bind(&record.saga_type)
                .bind(record.saga_id.as_uuid())
                .bind(record.version.as_i64())
                .bind(record.updated_at)
                .bind(&record.state)
                .bind(expected.as_i64())
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO saga_states (saga_type, saga_id, version, updated_at, state)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (saga_type, saga_id) DO UPDATE SET
                        version = EXCLUDED.version,
                        updated_at = EXCLUDED.updated_at,
                        state = EXCLUDED.state
                    WHERE saga_states.version < EXCLUDED.version
                    "#,
                )
                .bind(&record.saga_type)
                .bind(record.saga_id.as_uuid())
                .bind(record.version.as_i64())
                .bind(record.updated_at)
                .bind(&record.state)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            let actual = self
                .stored_version(&record.saga_type, record.saga_id)
                .await?;
            return Err(StoreError::ConcurrencyConflict {
                saga_id: record.saga_id,
                expected: options.expected_version.unwrap_or(actual),
                actual,
            });
        }

        metrics::counter!("state_store_saves_total", "backend" => "postgres").increment(1);
        Ok(record.version)
    }

    async fn list(&self, saga_type: &str) -> Result<Vec<StoredState>> {
        let rows = sqlx::query(
            r#"
            SELECT saga_type, saga_id, version, updated_at, state
            FROM saga_states
            WHERE saga_type = $1
            ORDER BY saga_id ASC
            "#,
        )
        .bind(saga_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn list_by_status(&self, saga_type: &str, statuses: &[&str]) -> Result<Vec<StoredState>> {
        let rows = sqlx::query(
            r#"
            SELECT saga_type, saga_id, version, updated_at, state
            FROM saga_states
            WHERE saga_type = $1 AND state ->> 'status' = ANY($2)
            ORDER BY saga_id ASC
            "#,
        )
        .bind(saga_type)
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn delete(&self, saga_type: &str, saga_id: SagaId) -> Result<()> {
        sqlx::query("DELETE FROM saga_states WHERE saga_type = $1 AND saga_id = $2")
            .bind(saga_type)
            .bind(saga_id.as_uuid())
            .execute(&self.pool)
            .await?;

        tracing::debug!(%saga_id, saga_type, "saga state deleted");
        Ok(())
    }
}
