use super::{DriverDirectory, InsertOutcome, PlateStore};
use crate::recognize::FormattedPlate;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::plates::{DriverIdentity, PlateRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS plates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        plate TEXT NOT NULL,
        time_detected INTEGER NOT NULL,
        name TEXT,
        name2 TEXT,
        national_code TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_plates_plate_time ON plates (plate, time_detected)",
];

/// Open a SQLite pool, creating the database file if needed.
///
/// In-memory databases live only as long as their connection, so they get a
/// single connection that is never recycled.
pub async fn connect_pool(url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("invalid database url {}", url))?
        .create_if_missing(true);

    let pool_options = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(max_connections.max(1))
    };

    pool_options
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database {}", url))
}

/// Sighting store on SQLite. Timestamps are stored as unix milliseconds.
#[derive(Clone)]
pub struct SqlitePlateStore {
    pool: SqlitePool,
    dedup_window: Duration,
    directory: Option<Arc<dyn DriverDirectory>>,
}

impl SqlitePlateStore {
    pub fn new(pool: SqlitePool, dedup_window: std::time::Duration) -> Self {
        Self {
            pool,
            dedup_window: Duration::from_std(dedup_window).unwrap_or(Duration::MAX),
            directory: None,
        }
    }

    pub async fn connect(url: &str, dedup_window: std::time::Duration) -> Result<Self> {
        let pool = connect_pool(url, 5).await?;
        let store = Self::new(pool, dedup_window);
        store.migrate().await?;
        info!(url = %url, "plate store ready");
        Ok(store)
    }

    /// Look up driver identity for every new record
    pub fn with_directory(mut self, directory: Arc<dyn DriverDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("failed to create plates schema")?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Count-then-insert inside one transaction
    pub async fn insert_if_absent(
        &self,
        plate: &FormattedPlate,
        at: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let cutoff = at
            .checked_sub_signed(self.dedup_window)
            .map_or(i64::MIN, |t| t.timestamp_millis());

        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM plates WHERE plate = ? AND time_detected > ?",
        )
        .bind(plate.as_str())
        .bind(cutoff)
        .fetch_one(&mut *tx)
        .await
        .context("failed to count recent sightings")?;

        if existing > 0 {
            if let Err(e) = tx.rollback().await {
                debug!(plate = %plate, error = %e, "rollback after duplicate failed");
            }
            return Ok(InsertOutcome::Duplicate);
        }

        let identity = self.lookup_identity(plate).await;

        let result = sqlx::query(
            "INSERT INTO plates (plate, time_detected, name, name2, national_code) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(plate.as_str())
        .bind(at.timestamp_millis())
        .bind(identity.as_ref().map(|d| d.name.clone()))
        .bind(identity.as_ref().map(|d| d.name2.clone()))
        .bind(identity.as_ref().map(|d| d.national_code.clone()))
        .execute(&mut *tx)
        .await
        .context("failed to insert sighting")?;

        tx.commit().await.context("failed to commit sighting")?;

        Ok(InsertOutcome::Inserted {
            id: result.last_insert_rowid(),
        })
    }

    async fn lookup_identity(&self, plate: &FormattedPlate) -> Option<DriverIdentity> {
        let directory = self.directory.as_ref()?;
        match directory.lookup(plate.as_str()).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(plate = %plate, error = %e, "driver lookup failed, storing plate only");
                None
            }
        }
    }
}

#[async_trait]
impl PlateStore for SqlitePlateStore {
    async fn try_insert(&self, plate: &FormattedPlate, at: DateTime<Utc>) -> InsertOutcome {
        match self.insert_if_absent(plate, at).await {
            Ok(outcome @ InsertOutcome::Inserted { id }) => {
                info!(plate = %plate, id, "sighting recorded");
                outcome
            }
            Ok(outcome) => {
                debug!(plate = %plate, "plate already recorded inside dedup window");
                outcome
            }
            Err(e) => {
                warn!(plate = %plate, error = %format!("{:#}", e), "failed to record sighting");
                InsertOutcome::Failed
            }
        }
    }

    async fn recent(&self, limit: u32) -> Result<Vec<PlateRecord>> {
        let rows = sqlx::query(
            "SELECT id, plate, time_detected, name, name2, national_code FROM plates ORDER BY time_detected DESC, id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("failed to list sightings")?;

        rows.into_iter()
            .map(|row| -> Result<PlateRecord> {
                let millis: i64 = row.try_get("time_detected")?;
                let time_detected = DateTime::<Utc>::from_timestamp_millis(millis)
                    .ok_or_else(|| anyhow!("stored timestamp {} out of range", millis))?;
                Ok(PlateRecord {
                    id: row.try_get("id")?,
                    plate: row.try_get("plate")?,
                    time_detected,
                    name: row.try_get("name")?,
                    name2: row.try_get("name2")?,
                    national_code: row.try_get("national_code")?,
                })
            })
            .collect()
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("plate store unreachable")?;
        Ok(())
    }
}
