//! External record system mapping a plate to the driver it is registered to.

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::plates::DriverIdentity;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

#[async_trait]
pub trait DriverDirectory: Send + Sync {
    /// `Ok(None)` when the plate is not registered
    async fn lookup(&self, plate: &str) -> Result<Option<DriverIdentity>>;
}

/// Directory backed by a `drivers` table keyed by plate
#[derive(Clone)]
pub struct SqlDriverDirectory {
    pool: SqlitePool,
}

impl SqlDriverDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let pool = super::sqlite::connect_pool(url, 2).await?;
        let directory = Self::new(pool);
        directory.migrate().await?;
        Ok(directory)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS drivers (
                plate TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                name2 TEXT NOT NULL,
                national_code TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create drivers schema")?;
        Ok(())
    }

    /// Register or replace the driver for a plate
    pub async fn register(&self, plate: &str, identity: &DriverIdentity) -> Result<()> {
        sqlx::query(
            "INSERT INTO drivers (plate, name, name2, national_code) VALUES (?, ?, ?, ?)
             ON CONFLICT(plate) DO UPDATE SET name = excluded.name, name2 = excluded.name2, national_code = excluded.national_code",
        )
        .bind(plate)
        .bind(&identity.name)
        .bind(&identity.name2)
        .bind(&identity.national_code)
        .execute(&self.pool)
        .await
        .context("failed to register driver")?;
        Ok(())
    }
}

#[async_trait]
impl DriverDirectory for SqlDriverDirectory {
    async fn lookup(&self, plate: &str) -> Result<Option<DriverIdentity>> {
        let row = sqlx::query("SELECT name, name2, national_code FROM drivers WHERE plate = ?")
            .bind(plate)
            .fetch_optional(&self.pool)
            .await
            .context("driver lookup failed")?;

        row.map(|row| -> Result<DriverIdentity> {
            Ok(DriverIdentity {
                name: row.try_get("name")?,
                name2: row.try_get("name2")?,
                national_code: row.try_get("national_code")?,
            })
        })
        .transpose()
    }
}
