//! Persistence sink for accepted sightings and the optional driver directory
//! used to enrich them.

pub mod directory;
pub mod sqlite;

use crate::recognize::FormattedPlate;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::plates::PlateRecord;

pub use directory::{DriverDirectory, SqlDriverDirectory};
pub use sqlite::SqlitePlateStore;

/// What happened to an accepted candidate at the storage layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted { id: i64 },
    /// A record for the plate already exists inside the dedup window
    Duplicate,
    /// The store could not be reached or rejected the write; already logged
    Failed,
}

impl InsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsertOutcome::Inserted { .. } => "inserted",
            InsertOutcome::Duplicate => "duplicate",
            InsertOutcome::Failed => "failed",
        }
    }

    /// Whether the plate should be published and drawn on the frame
    pub fn is_recorded(&self) -> bool {
        !matches!(self, InsertOutcome::Failed)
    }
}

#[async_trait]
pub trait PlateStore: Send + Sync {
    /// Record a sighting unless the same plate was recorded within the
    /// dedup window before `at`. Never fails; errors become `Failed`.
    async fn try_insert(&self, plate: &FormattedPlate, at: DateTime<Utc>) -> InsertOutcome;

    /// Newest records first
    async fn recent(&self, limit: u32) -> Result<Vec<PlateRecord>>;

    async fn health_check(&self) -> Result<()>;
}
