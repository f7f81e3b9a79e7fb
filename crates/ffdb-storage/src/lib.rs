//! SQLite-backed canonical store, raw payload archive and HTTP transport for FFDB.

mod artifacts;
mod http;
mod schema;
mod store;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use artifacts::{ArchivedPayload, ArtifactStore};
pub use http::{
    classify_status, BackoffPolicy, FetchError, FetchedResponse, HttpClientConfig, HttpFetcher,
    RequestSpacing, RetryDisposition,
};
pub use schema::{ensure_schema, CANONICAL_TABLES};
pub use store::{GameRefs, PickRefs, RunRecord, Store};

pub const CRATE_NAME: &str = "ffdb-storage";

/// The store is structurally incompatible with the canonical schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("cannot add {constraint} to {table}: existing rows violate it ({detail})")]
    ConstraintConflict {
        table: &'static str,
        constraint: &'static str,
        detail: String,
    },
    #[error("table {table} exists without required column {column}")]
    IncompatibleTable {
        table: &'static str,
        column: &'static str,
    },
    #[error("table {table} column {column} does not reference {references}")]
    MissingForeignKey {
        table: &'static str,
        column: &'static str,
        references: &'static str,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The underlying storage is unavailable or returned something unreadable.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("opening database {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("database operation failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored row is unreadable: {0}")]
    Corrupt(String),
    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Inserted,
    Updated,
    Unchanged,
}

/// Result of one atomic upsert: the row's surrogate key and what happened to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted {
    pub id: Uuid,
    pub action: UpsertAction,
}
