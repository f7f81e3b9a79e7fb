use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ffdb_core::EntityKind;
use serde_json::Value as JsonValue;
use tracing::info;

use crate::{split_payload, Dialect, FetchFailure, RawBatch, RawRecord, SourceClient, SourceError};

/// A JSON file at a fixed path. Missing or unreadable files are fatal
/// configuration errors, never transient.
#[derive(Debug, Clone)]
pub struct StaticFileSource {
    source_id: String,
    path: PathBuf,
    dialect: Dialect,
}

impl StaticFileSource {
    pub fn new(path: impl Into<PathBuf>, dialect: Dialect) -> Self {
        let path = path.into();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("static");
        Self {
            source_id: format!("file:{stem}"),
            path,
            dialect,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SourceClient for StaticFileSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn fetch(&self, season: i32, scope: EntityKind) -> Result<RawBatch, SourceError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|err| SourceError::Fetch {
                source_id: self.source_id.clone(),
                failure: FetchFailure::MissingFile,
                detail: format!("reading {}: {err}", self.path.display()),
            })?;
        let payload: JsonValue = serde_json::from_slice(&bytes).map_err(|err| SourceError::Parse {
            source_id: self.source_id.clone(),
            detail: format!("parsing {}: {err}", self.path.display()),
        })?;

        let records = split_payload(&self.source_id, self.dialect, season, scope, &payload)?;
        info!(
            path = %self.path.display(),
            season,
            scope = %scope,
            records = records.len(),
            "static file read"
        );
        Ok(RawBatch::new(
            self.source_id.clone(),
            self.dialect,
            season,
            scope,
            records,
        ))
    }
}

/// In-memory records keyed by scope, for tests and replays.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    source_id: String,
    dialect: Dialect,
    records: HashMap<EntityKind, Vec<JsonValue>>,
    failures: HashMap<EntityKind, FetchFailure>,
}

impl FixtureSource {
    pub fn new(source_id: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            source_id: source_id.into(),
            dialect,
            records: HashMap::new(),
            failures: HashMap::new(),
        }
    }

    pub fn with_records(mut self, scope: EntityKind, records: Vec<JsonValue>) -> Self {
        self.records.insert(scope, records);
        self
    }

    /// Every fetch of `scope` fails with `failure`.
    pub fn with_failure(mut self, scope: EntityKind, failure: FetchFailure) -> Self {
        self.failures.insert(scope, failure);
        self
    }
}

#[async_trait]
impl SourceClient for FixtureSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn fetch(&self, season: i32, scope: EntityKind) -> Result<RawBatch, SourceError> {
        if let Some(failure) = self.failures.get(&scope) {
            return Err(SourceError::Fetch {
                source_id: self.source_id.clone(),
                failure: *failure,
                detail: format!("fixture configured to fail {scope}"),
            });
        }

        let payload = JsonValue::Array(self.records.get(&scope).cloned().unwrap_or_default());
        let records: Vec<RawRecord> =
            split_payload(&self.source_id, self.dialect, season, scope, &payload)?;
        Ok(RawBatch::new(
            self.source_id.clone(),
            self.dialect,
            season,
            scope,
            records,
        ))
    }
}
