//! Ingestion orchestration: fetch, normalize, resolve and upsert in stage order.

mod config;
pub mod normalize;
mod pipeline;
mod report;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ffdb_adapters::SourceError;
use ffdb_core::{EntityKind, RecordRef};
use ffdb_storage::{SchemaError, StoreError, UpsertAction};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use config::{HttpSettings, IngestConfig, StageFiles, DEFAULT_SEASON};
pub use pipeline::{IngestionPipeline, SourceSet};
pub use report::{render_summary_markdown, write_reports};

pub const CRATE_NAME: &str = "ffdb-sync";

/// A problem confined to one raw record. Never aborts a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing field `{field}`")]
    MissingField { field: &'static str },
    #[error("invalid field `{field}`: {detail}")]
    InvalidField { field: &'static str, detail: String },
    #[error("unresolved {kind} reference `{external_id}`")]
    Unresolved { kind: EntityKind, external_id: String },
}

impl RecordError {
    pub fn is_parse_error(&self) -> bool {
        !matches!(self, Self::Unresolved { .. })
    }
}

/// A problem that aborts the run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("configuration: {0:#}")]
    Config(anyhow::Error),
    #[error("writing reports: {0:#}")]
    Report(anyhow::Error),
}

impl IngestError {
    /// The source was unreachable; re-running later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Source(err) if err.is_transient())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordIssue {
    pub record: RecordRef,
    pub reason: String,
}

/// Per-entity counts. Each processed record lands in exactly one counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Written, but with at least one reference left pending.
    pub unresolved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<RecordIssue>,
    pub unresolved_refs: Vec<RecordIssue>,
}

impl EntityOutcome {
    pub fn processed(&self) -> usize {
        self.inserted + self.updated + self.unchanged + self.unresolved + self.skipped + self.failed
    }

    pub fn parse_errors(&self) -> usize {
        self.failures.len()
    }

    pub(crate) fn record_write(&mut self, action: UpsertAction) {
        match action {
            UpsertAction::Inserted => self.inserted += 1,
            UpsertAction::Updated => self.updated += 1,
            UpsertAction::Unchanged => self.unchanged += 1,
        }
    }

    pub(crate) fn record_unresolved(&mut self, record: RecordRef, reasons: &[RecordError]) {
        self.unresolved += 1;
        self.unresolved_refs.push(RecordIssue {
            record,
            reason: reasons
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        });
    }

    pub(crate) fn record_failure(&mut self, record: RecordRef, err: &RecordError) {
        self.failed += 1;
        self.failures.push(RecordIssue {
            record,
            reason: err.to_string(),
        });
    }

    pub(crate) fn record_skip(&mut self) {
        self.skipped += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Completed, but some records failed to parse or stayed unresolved.
    CompletedWithIssues,
    Aborted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CompletedWithIssues => "completed_with_issues",
            Self::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub run_id: Uuid,
    pub season: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub outcomes: BTreeMap<EntityKind, EntityOutcome>,
    /// Source used per stage.
    pub sources: BTreeMap<EntityKind, String>,
    pub archived_payloads: Vec<String>,
    pub error: Option<String>,
}

impl IngestionReport {
    pub(crate) fn start(season: i32) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            season,
            started_at: now,
            finished_at: now,
            status: RunStatus::Completed,
            outcomes: BTreeMap::new(),
            sources: BTreeMap::new(),
            archived_payloads: Vec::new(),
            error: None,
        }
    }

    pub fn outcome(&self, kind: EntityKind) -> Option<&EntityOutcome> {
        self.outcomes.get(&kind)
    }

    pub fn total_failed(&self) -> usize {
        self.outcomes.values().map(|o| o.failed).sum()
    }

    pub fn total_unresolved(&self) -> usize {
        self.outcomes.values().map(|o| o.unresolved).sum()
    }

    pub(crate) fn finish(&mut self, error: Option<&IngestError>) {
        self.finished_at = Utc::now();
        self.error = error.map(ToString::to_string);
        self.status = if error.is_some() {
            RunStatus::Aborted
        } else if self.total_failed() + self.total_unresolved() > 0 {
            RunStatus::CompletedWithIssues
        } else {
            RunStatus::Completed
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_record_counts_once() {
        let mut outcome = EntityOutcome::default();
        outcome.record_write(UpsertAction::Inserted);
        outcome.record_write(UpsertAction::Unchanged);
        outcome.record_skip();
        outcome.record_failure(
            RecordRef::new("file", "#3"),
            &RecordError::MissingField { field: "name" },
        );
        outcome.record_unresolved(
            RecordRef::new("file", "P3"),
            &[RecordError::Unresolved {
                kind: EntityKind::NflTeam,
                external_id: "NYJ".to_string(),
            }],
        );

        assert_eq!(outcome.processed(), 5);
        assert_eq!(outcome.parse_errors(), 1);
        assert_eq!(outcome.failures[0].reason, "missing field `name`");
        assert_eq!(outcome.unresolved_refs[0].reason, "unresolved nfl_team reference `NYJ`");
    }

    #[test]
    fn report_status_reflects_issues() {
        let mut report = IngestionReport::start(2024);
        report.finish(None);
        assert_eq!(report.status, RunStatus::Completed);

        let mut outcome = EntityOutcome::default();
        outcome.record_skip();
        outcome.unresolved = 1;
        report.outcomes.insert(EntityKind::DraftPick, outcome);
        report.finish(None);
        assert_eq!(report.status, RunStatus::CompletedWithIssues);

        let json = serde_json::to_value(&report).expect("report json");
        assert_eq!(json["outcomes"]["draft_pick"]["unresolved"], 1);
        assert_eq!(json["status"], "completed_with_issues");
    }
}
