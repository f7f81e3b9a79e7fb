use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ffdb_core::EntityKind;
use tokio::fs;

use crate::IngestionReport;

/// Write `<reports_dir>/<run_id>/ingestion_report.json` and `summary.md`.
pub async fn write_reports(reports_dir: &Path, report: &IngestionReport) -> Result<PathBuf> {
    let run_dir = reports_dir.join(report.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let json = serde_json::to_vec_pretty(report).context("serializing ingestion report")?;
    fs::write(run_dir.join("ingestion_report.json"), json)
        .await
        .context("writing ingestion_report.json")?;
    fs::write(run_dir.join("summary.md"), render_summary_markdown(report))
        .await
        .context("writing summary.md")?;

    Ok(run_dir)
}

pub fn render_summary_markdown(report: &IngestionReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# FFDB Ingestion Summary\n");
    let _ = writeln!(out, "- Run ID: `{}`", report.run_id);
    let _ = writeln!(out, "- Season: {}", report.season);
    let _ = writeln!(out, "- Started: {}", report.started_at);
    let _ = writeln!(out, "- Finished: {}", report.finished_at);
    let _ = writeln!(out, "- Status: {}", report.status.as_str());
    if let Some(error) = &report.error {
        let _ = writeln!(out, "- Error: {error}");
    }

    let _ = writeln!(out, "\n## Outcomes\n");
    let _ = writeln!(
        out,
        "| entity | source | inserted | updated | unchanged | unresolved | skipped | failed |"
    );
    let _ = writeln!(out, "|---|---|---:|---:|---:|---:|---:|---:|");
    for kind in EntityKind::INGEST_ORDER {
        let Some(o) = report.outcome(kind) else {
            continue;
        };
        let source = report.sources.get(&kind).map(String::as_str).unwrap_or("-");
        let _ = writeln!(
            out,
            "| {kind} | {source} | {} | {} | {} | {} | {} | {} |",
            o.inserted, o.updated, o.unchanged, o.unresolved, o.skipped, o.failed
        );
    }

    let issues: Vec<_> = EntityKind::INGEST_ORDER
        .into_iter()
        .filter_map(|kind| report.outcome(kind).map(|o| (kind, o)))
        .flat_map(|(kind, o)| {
            o.failures
                .iter()
                .map(move |issue| (kind, "failed", issue))
                .chain(o.unresolved_refs.iter().map(move |issue| (kind, "unresolved", issue)))
        })
        .collect();
    if !issues.is_empty() {
        let _ = writeln!(out, "\n## Record Issues\n");
        for (kind, label, issue) in issues {
            let _ = writeln!(out, "- {kind} `{}` {label}: {}", issue.record, issue.reason);
        }
    }

    if !report.archived_payloads.is_empty() {
        let _ = writeln!(out, "\n## Archived Payloads\n");
        for path in &report.archived_payloads {
            let _ = writeln!(out, "- `{path}`");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityOutcome, RecordError};
    use ffdb_core::RecordRef;
    use tempfile::tempdir;

    fn sample_report() -> IngestionReport {
        let mut report = IngestionReport::start(2024);
        let mut players = EntityOutcome::default();
        players.record_write(ffdb_storage::UpsertAction::Inserted);
        players.record_failure(
            RecordRef::new("file:players", "#2"),
            &RecordError::MissingField { field: "name" },
        );
        report.outcomes.insert(EntityKind::Player, players);
        report.sources.insert(EntityKind::Player, "file:players".to_string());
        report.finish(None);
        report
    }

    #[test]
    fn summary_lists_counts_and_issues() {
        let markdown = render_summary_markdown(&sample_report());
        assert!(markdown.contains("| player | file:players | 1 | 0 | 0 | 0 | 0 | 1 |"));
        assert!(markdown.contains("- player `file:players:#2` failed: missing field `name`"));
        assert!(markdown.contains("- Status: completed_with_issues"));
    }

    #[tokio::test]
    async fn reports_land_under_run_id() {
        let dir = tempdir().expect("tempdir");
        let report = sample_report();

        let run_dir = write_reports(dir.path(), &report).await.expect("write");
        assert_eq!(run_dir, dir.path().join(report.run_id.to_string()));

        let raw = std::fs::read_to_string(run_dir.join("ingestion_report.json")).expect("json");
        let parsed: IngestionReport = serde_json::from_str(&raw).expect("parse back");
        assert_eq!(parsed.run_id, report.run_id);
        assert!(run_dir.join("summary.md").exists());
    }
}
