//! Source clients: the ESPN fantasy API, static JSON files and in-memory fixtures.
//!
//! A client only fetches and splits a payload into raw records. Mapping a raw
//! record onto canonical rows happens downstream in the ingestion pipeline.

mod espn;
mod files;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ffdb_core::{EntityKind, RecordRef};
use ffdb_storage::{ArchivedPayload, FetchError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub use espn::{EspnApiClient, EspnConfig, ESPN_API_BASE};
pub use files::{FixtureSource, StaticFileSource};

pub const CRATE_NAME: &str = "ffdb-adapters";

/// Field-naming scheme of a raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// ESPN numeric ids and camelCase fields.
    Espn,
    /// Files keyed by canonical field names (`external_id`, `team_external_id`, ...).
    Canonical,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Espn => "espn",
            Self::Canonical => "canonical",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "espn" => Ok(Self::Espn),
            "canonical" => Ok(Self::Canonical),
            other => Err(format!("unknown dialect `{other}` (expected espn or canonical)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailure {
    Network,
    Auth,
    NotFound,
    MissingFile,
}

impl FetchFailure {
    /// Only network failures are worth retrying later.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network)
    }

    pub fn from_fetch_error(err: &FetchError) -> Self {
        match err.status() {
            Some(401 | 403) => Self::Auth,
            Some(404) => Self::NotFound,
            _ => Self::Network,
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::NotFound => "not found",
            Self::MissingFile => "missing file",
        })
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{source_id}: fetch failed ({failure}): {detail}")]
    Fetch {
        source_id: String,
        failure: FetchFailure,
        detail: String,
    },
    #[error("{source_id}: unexpected payload shape: {detail}")]
    Parse { source_id: String, detail: String },
    #[error("{source_id}: not configured: {detail}")]
    Config { source_id: String, detail: String },
    #[error("{source_id}: archiving payload: {error:#}")]
    Archive {
        source_id: String,
        error: anyhow::Error,
    },
}

impl SourceError {
    /// `true` when the source was unreachable and a later retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Fetch { failure, .. } if failure.is_transient())
    }

    pub fn source_id(&self) -> &str {
        match self {
            Self::Fetch { source_id, .. }
            | Self::Parse { source_id, .. }
            | Self::Config { source_id, .. }
            | Self::Archive { source_id, .. } => source_id,
        }
    }
}

/// One record as the source delivered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub record_key: String,
    pub payload: JsonValue,
}

/// Everything one `fetch` returned. Iterating via [`RawBatch::records`] can be
/// repeated any number of times.
#[derive(Debug, Clone)]
pub struct RawBatch {
    pub source_id: String,
    pub dialect: Dialect,
    pub season: i32,
    pub scope: EntityKind,
    pub fetched_at: DateTime<Utc>,
    pub archived: Option<ArchivedPayload>,
    records: Vec<RawRecord>,
}

impl RawBatch {
    pub fn new(
        source_id: impl Into<String>,
        dialect: Dialect,
        season: i32,
        scope: EntityKind,
        records: Vec<RawRecord>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            dialect,
            season,
            scope,
            fetched_at: Utc::now(),
            archived: None,
            records,
        }
    }

    pub fn with_archive(mut self, archived: ArchivedPayload) -> Self {
        self.archived = Some(archived);
        self
    }

    pub fn records(&self) -> std::slice::Iter<'_, RawRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn origin(&self, record: &RawRecord) -> RecordRef {
        RecordRef::new(self.source_id.clone(), record.record_key.clone())
    }
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    fn source_id(&self) -> &str;
    fn dialect(&self) -> Dialect;

    /// Fetch every raw record of `scope` for `season`. Calling again fetches
    /// from scratch.
    async fn fetch(&self, season: i32, scope: EntityKind) -> Result<RawBatch, SourceError>;
}

/// Split a decoded payload into the raw records for `scope`.
///
/// A payload that does not have the expected outer shape is a batch-level
/// [`SourceError::Parse`]; individual records are not inspected here.
pub fn split_payload(
    source_id: &str,
    dialect: Dialect,
    season: i32,
    scope: EntityKind,
    payload: &JsonValue,
) -> Result<Vec<RawRecord>, SourceError> {
    let shape_error = |detail: String| SourceError::Parse {
        source_id: source_id.to_string(),
        detail,
    };

    let items: Vec<JsonValue> = match dialect {
        Dialect::Espn => espn_items(season, scope, payload).map_err(shape_error)?,
        Dialect::Canonical => canonical_items(scope, payload).map_err(shape_error)?,
    };
    Ok(keyed_records(dialect, scope, items))
}

fn keyed_records(dialect: Dialect, scope: EntityKind, items: Vec<JsonValue>) -> Vec<RawRecord> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, payload)| RawRecord {
            record_key: record_key(dialect, scope, &payload).unwrap_or_else(|| format!("#{index}")),
            payload,
        })
        .collect()
}

/// Derive the game batch from an NFL team batch whose records carry their
/// schedules. A game listed under both of its teams is kept once.
pub fn schedule_batch(teams: &RawBatch) -> RawBatch {
    let games = teams
        .records()
        .flat_map(|team| nested_games(teams.dialect, &team.payload))
        .collect();
    let records = keyed_records(teams.dialect, EntityKind::Game, dedup_games(teams.dialect, games));
    RawBatch::new(
        teams.source_id.clone(),
        teams.dialect,
        teams.season,
        EntityKind::Game,
        records,
    )
}

/// ESPN nests games per scoring period; canonical team records use a flat list.
fn nested_games(dialect: Dialect, team: &JsonValue) -> Vec<JsonValue> {
    match dialect {
        Dialect::Espn => team
            .get("proGamesByScoringPeriod")
            .and_then(JsonValue::as_object)
            .into_iter()
            .flat_map(|periods| periods.values())
            .filter_map(JsonValue::as_array)
            .flatten()
            .cloned()
            .collect(),
        Dialect::Canonical => team
            .get("games")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default(),
    }
}

fn dedup_games(dialect: Dialect, games: Vec<JsonValue>) -> Vec<JsonValue> {
    let mut seen = HashSet::new();
    games
        .into_iter()
        .filter(|game| match record_key(dialect, EntityKind::Game, game) {
            Some(key) => seen.insert(key),
            None => true,
        })
        .collect()
}

fn espn_pro_teams(payload: &JsonValue) -> Result<&Vec<JsonValue>, String> {
    payload
        .pointer("/settings/proTeams")
        .or_else(|| payload.get("proTeams"))
        .or(Some(payload).filter(|p| p.is_array()))
        .and_then(JsonValue::as_array)
        .ok_or_else(|| "expected `settings.proTeams` array".to_string())
}

fn espn_items(season: i32, scope: EntityKind, payload: &JsonValue) -> Result<Vec<JsonValue>, String> {
    match scope {
        EntityKind::NflTeam => espn_pro_teams(payload).cloned(),
        EntityKind::Game => {
            let games = espn_pro_teams(payload)?
                .iter()
                .flat_map(|team| nested_games(Dialect::Espn, team))
                .collect();
            Ok(dedup_games(Dialect::Espn, games))
        }
        EntityKind::Player => {
            let players = payload
                .as_array()
                .or_else(|| payload.get("players").and_then(JsonValue::as_array))
                .ok_or_else(|| "expected an array of players".to_string())?;
            Ok(players
                .iter()
                .map(|entry| match entry.get("player") {
                    Some(inner) if inner.is_object() => inner.clone(),
                    _ => entry.clone(),
                })
                .collect())
        }
        EntityKind::FantasyTeam => league_entry(season, payload)?
            .get("teams")
            .and_then(JsonValue::as_array)
            .cloned()
            .ok_or_else(|| "league entry has no `teams` array".to_string()),
        EntityKind::DraftPick => league_entry(season, payload)?
            .pointer("/draftDetail/picks")
            .and_then(JsonValue::as_array)
            .cloned()
            .ok_or_else(|| "league entry has no `draftDetail.picks` array".to_string()),
    }
}

/// League history is a list of per-season entries; a plain league payload is
/// a single object.
fn league_entry(season: i32, payload: &JsonValue) -> Result<&JsonValue, String> {
    let Some(entries) = payload.as_array() else {
        return if payload.is_object() {
            Ok(payload)
        } else {
            Err("expected league history list or league object".to_string())
        };
    };
    if entries.is_empty() {
        return Err("league history is empty".to_string());
    }

    entries
        .iter()
        .find(|entry| entry.get("seasonId").and_then(JsonValue::as_i64) == Some(i64::from(season)))
        .or_else(|| {
            entries
                .iter()
                .all(|entry| entry.get("seasonId").is_none())
                .then(|| &entries[0])
        })
        .ok_or_else(|| format!("league history has no entry for season {season}"))
}

fn canonical_items(scope: EntityKind, payload: &JsonValue) -> Result<Vec<JsonValue>, String> {
    let table_key = match scope {
        EntityKind::NflTeam => "nfl_teams",
        EntityKind::Game => "games",
        EntityKind::FantasyTeam => "fantasy_teams",
        EntityKind::Player => "players",
        EntityKind::DraftPick => "draft_picks",
    };
    payload
        .as_array()
        .or_else(|| payload.get("records").and_then(JsonValue::as_array))
        .or_else(|| payload.get(table_key).and_then(JsonValue::as_array))
        .cloned()
        .ok_or_else(|| format!("expected an array, `records` or `{table_key}`"))
}

fn record_key(dialect: Dialect, scope: EntityKind, payload: &JsonValue) -> Option<String> {
    let field = match (dialect, scope) {
        (Dialect::Espn, EntityKind::DraftPick) => "overallPickNumber",
        (Dialect::Espn, _) => "id",
        (Dialect::Canonical, EntityKind::DraftPick) => "overall_pick_number",
        (Dialect::Canonical, _) => "external_id",
    };
    match payload.get(field)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
