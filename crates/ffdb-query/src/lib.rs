//! Named, parameterized read queries over the canonical store.
//!
//! Every cross-entity join goes through surrogate keys. External ids only ever
//! appear as filter parameters or output columns.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ffdb_core::Position;
use ffdb_storage::{Store, StoreError};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "ffdb-query";

pub const MAX_LIMIT: u32 = 500;

/// Highest scoring period a season can have, playoffs included.
pub const MAX_WEEK: i32 = 25;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid parameter `{name}`: {detail}")]
    InvalidParameter { name: &'static str, detail: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for QueryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRow {
    pub player_id: Uuid,
    pub external_id: String,
    pub season: i32,
    pub name: String,
    pub position: Position,
    pub nfl_team: Option<String>,
    pub injury_status: Option<String>,
    pub fantasy_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftPickRow {
    pub pick_id: Uuid,
    pub season: i32,
    pub overall_pick_number: i32,
    pub round: Option<i32>,
    pub round_pick: Option<i32>,
    pub keeper: bool,
    pub auto_draft_type: i32,
    pub fantasy_team_external_id: Option<String>,
    pub fantasy_team: Option<String>,
    pub player_external_id: Option<String>,
    pub player_name: Option<String>,
    pub position: Option<Position>,
    pub nfl_team: Option<String>,
    pub fantasy_score: Option<f64>,
    /// Player or fantasy team link not yet resolved.
    pub pending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRoundRow {
    pub round: Option<i32>,
    pub position: Position,
    pub picks: i64,
    pub average_score: f64,
}

/// Draft value of one position within one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickValueRow {
    pub round: Option<i32>,
    pub position: Position,
    pub picks: i64,
    pub earliest_pick: i64,
    pub latest_pick: i64,
    pub average_pick: f64,
    /// Percentage of the round's resolved picks spent on this position.
    pub round_share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoDraftRow {
    /// `manual` or `auto`.
    pub draft_type: String,
    pub position: Position,
    pub picks: i64,
    pub average_pick: f64,
    pub earliest_pick: i64,
    pub latest_pick: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRow {
    pub game_id: Uuid,
    pub external_id: String,
    pub season: i32,
    pub week: i32,
    pub home_team: Option<String>,
    pub home_team_name: Option<String>,
    pub away_team: Option<String>,
    pub away_team_name: Option<String>,
    pub kickoff: Option<DateTime<Utc>>,
    pub start_time_tbd: bool,
    pub stats_official: bool,
    /// Home or away team not yet resolved.
    pub pending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NflTeamDraftRow {
    pub nfl_team_id: Uuid,
    pub abbreviation: String,
    pub name: String,
    pub picks: i64,
    pub first_pick: i64,
    pub average_pick: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingRow {
    pub fantasy_team_id: Uuid,
    pub external_id: String,
    pub name: String,
    pub owner: Option<String>,
    pub wins: Option<i32>,
    pub losses: Option<i32>,
    pub ties: Option<i32>,
    pub points_for: Option<f64>,
    pub final_position: Option<i32>,
    pub picks: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastRun {
    pub run_id: Uuid,
    pub season: i32,
    pub finished_at: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSummary {
    pub table_counts: BTreeMap<String, i64>,
    pub seasons: Vec<i32>,
    pub pending_draft_picks: i64,
    pub last_run: Option<LastRun>,
}

const PICK_COLUMNS: &str = r#"
    SELECT d.id, d.season, d.overall_pick_number, d.round, d.round_pick, d.keeper,
           d.auto_draft_type, f.external_id AS fantasy_team_external_id, f.name AS fantasy_team,
           p.external_id AS player_external_id, p.name AS player_name, p.position,
           p.fantasy_score, t.abbreviation AS nfl_team,
           (d.player_id IS NULL OR d.fantasy_team_id IS NULL) AS pending
      FROM draft_picks d
      LEFT JOIN fantasy_teams f ON f.id = d.fantasy_team_id
      LEFT JOIN players p ON p.id = d.player_id
      LEFT JOIN nfl_teams t ON t.id = p.nfl_team_id
"#;

const PLAYER_COLUMNS: &str = r#"
    SELECT p.id, p.external_id, p.season, p.name, p.position, p.injury_status,
           p.fantasy_score, t.abbreviation AS nfl_team
      FROM players p
      LEFT JOIN nfl_teams t ON t.id = p.nfl_team_id
"#;

/// Read-only accessors. Cloning is cheap; the underlying pool is shared.
#[derive(Debug, Clone)]
pub struct QueryLayer {
    store: Store,
}

impl QueryLayer {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Players at `position` in `season`, best season score first.
    pub async fn players_by_position(
        &self,
        season: i32,
        position: &str,
    ) -> Result<Vec<PlayerRow>, QueryError> {
        validate_season(season)?;
        let position = parse_position(position)?;
        let sql = format!(
            "{PLAYER_COLUMNS} WHERE p.season = ? AND p.position = ? ORDER BY p.fantasy_score DESC, p.name ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(season)
            .bind(position.as_str())
            .fetch_all(self.store.pool())
            .await?;
        debug!(season, position = %position, rows = rows.len(), "players_by_position");
        rows.iter().map(player_row).collect()
    }

    pub async fn top_players(
        &self,
        season: i32,
        position: Option<&str>,
        limit: u32,
    ) -> Result<Vec<PlayerRow>, QueryError> {
        validate_season(season)?;
        let limit = validate_limit(limit)?;
        let position = position.map(parse_position).transpose()?;
        let sql = format!(
            "{PLAYER_COLUMNS} WHERE p.season = ? AND (? IS NULL OR p.position = ?) \
             ORDER BY p.fantasy_score DESC, p.name ASC LIMIT ?"
        );
        let position = position.map(Position::as_str);
        let rows = sqlx::query(&sql)
            .bind(season)
            .bind(position)
            .bind(position)
            .bind(i64::from(limit))
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(player_row).collect()
    }

    /// Picks made by the fantasy team with source id `fantasy_team` in `season`,
    /// in draft order.
    pub async fn draft_picks_for_fantasy_team(
        &self,
        season: i32,
        fantasy_team: &str,
    ) -> Result<Vec<DraftPickRow>, QueryError> {
        validate_season(season)?;
        let fantasy_team = fantasy_team.trim();
        if fantasy_team.is_empty() {
            return Err(QueryError::InvalidParameter {
                name: "fantasy_team",
                detail: "must not be empty".to_string(),
            });
        }
        let sql = format!(
            "{PICK_COLUMNS} WHERE d.season = ? AND f.external_id = ? ORDER BY d.overall_pick_number"
        );
        let rows = sqlx::query(&sql)
            .bind(season)
            .bind(fantasy_team)
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(draft_pick_row).collect()
    }

    /// Every pick of the season in draft order, pending picks included.
    pub async fn draft_board(&self, season: i32) -> Result<Vec<DraftPickRow>, QueryError> {
        validate_season(season)?;
        let sql = format!("{PICK_COLUMNS} WHERE d.season = ? ORDER BY d.overall_pick_number");
        let rows = sqlx::query(&sql)
            .bind(season)
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(draft_pick_row).collect()
    }

    /// Resolved picks grouped by round and position.
    pub async fn position_draft_summary(
        &self,
        season: i32,
    ) -> Result<Vec<PositionRoundRow>, QueryError> {
        validate_season(season)?;
        let rows = sqlx::query(
            r#"
            SELECT d.round, p.position, COUNT(*) AS picks, AVG(p.fantasy_score) AS average_score
              FROM draft_picks d
              JOIN players p ON p.id = d.player_id
             WHERE d.season = ?
             GROUP BY d.round, p.position
             ORDER BY d.round, p.position
            "#,
        )
        .bind(season)
        .fetch_all(self.store.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PositionRoundRow {
                    round: row.try_get("round")?,
                    position: decode_position(row.try_get("position")?)?,
                    picks: row.try_get("picks")?,
                    average_score: row.try_get::<Option<f64>, _>("average_score")?.unwrap_or(0.0),
                })
            })
            .collect()
    }

    /// Picks kept from a previous season, in draft order.
    pub async fn keeper_picks(&self, season: i32) -> Result<Vec<DraftPickRow>, QueryError> {
        validate_season(season)?;
        let sql = format!(
            "{PICK_COLUMNS} WHERE d.season = ? AND d.keeper = 1 ORDER BY d.overall_pick_number"
        );
        let rows = sqlx::query(&sql)
            .bind(season)
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(draft_pick_row).collect()
    }

    /// Manual against auto-drafted picks, per position.
    pub async fn auto_draft_summary(&self, season: i32) -> Result<Vec<AutoDraftRow>, QueryError> {
        validate_season(season)?;
        let rows = sqlx::query(
            r#"
            SELECT CASE WHEN d.auto_draft_type = 0 THEN 'manual' ELSE 'auto' END AS draft_type,
                   p.position, COUNT(*) AS picks,
                   AVG(d.overall_pick_number) AS average_pick,
                   MIN(d.overall_pick_number) AS earliest_pick,
                   MAX(d.overall_pick_number) AS latest_pick
              FROM draft_picks d
              JOIN players p ON p.id = d.player_id
             WHERE d.season = ?
             GROUP BY draft_type, p.position
             ORDER BY draft_type, picks DESC, p.position
            "#,
        )
        .bind(season)
        .fetch_all(self.store.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AutoDraftRow {
                    draft_type: row.try_get("draft_type")?,
                    position: decode_position(row.try_get("position")?)?,
                    picks: row.try_get("picks")?,
                    average_pick: row.try_get("average_pick")?,
                    earliest_pick: row.try_get("earliest_pick")?,
                    latest_pick: row.try_get("latest_pick")?,
                })
            })
            .collect()
    }

    /// Where each position went in each round, with its share of the round.
    pub async fn pick_value_by_round(&self, season: i32) -> Result<Vec<PickValueRow>, QueryError> {
        validate_season(season)?;
        let rows = sqlx::query(
            r#"
            SELECT d.round, p.position, COUNT(*) AS picks,
                   MIN(d.overall_pick_number) AS earliest_pick,
                   MAX(d.overall_pick_number) AS latest_pick,
                   AVG(d.overall_pick_number) AS average_pick,
                   COUNT(*) * 100.0 / SUM(COUNT(*)) OVER (PARTITION BY d.round) AS round_share
              FROM draft_picks d
              JOIN players p ON p.id = d.player_id
             WHERE d.season = ?
             GROUP BY d.round, p.position
             ORDER BY d.round, picks DESC, p.position
            "#,
        )
        .bind(season)
        .fetch_all(self.store.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PickValueRow {
                    round: row.try_get("round")?,
                    position: decode_position(row.try_get("position")?)?,
                    picks: row.try_get("picks")?,
                    earliest_pick: row.try_get("earliest_pick")?,
                    latest_pick: row.try_get("latest_pick")?,
                    average_pick: row.try_get("average_pick")?,
                    round_share: row.try_get("round_share")?,
                })
            })
            .collect()
    }

    /// NFL schedule for `season`, one week or all of them, in kickoff order.
    pub async fn games_by_week(
        &self,
        season: i32,
        week: Option<i32>,
    ) -> Result<Vec<GameRow>, QueryError> {
        validate_season(season)?;
        if let Some(week) = week.filter(|week| !(1..=MAX_WEEK).contains(week)) {
            return Err(QueryError::InvalidParameter {
                name: "week",
                detail: format!("must be between 1 and {MAX_WEEK}, got {week}"),
            });
        }
        let rows = sqlx::query(
            r#"
            SELECT g.id, g.external_id, g.season, g.week, g.kickoff, g.start_time_tbd,
                   g.stats_official,
                   h.abbreviation AS home_team, h.name AS home_team_name,
                   a.abbreviation AS away_team, a.name AS away_team_name,
                   (g.home_team_id IS NULL OR g.away_team_id IS NULL) AS pending
              FROM games g
              LEFT JOIN nfl_teams h ON h.id = g.home_team_id
              LEFT JOIN nfl_teams a ON a.id = g.away_team_id
             WHERE g.season = ? AND (? IS NULL OR g.week = ?)
             ORDER BY g.week, g.kickoff IS NULL, g.kickoff, g.external_id
            "#,
        )
        .bind(season)
        .bind(week)
        .bind(week)
        .fetch_all(self.store.pool())
        .await?;
        debug!(season, ?week, rows = rows.len(), "games_by_week");

        rows.iter()
            .map(|row| {
                Ok(GameRow {
                    game_id: row.try_get("id")?,
                    external_id: row.try_get("external_id")?,
                    season: row.try_get("season")?,
                    week: row.try_get("week")?,
                    home_team: row.try_get("home_team")?,
                    home_team_name: row.try_get("home_team_name")?,
                    away_team: row.try_get("away_team")?,
                    away_team_name: row.try_get("away_team_name")?,
                    kickoff: row.try_get("kickoff")?,
                    start_time_tbd: row.try_get("start_time_tbd")?,
                    stats_official: row.try_get("stats_official")?,
                    pending: row.try_get::<i64, _>("pending")? != 0,
                })
            })
            .collect()
    }

    /// How many drafted players each NFL team supplied.
    pub async fn nfl_team_draft_distribution(
        &self,
        season: i32,
    ) -> Result<Vec<NflTeamDraftRow>, QueryError> {
        validate_season(season)?;
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.abbreviation, t.name, COUNT(*) AS picks,
                   MIN(d.overall_pick_number) AS first_pick,
                   AVG(d.overall_pick_number) AS average_pick
              FROM draft_picks d
              JOIN players p ON p.id = d.player_id
              JOIN nfl_teams t ON t.id = p.nfl_team_id
             WHERE d.season = ?
             GROUP BY t.id, t.abbreviation, t.name
             ORDER BY picks DESC, first_pick ASC
            "#,
        )
        .bind(season)
        .fetch_all(self.store.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(NflTeamDraftRow {
                    nfl_team_id: row.try_get("id")?,
                    abbreviation: row.try_get("abbreviation")?,
                    name: row.try_get("name")?,
                    picks: row.try_get("picks")?,
                    first_pick: row.try_get("first_pick")?,
                    average_pick: row.try_get("average_pick")?,
                })
            })
            .collect()
    }

    /// Fantasy teams by final position, then wins.
    pub async fn fantasy_standings(&self, season: i32) -> Result<Vec<StandingRow>, QueryError> {
        validate_season(season)?;
        let rows = sqlx::query(
            r#"
            SELECT f.id, f.external_id, f.name, f.owner, f.wins, f.losses, f.ties,
                   f.points_for, f.final_position,
                   (SELECT COUNT(*) FROM draft_picks d WHERE d.fantasy_team_id = f.id) AS picks
              FROM fantasy_teams f
             WHERE f.season = ?
             ORDER BY f.final_position IS NULL, f.final_position, f.wins DESC, f.name
            "#,
        )
        .bind(season)
        .fetch_all(self.store.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(StandingRow {
                    fantasy_team_id: row.try_get("id")?,
                    external_id: row.try_get("external_id")?,
                    name: row.try_get("name")?,
                    owner: row.try_get("owner")?,
                    wins: row.try_get("wins")?,
                    losses: row.try_get("losses")?,
                    ties: row.try_get("ties")?,
                    points_for: row.try_get("points_for")?,
                    final_position: row.try_get("final_position")?,
                    picks: row.try_get("picks")?,
                })
            })
            .collect()
    }

    pub async fn database_summary(&self) -> Result<DatabaseSummary, QueryError> {
        let table_counts = self.store.table_counts().await?;
        let seasons: Vec<i32> = sqlx::query_scalar(
            r#"
            SELECT season FROM fantasy_teams
            UNION SELECT season FROM players
            UNION SELECT season FROM draft_picks
            ORDER BY 1
            "#,
        )
        .fetch_all(self.store.pool())
        .await?;
        let pending_draft_picks: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM draft_picks WHERE player_id IS NULL OR fantasy_team_id IS NULL",
        )
        .fetch_one(self.store.pool())
        .await?;
        let last_run = self
            .store
            .recent_runs(1)
            .await?
            .into_iter()
            .next()
            .map(|run| LastRun {
                run_id: run.run_id,
                season: run.season,
                finished_at: run.finished_at,
                status: run.status,
            });

        Ok(DatabaseSummary {
            table_counts,
            seasons,
            pending_draft_picks,
            last_run,
        })
    }
}

fn validate_season(season: i32) -> Result<(), QueryError> {
    if (1900..=2200).contains(&season) {
        Ok(())
    } else {
        Err(QueryError::InvalidParameter {
            name: "season",
            detail: format!("{season} is not a season year"),
        })
    }
}

fn validate_limit(limit: u32) -> Result<u32, QueryError> {
    if (1..=MAX_LIMIT).contains(&limit) {
        Ok(limit)
    } else {
        Err(QueryError::InvalidParameter {
            name: "limit",
            detail: format!("must be between 1 and {MAX_LIMIT}, got {limit}"),
        })
    }
}

fn parse_position(raw: &str) -> Result<Position, QueryError> {
    raw.parse().map_err(|err: ffdb_core::UnknownPosition| QueryError::InvalidParameter {
        name: "position",
        detail: err.to_string(),
    })
}

/// Stored positions are constrained by the schema; anything else is corruption.
fn decode_position(raw: String) -> Result<Position, QueryError> {
    raw.parse()
        .map_err(|err: ffdb_core::UnknownPosition| StoreError::Corrupt(err.to_string()).into())
}

fn player_row(row: &SqliteRow) -> Result<PlayerRow, QueryError> {
    Ok(PlayerRow {
        player_id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        season: row.try_get("season")?,
        name: row.try_get("name")?,
        position: decode_position(row.try_get("position")?)?,
        nfl_team: row.try_get("nfl_team")?,
        injury_status: row.try_get("injury_status")?,
        fantasy_score: row.try_get("fantasy_score")?,
    })
}

fn draft_pick_row(row: &SqliteRow) -> Result<DraftPickRow, QueryError> {
    let position: Option<String> = row.try_get("position")?;
    Ok(DraftPickRow {
        pick_id: row.try_get("id")?,
        season: row.try_get("season")?,
        overall_pick_number: row.try_get("overall_pick_number")?,
        round: row.try_get("round")?,
        round_pick: row.try_get("round_pick")?,
        keeper: row.try_get("keeper")?,
        auto_draft_type: row.try_get("auto_draft_type")?,
        fantasy_team_external_id: row.try_get("fantasy_team_external_id")?,
        fantasy_team: row.try_get("fantasy_team")?,
        player_external_id: row.try_get("player_external_id")?,
        player_name: row.try_get("player_name")?,
        position: position.map(decode_position).transpose()?,
        nfl_team: row.try_get("nfl_team")?,
        fantasy_score: row.try_get("fantasy_score")?,
        pending: row.try_get::<i64, _>("pending")? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use ffdb_adapters::{Dialect, SourceClient, StaticFileSource};
    use ffdb_core::{EntityKind, NflTeamDraft, PlayerDraft, RecordRef};
    use ffdb_sync::{IngestionPipeline, SourceSet};
    use tempfile::tempdir;

    async fn empty_layer(dir: &std::path::Path) -> (Store, QueryLayer) {
        let store = Store::open(dir.join("ffdb.sqlite")).await.expect("open");
        store.ensure_schema().await.expect("schema");
        (store.clone(), QueryLayer::new(store))
    }

    async fn seeded_layer(dir: &std::path::Path) -> QueryLayer {
        let (store, layer) = empty_layer(dir).await;
        let fixtures = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/canonical");
        let file = |name: &str| -> Arc<dyn SourceClient> {
            Arc::new(StaticFileSource::new(fixtures.join(name), Dialect::Canonical))
        };
        let sources = SourceSet::new()
            .with(EntityKind::NflTeam, file("nfl_teams.json"))
            .with(EntityKind::FantasyTeam, file("fantasy_teams.json"))
            .with(EntityKind::Player, file("players.json"))
            .with(EntityKind::DraftPick, file("draft_picks.json"));
        IngestionPipeline::new(store, sources, 2024)
            .run_once()
            .await
            .expect("seed run");
        layer
    }

    #[tokio::test]
    async fn wide_receiver_query_returns_the_linked_player() {
        let dir = tempdir().expect("tempdir");
        let (store, layer) = empty_layer(dir.path()).await;
        let tb = store
            .upsert_nfl_team(&NflTeamDraft {
                origin: RecordRef::new("test", "TB"),
                external_id: "TB".to_string(),
                name: "Buccaneers".to_string(),
                abbreviation: "TB".to_string(),
                location: None,
                bye_week: None,
            })
            .await
            .expect("team");
        store
            .upsert_player(
                &PlayerDraft {
                    origin: RecordRef::new("test", "P1"),
                    external_id: "P1".to_string(),
                    season: 2024,
                    name: "Mike Evans".to_string(),
                    position: Position::Wr,
                    team_external_id: Some("TB".to_string()),
                    injury_status: None,
                    fantasy_score: 250.5,
                },
                Some(tb.id),
            )
            .await
            .expect("player");

        let rows = layer.players_by_position(2024, "WR").await.expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Mike Evans");
        assert_eq!(rows[0].fantasy_score, 250.5);
        assert_eq!(rows[0].nfl_team.as_deref(), Some("TB"));

        assert!(layer.players_by_position(2023, "WR").await.expect("query").is_empty());
        assert!(layer.players_by_position(2024, "QB").await.expect("query").is_empty());
    }

    #[tokio::test]
    async fn malformed_parameters_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let (_, layer) = empty_layer(dir.path()).await;

        let err = layer.players_by_position(2024, "LB").await.expect_err("position");
        assert!(matches!(err, QueryError::InvalidParameter { name: "position", .. }));
        let err = layer.top_players(2024, None, 0).await.expect_err("limit");
        assert!(matches!(err, QueryError::InvalidParameter { name: "limit", .. }));
        let err = layer.draft_board(-1).await.expect_err("season");
        assert!(matches!(err, QueryError::InvalidParameter { name: "season", .. }));
    }

    #[tokio::test]
    async fn fantasy_team_picks_come_back_in_draft_order() {
        let dir = tempdir().expect("tempdir");
        let layer = seeded_layer(dir.path()).await;

        let picks = layer
            .draft_picks_for_fantasy_team(2024, "2")
            .await
            .expect("picks");
        let order: Vec<_> = picks.iter().map(|p| p.overall_pick_number).collect();
        assert_eq!(order, [2, 3]);
        assert_eq!(picks[0].player_name.as_deref(), Some("Mike Evans"));
        assert_eq!(picks[0].nfl_team.as_deref(), Some("TB"));
        assert!(picks[1].keeper);

        assert!(layer
            .draft_picks_for_fantasy_team(2024, "99")
            .await
            .expect("unknown team")
            .is_empty());
    }

    #[tokio::test]
    async fn draft_board_includes_pending_picks() {
        let dir = tempdir().expect("tempdir");
        let layer = seeded_layer(dir.path()).await;

        let board = layer.draft_board(2024).await.expect("board");
        assert_eq!(board.len(), 4);
        let pending: Vec<_> = board.iter().filter(|p| p.pending).collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].overall_pick_number, 4);
        assert_eq!(pending[0].player_name, None);
        assert_eq!(pending[0].fantasy_team.as_deref(), Some("Gridiron Gurus"));
    }

    #[tokio::test]
    async fn aggregates_follow_surrogate_links() {
        let dir = tempdir().expect("tempdir");
        let layer = seeded_layer(dir.path()).await;

        let by_round = layer.position_draft_summary(2024).await.expect("summary");
        let round_one: Vec<_> = by_round.iter().filter(|r| r.round == Some(1)).collect();
        assert_eq!(round_one.len(), 2);
        assert!(round_one.iter().all(|r| r.picks == 1));

        let distribution = layer.nfl_team_draft_distribution(2024).await.expect("distribution");
        let abbreviations: Vec<_> = distribution.iter().map(|r| r.abbreviation.as_str()).collect();
        assert_eq!(abbreviations, ["KC", "TB"], "P3's team never resolved");

        let top = layer.top_players(2024, None, 2).await.expect("top");
        assert_eq!(top[0].name, "Patrick Mahomes");
        assert_eq!(top.len(), 2);

        let standings = layer.fantasy_standings(2024).await.expect("standings");
        assert_eq!(standings[0].name, "Gridiron Gurus");
        assert_eq!(standings[0].picks, 2);
    }

    #[tokio::test]
    async fn keeper_and_auto_draft_picks_are_told_apart() {
        let dir = tempdir().expect("tempdir");
        let layer = seeded_layer(dir.path()).await;

        let keepers = layer.keeper_picks(2024).await.expect("keepers");
        assert_eq!(keepers.len(), 1);
        assert_eq!(keepers[0].overall_pick_number, 3);
        assert_eq!(keepers[0].player_name.as_deref(), Some("Breece Hall"));
        assert_eq!(keepers[0].fantasy_team.as_deref(), Some("Mile High Maniacs"));

        let auto = layer.auto_draft_summary(2024).await.expect("auto draft");
        let groups: Vec<_> = auto
            .iter()
            .map(|r| (r.draft_type.as_str(), r.position, r.picks))
            .collect();
        assert_eq!(
            groups,
            [
                ("auto", Position::Wr, 1),
                ("manual", Position::Qb, 1),
                ("manual", Position::Rb, 1)
            ]
        );
        assert_eq!(auto[0].average_pick, 2.0);
    }

    #[tokio::test]
    async fn pick_value_shares_add_up_per_round() {
        let dir = tempdir().expect("tempdir");
        let layer = seeded_layer(dir.path()).await;

        let value = layer.pick_value_by_round(2024).await.expect("pick value");
        let round_one: Vec<_> = value.iter().filter(|r| r.round == Some(1)).collect();
        assert_eq!(round_one.len(), 2);
        assert!(round_one.iter().all(|r| r.round_share == 50.0));

        let round_two: Vec<_> = value.iter().filter(|r| r.round == Some(2)).collect();
        assert_eq!(round_two.len(), 1, "the pending pick has no position");
        assert_eq!(round_two[0].position, Position::Rb);
        assert_eq!(round_two[0].round_share, 100.0);
        assert_eq!((round_two[0].earliest_pick, round_two[0].latest_pick), (3, 3));
    }

    #[tokio::test]
    async fn games_come_back_by_week_with_team_names() {
        let dir = tempdir().expect("tempdir");
        let layer = seeded_layer(dir.path()).await;

        let all = layer.games_by_week(2024, None).await.expect("games");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].week, 9);
        assert_eq!(all[0].home_team.as_deref(), Some("KC"));
        assert_eq!(all[0].away_team_name.as_deref(), Some("Buccaneers"));
        assert!(!all[0].pending);

        assert_eq!(layer.games_by_week(2024, Some(9)).await.expect("week 9").len(), 1);
        assert!(layer.games_by_week(2024, Some(1)).await.expect("week 1").is_empty());
        let err = layer.games_by_week(2024, Some(0)).await.expect_err("week");
        assert!(matches!(err, QueryError::InvalidParameter { name: "week", .. }));
    }

    #[tokio::test]
    async fn summary_counts_rows_and_pending_picks() {
        let dir = tempdir().expect("tempdir");
        let layer = seeded_layer(dir.path()).await;

        let summary = layer.database_summary().await.expect("summary");
        assert_eq!(summary.table_counts["players"], 4);
        assert_eq!(summary.table_counts["games"], 1);
        assert_eq!(summary.seasons, [2024]);
        assert_eq!(summary.pending_draft_picks, 1);
        assert_eq!(
            summary.last_run.map(|r| r.status).as_deref(),
            Some("completed_with_issues")
        );
    }
}
