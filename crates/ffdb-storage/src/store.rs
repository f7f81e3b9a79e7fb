//! Canonical store: one SQLite file, one connection per ingestion run.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ffdb_core::{
    DraftPick, DraftPickDraft, FantasyTeam, FantasyTeamDraft, Game, GameDraft, NflTeam,
    NflTeamDraft, Player, PlayerDraft, Position, Standings,
};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::schema::{self, CANONICAL_TABLES};
use crate::{SchemaError, StoreError, UpsertAction, Upserted};

/// Surrogate keys a draft pick links to; `None` marks the link as pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PickRefs {
    pub fantasy_team_id: Option<Uuid>,
    pub player_id: Option<Uuid>,
}

/// Surrogate keys of a game's home and away teams; `None` leaves that side pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GameRefs {
    pub home_team_id: Option<Uuid>,
    pub away_team_id: Option<Uuid>,
}

/// One row of the `ingestion_runs` ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub season: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: String,
    pub report_json: String,
}

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
}

impl Store {
    /// Open (creating if needed) the database file. The pool holds a single
    /// connection: a run has exclusive use of the store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|source| StoreError::Open {
                path: path.display().to_string(),
                source,
            })?;

        info!(path = %path.display(), "store opened");
        Ok(Self { pool, path })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn ensure_schema(&self) -> Result<(), SchemaError> {
        schema::ensure_schema(&self.pool).await
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    pub async fn table_counts(&self) -> Result<BTreeMap<String, i64>, StoreError> {
        let mut counts = BTreeMap::new();
        for table in CANONICAL_TABLES {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
            counts.insert(table.to_string(), count);
        }
        Ok(counts)
    }

    /// Delete every canonical row. The run ledger is kept.
    pub async fn reset(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for table in CANONICAL_TABLES.iter().rev() {
            let sql = format!("DELETE FROM {table}");
            let deleted = sqlx::query(&sql).execute(&mut *tx).await?.rows_affected();
            debug!(table, deleted, "table cleared");
        }
        tx.commit().await?;
        warn!(path = %self.path.display(), "canonical tables reset");
        Ok(())
    }

    pub async fn upsert_nfl_team(&self, draft: &NflTeamDraft) -> Result<Upserted, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let existing = sqlx::query(
            "SELECT id, name, abbreviation, location, bye_week FROM nfl_teams WHERE external_id = ?",
        )
        .bind(&draft.external_id)
        .fetch_optional(&mut *tx)
        .await?;

        let upserted = match existing {
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    r#"
                    INSERT INTO nfl_teams
                        (id, external_id, name, abbreviation, location, bye_week, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(id)
                .bind(&draft.external_id)
                .bind(&draft.name)
                .bind(&draft.abbreviation)
                .bind(&draft.location)
                .bind(draft.bye_week)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                Upserted {
                    id,
                    action: UpsertAction::Inserted,
                }
            }
            Some(row) => {
                let id: Uuid = row.try_get("id")?;
                let unchanged = row.try_get::<String, _>("name")? == draft.name
                    && row.try_get::<String, _>("abbreviation")? == draft.abbreviation
                    && row.try_get::<Option<String>, _>("location")? == draft.location
                    && row.try_get::<Option<i32>, _>("bye_week")? == draft.bye_week;
                if unchanged {
                    Upserted {
                        id,
                        action: UpsertAction::Unchanged,
                    }
                } else {
                    sqlx::query(
                        r#"
                        UPDATE nfl_teams
                           SET name = ?, abbreviation = ?, location = ?, bye_week = ?, updated_at = ?
                         WHERE id = ?
                        "#,
                    )
                    .bind(&draft.name)
                    .bind(&draft.abbreviation)
                    .bind(&draft.location)
                    .bind(draft.bye_week)
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    Upserted {
                        id,
                        action: UpsertAction::Updated,
                    }
                }
            }
        };

        tx.commit().await?;
        Ok(upserted)
    }

    pub async fn upsert_fantasy_team(&self, draft: &FantasyTeamDraft) -> Result<Upserted, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let existing = sqlx::query(
            r#"
            SELECT id, name, owner, wins, losses, ties, points_for, points_against, final_position
              FROM fantasy_teams
             WHERE season = ? AND external_id = ?
            "#,
        )
        .bind(draft.season)
        .bind(&draft.external_id)
        .fetch_optional(&mut *tx)
        .await?;

        let s = &draft.standings;
        let upserted = match existing {
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    r#"
                    INSERT INTO fantasy_teams
                        (id, season, external_id, name, owner, wins, losses, ties,
                         points_for, points_against, final_position, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(id)
                .bind(draft.season)
                .bind(&draft.external_id)
                .bind(&draft.name)
                .bind(&draft.owner)
                .bind(s.wins)
                .bind(s.losses)
                .bind(s.ties)
                .bind(s.points_for)
                .bind(s.points_against)
                .bind(s.final_position)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                Upserted {
                    id,
                    action: UpsertAction::Inserted,
                }
            }
            Some(row) => {
                let id: Uuid = row.try_get("id")?;
                let unchanged = row.try_get::<String, _>("name")? == draft.name
                    && row.try_get::<Option<String>, _>("owner")? == draft.owner
                    && standings_from_row(&row)? == *s;
                if unchanged {
                    Upserted {
                        id,
                        action: UpsertAction::Unchanged,
                    }
                } else {
                    sqlx::query(
                        r#"
                        UPDATE fantasy_teams
                           SET name = ?, owner = ?, wins = ?, losses = ?, ties = ?,
                               points_for = ?, points_against = ?, final_position = ?, updated_at = ?
                         WHERE id = ?
                        "#,
                    )
                    .bind(&draft.name)
                    .bind(&draft.owner)
                    .bind(s.wins)
                    .bind(s.losses)
                    .bind(s.ties)
                    .bind(s.points_for)
                    .bind(s.points_against)
                    .bind(s.final_position)
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    Upserted {
                        id,
                        action: UpsertAction::Updated,
                    }
                }
            }
        };

        tx.commit().await?;
        Ok(upserted)
    }

    /// Upsert by `(season, external_id)`. `nfl_team_id` must already be a
    /// surrogate key from `nfl_teams`, or `None`.
    pub async fn upsert_player(
        &self,
        draft: &PlayerDraft,
        nfl_team_id: Option<Uuid>,
    ) -> Result<Upserted, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let existing = sqlx::query(
            r#"
            SELECT id, name, position, nfl_team_id, injury_status, fantasy_score
              FROM players
             WHERE season = ? AND external_id = ?
            "#,
        )
        .bind(draft.season)
        .bind(&draft.external_id)
        .fetch_optional(&mut *tx)
        .await?;

        let upserted = match existing {
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    r#"
                    INSERT INTO players
                        (id, external_id, season, name, position, nfl_team_id, injury_status,
                         fantasy_score, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(id)
                .bind(&draft.external_id)
                .bind(draft.season)
                .bind(&draft.name)
                .bind(draft.position.as_str())
                .bind(nfl_team_id)
                .bind(&draft.injury_status)
                .bind(draft.fantasy_score)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                Upserted {
                    id,
                    action: UpsertAction::Inserted,
                }
            }
            Some(row) => {
                let id: Uuid = row.try_get("id")?;
                let unchanged = row.try_get::<String, _>("name")? == draft.name
                    && row.try_get::<String, _>("position")? == draft.position.as_str()
                    && row.try_get::<Option<Uuid>, _>("nfl_team_id")? == nfl_team_id
                    && row.try_get::<Option<String>, _>("injury_status")? == draft.injury_status
                    && row.try_get::<f64, _>("fantasy_score")? == draft.fantasy_score;
                if unchanged {
                    Upserted {
                        id,
                        action: UpsertAction::Unchanged,
                    }
                } else {
                    sqlx::query(
                        r#"
                        UPDATE players
                           SET name = ?, position = ?, nfl_team_id = ?, injury_status = ?,
                               fantasy_score = ?, updated_at = ?
                         WHERE id = ?
                        "#,
                    )
                    .bind(&draft.name)
                    .bind(draft.position.as_str())
                    .bind(nfl_team_id)
                    .bind(&draft.injury_status)
                    .bind(draft.fantasy_score)
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    Upserted {
                        id,
                        action: UpsertAction::Updated,
                    }
                }
            }
        };

        tx.commit().await?;
        Ok(upserted)
    }

    /// Upsert by `(season, external_id)`. A side left `None` in `refs` keeps
    /// its source team id in the matching `pending_*` column.
    pub async fn upsert_game(&self, draft: &GameDraft, refs: GameRefs) -> Result<Upserted, StoreError> {
        let pending_home = refs
            .home_team_id
            .is_none()
            .then(|| draft.home_team_external_id.clone());
        let pending_away = refs
            .away_team_id
            .is_none()
            .then(|| draft.away_team_external_id.clone());

        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let existing = sqlx::query(
            r#"
            SELECT id, week, home_team_id, away_team_id, pending_home_team_external_id,
                   pending_away_team_external_id, kickoff, start_time_tbd, stats_official,
                   valid_for_locking
              FROM games
             WHERE season = ? AND external_id = ?
            "#,
        )
        .bind(draft.season)
        .bind(&draft.external_id)
        .fetch_optional(&mut *tx)
        .await?;

        let upserted = match existing {
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    r#"
                    INSERT INTO games
                        (id, season, external_id, week, home_team_id, away_team_id,
                         pending_home_team_external_id, pending_away_team_external_id, kickoff,
                         start_time_tbd, stats_official, valid_for_locking, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(id)
                .bind(draft.season)
                .bind(&draft.external_id)
                .bind(draft.week)
                .bind(refs.home_team_id)
                .bind(refs.away_team_id)
                .bind(&pending_home)
                .bind(&pending_away)
                .bind(draft.kickoff)
                .bind(draft.start_time_tbd)
                .bind(draft.stats_official)
                .bind(draft.valid_for_locking)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                Upserted {
                    id,
                    action: UpsertAction::Inserted,
                }
            }
            Some(row) => {
                let id: Uuid = row.try_get("id")?;
                let unchanged = row.try_get::<i32, _>("week")? == draft.week
                    && row.try_get::<Option<Uuid>, _>("home_team_id")? == refs.home_team_id
                    && row.try_get::<Option<Uuid>, _>("away_team_id")? == refs.away_team_id
                    && row.try_get::<Option<String>, _>("pending_home_team_external_id")?
                        == pending_home
                    && row.try_get::<Option<String>, _>("pending_away_team_external_id")?
                        == pending_away
                    && row.try_get::<Option<DateTime<Utc>>, _>("kickoff")? == draft.kickoff
                    && row.try_get::<bool, _>("start_time_tbd")? == draft.start_time_tbd
                    && row.try_get::<bool, _>("stats_official")? == draft.stats_official
                    && row.try_get::<bool, _>("valid_for_locking")? == draft.valid_for_locking;
                if unchanged {
                    Upserted {
                        id,
                        action: UpsertAction::Unchanged,
                    }
                } else {
                    sqlx::query(
                        r#"
                        UPDATE games
                           SET week = ?, home_team_id = ?, away_team_id = ?,
                               pending_home_team_external_id = ?,
                               pending_away_team_external_id = ?, kickoff = ?,
                               start_time_tbd = ?, stats_official = ?, valid_for_locking = ?,
                               updated_at = ?
                         WHERE id = ?
                        "#,
                    )
                    .bind(draft.week)
                    .bind(refs.home_team_id)
                    .bind(refs.away_team_id)
                    .bind(&pending_home)
                    .bind(&pending_away)
                    .bind(draft.kickoff)
                    .bind(draft.start_time_tbd)
                    .bind(draft.stats_official)
                    .bind(draft.valid_for_locking)
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    Upserted {
                        id,
                        action: UpsertAction::Updated,
                    }
                }
            }
        };

        tx.commit().await?;
        Ok(upserted)
    }

    /// Upsert by `(season, overall_pick_number)`. Links left `None` in `refs`
    /// are written as pending, keeping the source id in the `pending_*` column.
    pub async fn upsert_draft_pick(
        &self,
        draft: &DraftPickDraft,
        refs: PickRefs,
    ) -> Result<Upserted, StoreError> {
        let pending_fantasy_team = refs
            .fantasy_team_id
            .is_none()
            .then(|| draft.fantasy_team_external_id.clone());
        let pending_player = refs
            .player_id
            .is_none()
            .then(|| draft.player_external_id.clone());

        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let existing = sqlx::query(
            r#"
            SELECT id, round, round_pick, keeper, auto_draft_type, fantasy_team_id, player_id,
                   pending_fantasy_team_external_id, pending_player_external_id
              FROM draft_picks
             WHERE season = ? AND overall_pick_number = ?
            "#,
        )
        .bind(draft.season)
        .bind(draft.overall_pick_number)
        .fetch_optional(&mut *tx)
        .await?;

        let upserted = match existing {
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    r#"
                    INSERT INTO draft_picks
                        (id, season, overall_pick_number, round, round_pick, keeper,
                         auto_draft_type, fantasy_team_id, player_id,
                         pending_fantasy_team_external_id, pending_player_external_id,
                         created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(id)
                .bind(draft.season)
                .bind(draft.overall_pick_number)
                .bind(draft.round)
                .bind(draft.round_pick)
                .bind(draft.keeper)
                .bind(draft.auto_draft_type)
                .bind(refs.fantasy_team_id)
                .bind(refs.player_id)
                .bind(&pending_fantasy_team)
                .bind(&pending_player)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                Upserted {
                    id,
                    action: UpsertAction::Inserted,
                }
            }
            Some(row) => {
                let id: Uuid = row.try_get("id")?;
                let unchanged = row.try_get::<Option<i32>, _>("round")? == draft.round
                    && row.try_get::<Option<i32>, _>("round_pick")? == draft.round_pick
                    && row.try_get::<bool, _>("keeper")? == draft.keeper
                    && row.try_get::<i32, _>("auto_draft_type")? == draft.auto_draft_type
                    && row.try_get::<Option<Uuid>, _>("fantasy_team_id")? == refs.fantasy_team_id
                    && row.try_get::<Option<Uuid>, _>("player_id")? == refs.player_id
                    && row.try_get::<Option<String>, _>("pending_fantasy_team_external_id")?
                        == pending_fantasy_team
                    && row.try_get::<Option<String>, _>("pending_player_external_id")?
                        == pending_player;
                if unchanged {
                    Upserted {
                        id,
                        action: UpsertAction::Unchanged,
                    }
                } else {
                    sqlx::query(
                        r#"
                        UPDATE draft_picks
                           SET round = ?, round_pick = ?, keeper = ?, auto_draft_type = ?,
                               fantasy_team_id = ?, player_id = ?,
                               pending_fantasy_team_external_id = ?,
                               pending_player_external_id = ?, updated_at = ?
                         WHERE id = ?
                        "#,
                    )
                    .bind(draft.round)
                    .bind(draft.round_pick)
                    .bind(draft.keeper)
                    .bind(draft.auto_draft_type)
                    .bind(refs.fantasy_team_id)
                    .bind(refs.player_id)
                    .bind(&pending_fantasy_team)
                    .bind(&pending_player)
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    Upserted {
                        id,
                        action: UpsertAction::Updated,
                    }
                }
            }
        };

        tx.commit().await?;
        Ok(upserted)
    }

    /// Fill in whichever links of a pending pick `refs` now provides. Links
    /// already resolved on the stored row are never cleared.
    pub async fn relink_draft_pick(
        &self,
        pick: &DraftPick,
        refs: PickRefs,
    ) -> Result<UpsertAction, StoreError> {
        let fantasy_team_id = pick.fantasy_team_id.or(refs.fantasy_team_id);
        let player_id = pick.player_id.or(refs.player_id);
        if fantasy_team_id == pick.fantasy_team_id && player_id == pick.player_id {
            return Ok(UpsertAction::Unchanged);
        }

        let pending_fantasy_team = fantasy_team_id
            .is_none()
            .then(|| pick.pending_fantasy_team_external_id.clone())
            .flatten();
        let pending_player = player_id
            .is_none()
            .then(|| pick.pending_player_external_id.clone())
            .flatten();

        sqlx::query(
            r#"
            UPDATE draft_picks
               SET fantasy_team_id = ?, player_id = ?, pending_fantasy_team_external_id = ?,
                   pending_player_external_id = ?, updated_at = ?
             WHERE id = ?
            "#,
        )
        .bind(fantasy_team_id)
        .bind(player_id)
        .bind(&pending_fantasy_team)
        .bind(&pending_player)
        .bind(Utc::now())
        .bind(pick.id)
        .execute(&self.pool)
        .await?;
        Ok(UpsertAction::Updated)
    }

    /// External NFL team id -> surrogate key, read from committed rows.
    pub async fn nfl_team_keys(&self) -> Result<HashMap<String, Uuid>, StoreError> {
        let rows = sqlx::query("SELECT external_id, id FROM nfl_teams")
            .fetch_all(&self.pool)
            .await?;
        key_map(&rows)
    }

    pub async fn fantasy_team_keys(&self, season: i32) -> Result<HashMap<String, Uuid>, StoreError> {
        let rows = sqlx::query("SELECT external_id, id FROM fantasy_teams WHERE season = ?")
            .bind(season)
            .fetch_all(&self.pool)
            .await?;
        key_map(&rows)
    }

    pub async fn player_keys(&self, season: i32) -> Result<HashMap<String, Uuid>, StoreError> {
        let rows = sqlx::query("SELECT external_id, id FROM players WHERE season = ?")
            .bind(season)
            .fetch_all(&self.pool)
            .await?;
        key_map(&rows)
    }

    pub async fn nfl_team(&self, external_id: &str) -> Result<Option<NflTeam>, StoreError> {
        sqlx::query("SELECT * FROM nfl_teams WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(nfl_team_from_row)
            .transpose()
    }

    pub async fn nfl_team_by_id(&self, id: Uuid) -> Result<Option<NflTeam>, StoreError> {
        sqlx::query("SELECT * FROM nfl_teams WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(nfl_team_from_row)
            .transpose()
    }

    pub async fn game(&self, season: i32, external_id: &str) -> Result<Option<Game>, StoreError> {
        sqlx::query("SELECT * FROM games WHERE season = ? AND external_id = ?")
            .bind(season)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(game_from_row)
            .transpose()
    }

    pub async fn games(&self, season: i32) -> Result<Vec<Game>, StoreError> {
        sqlx::query("SELECT * FROM games WHERE season = ? ORDER BY week, kickoff, external_id")
            .bind(season)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(game_from_row)
            .collect()
    }

    pub async fn fantasy_team(
        &self,
        season: i32,
        external_id: &str,
    ) -> Result<Option<FantasyTeam>, StoreError> {
        sqlx::query("SELECT * FROM fantasy_teams WHERE season = ? AND external_id = ?")
            .bind(season)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(fantasy_team_from_row)
            .transpose()
    }

    pub async fn player(&self, season: i32, external_id: &str) -> Result<Option<Player>, StoreError> {
        sqlx::query("SELECT * FROM players WHERE season = ? AND external_id = ?")
            .bind(season)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(player_from_row)
            .transpose()
    }

    pub async fn players(&self, season: i32) -> Result<Vec<Player>, StoreError> {
        sqlx::query("SELECT * FROM players WHERE season = ? ORDER BY external_id")
            .bind(season)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(player_from_row)
            .collect()
    }

    pub async fn draft_pick(
        &self,
        season: i32,
        overall_pick_number: i32,
    ) -> Result<Option<DraftPick>, StoreError> {
        sqlx::query("SELECT * FROM draft_picks WHERE season = ? AND overall_pick_number = ?")
            .bind(season)
            .bind(overall_pick_number)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(draft_pick_from_row)
            .transpose()
    }

    pub async fn pending_draft_picks(&self, season: i32) -> Result<Vec<DraftPick>, StoreError> {
        sqlx::query(
            r#"
            SELECT * FROM draft_picks
             WHERE season = ? AND (player_id IS NULL OR fantasy_team_id IS NULL)
             ORDER BY overall_pick_number
            "#,
        )
        .bind(season)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(draft_pick_from_row)
        .collect()
    }

    pub async fn record_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_runs (id, season, started_at, finished_at, status, report_json)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.run_id)
        .bind(run.season)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.status)
        .bind(&run.report_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, season, started_at, finished_at, status, report_json
              FROM ingestion_runs
             ORDER BY started_at DESC
             LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RunRecord {
                    run_id: row.try_get("id")?,
                    season: row.try_get("season")?,
                    started_at: row.try_get("started_at")?,
                    finished_at: row.try_get("finished_at")?,
                    status: row.try_get("status")?,
                    report_json: row.try_get("report_json")?,
                })
            })
            .collect()
    }
}

fn key_map(rows: &[SqliteRow]) -> Result<HashMap<String, Uuid>, StoreError> {
    rows.iter()
        .map(|row| -> Result<(String, Uuid), StoreError> {
            Ok((row.try_get("external_id")?, row.try_get("id")?))
        })
        .collect()
}

fn standings_from_row(row: &SqliteRow) -> Result<Standings, StoreError> {
    Ok(Standings {
        wins: row.try_get("wins")?,
        losses: row.try_get("losses")?,
        ties: row.try_get("ties")?,
        points_for: row.try_get("points_for")?,
        points_against: row.try_get("points_against")?,
        final_position: row.try_get("final_position")?,
    })
}

fn nfl_team_from_row(row: &SqliteRow) -> Result<NflTeam, StoreError> {
    Ok(NflTeam {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        name: row.try_get("name")?,
        abbreviation: row.try_get("abbreviation")?,
        location: row.try_get("location")?,
        bye_week: row.try_get("bye_week")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn game_from_row(row: &SqliteRow) -> Result<Game, StoreError> {
    Ok(Game {
        id: row.try_get("id")?,
        season: row.try_get("season")?,
        external_id: row.try_get("external_id")?,
        week: row.try_get("week")?,
        home_team_id: row.try_get("home_team_id")?,
        away_team_id: row.try_get("away_team_id")?,
        pending_home_team_external_id: row.try_get("pending_home_team_external_id")?,
        pending_away_team_external_id: row.try_get("pending_away_team_external_id")?,
        kickoff: row.try_get("kickoff")?,
        start_time_tbd: row.try_get("start_time_tbd")?,
        stats_official: row.try_get("stats_official")?,
        valid_for_locking: row.try_get("valid_for_locking")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn fantasy_team_from_row(row: &SqliteRow) -> Result<FantasyTeam, StoreError> {
    Ok(FantasyTeam {
        id: row.try_get("id")?,
        season: row.try_get("season")?,
        external_id: row.try_get("external_id")?,
        name: row.try_get("name")?,
        owner: row.try_get("owner")?,
        standings: standings_from_row(row)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn player_from_row(row: &SqliteRow) -> Result<Player, StoreError> {
    let position: String = row.try_get("position")?;
    let position = position
        .parse::<Position>()
        .map_err(|err| StoreError::Corrupt(err.to_string()))?;
    Ok(Player {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        season: row.try_get("season")?,
        name: row.try_get("name")?,
        position,
        nfl_team_id: row.try_get("nfl_team_id")?,
        injury_status: row.try_get("injury_status")?,
        fantasy_score: row.try_get("fantasy_score")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn draft_pick_from_row(row: &SqliteRow) -> Result<DraftPick, StoreError> {
    Ok(DraftPick {
        id: row.try_get("id")?,
        season: row.try_get("season")?,
        overall_pick_number: row.try_get("overall_pick_number")?,
        round: row.try_get("round")?,
        round_pick: row.try_get("round_pick")?,
        keeper: row.try_get("keeper")?,
        auto_draft_type: row.try_get("auto_draft_type")?,
        fantasy_team_id: row.try_get("fantasy_team_id")?,
        player_id: row.try_get("player_id")?,
        pending_fantasy_team_external_id: row.try_get("pending_fantasy_team_external_id")?,
        pending_player_external_id: row.try_get("pending_player_external_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffdb_core::RecordRef;
    use tempfile::tempdir;

    async fn fresh_store(dir: &Path) -> Store {
        let store = Store::open(dir.join("ffdb.sqlite")).await.expect("open store");
        store.ensure_schema().await.expect("schema");
        store
    }

    fn team(external_id: &str, name: &str) -> NflTeamDraft {
        NflTeamDraft {
            origin: RecordRef::new("test", external_id),
            external_id: external_id.to_string(),
            name: name.to_string(),
            abbreviation: external_id.to_string(),
            location: None,
            bye_week: None,
        }
    }

    fn player(external_id: &str, team: Option<&str>) -> PlayerDraft {
        PlayerDraft {
            origin: RecordRef::new("test", external_id),
            external_id: external_id.to_string(),
            season: 2024,
            name: format!("Player {external_id}"),
            position: Position::Wr,
            team_external_id: team.map(str::to_string),
            injury_status: None,
            fantasy_score: 100.0,
        }
    }

    fn pick(overall: i32, player: &str) -> DraftPickDraft {
        DraftPickDraft {
            origin: RecordRef::new("test", overall.to_string()),
            season: 2024,
            overall_pick_number: overall,
            round: Some(1),
            round_pick: Some(overall),
            keeper: false,
            auto_draft_type: 0,
            fantasy_team_external_id: "7".to_string(),
            player_external_id: player.to_string(),
        }
    }

    #[tokio::test]
    async fn ensure_schema_is_repeatable_and_keeps_rows() {
        let dir = tempdir().expect("tempdir");
        let store = fresh_store(dir.path()).await;
        store.upsert_nfl_team(&team("TB", "Buccaneers")).await.expect("upsert");

        store.ensure_schema().await.expect("second ensure");
        store.ensure_schema().await.expect("third ensure");

        let counts = store.table_counts().await.expect("counts");
        assert_eq!(counts["nfl_teams"], 1);
        assert_eq!(counts["players"], 0);
    }

    #[tokio::test]
    async fn duplicate_legacy_rows_surface_as_constraint_conflict() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("legacy.sqlite")).await.expect("open");
        sqlx::query(
            r#"
            CREATE TABLE nfl_teams (
                id BLOB PRIMARY KEY, external_id TEXT, name TEXT, abbreviation TEXT,
                location TEXT, bye_week INTEGER, created_at TEXT, updated_at TEXT
            )
            "#,
        )
        .execute(store.pool())
        .await
        .expect("legacy table");
        sqlx::query(
            "INSERT INTO nfl_teams (id, external_id, name, abbreviation) VALUES (x'01', 'TB', 'A', 'TB'), (x'02', 'TB', 'B', 'TB')",
        )
        .execute(store.pool())
        .await
        .expect("legacy rows");

        let err = store.ensure_schema().await.expect_err("conflict");
        assert!(
            matches!(err, SchemaError::ConstraintConflict { table: "nfl_teams", .. }),
            "unexpected error: {err}"
        );
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nfl_teams")
            .fetch_one(store.pool())
            .await
            .expect("count");
        assert_eq!(count, 2, "existing rows must not be touched");
    }

    #[tokio::test]
    async fn table_missing_columns_is_incompatible() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("odd.sqlite")).await.expect("open");
        sqlx::query("CREATE TABLE players (id BLOB PRIMARY KEY, name TEXT)")
            .execute(store.pool())
            .await
            .expect("odd table");

        let err = store.ensure_schema().await.expect_err("incompatible");
        assert!(matches!(
            err,
            SchemaError::IncompatibleTable {
                table: "players",
                column: "external_id"
            }
        ));
    }

    #[tokio::test]
    async fn table_missing_a_written_column_is_incompatible() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("old.sqlite")).await.expect("open");
        sqlx::query(
            r#"
            CREATE TABLE draft_picks (
                id BLOB PRIMARY KEY NOT NULL, season INTEGER NOT NULL,
                overall_pick_number INTEGER NOT NULL, round INTEGER, round_pick INTEGER,
                keeper INTEGER NOT NULL DEFAULT 0,
                fantasy_team_id BLOB REFERENCES fantasy_teams (id),
                player_id BLOB REFERENCES players (id),
                pending_fantasy_team_external_id TEXT, pending_player_external_id TEXT,
                created_at TEXT NOT NULL, updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(store.pool())
        .await
        .expect("table without auto_draft_type");

        let err = store.ensure_schema().await.expect_err("incompatible");
        assert!(
            matches!(
                err,
                SchemaError::IncompatibleTable {
                    table: "draft_picks",
                    column: "auto_draft_type"
                }
            ),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn reference_column_without_foreign_key_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("loose.sqlite")).await.expect("open");
        sqlx::query(
            r#"
            CREATE TABLE players (
                id BLOB PRIMARY KEY NOT NULL, external_id TEXT NOT NULL, season INTEGER NOT NULL,
                name TEXT NOT NULL, position TEXT NOT NULL, nfl_team_id BLOB,
                injury_status TEXT, fantasy_score REAL NOT NULL DEFAULT 0.0,
                created_at TEXT NOT NULL, updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(store.pool())
        .await
        .expect("table without references");

        let err = store.ensure_schema().await.expect_err("missing foreign key");
        assert!(
            matches!(
                err,
                SchemaError::MissingForeignKey {
                    table: "players",
                    column: "nfl_team_id",
                    references: "nfl_teams"
                }
            ),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn team_upsert_updates_in_place_and_keeps_surrogate_key() {
        let dir = tempdir().expect("tempdir");
        let store = fresh_store(dir.path()).await;

        let first = store.upsert_nfl_team(&team("TB", "Buccaneers")).await.unwrap();
        let again = store.upsert_nfl_team(&team("TB", "Buccaneers")).await.unwrap();
        let renamed = store
            .upsert_nfl_team(&team("TB", "Tampa Bay Buccaneers"))
            .await
            .unwrap();

        assert_eq!(first.action, UpsertAction::Inserted);
        assert_eq!(again, Upserted { id: first.id, action: UpsertAction::Unchanged });
        assert_eq!(renamed, Upserted { id: first.id, action: UpsertAction::Updated });

        let stored = store.nfl_team("TB").await.unwrap().expect("team row");
        assert_eq!(stored.id, first.id);
        assert_eq!(stored.name, "Tampa Bay Buccaneers");
        assert_eq!(store.table_counts().await.unwrap()["nfl_teams"], 1);
    }

    #[tokio::test]
    async fn player_references_team_by_surrogate_key() {
        let dir = tempdir().expect("tempdir");
        let store = fresh_store(dir.path()).await;
        let tb = store.upsert_nfl_team(&team("TB", "Buccaneers")).await.unwrap();

        let inserted = store.upsert_player(&player("P1", Some("TB")), Some(tb.id)).await.unwrap();
        let stored = store.player(2024, "P1").await.unwrap().expect("player row");
        assert_eq!(stored.id, inserted.id);
        assert_eq!(stored.nfl_team_id, Some(tb.id));

        let keys = store.player_keys(2024).await.unwrap();
        assert_eq!(keys.get("P1"), Some(&inserted.id));
        assert!(store.player_keys(2023).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_pick_keeps_source_id_until_relinked() {
        let dir = tempdir().expect("tempdir");
        let store = fresh_store(dir.path()).await;

        let written = store
            .upsert_draft_pick(&pick(1, "P1"), PickRefs::default())
            .await
            .unwrap();
        assert_eq!(written.action, UpsertAction::Inserted);

        let pending = store.pending_draft_picks(2024).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].pending_player_external_id.as_deref(), Some("P1"));
        assert_eq!(pending[0].pending_fantasy_team_external_id.as_deref(), Some("7"));

        let p1 = store.upsert_player(&player("P1", None), None).await.unwrap();
        let action = store
            .relink_draft_pick(
                &pending[0],
                PickRefs {
                    fantasy_team_id: None,
                    player_id: Some(p1.id),
                },
            )
            .await
            .unwrap();
        assert_eq!(action, UpsertAction::Updated);

        let stored = store.draft_pick(2024, 1).await.unwrap().expect("pick row");
        assert_eq!(stored.id, written.id);
        assert_eq!(stored.player_id, Some(p1.id));
        assert_eq!(stored.pending_player_external_id, None);
        assert!(stored.is_pending(), "fantasy team is still unresolved");
    }

    #[tokio::test]
    async fn game_keeps_unknown_side_pending_and_detects_changes() {
        let dir = tempdir().expect("tempdir");
        let store = fresh_store(dir.path()).await;
        let kc = store.upsert_nfl_team(&team("12", "Chiefs")).await.unwrap();

        let mut game = GameDraft {
            origin: RecordRef::new("test", "401671789"),
            season: 2024,
            external_id: "401671789".to_string(),
            week: 9,
            home_team_external_id: "12".to_string(),
            away_team_external_id: "27".to_string(),
            kickoff: DateTime::<Utc>::from_timestamp_millis(1_730_767_500_000),
            start_time_tbd: false,
            stats_official: true,
            valid_for_locking: true,
        };
        let refs = GameRefs {
            home_team_id: Some(kc.id),
            away_team_id: None,
        };
        let first = store.upsert_game(&game, refs).await.unwrap();
        let again = store.upsert_game(&game, refs).await.unwrap();
        assert_eq!(first.action, UpsertAction::Inserted);
        assert_eq!(again, Upserted { id: first.id, action: UpsertAction::Unchanged });

        let stored = store.game(2024, "401671789").await.unwrap().expect("game row");
        assert_eq!(stored.home_team_id, Some(kc.id));
        assert_eq!(stored.pending_away_team_external_id.as_deref(), Some("27"));
        assert_eq!(stored.kickoff, game.kickoff);
        assert!(stored.is_pending());

        game.stats_official = false;
        let changed = store.upsert_game(&game, refs).await.unwrap();
        assert_eq!(changed, Upserted { id: first.id, action: UpsertAction::Updated });
        assert_eq!(store.games(2024).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn auto_draft_type_change_updates_the_pick() {
        let dir = tempdir().expect("tempdir");
        let store = fresh_store(dir.path()).await;
        let manual = store.upsert_draft_pick(&pick(4, "P4"), PickRefs::default()).await.unwrap();

        let auto = DraftPickDraft {
            auto_draft_type: 1,
            ..pick(4, "P4")
        };
        let updated = store.upsert_draft_pick(&auto, PickRefs::default()).await.unwrap();
        assert_eq!(updated, Upserted { id: manual.id, action: UpsertAction::Updated });
        let stored = store.draft_pick(2024, 4).await.unwrap().expect("pick row");
        assert_eq!(stored.auto_draft_type, 1);
    }

    #[tokio::test]
    async fn reset_clears_canonical_tables_only() {
        let dir = tempdir().expect("tempdir");
        let store = fresh_store(dir.path()).await;
        store.upsert_nfl_team(&team("TB", "Buccaneers")).await.unwrap();
        let now = Utc::now();
        store
            .record_run(&RunRecord {
                run_id: Uuid::new_v4(),
                season: 2024,
                started_at: now,
                finished_at: now,
                status: "completed".to_string(),
                report_json: "{}".to_string(),
            })
            .await
            .unwrap();

        store.reset().await.unwrap();

        assert!(store.table_counts().await.unwrap().values().all(|c| *c == 0));
        assert_eq!(store.recent_runs(5).await.unwrap().len(), 1);
    }
}
