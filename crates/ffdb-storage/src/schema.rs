//! Table definitions and the create-if-absent schema manager.
//!
//! Uniqueness is declared through named unique indexes rather than inline
//! table constraints so that a table created by an older build still picks the
//! constraint up, and so that a conflict with existing rows surfaces as a
//! [`SchemaError::ConstraintConflict`] instead of being skipped.

use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::{SchemaError, StoreError};

pub(crate) struct TableSpec {
    pub name: &'static str,
    pub create: &'static str,
    /// Every column the store reads or writes.
    pub required_columns: &'static [&'static str],
    /// `(column, parent table)` pairs that must be declared foreign keys.
    pub foreign_keys: &'static [(&'static str, &'static str)],
}

pub(crate) struct UniqueSpec {
    pub table: &'static str,
    pub index: &'static str,
    pub create: &'static str,
}

/// Canonical tables in dependency order (parents before children).
pub const CANONICAL_TABLES: [&str; 5] = [
    "nfl_teams",
    "games",
    "fantasy_teams",
    "players",
    "draft_picks",
];

pub(crate) const TABLES: [TableSpec; 6] = [
    TableSpec {
        name: "nfl_teams",
        create: r#"
        CREATE TABLE IF NOT EXISTS nfl_teams (
            id BLOB PRIMARY KEY NOT NULL,
            external_id TEXT NOT NULL,
            name TEXT NOT NULL,
            abbreviation TEXT NOT NULL,
            location TEXT,
            bye_week INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        required_columns: &[
            "id",
            "external_id",
            "name",
            "abbreviation",
            "location",
            "bye_week",
            "created_at",
            "updated_at",
        ],
        foreign_keys: &[],
    },
    TableSpec {
        name: "games",
        create: r#"
        CREATE TABLE IF NOT EXISTS games (
            id BLOB PRIMARY KEY NOT NULL,
            season INTEGER NOT NULL,
            external_id TEXT NOT NULL,
            week INTEGER NOT NULL,
            home_team_id BLOB REFERENCES nfl_teams (id),
            away_team_id BLOB REFERENCES nfl_teams (id),
            pending_home_team_external_id TEXT,
            pending_away_team_external_id TEXT,
            kickoff TEXT,
            start_time_tbd INTEGER NOT NULL DEFAULT 0,
            stats_official INTEGER NOT NULL DEFAULT 0,
            valid_for_locking INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        required_columns: &[
            "id",
            "season",
            "external_id",
            "week",
            "home_team_id",
            "away_team_id",
            "pending_home_team_external_id",
            "pending_away_team_external_id",
            "kickoff",
            "start_time_tbd",
            "stats_official",
            "valid_for_locking",
            "created_at",
            "updated_at",
        ],
        foreign_keys: &[("home_team_id", "nfl_teams"), ("away_team_id", "nfl_teams")],
    },
    TableSpec {
        name: "fantasy_teams",
        create: r#"
        CREATE TABLE IF NOT EXISTS fantasy_teams (
            id BLOB PRIMARY KEY NOT NULL,
            season INTEGER NOT NULL,
            external_id TEXT NOT NULL,
            name TEXT NOT NULL,
            owner TEXT,
            wins INTEGER,
            losses INTEGER,
            ties INTEGER,
            points_for REAL,
            points_against REAL,
            final_position INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        required_columns: &[
            "id",
            "season",
            "external_id",
            "name",
            "owner",
            "wins",
            "losses",
            "ties",
            "points_for",
            "points_against",
            "final_position",
            "created_at",
            "updated_at",
        ],
        foreign_keys: &[],
    },
    TableSpec {
        name: "players",
        create: r#"
        CREATE TABLE IF NOT EXISTS players (
            id BLOB PRIMARY KEY NOT NULL,
            external_id TEXT NOT NULL,
            season INTEGER NOT NULL,
            name TEXT NOT NULL,
            position TEXT NOT NULL CHECK (position IN ('QB', 'RB', 'WR', 'TE', 'K', 'DST')),
            nfl_team_id BLOB REFERENCES nfl_teams (id),
            injury_status TEXT,
            fantasy_score REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        required_columns: &[
            "id",
            "external_id",
            "season",
            "name",
            "position",
            "nfl_team_id",
            "injury_status",
            "fantasy_score",
            "created_at",
            "updated_at",
        ],
        foreign_keys: &[("nfl_team_id", "nfl_teams")],
    },
    TableSpec {
        name: "draft_picks",
        create: r#"
        CREATE TABLE IF NOT EXISTS draft_picks (
            id BLOB PRIMARY KEY NOT NULL,
            season INTEGER NOT NULL,
            overall_pick_number INTEGER NOT NULL,
            round INTEGER,
            round_pick INTEGER,
            keeper INTEGER NOT NULL DEFAULT 0,
            auto_draft_type INTEGER NOT NULL DEFAULT 0,
            fantasy_team_id BLOB REFERENCES fantasy_teams (id),
            player_id BLOB REFERENCES players (id),
            pending_fantasy_team_external_id TEXT,
            pending_player_external_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        required_columns: &[
            "id",
            "season",
            "overall_pick_number",
            "round",
            "round_pick",
            "keeper",
            "auto_draft_type",
            "fantasy_team_id",
            "player_id",
            "pending_fantasy_team_external_id",
            "pending_player_external_id",
            "created_at",
            "updated_at",
        ],
        foreign_keys: &[("fantasy_team_id", "fantasy_teams"), ("player_id", "players")],
    },
    TableSpec {
        name: "ingestion_runs",
        create: r#"
        CREATE TABLE IF NOT EXISTS ingestion_runs (
            id BLOB PRIMARY KEY NOT NULL,
            season INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            status TEXT NOT NULL,
            report_json TEXT NOT NULL
        )
        "#,
        required_columns: &["id", "season", "started_at", "finished_at", "status", "report_json"],
        foreign_keys: &[],
    },
];

pub(crate) const UNIQUE_INDEXES: [UniqueSpec; 5] = [
    UniqueSpec {
        table: "nfl_teams",
        index: "ux_nfl_teams_external_id",
        create: "CREATE UNIQUE INDEX IF NOT EXISTS ux_nfl_teams_external_id ON nfl_teams (external_id)",
    },
    UniqueSpec {
        table: "games",
        index: "ux_games_season_external_id",
        create: "CREATE UNIQUE INDEX IF NOT EXISTS ux_games_season_external_id ON games (season, external_id)",
    },
    UniqueSpec {
        table: "fantasy_teams",
        index: "ux_fantasy_teams_season_external_id",
        create: "CREATE UNIQUE INDEX IF NOT EXISTS ux_fantasy_teams_season_external_id ON fantasy_teams (season, external_id)",
    },
    UniqueSpec {
        table: "players",
        index: "ux_players_season_external_id",
        create: "CREATE UNIQUE INDEX IF NOT EXISTS ux_players_season_external_id ON players (season, external_id)",
    },
    UniqueSpec {
        table: "draft_picks",
        index: "ux_draft_picks_season_overall",
        create: "CREATE UNIQUE INDEX IF NOT EXISTS ux_draft_picks_season_overall ON draft_picks (season, overall_pick_number)",
    },
];

const LOOKUP_INDEXES: [&str; 6] = [
    "CREATE INDEX IF NOT EXISTS ix_games_season_week ON games (season, week)",
    "CREATE INDEX IF NOT EXISTS ix_players_nfl_team ON players (nfl_team_id)",
    "CREATE INDEX IF NOT EXISTS ix_players_season_position ON players (season, position)",
    "CREATE INDEX IF NOT EXISTS ix_draft_picks_player ON draft_picks (player_id)",
    "CREATE INDEX IF NOT EXISTS ix_draft_picks_fantasy_team ON draft_picks (fantasy_team_id)",
    "CREATE INDEX IF NOT EXISTS ix_draft_picks_season_round ON draft_picks (season, round, round_pick)",
];

/// Create every table, constraint and index that is missing. Never drops or
/// rewrites existing rows.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), SchemaError> {
    for table in &TABLES {
        sqlx::query(table.create)
            .execute(pool)
            .await
            .map_err(StoreError::from)?;
        verify_columns(pool, table).await?;
        verify_foreign_keys(pool, table).await?;
    }

    for unique in &UNIQUE_INDEXES {
        match sqlx::query(unique.create).execute(pool).await {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) => {
                return Err(SchemaError::ConstraintConflict {
                    table: unique.table,
                    constraint: unique.index,
                    detail: db_err.message().to_string(),
                });
            }
            Err(err) => return Err(StoreError::from(err).into()),
        }
    }

    for ddl in LOOKUP_INDEXES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(StoreError::from)?;
    }

    info!(tables = TABLES.len(), "schema ensured");
    Ok(())
}

async fn verify_columns(pool: &SqlitePool, table: &TableSpec) -> Result<(), SchemaError> {
    let pragma = format!("PRAGMA table_info({})", table.name);
    let rows = sqlx::query(&pragma)
        .fetch_all(pool)
        .await
        .map_err(StoreError::from)?;
    let present = rows
        .iter()
        .map(|row| row.try_get::<String, _>("name"))
        .collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::from)?;

    for &column in table.required_columns {
        if !present.iter().any(|p| p.as_str() == column) {
            return Err(SchemaError::IncompatibleTable {
                table: table.name,
                column,
            });
        }
    }
    debug!(table = table.name, columns = present.len(), "table shape verified");
    Ok(())
}

async fn verify_foreign_keys(pool: &SqlitePool, table: &TableSpec) -> Result<(), SchemaError> {
    if table.foreign_keys.is_empty() {
        return Ok(());
    }
    let pragma = format!("PRAGMA foreign_key_list({})", table.name);
    let rows = sqlx::query(&pragma)
        .fetch_all(pool)
        .await
        .map_err(StoreError::from)?;
    let declared = rows
        .iter()
        .map(|row| {
            Ok((
                row.try_get::<String, _>("from")?,
                row.try_get::<String, _>("table")?,
            ))
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(StoreError::from)?;

    for &(column, references) in table.foreign_keys {
        let found = declared
            .iter()
            .any(|(from, parent)| from == column && parent.eq_ignore_ascii_case(references));
        if !found {
            return Err(SchemaError::MissingForeignKey {
                table: table.name,
                column,
                references,
            });
        }
    }
    Ok(())
}
