//! Canonical domain model and provenance types for FFDB.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "ffdb-core";

/// Fantasy-relevant roster position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Position {
    #[serde(rename = "QB")]
    Qb,
    #[serde(rename = "RB")]
    Rb,
    #[serde(rename = "WR")]
    Wr,
    #[serde(rename = "TE")]
    Te,
    #[serde(rename = "K")]
    K,
    #[serde(rename = "DST")]
    Dst,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown position `{0}`")]
pub struct UnknownPosition(pub String);

impl Position {
    pub const ALL: [Position; 6] = [
        Position::Qb,
        Position::Rb,
        Position::Wr,
        Position::Te,
        Position::K,
        Position::Dst,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Position::Qb => "QB",
            Position::Rb => "RB",
            Position::Wr => "WR",
            Position::Te => "TE",
            Position::K => "K",
            Position::Dst => "DST",
        }
    }

    /// ESPN lineup slot ids. Flex and bench slots map to nothing.
    pub fn from_espn_slot(slot_id: i64) -> Option<Self> {
        match slot_id {
            0 => Some(Position::Qb),
            2 => Some(Position::Rb),
            4 => Some(Position::Wr),
            6 => Some(Position::Te),
            16 => Some(Position::Dst),
            17 => Some(Position::K),
            _ => None,
        }
    }

    /// ESPN `defaultPositionId` values.
    pub fn from_espn_default_position(position_id: i64) -> Option<Self> {
        match position_id {
            1 => Some(Position::Qb),
            2 => Some(Position::Rb),
            3 => Some(Position::Wr),
            4 => Some(Position::Te),
            5 => Some(Position::K),
            16 => Some(Position::Dst),
            _ => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Position {
    type Err = UnknownPosition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QB" => Ok(Position::Qb),
            "RB" => Ok(Position::Rb),
            "WR" => Ok(Position::Wr),
            "TE" => Ok(Position::Te),
            "K" | "PK" => Ok(Position::K),
            "DST" | "D/ST" | "DEF" => Ok(Position::Dst),
            _ => Err(UnknownPosition(s.to_string())),
        }
    }
}

/// Canonical entity kinds, listed in the order an ingestion run processes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    NflTeam,
    Game,
    FantasyTeam,
    Player,
    DraftPick,
}

impl EntityKind {
    pub const INGEST_ORDER: [EntityKind; 5] = [
        EntityKind::NflTeam,
        EntityKind::Game,
        EntityKind::FantasyTeam,
        EntityKind::Player,
        EntityKind::DraftPick,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::NflTeam => "nfl_team",
            EntityKind::Game => "game",
            EntityKind::FantasyTeam => "fantasy_team",
            EntityKind::Player => "player",
            EntityKind::DraftPick => "draft_pick",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance pointer back to the raw source record a draft was mapped from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub source_id: String,
    pub record_key: String,
}

impl RecordRef {
    pub fn new(source_id: impl Into<String>, record_key: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            record_key: record_key.into(),
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_id, self.record_key)
    }
}

/// Normalized NFL team handed from the normalizer to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NflTeamDraft {
    pub origin: RecordRef,
    pub external_id: String,
    pub name: String,
    pub abbreviation: String,
    pub location: Option<String>,
    pub bye_week: Option<i32>,
}

/// Scheduled NFL game. Home and away teams are still source ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameDraft {
    pub origin: RecordRef,
    pub season: i32,
    pub external_id: String,
    /// Scoring period the game counts toward.
    pub week: i32,
    pub home_team_external_id: String,
    pub away_team_external_id: String,
    pub kickoff: Option<DateTime<Utc>>,
    pub start_time_tbd: bool,
    pub stats_official: bool,
    pub valid_for_locking: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Standings {
    pub wins: Option<i32>,
    pub losses: Option<i32>,
    pub ties: Option<i32>,
    pub points_for: Option<f64>,
    pub points_against: Option<f64>,
    pub final_position: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FantasyTeamDraft {
    pub origin: RecordRef,
    pub season: i32,
    pub external_id: String,
    pub name: String,
    pub owner: Option<String>,
    pub standings: Standings,
}

/// Normalized player. `team_external_id` is still in the source id space; the
/// orchestrator resolves it to a surrogate key before anything is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDraft {
    pub origin: RecordRef,
    pub external_id: String,
    pub season: i32,
    pub name: String,
    pub position: Position,
    pub team_external_id: Option<String>,
    pub injury_status: Option<String>,
    pub fantasy_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftPickDraft {
    pub origin: RecordRef,
    pub season: i32,
    pub overall_pick_number: i32,
    pub round: Option<i32>,
    pub round_pick: Option<i32>,
    pub keeper: bool,
    /// Source's auto-draft marker; `0` is a manual pick.
    pub auto_draft_type: i32,
    pub fantasy_team_external_id: String,
    pub player_external_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NflTeam {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub abbreviation: String,
    pub location: Option<String>,
    pub bye_week: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: Uuid,
    pub season: i32,
    pub external_id: String,
    pub week: i32,
    pub home_team_id: Option<Uuid>,
    pub away_team_id: Option<Uuid>,
    pub pending_home_team_external_id: Option<String>,
    pub pending_away_team_external_id: Option<String>,
    pub kickoff: Option<DateTime<Utc>>,
    pub start_time_tbd: bool,
    pub stats_official: bool,
    pub valid_for_locking: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Game {
    pub fn is_pending(&self) -> bool {
        self.home_team_id.is_none() || self.away_team_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FantasyTeam {
    pub id: Uuid,
    pub season: i32,
    pub external_id: String,
    pub name: String,
    pub owner: Option<String>,
    pub standings: Standings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: Uuid,
    pub external_id: String,
    pub season: i32,
    pub name: String,
    pub position: Position,
    pub nfl_team_id: Option<Uuid>,
    pub injury_status: Option<String>,
    pub fantasy_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted draft pick. Foreign references are surrogate keys only; the
/// `pending_*` columns keep the unresolved source ids so a later repair pass
/// can finish the link without re-fetching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftPick {
    pub id: Uuid,
    pub season: i32,
    pub overall_pick_number: i32,
    pub round: Option<i32>,
    pub round_pick: Option<i32>,
    pub keeper: bool,
    pub auto_draft_type: i32,
    pub fantasy_team_id: Option<Uuid>,
    pub player_id: Option<Uuid>,
    pub pending_fantasy_team_external_id: Option<String>,
    pub pending_player_external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DraftPick {
    pub fn is_pending(&self) -> bool {
        self.player_id.is_none() || self.fantasy_team_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_parsing_accepts_common_aliases() {
        assert_eq!("wr".parse::<Position>().unwrap(), Position::Wr);
        assert_eq!(" QB ".parse::<Position>().unwrap(), Position::Qb);
        assert_eq!("D/ST".parse::<Position>().unwrap(), Position::Dst);
        assert_eq!("DEF".parse::<Position>().unwrap(), Position::Dst);
        assert_eq!(
            "LB".parse::<Position>().unwrap_err(),
            UnknownPosition("LB".to_string())
        );
    }

    #[test]
    fn position_round_trips_through_display() {
        for position in Position::ALL {
            assert_eq!(position.to_string().parse::<Position>().unwrap(), position);
        }
    }

    #[test]
    fn espn_slot_mapping_ignores_flex_and_bench() {
        assert_eq!(Position::from_espn_slot(4), Some(Position::Wr));
        assert_eq!(Position::from_espn_slot(17), Some(Position::K));
        assert_eq!(Position::from_espn_slot(23), None);
        assert_eq!(Position::from_espn_slot(20), None);
        assert_eq!(Position::from_espn_default_position(16), Some(Position::Dst));
        assert_eq!(Position::from_espn_default_position(9), None);
    }

    #[test]
    fn position_serializes_as_upper_case_code() {
        let json = serde_json::to_string(&Position::Dst).unwrap();
        assert_eq!(json, "\"DST\"");
    }

    #[test]
    fn games_ingest_right_after_nfl_teams() {
        assert_eq!(EntityKind::INGEST_ORDER[1], EntityKind::Game);
        assert_eq!(serde_json::to_string(&EntityKind::Game).unwrap(), "\"game\"");
    }

    #[test]
    fn record_ref_display_joins_source_and_key() {
        assert_eq!(RecordRef::new("espn-api", "4047646").to_string(), "espn-api:4047646");
    }
}
