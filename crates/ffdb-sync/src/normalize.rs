//! Raw record -> normalized draft mapping, per source dialect.
//!
//! Every mapper returns `Ok(None)` for a record that is well-formed but not
//! fantasy-relevant (skipped), and a [`RecordError`] for a malformed one.

use chrono::{DateTime, Utc};
use ffdb_adapters::Dialect;
use ffdb_core::{
    DraftPickDraft, FantasyTeamDraft, GameDraft, NflTeamDraft, PlayerDraft, Position, RecordRef,
    Standings,
};
use serde_json::Value as JsonValue;

use crate::RecordError;

/// ESPN's placeholder pro team for free agents.
const ESPN_FREE_AGENT_TEAM: &str = "0";

pub fn map_nfl_team(
    dialect: Dialect,
    origin: RecordRef,
    raw: &JsonValue,
) -> Result<Option<NflTeamDraft>, RecordError> {
    let draft = match dialect {
        Dialect::Espn => {
            let external_id = id_field(raw, "id")?;
            if external_id == ESPN_FREE_AGENT_TEAM {
                return Ok(None);
            }
            NflTeamDraft {
                origin,
                external_id,
                name: text_field(raw, "name")?,
                abbreviation: text_field(raw, "abbrev")?.to_ascii_uppercase(),
                location: opt_text(raw, "location"),
                bye_week: opt_i32(raw, "byeWeek")?.filter(|week| *week > 0),
            }
        }
        Dialect::Canonical => NflTeamDraft {
            origin,
            external_id: id_field(raw, "external_id")?,
            name: text_field(raw, "name")?,
            abbreviation: text_field(raw, "abbreviation")?,
            location: opt_text(raw, "location"),
            bye_week: opt_i32(raw, "bye_week")?,
        },
    };
    Ok(Some(draft))
}

pub fn map_game(
    dialect: Dialect,
    season: i32,
    origin: RecordRef,
    raw: &JsonValue,
) -> Result<Option<GameDraft>, RecordError> {
    let draft = match dialect {
        Dialect::Espn => GameDraft {
            origin,
            season,
            external_id: id_field(raw, "id")?,
            week: required_i32(raw, "scoringPeriodId")?,
            home_team_external_id: id_field(raw, "homeProTeamId")?,
            away_team_external_id: id_field(raw, "awayProTeamId")?,
            kickoff: epoch_millis(raw, "date")?,
            start_time_tbd: opt_bool(raw, "startTimeTBD")?.unwrap_or(false),
            stats_official: opt_bool(raw, "statsOfficial")?.unwrap_or(false),
            valid_for_locking: opt_bool(raw, "validForLocking")?.unwrap_or(false),
        },
        Dialect::Canonical => GameDraft {
            origin,
            season: opt_i32(raw, "season")?.unwrap_or(season),
            external_id: id_field(raw, "external_id")?,
            week: required_i32(raw, "week")?,
            home_team_external_id: id_field(raw, "home_team_external_id")?,
            away_team_external_id: id_field(raw, "away_team_external_id")?,
            kickoff: rfc3339(raw, "kickoff")?,
            start_time_tbd: opt_bool(raw, "start_time_tbd")?.unwrap_or(false),
            stats_official: opt_bool(raw, "stats_official")?.unwrap_or(false),
            valid_for_locking: opt_bool(raw, "valid_for_locking")?.unwrap_or(false),
        },
    };
    if draft.week <= 0 {
        return Err(RecordError::InvalidField {
            field: "week",
            detail: format!("must be positive, got {}", draft.week),
        });
    }
    if draft.home_team_external_id == draft.away_team_external_id {
        return Err(RecordError::InvalidField {
            field: "away_team",
            detail: format!("team {} cannot play itself", draft.home_team_external_id),
        });
    }
    Ok(Some(draft))
}

pub fn map_fantasy_team(
    dialect: Dialect,
    season: i32,
    origin: RecordRef,
    raw: &JsonValue,
) -> Result<Option<FantasyTeamDraft>, RecordError> {
    let draft = match dialect {
        Dialect::Espn => {
            let name = match opt_text(raw, "name") {
                Some(name) => name,
                None => {
                    let parts: Vec<String> = ["location", "nickname"]
                        .into_iter()
                        .filter_map(|field| opt_text(raw, field))
                        .collect();
                    if parts.is_empty() {
                        return Err(RecordError::MissingField { field: "name" });
                    }
                    parts.join(" ")
                }
            };
            let owner = opt_text(raw, "primaryOwner").or_else(|| {
                raw.get("owners")
                    .and_then(JsonValue::as_array)
                    .and_then(|owners| owners.first())
                    .and_then(JsonValue::as_str)
                    .map(str::to_string)
            });
            let overall = raw
                .pointer("/record/overall")
                .cloned()
                .unwrap_or(JsonValue::Null);
            FantasyTeamDraft {
                origin,
                season,
                external_id: id_field(raw, "id")?,
                name,
                owner,
                standings: Standings {
                    wins: opt_i32(&overall, "wins")?,
                    losses: opt_i32(&overall, "losses")?,
                    ties: opt_i32(&overall, "ties")?,
                    points_for: opt_f64(&overall, "pointsFor")?,
                    points_against: opt_f64(&overall, "pointsAgainst")?,
                    final_position: opt_i32(raw, "rankCalculatedFinal")?.filter(|rank| *rank > 0),
                },
            }
        }
        Dialect::Canonical => FantasyTeamDraft {
            origin,
            season: opt_i32(raw, "season")?.unwrap_or(season),
            external_id: id_field(raw, "external_id")?,
            name: text_field(raw, "name")?,
            owner: opt_text(raw, "owner"),
            standings: Standings {
                wins: opt_i32(raw, "wins")?,
                losses: opt_i32(raw, "losses")?,
                ties: opt_i32(raw, "ties")?,
                points_for: opt_f64(raw, "points_for")?,
                points_against: opt_f64(raw, "points_against")?,
                final_position: opt_i32(raw, "final_position")?,
            },
        },
    };
    Ok(Some(draft))
}

pub fn map_player(
    dialect: Dialect,
    season: i32,
    origin: RecordRef,
    raw: &JsonValue,
) -> Result<Option<PlayerDraft>, RecordError> {
    let draft = match dialect {
        Dialect::Espn => {
            let external_id = id_field(raw, "id")?;
            let name = text_field(raw, "fullName")?;
            let Some(position) = espn_position(raw) else {
                return Ok(None);
            };
            let team_external_id =
                opt_id_field(raw, "proTeamId")?.filter(|team| team != ESPN_FREE_AGENT_TEAM);
            PlayerDraft {
                origin,
                external_id,
                season,
                name,
                position,
                team_external_id,
                injury_status: opt_text(raw, "injuryStatus"),
                fantasy_score: espn_season_total(raw, season),
            }
        }
        Dialect::Canonical => {
            let position = text_field(raw, "position")?;
            let position = position
                .parse::<Position>()
                .map_err(|err| RecordError::InvalidField {
                    field: "position",
                    detail: err.to_string(),
                })?;
            PlayerDraft {
                origin,
                external_id: id_field(raw, "external_id")?,
                season: opt_i32(raw, "season")?.unwrap_or(season),
                name: text_field(raw, "name")?,
                position,
                team_external_id: opt_id_field(raw, "team_external_id")?,
                injury_status: opt_text(raw, "injury_status"),
                fantasy_score: opt_f64(raw, "fantasy_score")?.unwrap_or(0.0),
            }
        }
    };
    Ok(Some(draft))
}

pub fn map_draft_pick(
    dialect: Dialect,
    season: i32,
    origin: RecordRef,
    raw: &JsonValue,
) -> Result<Option<DraftPickDraft>, RecordError> {
    let draft = match dialect {
        Dialect::Espn => DraftPickDraft {
            origin,
            season,
            overall_pick_number: required_i32(raw, "overallPickNumber")?,
            round: opt_i32(raw, "roundId")?,
            round_pick: opt_i32(raw, "roundPickNumber")?,
            keeper: opt_bool(raw, "keeper")?.unwrap_or(false),
            auto_draft_type: opt_i32(raw, "autoDraftTypeId")?.unwrap_or(0),
            fantasy_team_external_id: id_field(raw, "teamId")?,
            player_external_id: id_field(raw, "playerId")?,
        },
        Dialect::Canonical => DraftPickDraft {
            origin,
            season: opt_i32(raw, "season")?.unwrap_or(season),
            overall_pick_number: required_i32(raw, "overall_pick_number")?,
            round: opt_i32(raw, "round")?,
            round_pick: opt_i32(raw, "round_pick")?,
            keeper: opt_bool(raw, "keeper")?.unwrap_or(false),
            auto_draft_type: opt_i32(raw, "auto_draft_type")?.unwrap_or(0),
            fantasy_team_external_id: id_field(raw, "fantasy_team_external_id")?,
            player_external_id: id_field(raw, "player_external_id")?,
        },
    };
    if draft.overall_pick_number <= 0 {
        return Err(RecordError::InvalidField {
            field: "overall_pick_number",
            detail: format!("must be positive, got {}", draft.overall_pick_number),
        });
    }
    Ok(Some(draft))
}

/// First recognized eligible slot, then the default position id.
fn espn_position(raw: &JsonValue) -> Option<Position> {
    raw.get("eligibleSlots")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .filter_map(JsonValue::as_i64)
        .find_map(Position::from_espn_slot)
        .or_else(|| {
            raw.get("defaultPositionId")
                .and_then(JsonValue::as_i64)
                .and_then(Position::from_espn_default_position)
        })
}

/// Actual (not projected) full-season total for `season`.
fn espn_season_total(raw: &JsonValue, season: i32) -> f64 {
    let is_int = |stat: &JsonValue, field: &str, want: i64| {
        stat.get(field).and_then(JsonValue::as_i64) == Some(want)
    };
    raw.get("stats")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .find(|stat| {
            is_int(stat, "seasonId", i64::from(season))
                && is_int(stat, "statSourceId", 0)
                && is_int(stat, "statSplitTypeId", 0)
        })
        .and_then(|stat| stat.get("appliedTotal"))
        .and_then(JsonValue::as_f64)
        .unwrap_or(0.0)
}

fn opt_id_field(raw: &JsonValue, field: &'static str) -> Result<Option<String>, RecordError> {
    match raw.get(field) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) if s.trim().is_empty() => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s.trim().to_string())),
        Some(JsonValue::Number(n)) if n.is_i64() || n.is_u64() => Ok(Some(n.to_string())),
        Some(other) => Err(RecordError::InvalidField {
            field,
            detail: format!("expected string or integer id, got {other}"),
        }),
    }
}

fn id_field(raw: &JsonValue, field: &'static str) -> Result<String, RecordError> {
    opt_id_field(raw, field)?.ok_or(RecordError::MissingField { field })
}

fn opt_text(raw: &JsonValue, field: &str) -> Option<String> {
    raw.get(field)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn text_field(raw: &JsonValue, field: &'static str) -> Result<String, RecordError> {
    match raw.get(field) {
        Some(JsonValue::String(_)) | None | Some(JsonValue::Null) => {
            opt_text(raw, field).ok_or(RecordError::MissingField { field })
        }
        Some(other) => Err(RecordError::InvalidField {
            field,
            detail: format!("expected string, got {other}"),
        }),
    }
}

fn opt_i32(raw: &JsonValue, field: &'static str) -> Result<Option<i32>, RecordError> {
    match raw.get(field) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| RecordError::InvalidField {
                field,
                detail: format!("expected integer, got {value}"),
            }),
    }
}

fn required_i32(raw: &JsonValue, field: &'static str) -> Result<i32, RecordError> {
    opt_i32(raw, field)?.ok_or(RecordError::MissingField { field })
}

fn opt_f64(raw: &JsonValue, field: &'static str) -> Result<Option<f64>, RecordError> {
    match raw.get(field) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| RecordError::InvalidField {
            field,
            detail: format!("expected number, got {value}"),
        }),
    }
}

fn epoch_millis(raw: &JsonValue, field: &'static str) -> Result<Option<DateTime<Utc>>, RecordError> {
    let Some(value) = raw.get(field).filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    value
        .as_i64()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(Some)
        .ok_or_else(|| RecordError::InvalidField {
            field,
            detail: format!("expected epoch milliseconds, got {value}"),
        })
}

fn rfc3339(raw: &JsonValue, field: &'static str) -> Result<Option<DateTime<Utc>>, RecordError> {
    let Some(text) = opt_text(raw, field) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(&text)
        .map(|at| Some(at.with_timezone(&Utc)))
        .map_err(|err| RecordError::InvalidField {
            field,
            detail: format!("`{text}` is not an RFC 3339 timestamp: {err}"),
        })
}

fn opt_bool(raw: &JsonValue, field: &'static str) -> Result<Option<bool>, RecordError> {
    match raw.get(field) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(RecordError::InvalidField {
            field,
            detail: format!("expected boolean, got {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn origin(key: &str) -> RecordRef {
        RecordRef::new("test", key)
    }

    #[test]
    fn espn_player_takes_first_recognized_slot_and_season_total() {
        let raw = json!({
            "id": 16737,
            "fullName": "Mike Evans",
            "defaultPositionId": 3,
            "eligibleSlots": [3, 4, 5, 23],
            "proTeamId": 27,
            "stats": [
                { "seasonId": 2024, "statSourceId": 1, "statSplitTypeId": 0, "appliedTotal": 231.0 },
                { "seasonId": 2024, "statSourceId": 0, "statSplitTypeId": 0, "appliedTotal": 250.5 }
            ]
        });

        let player = map_player(Dialect::Espn, 2024, origin("16737"), &raw)
            .expect("valid")
            .expect("relevant");
        assert_eq!(player.external_id, "16737");
        assert_eq!(player.position, Position::Wr);
        assert_eq!(player.team_external_id.as_deref(), Some("27"));
        assert_eq!(player.fantasy_score, 250.5);
    }

    #[test]
    fn espn_player_falls_back_to_default_position_and_zero_score() {
        let raw = json!({ "id": 15683, "fullName": "Wil Lutz", "defaultPositionId": 5, "proTeamId": 0 });
        let player = map_player(Dialect::Espn, 2024, origin("15683"), &raw)
            .expect("valid")
            .expect("relevant");
        assert_eq!(player.position, Position::K);
        assert_eq!(player.team_external_id, None, "proTeamId 0 is a free agent");
        assert_eq!(player.fantasy_score, 0.0);
    }

    #[test]
    fn espn_player_without_fantasy_position_is_skipped() {
        let raw = json!({ "id": 1, "fullName": "Long Snapper", "defaultPositionId": 8, "eligibleSlots": [20, 21] });
        assert_eq!(map_player(Dialect::Espn, 2024, origin("1"), &raw), Ok(None));
    }

    #[test]
    fn missing_name_is_a_parse_error() {
        let raw = json!({ "external_id": "P9", "position": "RB" });
        assert_eq!(
            map_player(Dialect::Canonical, 2024, origin("P9"), &raw),
            Err(RecordError::MissingField { field: "name" })
        );
    }

    #[test]
    fn unknown_canonical_position_is_invalid() {
        let raw = json!({ "external_id": "P9", "name": "Someone", "position": "LB" });
        assert!(matches!(
            map_player(Dialect::Canonical, 2024, origin("P9"), &raw),
            Err(RecordError::InvalidField { field: "position", .. })
        ));
    }

    #[test]
    fn canonical_season_defaults_to_batch_season() {
        let raw = json!({ "external_id": "P1", "name": "Mike Evans", "position": "wr", "team_external_id": "TB" });
        let player = map_player(Dialect::Canonical, 2023, origin("P1"), &raw)
            .expect("valid")
            .expect("relevant");
        assert_eq!(player.season, 2023);
        assert_eq!(player.position, Position::Wr);
    }

    #[test]
    fn espn_free_agent_pro_team_is_skipped() {
        let raw = json!({ "id": 0, "abbrev": "FA", "name": "FA" });
        assert_eq!(map_nfl_team(Dialect::Espn, origin("0"), &raw), Ok(None));

        let raw = json!({ "id": 7, "abbrev": "Den", "location": "Denver", "name": "Broncos", "byeWeek": 14 });
        let team = map_nfl_team(Dialect::Espn, origin("7"), &raw)
            .expect("valid")
            .expect("relevant");
        assert_eq!(team.abbreviation, "DEN");
        assert_eq!(team.bye_week, Some(14));
    }

    #[test]
    fn espn_fantasy_team_composes_name_and_owner() {
        let raw = json!({
            "id": 2,
            "location": "Mile High",
            "nickname": "Maniacs",
            "owners": ["{OWNER-2}"],
            "record": { "overall": { "wins": 6, "losses": 8, "pointsFor": 1488.0 } },
            "rankCalculatedFinal": 5
        });
        let team = map_fantasy_team(Dialect::Espn, 2024, origin("2"), &raw)
            .expect("valid")
            .expect("relevant");
        assert_eq!(team.name, "Mile High Maniacs");
        assert_eq!(team.owner.as_deref(), Some("{OWNER-2}"));
        assert_eq!(team.standings.wins, Some(6));
        assert_eq!(team.standings.points_for, Some(1488.0));
        assert_eq!(team.standings.final_position, Some(5));
    }

    #[test]
    fn draft_pick_requires_positive_overall_number() {
        let raw = json!({ "overall_pick_number": 0, "fantasy_team_external_id": "1", "player_external_id": "P1" });
        assert!(matches!(
            map_draft_pick(Dialect::Canonical, 2024, origin("0"), &raw),
            Err(RecordError::InvalidField { field: "overall_pick_number", .. })
        ));

        let raw = json!({ "overallPickNumber": 3, "roundId": 2, "teamId": 2, "playerId": 4362628, "keeper": true });
        let pick = map_draft_pick(Dialect::Espn, 2024, origin("3"), &raw)
            .expect("valid")
            .expect("relevant");
        assert_eq!(pick.player_external_id, "4362628");
        assert!(pick.keeper);
        assert_eq!(pick.auto_draft_type, 0);
    }

    #[test]
    fn espn_auto_draft_marker_is_kept() {
        let raw = json!({ "overallPickNumber": 4, "roundId": 2, "teamId": 1, "playerId": -16007, "autoDraftTypeId": 1 });
        let pick = map_draft_pick(Dialect::Espn, 2024, origin("4"), &raw)
            .expect("valid")
            .expect("relevant");
        assert_eq!(pick.auto_draft_type, 1);
    }

    #[test]
    fn espn_game_converts_epoch_millis_kickoff() {
        let raw = json!({
            "id": 401671789,
            "homeProTeamId": 12,
            "awayProTeamId": 27,
            "scoringPeriodId": 9,
            "date": 1730767500000_i64,
            "startTimeTBD": false,
            "statsOfficial": true
        });
        let game = map_game(Dialect::Espn, 2024, origin("401671789"), &raw)
            .expect("valid")
            .expect("relevant");
        assert_eq!(game.external_id, "401671789");
        assert_eq!(game.week, 9);
        assert_eq!(game.home_team_external_id, "12");
        assert_eq!(game.away_team_external_id, "27");
        assert_eq!(
            game.kickoff.map(|at| at.to_rfc3339()),
            Some("2024-11-05T00:45:00+00:00".to_string())
        );
        assert!(game.stats_official);
        assert!(!game.valid_for_locking);
    }

    #[test]
    fn game_rejects_bad_week_kickoff_and_self_matchup() {
        let raw = json!({ "external_id": "G1", "week": 0, "home_team_external_id": "KC", "away_team_external_id": "TB" });
        assert!(matches!(
            map_game(Dialect::Canonical, 2024, origin("G1"), &raw),
            Err(RecordError::InvalidField { field: "week", .. })
        ));

        let raw = json!({ "external_id": "G1", "week": 3, "home_team_external_id": "KC", "away_team_external_id": "TB", "kickoff": "Sunday" });
        assert!(matches!(
            map_game(Dialect::Canonical, 2024, origin("G1"), &raw),
            Err(RecordError::InvalidField { field: "kickoff", .. })
        ));

        let raw = json!({ "external_id": "G1", "week": 3, "home_team_external_id": "KC", "away_team_external_id": "KC" });
        assert!(matches!(
            map_game(Dialect::Canonical, 2024, origin("G1"), &raw),
            Err(RecordError::InvalidField { field: "away_team", .. })
        ));
    }
}
