//! Read-only JSON API over the query layer.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use ffdb_query::{QueryError, QueryLayer};
use ffdb_storage::Store;
use ffdb_sync::IngestConfig;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "ffdb-web";

pub const DEFAULT_PORT: u16 = 8000;
const DEFAULT_PLAYER_LIMIT: u32 = 50;

#[derive(Clone)]
pub struct AppState {
    pub queries: QueryLayer,
}

impl AppState {
    pub fn new(store: Store) -> Self {
        Self {
            queries: QueryLayer::new(store),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PlayerParams {
    position: Option<String>,
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct GameParams {
    week: Option<i32>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/summary", get(summary_handler))
        .route("/seasons/{season}/players", get(players_handler))
        .route("/seasons/{season}/draft-picks", get(draft_board_handler))
        .route(
            "/seasons/{season}/fantasy-teams",
            get(standings_handler),
        )
        .route(
            "/seasons/{season}/fantasy-teams/{team}/picks",
            get(team_picks_handler),
        )
        .route(
            "/seasons/{season}/positions",
            get(position_summary_handler),
        )
        .route(
            "/seasons/{season}/nfl-teams",
            get(nfl_team_distribution_handler),
        )
        .route("/seasons/{season}/games", get(games_handler))
        .route("/seasons/{season}/keepers", get(keepers_handler))
        .route("/seasons/{season}/auto-draft", get(auto_draft_handler))
        .route("/seasons/{season}/pick-value", get(pick_value_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(store: Store, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "ffdb api listening");
    axum::serve(listener, app(AppState::new(store))).await?;
    Ok(())
}

/// Opens the configured database and serves on `FFDB_WEB_PORT` (default 8000).
pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("FFDB_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let config = IngestConfig::from_env()?;
    let store = Store::open(&config.database_path).await?;
    store.ensure_schema().await?;
    serve(store, port).await
}

async fn health_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn summary_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.queries.database_summary().await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => query_error(err),
    }
}

async fn players_handler(
    State(state): State<Arc<AppState>>,
    Path(season): Path<i32>,
    Query(params): Query<PlayerParams>,
) -> Response {
    let result = match (params.position.as_deref(), params.limit) {
        (Some(position), None) => state.queries.players_by_position(season, position).await,
        (position, limit) => {
            state
                .queries
                .top_players(season, position, limit.unwrap_or(DEFAULT_PLAYER_LIMIT))
                .await
        }
    };
    match result {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => query_error(err),
    }
}

async fn draft_board_handler(
    State(state): State<Arc<AppState>>,
    Path(season): Path<i32>,
) -> Response {
    match state.queries.draft_board(season).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => query_error(err),
    }
}

async fn standings_handler(
    State(state): State<Arc<AppState>>,
    Path(season): Path<i32>,
) -> Response {
    match state.queries.fantasy_standings(season).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => query_error(err),
    }
}

async fn team_picks_handler(
    State(state): State<Arc<AppState>>,
    Path((season, team)): Path<(i32, String)>,
) -> Response {
    match state.queries.draft_picks_for_fantasy_team(season, &team).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => query_error(err),
    }
}

async fn position_summary_handler(
    State(state): State<Arc<AppState>>,
    Path(season): Path<i32>,
) -> Response {
    match state.queries.position_draft_summary(season).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => query_error(err),
    }
}

async fn nfl_team_distribution_handler(
    State(state): State<Arc<AppState>>,
    Path(season): Path<i32>,
) -> Response {
    match state.queries.nfl_team_draft_distribution(season).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => query_error(err),
    }
}

async fn games_handler(
    State(state): State<Arc<AppState>>,
    Path(season): Path<i32>,
    Query(params): Query<GameParams>,
) -> Response {
    match state.queries.games_by_week(season, params.week).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => query_error(err),
    }
}

async fn keepers_handler(
    State(state): State<Arc<AppState>>,
    Path(season): Path<i32>,
) -> Response {
    match state.queries.keeper_picks(season).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => query_error(err),
    }
}

async fn auto_draft_handler(
    State(state): State<Arc<AppState>>,
    Path(season): Path<i32>,
) -> Response {
    match state.queries.auto_draft_summary(season).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => query_error(err),
    }
}

async fn pick_value_handler(
    State(state): State<Arc<AppState>>,
    Path(season): Path<i32>,
) -> Response {
    match state.queries.pick_value_by_round(season).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => query_error(err),
    }
}

fn query_error(err: QueryError) -> Response {
    match err {
        QueryError::InvalidParameter { .. } => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
        QueryError::Store(_) => server_error(err.into()),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("server error: {err}") })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use axum::body::Body;
    use ffdb_adapters::{Dialect, SourceClient, StaticFileSource};
    use ffdb_core::EntityKind;
    use ffdb_sync::{IngestionPipeline, SourceSet};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn seeded_app() -> (TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("ffdb.sqlite")).await.unwrap();
        store.ensure_schema().await.unwrap();
        let fixtures = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/canonical");
        let file = |name: &str| -> Arc<dyn SourceClient> {
            Arc::new(StaticFileSource::new(fixtures.join(name), Dialect::Canonical))
        };
        let sources = SourceSet::new()
            .with(EntityKind::NflTeam, file("nfl_teams.json"))
            .with(EntityKind::FantasyTeam, file("fantasy_teams.json"))
            .with(EntityKind::Player, file("players.json"))
            .with(EntityKind::DraftPick, file("draft_picks.json"));
        IngestionPipeline::new(store.clone(), sources, 2024)
            .run_once()
            .await
            .unwrap();
        (dir, app(AppState::new(store)))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (_dir, app) = seeded_app().await;
        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn players_filter_by_position() {
        let (_dir, app) = seeded_app().await;
        let (status, body) = get_json(app, "/seasons/2024/players?position=wr").await;
        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Mike Evans");
        assert_eq!(rows[0]["position"], "WR");
        assert_eq!(rows[0]["fantasy_score"], 250.5);
    }

    #[tokio::test]
    async fn unknown_position_is_a_bad_request() {
        let (_dir, app) = seeded_app().await;
        let (status, body) = get_json(app, "/seasons/2024/players?position=LB").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("position"));
    }

    #[tokio::test]
    async fn team_picks_and_board() {
        let (_dir, app) = seeded_app().await;
        let (status, body) = get_json(app.clone(), "/seasons/2024/fantasy-teams/2/picks").await;
        assert_eq!(status, StatusCode::OK);
        let picks: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["overall_pick_number"].as_i64().unwrap())
            .collect();
        assert_eq!(picks, [2, 3]);

        let (_, board) = get_json(app, "/seasons/2024/draft-picks").await;
        assert_eq!(board.as_array().unwrap().len(), 4);
        assert_eq!(board[3]["pending"], true);
    }

    #[tokio::test]
    async fn games_filter_by_week() {
        let (_dir, app) = seeded_app().await;
        let (status, body) = get_json(app.clone(), "/seasons/2024/games?week=9").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["home_team"], "KC");
        assert_eq!(body[0]["away_team"], "TB");

        let (_, empty) = get_json(app.clone(), "/seasons/2024/games?week=2").await;
        assert!(empty.as_array().unwrap().is_empty());

        let (status, _) = get_json(app, "/seasons/2024/games?week=40").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn draft_analyses_are_served() {
        let (_dir, app) = seeded_app().await;
        let (status, keepers) = get_json(app.clone(), "/seasons/2024/keepers").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(keepers[0]["overall_pick_number"], 3);

        let (_, auto) = get_json(app.clone(), "/seasons/2024/auto-draft").await;
        assert_eq!(auto[0]["draft_type"], "auto");
        assert_eq!(auto[0]["position"], "WR");

        let (_, value) = get_json(app, "/seasons/2024/pick-value").await;
        assert_eq!(value.as_array().unwrap().len(), 3);
        assert_eq!(value[0]["round_share"], 50.0);
    }

    #[tokio::test]
    async fn summary_reports_counts() {
        let (_dir, app) = seeded_app().await;
        let (status, body) = get_json(app, "/summary").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["table_counts"]["nfl_teams"], 2);
        assert_eq!(body["pending_draft_picks"], 1);
    }
}
