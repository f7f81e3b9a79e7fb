use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use ffdb_adapters::{Dialect, EspnConfig};
use ffdb_core::EntityKind;
use ffdb_storage::{BackoffPolicy, HttpClientConfig};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SEASON: i32 = 2024;

/// Everything one ingestion run needs, passed explicitly rather than read from
/// ambient process state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub season: i32,
    pub database_path: PathBuf,
    pub artifacts_dir: PathBuf,
    pub reports_dir: PathBuf,
    /// Keep raw API payloads under `artifacts_dir`.
    pub archive_payloads: bool,
    pub espn: EspnConfig,
    pub http: HttpSettings,
    pub files: StageFiles,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            season: DEFAULT_SEASON,
            database_path: PathBuf::from("data/ffdb.sqlite"),
            artifacts_dir: PathBuf::from("artifacts"),
            reports_dir: PathBuf::from("reports"),
            archive_payloads: true,
            espn: EspnConfig::default(),
            http: HttpSettings::default(),
            files: StageFiles::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub rate_limit_ms: u64,
    pub user_agent: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 0,
            rate_limit_ms: 1000,
            user_agent: None,
        }
    }
}

impl HttpSettings {
    pub fn client_config(&self) -> HttpClientConfig {
        let defaults = HttpClientConfig::default();
        HttpClientConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            user_agent: self.user_agent.clone().or(defaults.user_agent),
            min_request_interval: Duration::from_millis(self.rate_limit_ms),
            backoff: BackoffPolicy {
                max_retries: self.max_retries,
                ..BackoffPolicy::default()
            },
        }
    }
}

/// Static files that replace the API for individual stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageFiles {
    pub dialect: Dialect,
    pub nfl_teams: Option<PathBuf>,
    /// Separate schedule file. Without one, games come from the team payload.
    pub games: Option<PathBuf>,
    pub fantasy_teams: Option<PathBuf>,
    pub players: Option<PathBuf>,
    pub draft_picks: Option<PathBuf>,
}

impl Default for StageFiles {
    fn default() -> Self {
        Self {
            dialect: Dialect::Espn,
            nfl_teams: None,
            games: None,
            fantasy_teams: None,
            players: None,
            draft_picks: None,
        }
    }
}

impl StageFiles {
    /// ESPN league history carries both the fantasy teams and the picks, so the
    /// draft file also serves the fantasy team stage in that dialect.
    pub fn file_for(&self, scope: EntityKind) -> Option<&Path> {
        match scope {
            EntityKind::NflTeam => self.nfl_teams.as_deref(),
            EntityKind::Game => self.games.as_deref(),
            EntityKind::Player => self.players.as_deref(),
            EntityKind::DraftPick => self.draft_picks.as_deref(),
            EntityKind::FantasyTeam => self.fantasy_teams.as_deref().or_else(|| {
                (self.dialect == Dialect::Espn)
                    .then_some(self.draft_picks.as_deref())
                    .flatten()
            }),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`IngestConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(season) = var("FFDB_SEASON") {
            config.season = season
                .trim()
                .parse()
                .with_context(|| format!("FFDB_SEASON={season} is not a season year"))?;
        }
        if let Some(path) = var("FFDB_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(path) = var("FFDB_ARTIFACTS_DIR") {
            config.artifacts_dir = PathBuf::from(path);
        }
        if let Some(path) = var("FFDB_REPORTS_DIR") {
            config.reports_dir = PathBuf::from(path);
        }

        config.espn.league_id = var("ESPN_LEAGUE_ID");
        config.espn.swid = var("ESPN_SWID");
        config.espn.espn_s2 = var("ESPN_S2");
        config.http.user_agent = var("ESPN_USER_AGENT");

        if let Some(secs) = var("FFDB_HTTP_TIMEOUT_SECS") {
            config.http.timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("FFDB_HTTP_TIMEOUT_SECS={secs}"))?;
        }
        if let Some(retries) = var("FFDB_HTTP_MAX_RETRIES") {
            config.http.max_retries = retries
                .trim()
                .parse()
                .with_context(|| format!("FFDB_HTTP_MAX_RETRIES={retries}"))?;
        }
        if let Some(ms) = var("FFDB_RATE_LIMIT_MS") {
            config.http.rate_limit_ms = ms
                .trim()
                .parse()
                .with_context(|| format!("FFDB_RATE_LIMIT_MS={ms}"))?;
        }

        if let Some(dialect) = var("FFDB_FILE_DIALECT") {
            config.files.dialect = dialect.parse().map_err(anyhow::Error::msg)?;
        }
        config.files.nfl_teams = var("FFDB_TEAMS_FILE").map(PathBuf::from);
        config.files.games = var("FFDB_GAMES_FILE").map(PathBuf::from);
        config.files.fantasy_teams = var("FFDB_FANTASY_TEAMS_FILE").map(PathBuf::from);
        config.files.players = var("FFDB_PLAYERS_FILE").map(PathBuf::from);
        config.files.draft_picks = var("FFDB_DRAFT_FILE").map(PathBuf::from);

        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}
