use std::sync::Arc;

use async_trait::async_trait;
use ffdb_core::EntityKind;
use ffdb_storage::{ArtifactStore, HttpFetcher};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, COOKIE};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::{split_payload, Dialect, FetchFailure, RawBatch, SourceClient, SourceError};

pub const ESPN_API_BASE: &str = "https://lm-api-reads.fantasy.espn.com/apis/v3/games/ffl";

const SOURCE_ID: &str = "espn";
const PLAYERS_FILTER: &str = r#"{"filterActive":null}"#;
const LEAGUE_FILTER: &str = r#"{"players":{}}"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EspnConfig {
    pub base_url: String,
    pub league_id: Option<String>,
    /// `SWID` auth cookie, required for private leagues.
    pub swid: Option<String>,
    /// `espn_s2` auth cookie, required for private leagues.
    pub espn_s2: Option<String>,
}

impl Default for EspnConfig {
    fn default() -> Self {
        Self {
            base_url: ESPN_API_BASE.to_string(),
            league_id: None,
            swid: None,
            espn_s2: None,
        }
    }
}

impl EspnConfig {
    pub fn has_auth(&self) -> bool {
        self.swid.is_some() && self.espn_s2.is_some()
    }
}

/// Reads NFL teams, players and league history from the ESPN fantasy API.
#[derive(Debug, Clone)]
pub struct EspnApiClient {
    config: EspnConfig,
    http: Arc<HttpFetcher>,
    archive: Option<ArtifactStore>,
}

impl EspnApiClient {
    pub fn new(config: EspnConfig, http: Arc<HttpFetcher>) -> Self {
        Self {
            config,
            http,
            archive: None,
        }
    }

    /// Keep every response body under `archive` before it is split.
    pub fn with_archive(mut self, archive: ArtifactStore) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn endpoint(&self, season: i32, scope: EntityKind) -> Result<String, SourceError> {
        let base = self.config.base_url.trim_end_matches('/');
        match scope {
            EntityKind::NflTeam | EntityKind::Game => {
                Ok(format!("{base}/seasons/{season}?view=proTeamSchedules_wl"))
            }
            EntityKind::Player => Ok(format!(
                "{base}/seasons/{season}/players?scoringPeriodId=0&view=players_wl"
            )),
            EntityKind::FantasyTeam | EntityKind::DraftPick => {
                let league_id = self.config.league_id.as_deref().ok_or_else(|| SourceError::Config {
                    source_id: SOURCE_ID.to_string(),
                    detail: "league id is required for league history".to_string(),
                })?;
                Ok(format!(
                    "{base}/leagueHistory/{league_id}?view=mDraftDetail&view=mSettings&view=mTeam&seasonId={season}"
                ))
            }
        }
    }

    pub fn headers(&self, scope: EntityKind) -> Result<HeaderMap, SourceError> {
        let invalid = |detail: String| SourceError::Config {
            source_id: SOURCE_ID.to_string(),
            detail,
        };

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-fantasy-source"),
            HeaderValue::from_static("kona"),
        );
        let filter = match scope {
            EntityKind::Player => PLAYERS_FILTER,
            _ => LEAGUE_FILTER,
        };
        headers.insert(
            HeaderName::from_static("x-fantasy-filter"),
            HeaderValue::from_static(filter),
        );

        let cookies: Vec<String> = [("SWID", &self.config.swid), ("espn_s2", &self.config.espn_s2)]
            .into_iter()
            .filter_map(|(name, value)| value.as_ref().map(|v| format!("{name}={v}")))
            .collect();
        if !cookies.is_empty() {
            let value = HeaderValue::from_str(&cookies.join("; "))
                .map_err(|err| invalid(format!("auth cookie is not a valid header value: {err}")))?;
            headers.insert(COOKIE, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl SourceClient for EspnApiClient {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn dialect(&self) -> Dialect {
        Dialect::Espn
    }

    async fn fetch(&self, season: i32, scope: EntityKind) -> Result<RawBatch, SourceError> {
        let url = self.endpoint(season, scope)?;
        let headers = self.headers(scope)?;

        let response = self.http.fetch_bytes(&url, headers).await.map_err(|err| {
            let failure = FetchFailure::from_fetch_error(&err);
            warn!(%url, %failure, error = %err, "espn fetch failed");
            SourceError::Fetch {
                source_id: SOURCE_ID.to_string(),
                failure,
                detail: err.to_string(),
            }
        })?;

        let archived = match &self.archive {
            Some(archive) => Some(
                archive
                    .archive(season, SOURCE_ID, scope.as_str(), &response.body)
                    .await
                    .map_err(|error| SourceError::Archive {
                        source_id: SOURCE_ID.to_string(),
                        error,
                    })?,
            ),
            None => None,
        };

        let payload: JsonValue =
            serde_json::from_slice(&response.body).map_err(|err| SourceError::Parse {
                source_id: SOURCE_ID.to_string(),
                detail: format!("response from {url} is not JSON: {err}"),
            })?;
        let records = split_payload(SOURCE_ID, Dialect::Espn, season, scope, &payload)?;
        info!(season, scope = %scope, records = records.len(), "espn payload fetched");

        let batch = RawBatch::new(SOURCE_ID, Dialect::Espn, season, scope, records);
        Ok(match archived {
            Some(archived) => batch.with_archive(archived),
            None => batch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffdb_storage::HttpClientConfig;

    fn client(config: EspnConfig) -> EspnApiClient {
        let http = HttpFetcher::new(HttpClientConfig::default()).expect("http client");
        EspnApiClient::new(config, Arc::new(http))
    }

    #[test]
    fn endpoints_follow_scope() {
        let espn = client(EspnConfig {
            league_id: Some("123456".to_string()),
            ..EspnConfig::default()
        });

        assert_eq!(
            espn.endpoint(2024, EntityKind::Player).expect("players url"),
            format!("{ESPN_API_BASE}/seasons/2024/players?scoringPeriodId=0&view=players_wl")
        );
        let history = espn.endpoint(2023, EntityKind::DraftPick).expect("history url");
        assert!(history.contains("/leagueHistory/123456?"));
        assert!(history.ends_with("seasonId=2023"));
    }

    #[test]
    fn league_scopes_require_a_league_id() {
        let espn = client(EspnConfig::default());
        let err = espn
            .endpoint(2024, EntityKind::FantasyTeam)
            .expect_err("no league id");
        assert!(matches!(err, SourceError::Config { .. }));
    }

    #[test]
    fn auth_cookies_are_sent_when_configured() {
        let espn = client(EspnConfig {
            swid: Some("{SWID-1}".to_string()),
            espn_s2: Some("s2token".to_string()),
            ..EspnConfig::default()
        });
        let headers = espn.headers(EntityKind::Player).expect("headers");
        assert_eq!(headers[COOKIE], "SWID={SWID-1}; espn_s2=s2token");
        assert_eq!(headers["x-fantasy-filter"], PLAYERS_FILTER);

        let anonymous = client(EspnConfig::default());
        assert!(anonymous
            .headers(EntityKind::NflTeam)
            .expect("headers")
            .get(COOKIE)
            .is_none());
    }
}
