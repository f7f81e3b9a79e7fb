use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use ffdb_adapters::{schedule_batch, EspnApiClient, RawBatch, SourceClient, StaticFileSource};
use ffdb_core::{EntityKind, RecordRef};
use ffdb_storage::{ArtifactStore, GameRefs, HttpFetcher, PickRefs, RunRecord, Store};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::normalize::{map_draft_pick, map_fantasy_team, map_game, map_nfl_team, map_player};
use crate::report::write_reports;
use crate::{EntityOutcome, IngestConfig, IngestError, IngestionReport, RecordError};

/// Which client feeds which stage.
#[derive(Clone, Default)]
pub struct SourceSet {
    by_scope: HashMap<EntityKind, Arc<dyn SourceClient>>,
}

impl std::fmt::Debug for SourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for kind in EntityKind::INGEST_ORDER {
            if let Some(client) = self.by_scope.get(&kind) {
                map.entry(&kind.as_str(), &client.source_id());
            }
        }
        map.finish()
    }
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// One client for every stage.
    pub fn uniform(client: Arc<dyn SourceClient>) -> Self {
        EntityKind::INGEST_ORDER
            .into_iter()
            .fold(Self::new(), |set, kind| set.with(kind, client.clone()))
    }

    pub fn with(mut self, scope: EntityKind, client: Arc<dyn SourceClient>) -> Self {
        self.by_scope.insert(scope, client);
        self
    }

    pub fn get(&self, scope: EntityKind) -> Option<&Arc<dyn SourceClient>> {
        self.by_scope.get(&scope)
    }

    /// A game client distinct from the NFL team client. Without one, games
    /// are taken from the schedules embedded in the team payload.
    pub fn schedule_source(&self) -> Option<&Arc<dyn SourceClient>> {
        let games = self.get(EntityKind::Game)?;
        match self.get(EntityKind::NflTeam) {
            Some(teams) if Arc::ptr_eq(games, teams) => None,
            _ => Some(games),
        }
    }

    /// A configured static file wins over the API for its stage. Games only
    /// get a client of their own when a schedule file is configured.
    pub fn from_config(config: &IngestConfig) -> anyhow::Result<Self> {
        let http = HttpFetcher::new(config.http.client_config()).context("building http client")?;
        let mut espn = EspnApiClient::new(config.espn.clone(), Arc::new(http));
        if config.archive_payloads {
            espn = espn.with_archive(ArtifactStore::new(config.artifacts_dir.clone()));
        }
        let espn: Arc<dyn SourceClient> = Arc::new(espn);

        let mut set = Self::new();
        for kind in EntityKind::INGEST_ORDER {
            let client: Arc<dyn SourceClient> = match (kind, config.files.file_for(kind)) {
                (_, Some(path)) => Arc::new(StaticFileSource::new(path, config.files.dialect)),
                (EntityKind::Game, None) => continue,
                (_, None) => espn.clone(),
            };
            set = set.with(kind, client);
        }
        Ok(set)
    }
}

/// Runs the staged ingestion against one store. Stages run strictly in
/// [`EntityKind::INGEST_ORDER`]; each stage rebuilds its lookups from
/// committed rows before resolving references.
#[derive(Debug)]
pub struct IngestionPipeline {
    store: Store,
    sources: SourceSet,
    season: i32,
    reports_dir: Option<PathBuf>,
}

impl IngestionPipeline {
    pub fn new(store: Store, sources: SourceSet, season: i32) -> Self {
        Self {
            store,
            sources,
            season,
            reports_dir: None,
        }
    }

    pub async fn from_config(config: &IngestConfig) -> Result<Self, IngestError> {
        let store = Store::open(&config.database_path).await?;
        store.ensure_schema().await?;
        let sources = SourceSet::from_config(config).map_err(IngestError::Config)?;
        Ok(Self::new(store, sources, config.season).with_reports_dir(config.reports_dir.clone()))
    }

    /// Write `ingestion_report.json` and `summary.md` under `<dir>/<run_id>/`.
    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = Some(dir.into());
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn season(&self) -> i32 {
        self.season
    }

    /// Release the store's connection once the pipeline is done.
    pub async fn close(self) {
        self.store.close().await;
    }

    pub async fn run_once(&self) -> Result<IngestionReport, IngestError> {
        let mut report = IngestionReport::start(self.season);
        let span = info_span!("ingest_run", run_id = %report.run_id, season = self.season);

        let result = self.run_stages(&mut report).instrument(span).await;
        report.finish(result.as_ref().err());
        let recorded = self.record(&report).await;

        match result {
            Ok(()) => {
                recorded?;
                info!(
                    run_id = %report.run_id,
                    status = report.status.as_str(),
                    failed = report.total_failed(),
                    unresolved = report.total_unresolved(),
                    "ingestion run finished"
                );
                Ok(report)
            }
            Err(err) => {
                if let Err(record_err) = recorded {
                    warn!(error = %record_err, "aborted run could not be recorded");
                }
                warn!(
                    run_id = %report.run_id,
                    error = %err,
                    retryable = err.is_retryable(),
                    "ingestion run aborted"
                );
                Err(err)
            }
        }
    }

    async fn run_stages(&self, report: &mut IngestionReport) -> Result<(), IngestError> {
        self.store.ensure_schema().await?;
        let mut team_batch: Option<RawBatch> = None;

        for kind in EntityKind::INGEST_ORDER {
            let batch = match (kind, self.sources.schedule_source()) {
                (EntityKind::Game, None) => {
                    let Some(teams) = &team_batch else {
                        debug!(kind = %kind, "no team payload to take games from, stage skipped");
                        continue;
                    };
                    report.sources.insert(kind, teams.source_id.clone());
                    schedule_batch(teams)
                }
                _ => {
                    let Some(source) = self.sources.get(kind) else {
                        debug!(kind = %kind, "no source configured, stage skipped");
                        continue;
                    };
                    report.sources.insert(kind, source.source_id().to_string());
                    source.fetch(self.season, kind).await?
                }
            };
            if let Some(archived) = &batch.archived {
                report
                    .archived_payloads
                    .push(archived.relative_path.display().to_string());
            }

            let mut outcome = EntityOutcome::default();
            let result = self.run_stage(kind, &batch, &mut outcome).await;
            report.outcomes.insert(kind, outcome);
            result?;

            if kind == EntityKind::NflTeam {
                team_batch = Some(batch);
            }
        }
        Ok(())
    }

    /// Ledger row always; report files only when a reports dir is set.
    async fn record(&self, report: &IngestionReport) -> Result<(), IngestError> {
        let report_json = serde_json::to_string(report)
            .context("serializing ingestion report")
            .map_err(IngestError::Report)?;
        self.store
            .record_run(&RunRecord {
                run_id: report.run_id,
                season: report.season,
                started_at: report.started_at,
                finished_at: report.finished_at,
                status: report.status.as_str().to_string(),
                report_json,
            })
            .await?;

        if let Some(dir) = &self.reports_dir {
            let written = write_reports(dir, report).await.map_err(IngestError::Report)?;
            info!(path = %written.display(), "reports written");
        }
        Ok(())
    }

    pub async fn ingest_nfl_teams(&self, batch: &RawBatch) -> Result<EntityOutcome, IngestError> {
        self.ingest_batch(EntityKind::NflTeam, batch).await
    }

    /// Games with a side whose NFL team is unknown are stored with that side
    /// pending and reported as unresolved.
    pub async fn ingest_games(&self, batch: &RawBatch) -> Result<EntityOutcome, IngestError> {
        self.ingest_batch(EntityKind::Game, batch).await
    }

    pub async fn ingest_fantasy_teams(&self, batch: &RawBatch) -> Result<EntityOutcome, IngestError> {
        self.ingest_batch(EntityKind::FantasyTeam, batch).await
    }

    /// Players whose NFL team is unknown are stored without a team and
    /// reported as unresolved.
    pub async fn ingest_players(&self, batch: &RawBatch) -> Result<EntityOutcome, IngestError> {
        self.ingest_batch(EntityKind::Player, batch).await
    }

    /// Picks referencing a player or fantasy team not yet stored are written
    /// as pending and reported as unresolved.
    pub async fn ingest_draft_picks(&self, batch: &RawBatch) -> Result<EntityOutcome, IngestError> {
        self.ingest_batch(EntityKind::DraftPick, batch).await
    }

    async fn ingest_batch(&self, kind: EntityKind, batch: &RawBatch) -> Result<EntityOutcome, IngestError> {
        let mut outcome = EntityOutcome::default();
        self.run_stage(kind, batch, &mut outcome).await?;
        Ok(outcome)
    }

    /// Counts land in `outcome` record by record, so a stage cut short by a
    /// store error still reports what it wrote.
    async fn run_stage(
        &self,
        kind: EntityKind,
        batch: &RawBatch,
        outcome: &mut EntityOutcome,
    ) -> Result<(), IngestError> {
        let span = stage_span(batch, kind);
        async {
            let result = match kind {
                EntityKind::NflTeam => self.load_nfl_teams(batch, outcome).await,
                EntityKind::Game => self.load_games(batch, outcome).await,
                EntityKind::FantasyTeam => self.load_fantasy_teams(batch, outcome).await,
                EntityKind::Player => self.load_players(batch, outcome).await,
                EntityKind::DraftPick => self.load_draft_picks(batch, outcome).await,
            };
            log_outcome(kind, outcome);
            result
        }
        .instrument(span)
        .await
    }

    async fn load_nfl_teams(&self, batch: &RawBatch, outcome: &mut EntityOutcome) -> Result<(), IngestError> {
        for record in batch.records() {
            let origin = batch.origin(record);
            match map_nfl_team(batch.dialect, origin.clone(), &record.payload) {
                Ok(Some(draft)) => {
                    let upserted = self.store.upsert_nfl_team(&draft).await?;
                    outcome.record_write(upserted.action);
                }
                Ok(None) => skipped(outcome, &origin),
                Err(err) => failed(outcome, origin, &err),
            }
        }
        Ok(())
    }

    async fn load_games(&self, batch: &RawBatch, outcome: &mut EntityOutcome) -> Result<(), IngestError> {
        let teams = self.store.nfl_team_keys().await?;
        for record in batch.records() {
            let origin = batch.origin(record);
            let draft = match map_game(batch.dialect, batch.season, origin.clone(), &record.payload) {
                Ok(Some(draft)) => draft,
                Ok(None) => {
                    skipped(outcome, &origin);
                    continue;
                }
                Err(err) => {
                    failed(outcome, origin, &err);
                    continue;
                }
            };

            let refs = GameRefs {
                home_team_id: teams.get(&draft.home_team_external_id).copied(),
                away_team_id: teams.get(&draft.away_team_external_id).copied(),
            };
            let home = Some(draft.home_team_external_id.as_str());
            let away = Some(draft.away_team_external_id.as_str());
            let unresolved = still_pending(home, refs.home_team_id, EntityKind::NflTeam)
                .into_iter()
                .chain(still_pending(away, refs.away_team_id, EntityKind::NflTeam))
                .collect::<Vec<_>>();

            let upserted = self.store.upsert_game(&draft, refs).await?;
            if unresolved.is_empty() {
                outcome.record_write(upserted.action);
            } else {
                unresolved_ref(outcome, origin, &unresolved);
            }
        }
        Ok(())
    }

    async fn load_fantasy_teams(&self, batch: &RawBatch, outcome: &mut EntityOutcome) -> Result<(), IngestError> {
        for record in batch.records() {
            let origin = batch.origin(record);
            match map_fantasy_team(batch.dialect, batch.season, origin.clone(), &record.payload) {
                Ok(Some(draft)) => {
                    let upserted = self.store.upsert_fantasy_team(&draft).await?;
                    outcome.record_write(upserted.action);
                }
                Ok(None) => skipped(outcome, &origin),
                Err(err) => failed(outcome, origin, &err),
            }
        }
        Ok(())
    }

    async fn load_players(&self, batch: &RawBatch, outcome: &mut EntityOutcome) -> Result<(), IngestError> {
        let teams = self.store.nfl_team_keys().await?;
        for record in batch.records() {
            let origin = batch.origin(record);
            let draft = match map_player(batch.dialect, batch.season, origin.clone(), &record.payload) {
                Ok(Some(draft)) => draft,
                Ok(None) => {
                    skipped(outcome, &origin);
                    continue;
                }
                Err(err) => {
                    failed(outcome, origin, &err);
                    continue;
                }
            };

            let team_id = draft
                .team_external_id
                .as_ref()
                .and_then(|external_id| teams.get(external_id).copied());
            let unresolved: Vec<_> =
                still_pending(draft.team_external_id.as_deref(), team_id, EntityKind::NflTeam)
                    .into_iter()
                    .collect();

            let upserted = self.store.upsert_player(&draft, team_id).await?;
            if unresolved.is_empty() {
                outcome.record_write(upserted.action);
            } else {
                unresolved_ref(outcome, origin, &unresolved);
            }
        }
        Ok(())
    }

    async fn load_draft_picks(&self, batch: &RawBatch, outcome: &mut EntityOutcome) -> Result<(), IngestError> {
        let mut lookups = SeasonLookups::default();
        for record in batch.records() {
            let origin = batch.origin(record);
            let draft = match map_draft_pick(batch.dialect, batch.season, origin.clone(), &record.payload) {
                Ok(Some(draft)) => draft,
                Ok(None) => {
                    skipped(outcome, &origin);
                    continue;
                }
                Err(err) => {
                    failed(outcome, origin, &err);
                    continue;
                }
            };

            let keys = lookups.for_season(&self.store, draft.season).await?;
            let (refs, unresolved) =
                keys.resolve(&draft.fantasy_team_external_id, &draft.player_external_id);

            let upserted = self.store.upsert_draft_pick(&draft, refs).await?;
            if unresolved.is_empty() {
                outcome.record_write(upserted.action);
            } else {
                unresolved_ref(outcome, origin, &unresolved);
            }
        }
        Ok(())
    }

    /// Resolve pending picks of `season` against the rows stored now, without
    /// fetching anything. `updated` counts picks that became fully linked.
    pub async fn repair_pending_picks(&self, season: i32) -> Result<EntityOutcome, IngestError> {
        let span = info_span!("repair_pending_picks", season);
        async {
            let pending = self.store.pending_draft_picks(season).await?;
            let mut lookups = SeasonLookups::default();
            let keys = lookups.for_season(&self.store, season).await?;
            let mut outcome = EntityOutcome::default();

            for pick in &pending {
                let origin = RecordRef::new("repair", pick.overall_pick_number.to_string());
                let fantasy_team = pick.pending_fantasy_team_external_id.as_deref().unwrap_or_default();
                let player = pick.pending_player_external_id.as_deref().unwrap_or_default();
                let (mut refs, _) = keys.resolve(fantasy_team, player);
                if pick.fantasy_team_id.is_some() {
                    refs.fantasy_team_id = pick.fantasy_team_id;
                }
                if pick.player_id.is_some() {
                    refs.player_id = pick.player_id;
                }

                let action = self.store.relink_draft_pick(pick, refs).await?;
                let unresolved = still_pending(
                    pick.pending_fantasy_team_external_id.as_deref(),
                    refs.fantasy_team_id,
                    EntityKind::FantasyTeam,
                )
                .into_iter()
                .chain(still_pending(
                    pick.pending_player_external_id.as_deref(),
                    refs.player_id,
                    EntityKind::Player,
                ))
                .collect::<Vec<_>>();

                if unresolved.is_empty() {
                    outcome.record_write(action);
                } else {
                    unresolved_ref(&mut outcome, origin, &unresolved);
                }
            }

            info!(
                season,
                pending = pending.len(),
                repaired = outcome.updated,
                still_unresolved = outcome.unresolved,
                "pending picks repaired"
            );
            Ok::<_, IngestError>(outcome)
        }
        .instrument(span)
        .await
    }
}

/// Surrogate key lookups for one season, built once from committed rows.
#[derive(Debug, Default)]
struct SeasonKeys {
    fantasy_teams: HashMap<String, Uuid>,
    players: HashMap<String, Uuid>,
}

impl SeasonKeys {
    fn resolve(&self, fantasy_team: &str, player: &str) -> (PickRefs, Vec<RecordError>) {
        let refs = PickRefs {
            fantasy_team_id: self.fantasy_teams.get(fantasy_team).copied(),
            player_id: self.players.get(player).copied(),
        };
        let unresolved = still_pending(Some(fantasy_team), refs.fantasy_team_id, EntityKind::FantasyTeam)
            .into_iter()
            .chain(still_pending(Some(player), refs.player_id, EntityKind::Player))
            .collect();
        (refs, unresolved)
    }
}

#[derive(Debug, Default)]
struct SeasonLookups {
    seasons: HashMap<i32, SeasonKeys>,
}

impl SeasonLookups {
    async fn for_season(&mut self, store: &Store, season: i32) -> Result<&SeasonKeys, IngestError> {
        match self.seasons.entry(season) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let keys = SeasonKeys {
                    fantasy_teams: store.fantasy_team_keys(season).await?,
                    players: store.player_keys(season).await?,
                };
                debug!(
                    season,
                    fantasy_teams = keys.fantasy_teams.len(),
                    players = keys.players.len(),
                    "lookups built"
                );
                Ok(entry.insert(keys))
            }
        }
    }
}

fn still_pending(external_id: Option<&str>, resolved: Option<Uuid>, kind: EntityKind) -> Option<RecordError> {
    match (external_id, resolved) {
        (Some(external_id), None) => Some(RecordError::Unresolved {
            kind,
            external_id: external_id.to_string(),
        }),
        _ => None,
    }
}

fn stage_span(batch: &RawBatch, kind: EntityKind) -> tracing::Span {
    info_span!(
        "ingest_stage",
        kind = kind.as_str(),
        source = %batch.source_id,
        season = batch.season,
        records = batch.len()
    )
}

fn skipped(outcome: &mut EntityOutcome, origin: &RecordRef) {
    debug!(record = %origin, "record not fantasy-relevant, skipped");
    outcome.record_skip();
}

fn failed(outcome: &mut EntityOutcome, origin: RecordRef, err: &RecordError) {
    warn!(record = %origin, error = %err, "record rejected");
    outcome.record_failure(origin, err);
}

fn unresolved_ref(outcome: &mut EntityOutcome, origin: RecordRef, reasons: &[RecordError]) {
    for reason in reasons {
        warn!(record = %origin, %reason, "reference left pending");
    }
    outcome.record_unresolved(origin, reasons);
}

fn log_outcome(kind: EntityKind, outcome: &EntityOutcome) {
    info!(
        kind = kind.as_str(),
        inserted = outcome.inserted,
        updated = outcome.updated,
        unchanged = outcome.unchanged,
        unresolved = outcome.unresolved,
        skipped = outcome.skipped,
        failed = outcome.failed,
        "stage finished"
    );
}

