use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ffdb_query::QueryLayer;
use ffdb_storage::Store;
use ffdb_sync::{render_summary_markdown, IngestConfig, IngestionPipeline};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_TOP_PLAYERS: u32 = 25;

#[derive(Debug, Parser)]
#[command(name = "ffdb")]
#[command(about = "Fantasy football data bank: ingest league data and query it")]
struct Cli {
    /// YAML config file; environment variables are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the configured season.
    #[arg(long, global = true)]
    season: Option<i32>,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create or verify the database schema.
    Init,
    /// Run one ingestion pass for the season.
    Ingest,
    /// Retry reference resolution for pending draft picks.
    Repair,
    #[command(subcommand)]
    Query(QueryCommand),
    /// Row counts and recent ingestion runs.
    Stats {
        #[arg(long, default_value_t = 10)]
        runs: u32,
    },
    /// Delete all canonical rows. The run ledger is kept.
    Reset {
        #[arg(long)]
        yes: bool,
    },
    Serve {
        #[arg(long, default_value_t = ffdb_web::DEFAULT_PORT)]
        port: u16,
    },
}

#[derive(Debug, Subcommand)]
enum QueryCommand {
    Players {
        #[arg(long)]
        position: Option<String>,
        /// Without a limit, every player at `--position` is listed.
        #[arg(long)]
        limit: Option<u32>,
    },
    Picks {
        /// Fantasy team id as the source reports it.
        #[arg(long)]
        team: String,
    },
    Board,
    Positions,
    NflTeams,
    Standings,
    /// NFL schedule, optionally for one week.
    Games {
        #[arg(long)]
        week: Option<i32>,
    },
    Keepers,
    /// Manual against auto-drafted picks per position.
    AutoDraft,
    /// Position mix and pick range per round.
    PickValue,
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let mut config = match &cli.config {
        Some(path) => IngestConfig::from_yaml_file(path)?,
        None => IngestConfig::from_env()?,
    };
    if let Some(season) = cli.season {
        config.season = season;
    }

    match cli.command.unwrap_or(Commands::Ingest) {
        Commands::Init => {
            let store = open_store(&config).await?;
            let counts = store.table_counts().await?;
            println!("schema ready at {}", store.path().display());
            print_json(&counts)?;
            store.close().await;
        }
        Commands::Ingest => {
            let pipeline = IngestionPipeline::from_config(&config).await?;
            let result = pipeline.run_once().await;
            pipeline.close().await;
            let report = result?;
            print!("{}", render_summary_markdown(&report));
            println!(
                "ingest complete: run_id={} season={} status={} failed={} unresolved={}",
                report.run_id,
                report.season,
                report.status.as_str(),
                report.total_failed(),
                report.total_unresolved()
            );
        }
        Commands::Repair => {
            let pipeline = IngestionPipeline::from_config(&config).await?;
            let result = pipeline.repair_pending_picks(config.season).await;
            pipeline.close().await;
            let outcome = result?;
            println!(
                "repair complete: season={} relinked={} still_pending={}",
                config.season, outcome.updated, outcome.unresolved
            );
        }
        Commands::Query(query) => {
            let store = open_store(&config).await?;
            run_query(QueryLayer::new(store), config.season, query).await?;
        }
        Commands::Stats { runs } => {
            let store = open_store(&config).await?;
            print_json(&store.table_counts().await?)?;
            for run in store.recent_runs(runs).await? {
                println!(
                    "{} season={} status={} finished_at={}",
                    run.run_id,
                    run.season,
                    run.status,
                    run.finished_at.to_rfc3339()
                );
            }
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("reset deletes every canonical row; pass --yes to confirm");
            }
            let store = open_store(&config).await?;
            store.reset().await?;
            println!("canonical tables cleared at {}", store.path().display());
            store.close().await;
        }
        Commands::Serve { port } => {
            let store = open_store(&config).await?;
            info!(port, database = %store.path().display(), "starting api");
            ffdb_web::serve(store, port).await?;
        }
    }

    Ok(())
}

async fn run_query(queries: QueryLayer, season: i32, query: QueryCommand) -> Result<()> {
    match query {
        QueryCommand::Players { position, limit } => {
            let rows = match (position.as_deref(), limit) {
                (Some(position), None) => queries.players_by_position(season, position).await?,
                (position, limit) => {
                    queries
                        .top_players(season, position, limit.unwrap_or(DEFAULT_TOP_PLAYERS))
                        .await?
                }
            };
            print_json(&rows)
        }
        QueryCommand::Picks { team } => {
            print_json(&queries.draft_picks_for_fantasy_team(season, &team).await?)
        }
        QueryCommand::Board => print_json(&queries.draft_board(season).await?),
        QueryCommand::Positions => print_json(&queries.position_draft_summary(season).await?),
        QueryCommand::NflTeams => print_json(&queries.nfl_team_draft_distribution(season).await?),
        QueryCommand::Standings => print_json(&queries.fantasy_standings(season).await?),
        QueryCommand::Games { week } => print_json(&queries.games_by_week(season, week).await?),
        QueryCommand::Keepers => print_json(&queries.keeper_picks(season).await?),
        QueryCommand::AutoDraft => print_json(&queries.auto_draft_summary(season).await?),
        QueryCommand::PickValue => print_json(&queries.pick_value_by_round(season).await?),
        QueryCommand::Summary => print_json(&queries.database_summary().await?),
    }
}

async fn open_store(config: &IngestConfig) -> Result<Store> {
    let store = Store::open(&config.database_path)
        .await
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    store.ensure_schema().await?;
    Ok(store)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Logs go to stderr so query output on stdout stays machine-readable.
fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Compact => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn games_query_takes_an_optional_week() {
        let cli = Cli::try_parse_from(["ffdb", "--season", "2023", "query", "games", "--week", "9"])
            .expect("parse");
        assert_eq!(cli.season, Some(2023));
        assert!(matches!(
            cli.command,
            Some(Commands::Query(QueryCommand::Games { week: Some(9) }))
        ));

        let cli = Cli::try_parse_from(["ffdb", "query", "games"]).expect("parse");
        assert!(matches!(
            cli.command,
            Some(Commands::Query(QueryCommand::Games { week: None }))
        ));
    }

    #[test]
    fn draft_analysis_subcommands_use_kebab_case() {
        for (name, expected) in [
            ("keepers", "Keepers"),
            ("auto-draft", "AutoDraft"),
            ("pick-value", "PickValue"),
        ] {
            let cli = Cli::try_parse_from(["ffdb", "query", name]).expect("parse");
            let Some(Commands::Query(query)) = cli.command else {
                panic!("`{name}` did not parse as a query");
            };
            assert_eq!(format!("{query:?}"), expected);
        }
    }

    #[test]
    fn bare_invocation_ingests() {
        let cli = Cli::try_parse_from(["ffdb"]).expect("parse");
        assert!(cli.command.is_none());
    }
}
