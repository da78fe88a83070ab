//! Survey ETL - incremental survey analytics loader

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use survey_etl::{
    config::EtlConfig,
    db::{self, DbConfig},
    models::PackageName,
    pipeline::{PhaseReport, PipelineOrchestrator},
    store::{PgAnalyticsStore, PgSourceReader, RunCycleStore},
};
use survey_etl_common::logging::{init_logging, LogConfig, LogLevel};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "survey-etl")]
#[command(author, version, about = "Incremental survey analytics ETL")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one or both pipeline phases
    Run {
        #[arg(short, long, value_enum, default_value_t = PipelineArg::All)]
        pipeline: PipelineArg,
    },

    /// Show recent run cycles
    Status {
        #[arg(short, long, value_enum)]
        pipeline: Option<PipelineArg>,

        /// Number of run cycles to show
        #[arg(short, long, default_value_t = 10)]
        limit: i64,
    },

    /// Apply analytics schema migrations and exit
    Migrate,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum PipelineArg {
    Survey,
    Submission,
    All,
}

impl PipelineArg {
    fn package(self) -> Option<PackageName> {
        match self {
            PipelineArg::Survey => Some(PackageName::Survey),
            PipelineArg::Submission => Some(PackageName::Submission),
            PipelineArg::All => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("survey-etl")
        .build()
        .overlay_env()?;

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run { pipeline } => run(pipeline).await,
        Command::Status { pipeline, limit } => {
            status(pipeline.and_then(PipelineArg::package), limit).await
        }
        Command::Migrate => migrate().await,
    }
}

async fn run(pipeline: PipelineArg) -> Result<()> {
    let config = EtlConfig::load().context("Failed to load configuration")?;

    let source_pool = db::create_pool(&config.source)
        .await
        .context("Failed to connect to source database")?;
    let analytics_pool = db::create_pool(&config.analytics)
        .await
        .context("Failed to connect to analytics database")?;

    db::health_check(&source_pool).await?;
    db::health_check(&analytics_pool).await?;

    if config.pipeline.run_migrations {
        db::run_migrations(&analytics_pool).await?;
    }

    let analytics = Arc::new(PgAnalyticsStore::new(analytics_pool));
    let orchestrator = PipelineOrchestrator::new(
        Arc::new(PgSourceReader::new(source_pool)),
        analytics.clone(),
        analytics,
        config.pipeline,
    );

    let phases = match pipeline.package() {
        Some(package) => vec![orchestrator.run(package).await?],
        None => orchestrator.run_all().await?.phases,
    };

    for phase in &phases {
        log_phase(phase);
    }

    info!("ETL run complete");
    Ok(())
}

fn log_phase(phase: &PhaseReport) {
    info!(
        package = %phase.package,
        run_cycle_id = phase.run_cycle_id,
        watermark = %phase.watermark,
        window_end = %phase.window_end,
        written = phase.stats.units_written(),
        skipped = phase.stats.units_skipped,
        failed = phase.stats.units_failed,
        rows = phase.stats.rows_written,
        "Phase summary"
    );
}

async fn status(package: Option<PackageName>, limit: i64) -> Result<()> {
    let config = DbConfig::from_env("ANALYTICS")?;
    config.validate("analytics")?;

    let store = PgAnalyticsStore::new(db::create_pool(&config).await?);
    let runs = store.recent_runs(package, limit).await?;

    if runs.is_empty() {
        println!("No run cycles recorded");
        return Ok(());
    }

    println!(
        "{:>8}  {:<10}  {:<25}  {:<25}  {:<7}  DESCRIPTION",
        "ID", "PACKAGE", "STARTED", "WINDOW END", "SUCCESS"
    );
    for run in runs {
        println!(
            "{:>8}  {:<10}  {:<25}  {:<25}  {:<7}  {}",
            run.id,
            run.package_name,
            run.start_time.format("%Y-%m-%d %H:%M:%S %Z").to_string(),
            run.end_time
                .map(|t| t.format("%Y-%m-%d %H:%M:%S %Z").to_string())
                .unwrap_or_else(|| "-".to_string()),
            run.success,
            run.description
        );
    }

    Ok(())
}

async fn migrate() -> Result<()> {
    let config = DbConfig::from_env("ANALYTICS")?;
    config.validate("analytics")?;

    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    info!("Migrations complete");
    Ok(())
}
