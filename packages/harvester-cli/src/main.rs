//! `harvest` - run the annual report harvesting pipeline from the command line.
//!
//! Every stage command reads the company list, hydrates records from the
//! cache and runs one stage. `all` runs every stage in order and `status`
//! prints what the cache holds for each company.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use harvester::pipeline::orchestrator::{hydrate, status};
use harvester::{export, input, CompanyRecord, Pipeline, PipelineConfig, Stage, StageCache};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod output;

use config::{load_env, open_cache, services, RunArgs};

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Find, archive and extract company annual reports")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    args: RunArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find each company's website and investor relations page
    FindSites,

    /// Crawl company sites for the latest annual report link
    FindReports,

    /// Download report files to the download directory
    DownloadReports,

    /// Upload downloaded reports to blob storage
    UploadReports,

    /// Extract financial data from the reports
    ExtractData,

    /// Classify companies into NACE sections and divisions
    ClassifyNace,

    /// Fill the output templates from cached results
    ExportData,

    /// Run every stage in order
    All,

    /// Show the cached state of every company
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = load_env(cli.args.env_file.as_deref()) {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(1);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harvester=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.args.pipeline_config()?;
    let mut records = input::load_companies(&cli.args.input, config.delimiter)
        .with_context(|| format!("Failed to read company list {}", cli.args.input.display()))?;
    tracing::info!(companies = records.len(), input = %cli.args.input.display(), "Company list loaded");

    let cache: Arc<dyn StageCache> = open_cache(&cli.args.cache_url()).await?;

    match cli.command {
        Commands::Status => {
            let statuses = status(cache.as_ref(), &records).await.context("Failed to read cache")?;
            output::print_status(&statuses);
        }
        Commands::ExportData => {
            hydrate(cache.as_ref(), &mut records, Stage::ExportData)
                .await
                .context("Failed to load cached results")?;
            let report = export::export(&records, &config).context("Export failed")?;
            output::print_export(&report);
        }
        Commands::All => {
            let pipeline = Pipeline::new(services(&Stage::ALL, cli.args.crawl_rps)?, cache, config);
            let summaries = pipeline.run_all(&mut records).await.context("Pipeline aborted")?;
            for summary in &summaries {
                output::print_summary(summary);
            }
        }
        Commands::FindSites => run_stage(&cli.args, Stage::FindSites, cache, config, &mut records).await?,
        Commands::FindReports => run_stage(&cli.args, Stage::FindReports, cache, config, &mut records).await?,
        Commands::DownloadReports => run_stage(&cli.args, Stage::DownloadReports, cache, config, &mut records).await?,
        Commands::UploadReports => run_stage(&cli.args, Stage::UploadReports, cache, config, &mut records).await?,
        Commands::ExtractData => run_stage(&cli.args, Stage::ExtractData, cache, config, &mut records).await?,
        Commands::ClassifyNace => run_stage(&cli.args, Stage::ClassifyNace, cache, config, &mut records).await?,
    }

    Ok(())
}

async fn run_stage(
    args: &RunArgs,
    stage: Stage,
    cache: Arc<dyn StageCache>,
    config: PipelineConfig,
    records: &mut [CompanyRecord],
) -> Result<()> {
    let pipeline = Pipeline::new(services(&[stage], args.crawl_rps)?, cache, config);
    let summary = pipeline
        .run_stage(stage, records)
        .await
        .with_context(|| format!("Stage {} aborted", stage))?;
    output::print_summary(&summary);
    Ok(())
}
