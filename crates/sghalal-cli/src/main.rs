use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sghalal_sync::{HarvestConfig, HarvestError, HarvestPipeline};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sghalal-cli")]
#[command(about = "Singapore halal establishment harvester")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one harvest and publish the results.
    Harvest(HarvestArgs),
    /// Run harvests on the configured cron schedule until interrupted.
    Schedule(HarvestArgs),
    /// Summarize the currently published dataset.
    Report {
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Print the effective search term list.
    Terms(TermsArgs),
}

#[derive(Debug, Default, Args)]
struct TermsArgs {
    #[arg(long)]
    terms_file: Option<PathBuf>,
    /// Search term to use instead of the terms file; repeatable.
    #[arg(long = "term")]
    terms: Vec<String>,
}

impl TermsArgs {
    fn apply(self, config: &mut HarvestConfig) {
        if let Some(path) = self.terms_file {
            config.terms_file = path;
        }
        config.term_overrides = self.terms;
    }

    fn into_config(self) -> HarvestConfig {
        let mut config = HarvestConfig::from_env();
        self.apply(&mut config);
        config
    }
}

#[derive(Debug, Default, Args)]
struct HarvestArgs {
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[command(flatten)]
    terms: TermsArgs,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long)]
    budget_secs: Option<u64>,
}

impl HarvestArgs {
    fn into_config(self) -> HarvestConfig {
        let mut config = HarvestConfig::from_env();
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        self.terms.apply(&mut config);
        if let Some(n) = self.concurrency {
            config.concurrency = n;
        }
        if let Some(secs) = self.budget_secs {
            config.run_budget_secs = secs;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sghalal=info".parse()?))
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        if let Some(HarvestError::NoRecords { failed_terms, .. }) = err.downcast_ref() {
            error!(failed_terms = ?failed_terms, "harvest produced nothing to publish");
        }
        return Err(err);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command.unwrap_or(Commands::Harvest(HarvestArgs::default())) {
        Commands::Harvest(args) => {
            let pipeline = HarvestPipeline::new(args.into_config())?;
            let summary = pipeline.run_once().await?;
            println!(
                "harvest complete: run_id={} establishments={} partial={} failed_terms={} \
                 output_dir={}",
                summary.run_id,
                summary.total_establishments,
                summary.partial,
                summary.failed_terms.len(),
                summary.output_dir
            );
        }
        Commands::Schedule(args) => {
            let mut config = args.into_config();
            config.scheduler_enabled = true;
            let pipeline = Arc::new(HarvestPipeline::new(config)?);
            let mut sched = pipeline
                .maybe_build_scheduler()
                .await?
                .context("scheduler was not built")?;
            sched.start().await.context("starting scheduler")?;
            info!(cron = %pipeline.config().sync_cron, "scheduler running; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Report { output_dir } => {
            let dir = output_dir.unwrap_or_else(|| HarvestConfig::from_env().output_dir);
            print!("{}", sghalal_sync::report_markdown(&dir)?);
        }
        Commands::Terms(args) => {
            for term in args.into_config().search_terms()? {
                println!("{term:?}");
            }
        }
    }
    Ok(())
}
