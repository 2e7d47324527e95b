use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use slate_sync::{PromptReport, ScaffoldReport, SlateConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "slate-cli")]
#[command(about = "Reconcile a personal game list against the scores feed")]
struct Cli {
    /// Directory holding my_events.json, events.json and the game files.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// YAML settings file; defaults to ./slate.yaml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download the feed and replace events.json.
    Fetch {
        /// Replay a saved feed response instead of calling the API.
        #[arg(long)]
        from_file: Option<PathBuf>,
    },
    /// Create empty game files for matched events.
    Scaffold,
    /// Print a content prompt for every empty game file.
    Prompts,
    /// Scaffold, then print prompts.
    Sync,
}

fn print_scaffold(report: &ScaffoldReport) {
    eprintln!(
        "scaffold complete: run_id={} created={} existing={} unmatched={} malformed={} collisions={}",
        report.run_id,
        report.created.len(),
        report.existing.len(),
        report.skips.unmatched_intents,
        report.skips.malformed_intents,
        report.collisions.len()
    );
}

fn print_prompts(report: &PromptReport, rendered: &[String]) {
    for text in rendered {
        println!("{text}");
    }
    eprintln!(
        "prompts complete: run_id={} prompts={} unmatched_files={} unparsable_files={} unreadable_files={} collisions={}",
        report.run_id,
        report.units_of_work(),
        report.skips.unmatched_files,
        report.skips.unparsable_files,
        report.skips.unreadable_files,
        report.collisions.len()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = SlateConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Fetch { from_file } => {
            let summary = slate_sync::run_fetch(&config, from_file).await?;
            eprintln!(
                "fetch complete: feed={} total={} valid={} path={} sha256={}",
                summary.feed_id, summary.total, summary.valid, summary.path, summary.content_hash
            );
        }
        Commands::Scaffold => {
            let report = slate_sync::run_scaffold(&config)?;
            print_scaffold(&report);
        }
        Commands::Prompts => {
            let (report, rendered) = slate_sync::run_prompts(&config)?;
            print_prompts(&report, &rendered);
        }
        Commands::Sync => {
            let summary = slate_sync::run_sync(&config)?;
            print_scaffold(&summary.scaffold);
            print_prompts(&summary.prompts, &summary.rendered);
        }
    }

    Ok(())
}
