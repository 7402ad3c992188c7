//! Converge CLI
//!
//! The `converge` command drives scripted convergence runs and parallel
//! batches, and inspects what they leave behind.
//!
//! ## Commands
//!
//! - `simulate`: Run the convergence controller over a scripted scenario
//! - `batch`: Run a scripted parallel batch and print its aggregation report
//! - `patterns`: List records in a learning store
//! - `report`: Verify and print a persisted run report

mod scenario;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use converge_core::learning::{relevance_order, FsLearningStore, LearningStore};
use converge_core::{
    read_run_report, render_summary_md, write_run_report, ConvergenceController, EngineConfig,
    ParallelCoordinator,
};

use scenario::Scenario;

#[derive(Parser)]
#[command(name = "converge")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Convergent verification for agent-driven work", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the convergence controller over a scripted scenario
    Simulate {
        /// Scenario file (JSON)
        #[arg(long)]
        scenario: PathBuf,

        /// Engine configuration (TOML)
        #[arg(long, env = "CONVERGE_CONFIG")]
        config: Option<PathBuf>,

        /// Learning store directory (overrides the config file)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Directory to persist the run report under
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Seed for methodology selection once the scripted order runs out
        #[arg(long)]
        seed: Option<u64>,

        /// Print a markdown summary instead of plain text
        #[arg(long)]
        markdown: bool,
    },

    /// Run a scripted parallel batch
    Batch {
        /// Scenario file (JSON) with a `batch` section
        #[arg(long)]
        scenario: PathBuf,

        /// Engine configuration (TOML)
        #[arg(long, env = "CONVERGE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// List learned patterns and antipatterns
    Patterns {
        /// Learning store directory
        #[arg(long)]
        store: PathBuf,

        /// Only records sharing one of these tags
        #[arg(long)]
        tag: Vec<String>,
    },

    /// Verify and print a persisted run report
    Report {
        /// Run ID
        #[arg(long)]
        run: String,

        /// Directory the report was written under
        #[arg(long)]
        dir: PathBuf,

        /// Print a markdown summary instead of the full JSON report
        #[arg(long)]
        markdown: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    converge_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Simulate {
            scenario,
            config,
            store,
            report_dir,
            seed,
            markdown,
        } => {
            cmd_simulate(
                &scenario,
                config.as_deref(),
                store,
                report_dir.as_deref(),
                seed,
                markdown,
            )
            .await
        }
        Commands::Batch { scenario, config } => cmd_batch(&scenario, config.as_deref()).await,
        Commands::Patterns { store, tag } => cmd_patterns(&store, &tag).await,
        Commands::Report { run, dir, markdown } => cmd_report(&run, &dir, markdown),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config: {:?}", path)),
        None => Ok(EngineConfig::default()),
    }
}

/// Token cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

async fn cmd_simulate(
    scenario_path: &Path,
    config: Option<&Path>,
    store: Option<PathBuf>,
    report_dir: Option<&Path>,
    seed: Option<u64>,
    markdown: bool,
) -> Result<()> {
    let config = load_config(config)?;
    let scenario = Scenario::load(scenario_path)?;
    let registry = scenario.registry()?;

    let mut controller = ConvergenceController::new(Arc::new(scenario.fixer()))
        .with_selector(Arc::new(scenario.selector(seed)))
        .with_batch_config(config.batch.clone());

    if let Some(dir) = store.or_else(|| config.learning.store_dir.clone()) {
        let learning = FsLearningStore::open(&dir)
            .with_context(|| format!("Failed to open learning store: {:?}", dir))?;
        controller = controller.with_learning_store(Arc::new(learning));
    }

    let result = controller
        .run(&scenario.subject, &registry, &config.convergence, &cancel_on_ctrl_c())
        .await
        .context("Convergence run rejected")?;

    if let Some(dir) = report_dir {
        let path = write_run_report(&result, dir)
            .with_context(|| format!("Failed to write run report under {:?}", dir))?;
        info!(run_id = %result.run_id, path = ?path, "run report written");
    }

    if markdown {
        println!("{}", render_summary_md(&result));
    } else {
        println!(
            "run {} for {}: {} after {} passes ({}ms)",
            result.run_id,
            result.subject_id,
            result.termination_reason,
            result.passes.len(),
            result.duration_ms()
        );
        println!("{}", result.summary);
        for escalation in &result.escalations {
            println!("  ! {}", escalation.reason());
        }
    }

    if !result.converged {
        anyhow::bail!(
            "Run {} did not converge: {}",
            result.run_id,
            result
                .escalation_reason
                .as_deref()
                .unwrap_or("pass budget exhausted")
        );
    }
    Ok(())
}

async fn cmd_batch(scenario_path: &Path, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let scenario = Scenario::load(scenario_path)?;
    let operations = scenario.operations();
    if operations.is_empty() {
        anyhow::bail!("Scenario {:?} has no batch operations", scenario_path);
    }

    let report = ParallelCoordinator::new(config.batch)
        .run(operations, &cancel_on_ctrl_c())
        .await
        .context("Batch failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize batch report")?
    );
    Ok(())
}

async fn cmd_patterns(store_dir: &Path, tags: &[String]) -> Result<()> {
    let store = FsLearningStore::open(store_dir)
        .with_context(|| format!("Failed to open learning store: {:?}", store_dir))?;

    let records = if tags.is_empty() {
        let mut all = store.all().await.context("Failed to list learning records")?;
        all.sort_by(relevance_order);
        all
    } else {
        store
            .find_relevant(tags)
            .await
            .context("Failed to query learning records")?
    };

    if records.is_empty() {
        println!("No learning records found.");
        return Ok(());
    }

    for record in records {
        let tags: Vec<&str> = record.domain_tags.iter().map(String::as_str).collect();
        println!(
            "{:<12} {:<32} {:>5.1}% ({}/{}) [{}]",
            record.kind.as_str(),
            record.name,
            record.success_rate * 100.0,
            record.successes,
            record.times_observed,
            tags.join(", ")
        );
    }
    Ok(())
}

fn cmd_report(run_id: &str, dir: &Path, markdown: bool) -> Result<()> {
    let result = read_run_report(run_id, dir)
        .with_context(|| format!("Failed to load run report {} from {:?}", run_id, dir))?;

    if markdown {
        println!("{}", render_summary_md(&result));
    } else {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize run report")?
        );
    }
    println!("Report digest verified for run {}", run_id);
    Ok(())
}
