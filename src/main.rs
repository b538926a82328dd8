//! Signage takeoff CLI.
//!
//! Reads extracted page text from JSON and prints the reconciled
//! takeoff as JSON on stdout.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use signage_takeoff_lib::pipeline::agentic::HttpAnalysisClient;
use signage_takeoff_lib::pipeline::strategy::ExtractionPipeline;
use signage_takeoff_lib::pipeline::types::Page;
use signage_takeoff_lib::pipeline_config::EngineConfig;

#[derive(Parser)]
#[command(name = "signage-takeoff", version)]
#[command(about = "Reconcile construction bid documents into a signage takeoff")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract the takeoff from a pages file: [{"page_number": 1, "text": "..."}]
    Extract {
        /// Path to the pages JSON file
        pages: PathBuf,

        /// Engine configuration JSON (defaults apply for missing fields)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Allow the agent loop when deterministic extraction falls short
        #[arg(long)]
        agent: bool,

        /// Directory with pre-rendered page-<n>.png images
        #[arg(long, default_value = ".")]
        document_root: PathBuf,

        /// Agent cost budget in USD
        #[arg(long)]
        budget: Option<f64>,

        /// Agent model name
        #[arg(long)]
        model: Option<String>,
    },
}

fn main() -> Result<()> {
    signage_takeoff_lib::init_tracing();
    let args = Args::parse();

    match args.command {
        Command::Extract {
            pages,
            config,
            agent,
            document_root,
            budget,
            model,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(budget) = budget {
                config.agent.budget_usd = budget;
            }
            if let Some(model) = model {
                config.agent.model = model;
            }
            config.validate().context("Invalid configuration")?;

            let pages = load_pages(&pages)?;
            tracing::info!(pages = pages.len(), agent, "Starting extraction");

            let client = if agent {
                Some(HttpAnalysisClient::from_tuning(&config.agent).context("Agent loop unavailable")?)
            } else {
                None
            };

            let mut pipeline = ExtractionPipeline::new(config).with_document_root(document_root);
            if let Some(client) = &client {
                pipeline = pipeline.with_service(client);
            }
            let result = pipeline.run(&pages);

            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.apply_env().context("Invalid SIGNAGE_* environment override")
}

fn load_pages(path: &Path) -> Result<Vec<Page>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pages file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Malformed pages file {}", path.display()))
}
