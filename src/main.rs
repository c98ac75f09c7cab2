//! flowmark - workflow and state machine tooling
//!
//! Validates, exports and inspects workflow definitions, applies transitions
//! to JSON entities and manages their audit trails.

mod commands;
mod config;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowmark")]
#[command(about = "Workflow and state machine transition engine")]
#[command(version)]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, env = "FLOWMARK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Where a workflow definition comes from.
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct InputArgs {
    /// Path to the workflow JSON/YAML file
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Workflow definition as a JSON string
    #[arg(short, long)]
    json: Option<String>,

    /// Workflow name, looked up in the workflows directory
    #[arg(short, long)]
    workflow: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a workflow for correctness
    Validate {
        #[command(flatten)]
        source: InputArgs,
    },

    /// Export a workflow to Graphviz (DOT) or Mermaid
    Export {
        #[command(flatten)]
        source: InputArgs,

        /// Output file path (e.g., workflow.dot, workflow.md)
        #[arg(short, long)]
        output: PathBuf,

        /// Export format: graphviz (dot) or mermaid (md)
        #[arg(short, long, default_value = "dot")]
        format: String,
    },

    /// List transitions available from the given state(s)
    Transitions {
        #[command(flatten)]
        source: InputArgs,

        /// Current state(s), comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        state: Vec<String>,
    },

    /// Apply a transition to an entity stored as a JSON file
    Apply {
        #[command(flatten)]
        source: InputArgs,

        /// Path to the entity JSON file (updated in place)
        #[arg(short, long)]
        entity: PathBuf,

        /// Transition to apply
        #[arg(short, long)]
        transition: String,
    },

    /// Show the audit trail of an entity
    History {
        /// Workflow name
        workflow: String,

        /// Entity ID
        entity_id: String,
    },

    /// Delete the audit trail of an entity
    ClearHistory {
        /// Workflow name
        workflow: String,

        /// Entity ID
        entity_id: String,
    },
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };

    tracing::debug!(
        workflows_dir = %config.storage.workflows_dir.display(),
        audit_dir = %config.storage.audit_dir.display(),
        "configuration loaded"
    );

    match commands::execute(cli.command, &config) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
