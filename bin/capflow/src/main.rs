mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "capflow")]
#[command(about = "Capability routing and pipeline planning over an engine manifest", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Engine manifest (.json, .json5, .yaml) or a name under ~/.capflow/manifests;
    /// defaults to ~/.capflow/manifest.json
    #[arg(short, long, global = true)]
    manifest: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show engines, their dependencies and the capability edges between them
    Graph,

    /// Check the graph for missing providers, cycles and provider conflicts
    Validate,

    /// Print engines in dependency-first load order
    Order,

    /// Expand capabilities with their transitive dependencies
    Expand {
        /// Requested capabilities
        #[arg(required = true)]
        capabilities: Vec<String>,

        /// Also deduplicate and group by engine
        #[arg(long)]
        optimize: bool,
    },

    /// Run a pipeline against tracing handlers and print the result
    Simulate {
        /// A pipeline name from the manifest, or a list of capabilities
        #[arg(required = true)]
        target: Vec<String>,

        /// Initial pipeline input as JSON
        #[arg(short, long, default_value = "{}")]
        input: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let manifest = cli.manifest.as_deref();
    match cli.command {
        Commands::Graph => {
            commands::graph_cmd::run(manifest).await?;
        }
        Commands::Validate => {
            commands::validate::run(manifest).await?;
        }
        Commands::Order => {
            commands::order::run(manifest).await?;
        }
        Commands::Expand { capabilities, optimize } => {
            commands::expand::run(manifest, &capabilities, optimize).await?;
        }
        Commands::Simulate { target, input } => {
            commands::simulate::run(manifest, &target, &input).await?;
        }
    }

    Ok(())
}
