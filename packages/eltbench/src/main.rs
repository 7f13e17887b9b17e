//! Benchmark CLI: evaluate LLM agents on warehouse transformation tasks.

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

mod cmd;

/// Evaluate LLM agents on SQL/DBT transformation tasks.
#[derive(Parser)]
#[command(name = "eltbench", author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the multi-agent pipeline over selected examples.
    Run(cmd::run::Config),

    /// Run the SQL-of-Thought pipeline for one workspace.
    Sot(cmd::sot::Config),

    /// List available examples.
    List(cmd::list::Config),
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(
                    tracing_subscriber::EnvFilter::builder()
                        .with_default_directive(LevelFilter::INFO.into())
                        .from_env_lossy(),
                ),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(config) => cmd::run::main(config),
        Commands::Sot(config) => cmd::sot::main(config),
        Commands::List(config) => cmd::list::main(config),
    }
}
