use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod script;

#[derive(Parser)]
#[command(name = "assay", about = "Validate and replay performance assessment scenarios")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a scenario file and print its hierarchy
    Validate(commands::validate::ValidateArgs),
    /// Replay a message script against a scenario
    Run(commands::run::RunArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Validate(args) => commands::validate::run(args),
        Commands::Run(args) => commands::run::run(args).await,
    }
}
