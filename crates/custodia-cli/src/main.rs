//! Custodia CLI — offline tooling for image verification policies.
//!
//! Inspect which images a policy would select from a resource, and lint
//! policy files before they reach the cluster.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

/// Custodia — supply-chain policy tooling for container images.
///
/// Evaluates image verification policies offline: extract and match the
/// images a policy would verify, and sanity-check policy documents.
#[derive(Parser)]
#[command(name = "custodia", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (repeat for more detail: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output logs as JSON (for machine consumption).
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// List the images a policy's rules would select from a resource.
    Images(commands::images::ImagesArgs),
    /// Parse, normalize, and sanity-check a policy file.
    Lint(commands::lint::LintArgs),
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Images(args) => commands::images::execute(&args),
        Commands::Lint(args) => commands::lint::execute(&args),
    }
}
