//! Mandark CLI: check container image references against a trust policy.
//!
//! Loads a ClusterImagePolicy-shaped policy file, validates each image
//! against its authorities, and reports errors and warnings per image.

mod commands;
mod config;

use clap::Parser;
use color_eyre::eyre::Result;

/// Mandark: check container image references against a trust policy.
///
/// Every authority in the policy is checked concurrently; an image passes
/// when at least one authority vouches for it.
#[derive(Parser)]
#[command(name = "mandark", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (repeat for more detail: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Debug logging (same as -vv).
    #[arg(long, global = true)]
    debug: bool,

    /// Output logs as JSON (for machine consumption).
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Verify image references against the authorities in a policy file.
    Verify(commands::verify::VerifyArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let verbosity = if cli.debug {
        cli.verbose.max(2)
    } else {
        cli.verbose
    };
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Verify(args) => commands::verify::execute(args).await,
    }
}
