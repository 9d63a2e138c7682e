//! layersync: inspect streams, payloads and saved sessions offline, or run a
//! loopback host over stdio.
//!
//! # Usage
//!
//! ```text
//! layersync plan <snapshot.json> [--json]
//! layersync buckets <objects.json> [--max-bytes <n>] [--json]
//! layersync session list [--document <name>] [--json]
//! layersync session remove <document>
//! layersync serve [--document <name>]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    buckets::BucketsArgs, plan::PlanArgs, serve::ServeArgs, session::SessionCommand,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "layersync",
    version,
    about = "Inspect and drive document-to-stream layer sync",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the layer tree a bake of a stream snapshot would create.
    Plan(PlanArgs),

    /// Show how a list of portable objects would be split into upload buckets.
    Buckets(BucketsArgs),

    /// Inspect persisted per-document sessions.
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Answer host commands on stdin/stdout against an in-memory document
    /// and stream store.
    Serve(ServeArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Plan(args) => args.run(),
        Commands::Buckets(args) => args.run(),
        Commands::Session { command } => commands::session::run(command),
        Commands::Serve(args) => args.run(),
    }
}
