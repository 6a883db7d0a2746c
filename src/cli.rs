//! CLI argument parsing for the frota-import binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "frota-import", about = "Asynchronous spreadsheet import pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP API server (default if no subcommand given)
    Serve,
    /// Start the queue worker that processes import jobs
    Worker,
    /// Run database migrations and exit
    Migrate,
}
