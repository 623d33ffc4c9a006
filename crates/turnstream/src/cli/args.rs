use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Fold, replay and inspect streamed conversation turns.
#[derive(Parser)]
#[command(version, about, long_about = None, author)]
pub struct Cli {
    /// Path to the session database (defaults to the user data directory)
    #[arg(long, env = "TURNSTREAM_STORE_PATH", global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Aggregate an event file and print the resulting message
    Fold {
        /// JSON lines file; each line is one event or an array of events (one batch)
        events: PathBuf,
    },
    /// Run a full turn against the local engine, publishing the event file
    Replay {
        /// JSON lines file; each line is one event or an array of events (one batch)
        events: PathBuf,
        /// Re-slice the events into batches of this size
        #[arg(long)]
        batch_size: Option<usize>,
        /// Session to append the turn to (a new one is created if omitted)
        #[arg(long)]
        session: Option<String>,
        /// User message that starts the turn
        #[arg(long, default_value = "replay")]
        message: String,
        /// Keep everything in memory instead of writing to the session database
        #[arg(long)]
        memory: bool,
    },
    /// List stored messages of a session
    History {
        #[arg(long)]
        session: String,
        /// Print full messages as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Manage user preferences
    Preferences {
        #[command(subcommand)]
        action: PreferencesCommands,
    },
}

#[derive(Subcommand, Clone)]
pub enum PreferencesCommands {
    /// Show the effective preferences
    Show,
    /// Print the preferences file location
    Path,
    /// Delete the preferences file
    Reset,
}
