use clap::Parser;
use eyre::Result;

use turnstream::app::domain::SessionId;
use turnstream::cli::{Cli, Commands, PreferencesCommands};
use turnstream::commands::{
    Command,
    fold::FoldCommand,
    history::HistoryCommand,
    preferences::{PreferencesAction, PreferencesCommand},
    replay::ReplayCommand,
};
use turnstream::preferences::Preferences;
use std::path::PathBuf;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // Load .env file if it exists
    turnstream::cli::config::load_env()?;

    // Level configured via RUST_LOG
    turnstream::utils::tracing::init_tracing()?;

    let preferences = Preferences::load().unwrap_or_default();

    match cli.command {
        Commands::Fold { events } => FoldCommand { events }.execute().await,
        Commands::Replay {
            events,
            batch_size,
            session,
            message,
            memory,
        } => {
            let command = ReplayCommand {
                events,
                batch_size,
                session: session.map(SessionId::from_string),
                message,
                store_path: if memory {
                    None
                } else {
                    Some(resolve_store_path(cli.store, &preferences)?)
                },
                streaming: preferences.streaming.clone(),
            };
            command.execute().await
        }
        Commands::History { session, json } => {
            let command = HistoryCommand {
                store_path: resolve_store_path(cli.store, &preferences)?,
                session: SessionId::from_string(session),
                json,
            };
            command.execute().await
        }
        Commands::Preferences { action } => {
            let action = match action {
                PreferencesCommands::Show => PreferencesAction::Show,
                PreferencesCommands::Path => PreferencesAction::Path,
                PreferencesCommands::Reset => PreferencesAction::Reset,
            };
            PreferencesCommand { action }.execute().await
        }
    }
}

/// `--store` (or `TURNSTREAM_STORE_PATH`), then preferences, then the data directory.
fn resolve_store_path(flag: Option<PathBuf>, preferences: &Preferences) -> Result<PathBuf> {
    let path = match flag {
        Some(path) => path,
        None => preferences.store_path()?,
    };
    debug!(target: "turnstream::cli", store = %path.display(), "Resolved session database");
    Ok(path)
}
