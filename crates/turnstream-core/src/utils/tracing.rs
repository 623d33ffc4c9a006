use chrono::Local;
use std::io;
use tracing_appender::rolling;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

use super::paths::AppPaths;

fn already_initialized(e: impl std::fmt::Display) -> io::Error {
    io::Error::other(format!("Failed to set global default subscriber: {e}"))
}

/// Initialize tracing with a file logger writing to a timestamp-named file in
/// the user data directory, or stderr when no data directory is available.
/// The filter comes from the RUST_LOG environment variable.
pub fn init_tracing() -> io::Result<()> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");

    if let Some(log_dir) = AppPaths::log_dir() {
        std::fs::create_dir_all(&log_dir)?;
        let file_name = format!("{timestamp}.log");
        let file_appender = rolling::never(log_dir.clone(), &file_name);

        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::Layer::new()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(EnvFilter::from_default_env());

        tracing::subscriber::set_global_default(subscriber).map_err(already_initialized)?;

        tracing::debug!(
            target: "turnstream::utils::tracing",
            path = %log_dir.join(file_name).display(),
            "Tracing initialized with file output. Filter configured via RUST_LOG env var."
        );
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::Layer::default()
                    .with_writer(io::stderr)
                    .with_ansi(true)
                    .with_target(true),
            )
            .with(EnvFilter::from_default_env());

        tracing::subscriber::set_global_default(subscriber).map_err(already_initialized)?;

        tracing::debug!(
            target: "turnstream::utils::tracing",
            "Tracing initialized with stderr output. Filter configured via RUST_LOG env var."
        );
    }

    Ok(())
}
