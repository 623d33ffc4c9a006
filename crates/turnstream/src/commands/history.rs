use super::Command;
use crate::error::Error;
use async_trait::async_trait;
use eyre::Result;
use std::io::Write;
use std::path::PathBuf;
use turnstream_core::app::domain::{Message, SessionId};
use turnstream_core::app::session::{SessionStore, SqliteSessionStore};

pub struct HistoryCommand {
    pub store_path: PathBuf,
    pub session: SessionId,
    pub json: bool,
}

#[async_trait]
impl Command for HistoryCommand {
    async fn execute(&self) -> Result<()> {
        self.run().await.map_err(Into::into)
    }
}

pub fn format_line(message: &Message) -> String {
    let mut line = format!(
        "{} [{}] {}",
        message.timestamp,
        message.role,
        message.content.replace('\n', " ")
    );
    if !message.files.is_empty() {
        line.push_str(&format!(" (+{} files)", message.files.len()));
    }
    line
}

impl HistoryCommand {
    async fn run(&self) -> std::result::Result<(), Error> {
        if !self.store_path.exists() {
            return Err(Error::Config(format!(
                "No session database at {}",
                self.store_path.display()
            )));
        }
        let store = SqliteSessionStore::new(&self.store_path).await?;
        let messages = store.query_messages(&self.session).await?;

        let mut stdout = std::io::stdout();
        for message in &messages {
            if self.json {
                writeln!(stdout, "{}", serde_json::to_string(message)?)?;
            } else {
                writeln!(stdout, "{}", format_line(message))?;
            }
        }
        Ok(())
    }
}
