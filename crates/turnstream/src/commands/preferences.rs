use super::Command;
use crate::error::Error;
use async_trait::async_trait;
use eyre::Result;
use std::io::Write;
use turnstream_core::preferences::Preferences;

pub struct PreferencesCommand {
    pub action: PreferencesAction,
}

pub enum PreferencesAction {
    Show,
    Path,
    Reset,
}

#[async_trait]
impl Command for PreferencesCommand {
    async fn execute(&self) -> Result<()> {
        match &self.action {
            PreferencesAction::Show => self.show().map_err(Into::into),
            PreferencesAction::Path => self.path().map_err(Into::into),
            PreferencesAction::Reset => self.reset().map_err(Into::into),
        }
    }
}

impl PreferencesCommand {
    fn show(&self) -> std::result::Result<(), Error> {
        let prefs = Preferences::load()?;
        let path = Preferences::config_path()?;

        let mut stdout = std::io::stdout();
        writeln!(stdout, "Preferences file: {}", path.display())?;
        writeln!(stdout, "Session database: {}", prefs.store_path()?.display())?;
        writeln!(stdout, "\n{}", toml::to_string_pretty(&prefs)?)?;
        Ok(())
    }

    fn path(&self) -> std::result::Result<(), Error> {
        let path = Preferences::config_path()?;
        let mut stdout = std::io::stdout();
        writeln!(stdout, "{}", path.display())?;
        Ok(())
    }

    fn reset(&self) -> std::result::Result<(), Error> {
        let path = Preferences::config_path()?;

        let mut stdout = std::io::stdout();
        if path.exists() {
            std::fs::remove_file(&path)?;
            writeln!(stdout, "Preferences reset to defaults")?;
        } else {
            writeln!(stdout, "No preferences file found")?;
        }
        Ok(())
    }
}
