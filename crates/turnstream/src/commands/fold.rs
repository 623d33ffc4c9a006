use super::Command;
use crate::error::Error;
use crate::script::load_batches;
use async_trait::async_trait;
use eyre::Result;
use std::io::Write;
use std::path::PathBuf;
use turnstream_core::app::domain::{
    AggregationState, AppId, EventId, Message, MessageId, SessionId, StreamEvent, fold,
};

pub struct FoldCommand {
    pub events: PathBuf,
}

#[async_trait]
impl Command for FoldCommand {
    async fn execute(&self) -> Result<()> {
        self.run().map_err(Into::into)
    }
}

/// Fold `batches` into a fresh assistant message.
pub fn fold_batches(batches: &[Vec<StreamEvent>]) -> AggregationState {
    let shell = Message::assistant_shell(
        MessageId::from_string("folded"),
        SessionId::from_string("local"),
        AppId::from_string("local"),
    )
    .with_timestamp(0);
    let mut state = AggregationState::new(shell, EventId::from_string("fold"));
    for batch in batches {
        fold(&mut state, batch);
    }
    state
}

impl FoldCommand {
    fn run(&self) -> std::result::Result<(), Error> {
        let batches = load_batches(&self.events)?;
        let state = fold_batches(&batches);

        let mut stdout = std::io::stdout();
        writeln!(
            stdout,
            "{}",
            serde_json::to_string_pretty(&state.finalized_message())?
        )?;
        if !state.done {
            tracing::warn!(
                target: "turnstream::cli",
                path = %self.events.display(),
                "Event file ended without a terminal event"
            );
        }
        Ok(())
    }
}
