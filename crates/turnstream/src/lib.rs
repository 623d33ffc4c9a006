pub mod cli;
pub mod commands;
pub mod error;
pub mod script;

pub use turnstream_core::{app, preferences, utils};
