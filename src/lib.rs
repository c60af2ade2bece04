#![forbid(unsafe_code)]

pub mod config;
pub mod discovery;
pub mod errors;
pub mod ipc;
pub mod orchestrator;
pub mod output;
pub mod prompt;
pub mod protocol;
pub mod transport;

pub use config::ReplConfig;
pub use errors::{AppError, Result};
