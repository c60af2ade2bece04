//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The published port record exists but could not be read or parsed.
    Discovery(String),
    /// A user-supplied `host:port` endpoint failed validation.
    BadEndpoint(String),
    /// A clone exchange did not yield a new session id.
    Handshake(String),
    /// Socket-level failure, including an unsolicited server disconnect.
    Transport(String),
    /// A response frame could not be interpreted.
    Protocol(String),
    /// The operation requires a live primary session.
    NotConnected(String),
    /// IPC communication failure.
    Ipc(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Discovery(msg) => write!(f, "discovery: {msg}"),
            Self::BadEndpoint(msg) => write!(f, "bad endpoint: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::NotConnected(msg) => write!(f, "not connected: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
