//! Socket transport abstraction.
//!
//! The orchestrator never touches sockets directly. It talks to a
//! [`Connector`], which opens a [`Transport`] to `host:port` and reports
//! lifecycle changes as [`TransportEvent`]s on a channel supplied by the
//! caller. The production implementation lives in [`tcp`]; tests provide
//! in-process fakes.
//!
//! Submodules:
//! - `codec`: line framing shared by the reader and writer halves.
//! - `tcp`: tokio TCP transport with correlation-id routing.

pub mod codec;
pub mod tcp;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::protocol::{Request, Response};
use crate::Result;

pub use tcp::TcpConnector;

/// Lifecycle notifications emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket is established and requests may be sent.
    Connected,
    /// The socket closed, either because [`Transport::end`] was called
    /// (`error: None`) or because the server went away.
    Closed {
        /// Error detail for an unsolicited close.
        error: Option<String>,
    },
}

/// One live connection to an nREPL server.
///
/// Multiple requests may be outstanding at once; each is tagged with a
/// distinct correlation id by the implementation.
pub trait Transport: Send + Sync {
    /// Send `request` and collect every response fragment up to and
    /// including the one whose status carries `done`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// connection closes before the exchange completes.
    fn send(&self, request: Request) -> Pin<Box<dyn Future<Output = Result<Vec<Response>>> + Send + '_>>;

    /// Close the connection. Idempotent.
    fn end(&self);
}

/// Factory for [`Transport`]s.
pub trait Connector: Send + Sync {
    /// Open a transport to `hostname:port`.
    ///
    /// `events` receives [`TransportEvent::Connected`] once the socket is up
    /// and exactly one [`TransportEvent::Closed`] when it goes down.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// connection cannot be established.
    fn open(
        &self,
        hostname: &str,
        port: u16,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Transport>>> + Send + '_>>;
}
