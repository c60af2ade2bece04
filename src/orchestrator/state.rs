//! Session registry and connection lifecycle flags.
//!
//! [`ConnectionState`] is owned by the orchestrator and mutated only from
//! its methods. Everything outside the orchestrator sees an immutable
//! [`ConnectionSnapshot`].

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::protocol::SessionId;
use crate::transport::Transport;

/// Registry slot a session id lives in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionSlot {
    /// Session for the primary dialect.
    Primary,
    /// Session for the secondary dialect.
    Secondary,
    /// Session servicing files whose dialect is ambiguous; always aliases
    /// one of the other two.
    Ambiguous,
}

impl SessionSlot {
    /// Slots that own a server-side session of their own.
    pub const DIALECTS: [Self; 2] = [Self::Primary, Self::Secondary];

    /// Lowercase label used in output lines.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Ambiguous => "ambiguous",
        }
    }
}

impl Display for SessionSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The single live transport together with the epoch it was opened in.
#[derive(Clone)]
pub struct TransportHandle {
    /// Monotonic counter distinguishing successive transports.
    pub epoch: u64,
    /// The transport itself.
    pub transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

/// Mutable connection state owned by the orchestrator.
#[derive(Debug)]
pub struct ConnectionState {
    /// Current or last-used host.
    pub hostname: String,
    /// Current or last-used port.
    pub port: Option<u16>,
    /// A handshake is in progress.
    pub connecting: bool,
    /// The primary session is established.
    pub connected: bool,
    /// Primary dialect session.
    pub primary_session: Option<SessionId>,
    /// Secondary dialect session.
    pub secondary_session: Option<SessionId>,
    /// Session servicing ambiguous files.
    pub ambiguous_session: Option<SessionId>,
    /// Build target the secondary session was started against.
    pub secondary_build_target: Option<String>,
    /// The one live transport, if any.
    pub transport: Option<TransportHandle>,
}

impl ConnectionState {
    /// Fresh state: nothing connected, no endpoint chosen.
    #[must_use]
    pub fn new(default_host: &str) -> Self {
        Self {
            hostname: default_host.to_owned(),
            port: None,
            connecting: false,
            connected: false,
            primary_session: None,
            secondary_session: None,
            ambiguous_session: None,
            secondary_build_target: None,
            transport: None,
        }
    }

    /// Session id held in `slot`.
    #[must_use]
    pub fn session(&self, slot: SessionSlot) -> Option<&SessionId> {
        match slot {
            SessionSlot::Primary => self.primary_session.as_ref(),
            SessionSlot::Secondary => self.secondary_session.as_ref(),
            SessionSlot::Ambiguous => self.ambiguous_session.as_ref(),
        }
    }

    /// Drop every session id and lower both lifecycle flags. The transport
    /// handle is left alone.
    pub fn clear_sessions(&mut self) {
        self.primary_session = None;
        self.secondary_session = None;
        self.ambiguous_session = None;
        self.secondary_build_target = None;
        self.connected = false;
        self.connecting = false;
    }

    /// Return to initial values, keeping only the transport handle so the
    /// next connect can still end it.
    pub fn reset(&mut self, default_host: &str) {
        let transport = self.transport.take();
        *self = Self::new(default_host);
        self.transport = transport;
    }

    /// Epoch of the live transport.
    #[must_use]
    pub fn transport_epoch(&self) -> Option<u64> {
        self.transport.as_ref().map(|handle| handle.epoch)
    }

    /// Immutable copy for readers outside the orchestrator.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            hostname: self.hostname.clone(),
            port: self.port,
            connecting: self.connecting,
            connected: self.connected,
            primary_session: self.primary_session.clone(),
            secondary_session: self.secondary_session.clone(),
            ambiguous_session: self.ambiguous_session.clone(),
            secondary_build_target: self.secondary_build_target.clone(),
        }
    }
}

/// Read-only view of [`ConnectionState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConnectionSnapshot {
    /// Current or last-used host.
    pub hostname: String,
    /// Current or last-used port.
    pub port: Option<u16>,
    /// A handshake is in progress.
    pub connecting: bool,
    /// The primary session is established.
    pub connected: bool,
    /// Primary dialect session.
    pub primary_session: Option<SessionId>,
    /// Secondary dialect session.
    pub secondary_session: Option<SessionId>,
    /// Session servicing ambiguous files.
    pub ambiguous_session: Option<SessionId>,
    /// Build target the secondary session was started against.
    pub secondary_build_target: Option<String>,
}

impl ConnectionSnapshot {
    /// Session id held in `slot`.
    #[must_use]
    pub fn session(&self, slot: SessionSlot) -> Option<&SessionId> {
        match slot {
            SessionSlot::Primary => self.primary_session.as_ref(),
            SessionSlot::Secondary => self.secondary_session.as_ref(),
            SessionSlot::Ambiguous => self.ambiguous_session.as_ref(),
        }
    }

    /// Whether requests can be issued in `slot` right now.
    #[must_use]
    pub fn has_live_session(&self, slot: SessionSlot) -> bool {
        self.connected && self.session(slot).is_some()
    }

    /// Which dialect slot the ambiguous-file session currently aliases.
    #[must_use]
    pub fn ambiguous_target(&self) -> Option<SessionSlot> {
        let ambiguous = self.ambiguous_session.as_ref()?;
        SessionSlot::DIALECTS
            .into_iter()
            .find(|slot| self.session(*slot) == Some(ambiguous))
    }
}
