//! Session orchestration.
//!
//! [`Orchestrator`] owns the connection to the nREPL server and the session
//! registry. It is the only writer of [`ConnectionState`]; other components
//! read [`ConnectionSnapshot`]s through [`Orchestrator::snapshot`] or
//! [`Orchestrator::subscribe`].
//!
//! Submodules:
//! - `state`: registry types and snapshots.
//! - `connection`: connect, disconnect and reconnect sequences.
//! - `secondary`: secondary dialect session negotiation.
//! - `router`: ambiguous-file session toggle.
//!
//! `connect`, `disconnect`, `reconnect` and `recreate_secondary_session`
//! each run under one lifecycle lock, so two of them never interleave.

pub mod connection;
pub mod router;
pub mod secondary;
pub mod state;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::ReplConfig;
use crate::output::OutputChannel;
use crate::prompt::BuildTargets;
use crate::protocol::{find_field, Request, Response, SessionId};
use crate::transport::{Connector, Transport};
use crate::{AppError, Result};

pub use connection::{DisconnectOptions, DisconnectReport};
pub use secondary::SecondaryOutcome;
pub use state::{ConnectionSnapshot, ConnectionState, SessionSlot};

/// Result of a connect attempt that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The primary session is live; the snapshot shows whether a secondary
    /// session was established too.
    Connected(ConnectionSnapshot),
    /// The user dismissed the endpoint prompt.
    Cancelled,
}

/// Documentation returned by an `info` lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolInfo {
    /// Namespace the symbol resolved to.
    pub ns: Option<String>,
    /// Unqualified symbol name.
    pub name: Option<String>,
    /// Rendered argument lists.
    pub arglists: Option<String>,
    /// Docstring.
    pub doc: String,
}

struct Inner {
    config: Arc<ReplConfig>,
    connector: Arc<dyn Connector>,
    build_targets: Arc<dyn BuildTargets>,
    output: Arc<dyn OutputChannel>,
    state: Mutex<ConnectionState>,
    lifecycle: Mutex<()>,
    epochs: AtomicU64,
    status: watch::Sender<ConnectionSnapshot>,
}

/// Client-side orchestrator for one nREPL connection and its sessions.
///
/// Cloning is cheap; all clones share the same connection.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Create an orchestrator with nothing connected.
    #[must_use]
    pub fn new(
        config: Arc<ReplConfig>,
        connector: Arc<dyn Connector>,
        build_targets: Arc<dyn BuildTargets>,
        output: Arc<dyn OutputChannel>,
    ) -> Self {
        let state = ConnectionState::new(&config.discovery.default_host);
        let (status, _) = watch::channel(state.snapshot());
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                build_targets,
                output,
                state: Mutex::new(state),
                lifecycle: Mutex::new(()),
                epochs: AtomicU64::new(0),
                status,
            }),
        }
    }

    /// Configuration this orchestrator was built with.
    #[must_use]
    pub fn config(&self) -> &ReplConfig {
        &self.inner.config
    }

    /// Latest published state.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.status.borrow().clone()
    }

    /// Receiver notified after every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.status.subscribe()
    }

    /// Whether `slot` holds a session that requests can be sent to.
    #[must_use]
    pub fn has_live_session(&self, slot: SessionSlot) -> bool {
        self.snapshot().has_live_session(slot)
    }

    /// Point ambiguous files at the other dialect session.
    ///
    /// No-op unless connected with both dialect sessions live. Returns the
    /// slot now serving ambiguous files when it changed.
    pub async fn toggle_ambiguous_session(&self) -> Option<SessionSlot> {
        let target = self.update(router::toggle).await;
        if let Some(slot) = target {
            info!(%slot, "ambiguous-file session toggled");
            self.say(&format!("Ambiguous files will now use the {slot} REPL."));
        }
        target
    }

    /// Look up documentation for `symbol` in the ambiguous-file session.
    ///
    /// Returns `Ok(None)` when the server has no docstring for the symbol.
    ///
    /// # Errors
    ///
    /// - `AppError::NotConnected` when no session is live.
    /// - `AppError::Transport` if the exchange fails.
    pub async fn lookup_info(&self, ns: &str, symbol: &str) -> Result<Option<SymbolInfo>> {
        let (session, transport) = {
            let state = self.inner.state.lock().await;
            let session = state
                .ambiguous_session
                .clone()
                .or_else(|| state.primary_session.clone());
            match (state.connected, session, state.transport.clone()) {
                (true, Some(session), Some(handle)) => (session, handle.transport),
                _ => return Err(AppError::NotConnected("no live REPL session".into())),
            }
        };

        let responses = self
            .exchange(transport.as_ref(), Request::info(&session, ns, symbol))
            .await?;
        let Some(found) = find_field(&responses, "doc") else {
            debug!(ns, symbol, "no documentation available");
            return Ok(None);
        };

        let text = |key: &str| {
            found
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned)
        };

        Ok(Some(SymbolInfo {
            ns: text("ns"),
            name: text("name"),
            arglists: text("arglists-str"),
            doc: text("doc").unwrap_or_default(),
        }))
    }

    /// Apply `f` to the state under its lock and publish the result.
    async fn update<R>(&self, f: impl FnOnce(&mut ConnectionState) -> R) -> R {
        let mut state = self.inner.state.lock().await;
        let result = f(&mut state);
        self.inner.status.send_replace(state.snapshot());
        result
    }

    /// Send `request` and wait at most the configured request timeout.
    ///
    /// A server that accepts the socket but never answers must not hold the
    /// lifecycle lock forever.
    async fn exchange(&self, transport: &dyn Transport, request: Request) -> Result<Vec<Response>> {
        let op = request.op.clone();
        let limit = self.inner.config.request_timeout();
        if let Ok(result) = tokio::time::timeout(limit, transport.send(request)).await {
            result
        } else {
            warn!(op = %op, timeout_secs = limit.as_secs(), "request timed out");
            Err(AppError::Transport(format!(
                "no reply to {op} within {}s",
                limit.as_secs()
            )))
        }
    }

    /// Append a line to the output channel.
    fn say(&self, line: &str) {
        self.inner.output.append_line(line);
    }

    /// Primary session id, if connected.
    async fn primary_session(&self) -> Option<SessionId> {
        let state = self.inner.state.lock().await;
        if state.connected {
            state.primary_session.clone()
        } else {
            None
        }
    }
}
