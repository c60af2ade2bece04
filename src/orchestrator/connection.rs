//! Connect, disconnect and reconnect sequences.
//!
//! Every public entry point takes the orchestrator's lifecycle lock for the
//! whole sequence. Inside a sequence each request is awaited before the next
//! one is issued.
//!
//! # Connect
//!
//! 1. Resolve the endpoint: the published port file on auto-connect,
//!    otherwise the caller's [`Prompter`].
//! 2. Tear down the previous connection (sessions first, then the
//!    transport) so at most one transport is ever live.
//! 3. Open a transport and clone the primary session.
//! 4. Negotiate the secondary session. Failure there leaves the primary
//!    connection untouched.
//!
//! # Disconnect
//!
//! The registry is cleared before the server is asked anything. Sessions
//! the server still lists are closed one request each; sessions it no
//! longer knows are counted as already gone.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::discovery::{self, Endpoint};
use crate::orchestrator::secondary::SecondaryOutcome;
use crate::orchestrator::state::{ConnectionState, SessionSlot, TransportHandle};
use crate::orchestrator::{ConnectOutcome, Orchestrator};
use crate::prompt::Prompter;
use crate::protocol::{find_field, Request, Response, SessionId};
use crate::transport::{Transport, TransportEvent};
use crate::{AppError, Result};

/// Options for [`Orchestrator::disconnect`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisconnectOptions {
    /// End the transport once the sessions are torn down.
    pub end_transport: bool,
}

/// What happened to each locally tracked session during a disconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisconnectReport {
    /// Sessions the server listed as live and was asked to close.
    pub closed: Vec<SessionSlot>,
    /// Sessions the server no longer knew about, or could not be asked.
    pub already_gone: Vec<SessionSlot>,
}

impl DisconnectReport {
    /// Whether no session was being tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.closed.is_empty() && self.already_gone.is_empty()
    }
}

impl Orchestrator {
    /// Resolve an endpoint and connect to it.
    ///
    /// With `auto_mode` and a published port file the orchestrator connects
    /// to the default host straight away; otherwise it asks `prompter`,
    /// suggesting the discovered port when there is one.
    ///
    /// # Errors
    ///
    /// - `AppError::BadEndpoint` when the prompted endpoint is malformed.
    /// - `AppError::Transport` when the socket cannot be opened or closes
    ///   mid-handshake.
    /// - `AppError::Handshake` when the primary clone yields no session.
    pub async fn connect(&self, auto_mode: bool, prompter: &dyn Prompter) -> Result<ConnectOutcome> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.connect_locked(auto_mode, prompter)
            .instrument(info_span!("connect", auto_mode))
            .await
    }

    /// [`connect`](Self::connect) in auto mode.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn auto_connect(&self, prompter: &dyn Prompter) -> Result<ConnectOutcome> {
        self.connect(true, prompter).await
    }

    /// Forget all state and auto-connect again.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn reconnect(&self, prompter: &dyn Prompter) -> Result<ConnectOutcome> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let default_host = self.inner.config.discovery.default_host.clone();
        self.update(|state| state.reset(&default_host)).await;
        info!("connection state reset");
        self.connect_locked(true, prompter)
            .instrument(info_span!("reconnect"))
            .await
    }

    /// Connect to an explicit endpoint, replacing any existing connection.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect), minus `BadEndpoint`.
    pub async fn connect_to_host(
        &self,
        hostname: &str,
        port: u16,
        prompter: &dyn Prompter,
    ) -> Result<ConnectOutcome> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.connect_to_host_locked(hostname, port, prompter)
            .instrument(info_span!("connect_to_host", hostname, port))
            .await
    }

    /// Close every tracked session and clear the registry.
    ///
    /// Completes once per call: immediately when nothing was tracked,
    /// otherwise after the server has answered every close request.
    pub async fn disconnect(&self, options: DisconnectOptions) -> DisconnectReport {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.disconnect_locked(options)
            .instrument(info_span!("disconnect", end_transport = options.end_transport))
            .await
    }

    async fn connect_locked(&self, auto_mode: bool, prompter: &dyn Prompter) -> Result<ConnectOutcome> {
        let port = match discovery::discover_port(&self.inner.config) {
            Ok(Some(port)) => Some(port),
            Ok(None) => {
                self.say(
                    "No nREPL port file found. You might need to adjust project_root in the \
                     replmux config.",
                );
                None
            }
            Err(err) => {
                warn!(%err, "port discovery failed");
                self.say(&format!("Error reading nREPL port file: {err}"));
                None
            }
        };

        if let (true, Some(port)) = (auto_mode, port) {
            let hostname = self.inner.config.discovery.default_host.clone();
            return self.connect_to_host_locked(&hostname, port, prompter).await;
        }

        self.prompt_for_endpoint_and_connect(port, prompter).await
    }

    async fn prompt_for_endpoint_and_connect(
        &self,
        port: Option<u16>,
        prompter: &dyn Prompter,
    ) -> Result<ConnectOutcome> {
        let default_host = self.inner.config.discovery.default_host.clone();
        let prefill = match port {
            Some(port) => format!("{default_host}:{port}"),
            None => format!("{default_host}:"),
        };

        let Some(url) = prompter.endpoint(&prefill).await else {
            debug!("endpoint prompt dismissed");
            self.update(|state| state.connecting = false).await;
            return Ok(ConnectOutcome::Cancelled);
        };

        match Endpoint::parse(&url, &default_host) {
            Ok(endpoint) => {
                self.connect_to_host_locked(&endpoint.hostname, endpoint.port, prompter)
                    .await
            }
            Err(err) => {
                warn!(%err, url = %url, "rejected endpoint");
                self.say(&format!("Bad url: {url}"));
                self.update(|state| state.connecting = false).await;
                Err(err)
            }
        }
    }

    async fn connect_to_host_locked(
        &self,
        hostname: &str,
        port: u16,
        prompter: &dyn Prompter,
    ) -> Result<ConnectOutcome> {
        self.disconnect_locked(DisconnectOptions {
            end_transport: true,
        })
        .await;

        let epoch = self.inner.epochs.fetch_add(1, Ordering::SeqCst) + 1;
        self.update(|state| {
            state.hostname = hostname.to_owned();
            state.port = Some(port);
            state.connecting = true;
        })
        .await;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = match self.inner.connector.open(hostname, port, events_tx).await {
            Ok(transport) => transport,
            Err(err) => {
                warn!(%err, hostname, port, "transport open failed");
                self.update(ConnectionState::clear_sessions).await;
                self.say(&format!("Failed connecting to {hostname}:{port}. Error: {err}"));
                return Err(err);
            }
        };

        self.update(|state| {
            state.transport = Some(TransportHandle {
                epoch,
                transport: Arc::clone(&transport),
            });
        })
        .await;
        self.watch_transport(epoch, events_rx);

        self.say("Hooking up nREPL sessions...");
        let primary = self
            .exchange(transport.as_ref(), Request::clone_session(None))
            .await
            .map(|responses| find_field(&responses, "new-session").and_then(Response::new_session));

        let primary = match primary {
            Ok(Some(primary)) => primary,
            failed => {
                self.update(|state| {
                    state.connected = false;
                    state.connecting = false;
                })
                .await;
                self.say("Failed connecting. (An nREPL server must be running before replmux can connect.)");
                return Err(match failed {
                    Err(err) => {
                        warn!(%err, "primary clone request failed");
                        err
                    }
                    Ok(_) => AppError::Handshake(format!(
                        "clone on {hostname}:{port} returned no session"
                    )),
                });
            }
        };

        let installed = self
            .update(|state| {
                if state.transport_epoch() != Some(epoch) {
                    return false;
                }
                state.primary_session = Some(primary.clone());
                state.ambiguous_session = Some(primary.clone());
                state.connected = true;
                state.connecting = false;
                true
            })
            .await;

        if !installed {
            return Err(AppError::Transport(format!(
                "connection to {hostname}:{port} closed during handshake"
            )));
        }

        info!(session_id = %primary, epoch, "primary session established");
        self.say("Connected session: primary");

        let outcome = self
            .make_secondary_session_clone(&transport, &primary, None, prompter)
            .await;
        let has_secondary = match outcome {
            SecondaryOutcome::Started {
                session,
                build_target,
            } => self
                .install_secondary(&primary, session, build_target)
                .await
                .is_some(),
            SecondaryOutcome::Failed | SecondaryOutcome::Cancelled => false,
        };

        if self.inner.state.lock().await.transport_epoch() != Some(epoch) {
            warn!(epoch, "connection lost during secondary negotiation");
            return Err(AppError::Transport(format!(
                "connection to {hostname}:{port} closed during handshake"
            )));
        }

        self.say(&format!(
            "Ambiguous files will use the primary REPL.{}",
            if has_secondary {
                " (You can toggle this at will.)"
            } else {
                ""
            }
        ));

        Ok(ConnectOutcome::Connected(self.snapshot()))
    }

    pub(crate) async fn disconnect_locked(&self, options: DisconnectOptions) -> DisconnectReport {
        let (pending, handle) = self
            .update(|state| {
                let pending: Vec<(SessionSlot, SessionId)> = SessionSlot::DIALECTS
                    .into_iter()
                    .filter_map(|slot| state.session(slot).cloned().map(|id| (slot, id)))
                    .collect();
                state.clear_sessions();
                let handle = if options.end_transport {
                    state.transport.take()
                } else {
                    state.transport.clone()
                };
                (pending, handle)
            })
            .await;

        let mut report = DisconnectReport::default();

        if !pending.is_empty() {
            match &handle {
                Some(handle) => {
                    self.close_sessions(handle.transport.as_ref(), pending, &mut report)
                        .await;
                }
                None => report
                    .already_gone
                    .extend(pending.into_iter().map(|(slot, _)| slot)),
            }
        }

        if options.end_transport {
            if let Some(handle) = handle {
                handle.transport.end();
                info!(epoch = handle.epoch, "transport ended");
            }
        }

        debug!(
            closed = report.closed.len(),
            already_gone = report.already_gone.len(),
            "disconnect complete"
        );
        report
    }

    async fn close_sessions(
        &self,
        transport: &dyn Transport,
        pending: Vec<(SessionSlot, SessionId)>,
        report: &mut DisconnectReport,
    ) {
        let live = match self.exchange(transport, Request::list_sessions()).await {
            Ok(responses) => find_field(&responses, "sessions").and_then(Response::sessions),
            Err(err) => {
                warn!(%err, "ls-sessions failed, treating sessions as gone");
                None
            }
        };

        let Some(live) = live else {
            report
                .already_gone
                .extend(pending.into_iter().map(|(slot, _)| slot));
            return;
        };

        let (confirmed, gone): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|(_, id)| live.contains(id));

        for (slot, id) in &gone {
            debug!(%slot, session_id = %id, "session unknown to server, already closed");
        }
        report
            .already_gone
            .extend(gone.into_iter().map(|(slot, _)| slot));

        let closes = confirmed.into_iter().map(|(slot, id)| async move {
            let result = self.exchange(transport, Request::close_session(&id)).await;
            (slot, id, result)
        });

        for (slot, id, result) in join_all(closes).await {
            match result {
                Ok(_) => {
                    info!(%slot, session_id = %id, "session closed");
                    self.say(&format!("Disconnected session: {slot}"));
                    report.closed.push(slot);
                }
                Err(err) => {
                    warn!(%slot, session_id = %id, %err, "close request failed");
                    report.already_gone.push(slot);
                }
            }
        }
    }

    /// Forward close events of transport `epoch` to the registry.
    fn watch_transport(&self, epoch: u64, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Connected => debug!(epoch, "transport connected"),
                    TransportEvent::Closed { error } => {
                        this.on_transport_closed(epoch, error).await;
                        break;
                    }
                }
            }
        });
    }

    async fn on_transport_closed(&self, epoch: u64, error: Option<String>) {
        let current = self
            .update(|state| {
                if state.transport_epoch() != Some(epoch) {
                    return false;
                }
                state.clear_sessions();
                state.transport = None;
                true
            })
            .await;

        if !current {
            debug!(epoch, "close event from superseded transport ignored");
            return;
        }

        warn!(epoch, error = ?error, "server connection closed");
        match error {
            Some(err) => self.say(&format!("Disconnected from nREPL server. Error: {err}")),
            None => self.say("Disconnected from nREPL server."),
        }
    }
}
