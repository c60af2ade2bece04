//! Local IPC server for `replmux-ctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Accepts line-delimited JSON commands
//! from `replmux-ctl` and routes them to the orchestrator.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "status"}
//! {"command": "connect", "endpoint": "localhost:7888"}
//! {"command": "connect", "auto": true, "build_target": "app"}
//! {"command": "disconnect"}
//! {"command": "reconnect"}
//! {"command": "toggle"}
//! {"command": "recreate-secondary", "build_target": "app"}
//! {"command": "info", "ns": "clojure.core", "symbol": "map"}
//! {"command": "output"}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "not connected: no live REPL session"}
//! ```

use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::orchestrator::{
    ConnectOutcome, DisconnectOptions, Orchestrator, SecondaryOutcome,
};
use crate::output::OutputLog;
use crate::prompt::PresetPrompter;
use crate::{AppError, Result};

/// Shared state handed to every IPC connection.
pub struct IpcState {
    /// The orchestrator commands are routed to.
    pub orchestrator: Orchestrator,
    /// Output history served by the `output` command.
    pub output: Arc<OutputLog>,
}

/// Inbound IPC request from `replmux-ctl`.
#[derive(Debug, Deserialize)]
struct IpcRequest {
    /// Command verb.
    command: String,
    /// `host:port` answer for the endpoint prompt (for `connect`).
    endpoint: Option<String>,
    /// Use the published port without prompting (for `connect`).
    #[serde(default)]
    auto: bool,
    /// Answer for the build target prompt.
    build_target: Option<String>,
    /// Namespace to resolve `symbol` in (for `info`).
    ns: Option<String>,
    /// Symbol to document (for `info`).
    symbol: Option<String>,
}

/// Outbound IPC response to `replmux-ctl`.
#[derive(Debug, Serialize)]
struct IpcResponse {
    /// Whether the command succeeded.
    ok: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    state: Arc<IpcState>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = state.orchestrator.config().ipc_name.clone();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let state = Arc::clone(&state);
                                tokio::spawn(handle_connection(stream, state));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single IPC client connection.
async fn handle_connection(stream: interprocess::local_socket::tokio::Stream, state: Arc<IpcState>) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch_command(&request, &state).await,
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        info!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Route an IPC command to the orchestrator.
async fn dispatch_command(request: &IpcRequest, state: &IpcState) -> IpcResponse {
    let span = info_span!("ipc_command", command = %request.command);
    async move {
        let orchestrator = &state.orchestrator;
        let prompter = PresetPrompter {
            endpoint: request.endpoint.clone(),
            build_target: request.build_target.clone(),
        };

        match request.command.as_str() {
            "status" => snapshot_response(orchestrator),
            "connect" => {
                connect_response(orchestrator.connect(request.auto, &prompter).await)
            }
            "reconnect" => connect_response(orchestrator.reconnect(&prompter).await),
            "disconnect" => {
                let report = orchestrator
                    .disconnect(DisconnectOptions {
                        end_transport: true,
                    })
                    .await;
                IpcResponse::success(json!({
                    "closed": report.closed,
                    "already_gone": report.already_gone,
                }))
            }
            "toggle" => {
                let slot = orchestrator.toggle_ambiguous_session().await;
                IpcResponse::success(json!({
                    "toggled": slot.is_some(),
                    "ambiguous": orchestrator.snapshot().ambiguous_target(),
                }))
            }
            "recreate-secondary" => handle_recreate_secondary(orchestrator, &prompter).await,
            "info" => handle_info(request, orchestrator).await,
            "output" => IpcResponse::success(json!({ "lines": state.output.lines() })),
            other => IpcResponse::error(format!("unknown command: {other}")),
        }
    }
    .instrument(span)
    .await
}

fn snapshot_response(orchestrator: &Orchestrator) -> IpcResponse {
    match serde_json::to_value(orchestrator.snapshot()) {
        Ok(data) => IpcResponse::success(data),
        Err(err) => IpcResponse::error(format!("failed to serialize state: {err}")),
    }
}

fn connect_response(result: Result<ConnectOutcome>) -> IpcResponse {
    match result {
        Ok(ConnectOutcome::Connected(snapshot)) => {
            IpcResponse::success(json!({ "outcome": "connected", "state": snapshot }))
        }
        Ok(ConnectOutcome::Cancelled) => IpcResponse::success(json!({ "outcome": "cancelled" })),
        Err(err) => IpcResponse::error(err.to_string()),
    }
}

/// Replace the secondary session.
async fn handle_recreate_secondary(
    orchestrator: &Orchestrator,
    prompter: &PresetPrompter,
) -> IpcResponse {
    match orchestrator.recreate_secondary_session(prompter).await {
        Ok(SecondaryOutcome::Started {
            session,
            build_target,
        }) => IpcResponse::success(json!({
            "outcome": "started",
            "session": session,
            "build_target": build_target,
        })),
        Ok(SecondaryOutcome::Failed) => IpcResponse::success(json!({ "outcome": "failed" })),
        Ok(SecondaryOutcome::Cancelled) => IpcResponse::success(json!({ "outcome": "cancelled" })),
        Err(err) => IpcResponse::error(err.to_string()),
    }
}

/// Look up symbol documentation.
async fn handle_info(request: &IpcRequest, orchestrator: &Orchestrator) -> IpcResponse {
    let (Some(ns), Some(symbol)) = (&request.ns, &request.symbol) else {
        return IpcResponse::error("missing required 'ns' or 'symbol' field");
    };

    match orchestrator.lookup_info(ns, symbol).await {
        Ok(Some(info)) => IpcResponse::success(json!({ "info": info })),
        Ok(None) => IpcResponse::success(json!({ "info": null })),
        Err(err) => IpcResponse::error(err.to_string()),
    }
}
