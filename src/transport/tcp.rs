//! TCP transport with correlation-id routing.
//!
//! Each [`TcpTransport`] owns a pair of tasks over the split socket:
//!
//! - the **writer** drains an mpsc queue of encoded requests into a
//!   [`FramedWrite`];
//! - the **reader** decodes response fragments from a [`FramedRead`] and
//!   appends each one to the pending exchange named by its `id`. When a
//!   fragment's status carries `done`, the collected fragments are handed
//!   to the waiting caller through a oneshot channel.
//!
//! When the reader stops (EOF, I/O error or [`Transport::end`]) every
//! pending exchange fails with [`AppError::Transport`] and a single
//! [`TransportEvent::Closed`] is emitted.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReplConfig;
use crate::protocol::{Request, Response};
use crate::transport::codec::ReplCodec;
use crate::transport::{Connector, Transport, TransportEvent};
use crate::{AppError, Result};

/// Depth of the outbound request queue.
const OUTBOUND_QUEUE: usize = 64;

/// Fragments collected so far for one request.
struct PendingExchange {
    fragments: Vec<Response>,
    tx: oneshot::Sender<Result<Vec<Response>>>,
}

/// Pending exchanges keyed by correlation id.
///
/// `closed` is set by the reader on exit, under the same lock, so a request
/// registered after shutdown fails immediately instead of waiting forever.
#[derive(Default)]
struct PendingTable {
    closed: bool,
    exchanges: HashMap<String, PendingExchange>,
}

type Pending = Arc<Mutex<PendingTable>>;

/// Opens [`TcpTransport`]s.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Create a connector that gives up on a connection attempt after
    /// `connect_timeout`.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Create a connector from the `[transport]` config section.
    #[must_use]
    pub fn from_config(config: &ReplConfig) -> Self {
        Self::new(config.connect_timeout())
    }
}

impl Connector for TcpConnector {
    fn open(
        &self,
        hostname: &str,
        port: u16,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Transport>>> + Send + '_>> {
        let hostname = hostname.to_owned();
        Box::pin(async move {
            let stream = tokio::time::timeout(
                self.connect_timeout,
                TcpStream::connect((hostname.as_str(), port)),
            )
            .await
            .map_err(|_| {
                AppError::Transport(format!(
                    "timed out connecting to {hostname}:{port} after {:?}",
                    self.connect_timeout
                ))
            })?
            .map_err(|err| {
                AppError::Transport(format!("failed to connect to {hostname}:{port}: {err}"))
            })?;

            info!(%hostname, port, "tcp transport connected");
            let transport: Arc<dyn Transport> = Arc::new(TcpTransport::start(stream, events));
            Ok(transport)
        })
    }
}

/// Live TCP connection to an nREPL server.
pub struct TcpTransport {
    last_id: AtomicU64,
    pending: Pending,
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl TcpTransport {
    /// Spawn the reader and writer tasks over `stream`.
    ///
    /// Emits [`TransportEvent::Connected`] before returning.
    #[must_use]
    pub fn start(stream: TcpStream, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        let (read_half, write_half) = stream.into_split();
        let pending: Pending = Arc::default();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let cancel = CancellationToken::new();

        tokio::spawn(run_writer(write_half, outbound_rx, cancel.clone()));
        tokio::spawn(run_reader(
            read_half,
            Arc::clone(&pending),
            events.clone(),
            cancel.clone(),
        ));

        let _ = events.send(TransportEvent::Connected);

        Self {
            last_id: AtomicU64::new(1),
            pending,
            outbound,
            cancel,
        }
    }
}

impl Transport for TcpTransport {
    fn send(&self, mut request: Request) -> Pin<Box<dyn Future<Output = Result<Vec<Response>>> + Send + '_>> {
        Box::pin(async move {
            let id = self.last_id.fetch_add(1, Ordering::SeqCst).to_string();
            request.id = Some(id.clone());

            let line = serde_json::to_string(&request).map_err(|err| {
                AppError::Protocol(format!("failed to serialise {} request: {err}", request.op))
            })?;

            let (tx, rx) = oneshot::channel();
            {
                let mut table = self.pending.lock().await;
                if table.closed {
                    return Err(AppError::Transport("connection is closed".into()));
                }
                table.exchanges.insert(
                    id.clone(),
                    PendingExchange {
                        fragments: Vec::new(),
                        tx,
                    },
                );
            }

            debug!(id = %id, op = %request.op, "tcp transport: request queued");

            if self.outbound.send(line).await.is_err() {
                self.pending.lock().await.exchanges.remove(&id);
                return Err(AppError::Transport("connection is closed".into()));
            }

            rx.await.map_err(|_| {
                AppError::Transport(format!("connection dropped before request {id} completed"))
            })?
        })
    }

    fn end(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Writer task: forwards queued lines to the socket until cancelled.
async fn run_writer(
    write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    let mut framed = FramedWrite::new(write_half, ReplCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("tcp writer: cancellation received, stopping");
                break;
            }

            line = outbound_rx.recv() => {
                let Some(line) = line else {
                    debug!("tcp writer: outbound queue closed, stopping");
                    break;
                };
                if let Err(err) = framed.send(line).await {
                    warn!(%err, "tcp writer: write failed, closing transport");
                    cancel.cancel();
                    break;
                }
            }
        }
    }

    let _ = framed.close().await;
}

/// Reader task: routes fragments to pending exchanges until the stream ends.
async fn run_reader(
    read_half: OwnedReadHalf,
    pending: Pending,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) {
    let mut framed = FramedRead::new(read_half, ReplCodec::new());

    let error = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("tcp reader: cancellation received, stopping");
                break None;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("tcp reader: EOF detected");
                        break None;
                    }
                    Some(Err(AppError::Protocol(ref msg))) => {
                        warn!(error = msg.as_str(), "tcp reader: framing error, skipping");
                    }
                    Some(Err(err)) => {
                        warn!(%err, "tcp reader: IO error, stopping");
                        break Some(err.to_string());
                    }
                    Some(Ok(line)) => route_line(&pending, &line).await,
                }
            }
        }
    };

    cancel.cancel();
    fail_pending(&pending).await;
    let _ = events.send(TransportEvent::Closed { error });
}

/// Append one decoded line to its exchange, completing it on `done`.
async fn route_line(pending: &Pending, line: &str) {
    let fragment = match serde_json::from_str::<serde_json::Value>(line)
        .map_err(|err| AppError::Protocol(format!("malformed json: {err}")))
        .and_then(Response::from_value)
    {
        Ok(fragment) => fragment,
        Err(err) => {
            warn!(%err, raw_line = %line, "tcp reader: parse error, skipping line");
            return;
        }
    };

    let Some(id) = fragment.id().map(str::to_owned) else {
        debug!("tcp reader: fragment without id, skipping");
        return;
    };

    let mut table = pending.lock().await;
    let done = fragment.is_done();
    let Some(exchange) = table.exchanges.get_mut(&id) else {
        debug!(id = %id, "tcp reader: fragment for unknown request, skipping");
        return;
    };
    exchange.fragments.push(fragment);

    if done {
        if let Some(exchange) = table.exchanges.remove(&id) {
            let _ = exchange.tx.send(Ok(exchange.fragments));
        }
    }
}

async fn fail_pending(pending: &Pending) {
    let mut table = pending.lock().await;
    table.closed = true;
    for (id, exchange) in table.exchanges.drain() {
        let _ = exchange.tx.send(Err(AppError::Transport(format!(
            "connection closed before request {id} completed"
        ))));
    }
}
