//! Correlated request channel over a duplex message transport.
//!
//! Every call gets a fresh integer id and an entry in the pending map; the
//! reader task resolves entries by id as responses arrive. An entry leaves
//! the map exactly once: resolved by the reader, evicted by its caller on
//! timeout or cancellation, or drained when the transport closes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use seekpilot_core::{Error, Result};

/// Per-call overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

struct Pending {
    method: String,
    tx: oneshot::Sender<Result<Value>>,
}

#[derive(Debug, Clone)]
enum Shutdown {
    Closed,
    Failed(String),
}

impl Shutdown {
    fn to_error(&self) -> Error {
        match self {
            Shutdown::Closed => Error::ChannelClosed,
            Shutdown::Failed(reason) => Error::ChannelError(reason.clone()),
        }
    }
}

#[derive(Default)]
struct State {
    pending: HashMap<u64, Pending>,
    shutdown: Option<Shutdown>,
}

impl State {
    /// Mark the channel shut and reject everything still waiting.
    fn shut(&mut self, reason: Shutdown) {
        if self.shutdown.is_none() {
            self.shutdown = Some(reason.clone());
        }
        let drained = self.pending.len();
        for (_, pending) in self.pending.drain() {
            let _ = pending.tx.send(Err(reason.to_error()));
        }
        if drained > 0 {
            warn!("CDP channel shut with {} calls in flight: {:?}", drained, reason);
        }
    }
}

/// Removes its pending entry when the waiting call goes away, whatever the
/// reason. A no-op when the reader already resolved it.
struct Registered<'a> {
    state: &'a Mutex<State>,
    id: u64,
}

impl Drop for Registered<'_> {
    fn drop(&mut self) {
        self.state.lock().pending.remove(&self.id);
    }
}

/// Request/response correlation over a CDP connection.
pub struct CdpChannel {
    next_id: AtomicU64,
    state: Arc<Mutex<State>>,
    outbound: mpsc::UnboundedSender<String>,
    default_timeout: Duration,
    reader: JoinHandle<()>,
    writer: Option<JoinHandle<()>>,
}

impl CdpChannel {
    /// Wire a channel over an arbitrary transport.
    ///
    /// Outgoing frames are pushed into `outbound`. `inbound` yields incoming
    /// text frames; an `Err` item is a transport error and the end of the
    /// stream is a close.
    pub fn spawn<S>(outbound: mpsc::UnboundedSender<String>, inbound: S, default_timeout: Duration) -> Self
    where
        S: Stream<Item = Result<String>> + Send + 'static,
    {
        let state = Arc::new(Mutex::new(State::default()));
        let reader = tokio::spawn(read_loop(Box::pin(inbound), state.clone()));
        Self {
            next_id: AtomicU64::new(1),
            state,
            outbound,
            default_timeout,
            reader,
            writer: None,
        }
    }

    /// Connect to a DevTools WebSocket endpoint.
    pub async fn connect(ws_url: &str, default_timeout: Duration) -> Result<Self> {
        info!("Connecting to CDP endpoint {}", ws_url);
        let (ws, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| Error::ChannelError(format!("connect {}: {}", ws_url, e)))?;
        let (mut sink, stream) = ws.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    warn!("CDP write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let inbound = stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
                Ok(_) => None,
                Err(e) => Some(Err(Error::ChannelError(e.to_string()))),
            }
        });

        let mut channel = Self::spawn(tx, inbound, default_timeout);
        channel.writer = Some(writer);
        Ok(channel)
    }

    /// Issue `method` with the channel's default timeout.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with(method, params, CallOptions::default()).await
    }

    /// Issue `method` and wait for the matching response.
    ///
    /// Resolves to the response's `result`. An `error` member becomes
    /// [`Error::Remote`].
    pub async fn call_with(&self, method: &str, params: Value, options: CallOptions) -> Result<Value> {
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&json!({ "id": id, "method": method, "params": params }))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if let Some(reason) = &state.shutdown {
                return Err(reason.to_error());
            }
            state.pending.insert(
                id,
                Pending {
                    method: method.to_string(),
                    tx,
                },
            );
        }
        let _registered = Registered {
            state: &self.state,
            id,
        };

        trace!("CDP -> {} #{}", method, id);
        if self.outbound.send(frame).is_err() {
            return Err(Error::ChannelClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => {
                debug!("CDP call {} #{} timed out after {:?}", method, id, timeout);
                Err(Error::Timeout {
                    method: method.to_string(),
                })
            }
        }
    }

    /// Calls still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().shutdown.is_some()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Reject every pending call and refuse new ones.
    pub fn close(&self) {
        self.state.lock().shut(Shutdown::Closed);
        self.reader.abort();
        if let Some(writer) = &self.writer {
            writer.abort();
        }
    }
}

impl Drop for CdpChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<S>(mut inbound: std::pin::Pin<Box<S>>, state: Arc<Mutex<State>>)
where
    S: Stream<Item = Result<String>> + Send + ?Sized,
{
    while let Some(frame) = inbound.next().await {
        match frame {
            Ok(text) => dispatch(&text, &state),
            Err(e) => {
                let reason = match e {
                    Error::ChannelError(reason) => reason,
                    other => other.to_string(),
                };
                state.lock().shut(Shutdown::Failed(reason));
                return;
            }
        }
    }
    state.lock().shut(Shutdown::Closed);
}

/// Route one inbound frame to its waiting call.
fn dispatch(text: &str, state: &Mutex<State>) {
    let Ok(msg) = serde_json::from_str::<Value>(text) else {
        debug!("Ignoring malformed CDP frame ({} bytes)", text.len());
        return;
    };
    let Some(id) = msg.get("id").and_then(Value::as_u64) else {
        if let Some(method) = msg.get("method").and_then(Value::as_str) {
            trace!("CDP event {}", method);
        }
        return;
    };

    let Some(pending) = state.lock().pending.remove(&id) else {
        debug!("Dropping response #{} with no waiting call", id);
        return;
    };

    let outcome = match msg.get("error") {
        Some(err) => Err(Error::Remote {
            method: pending.method.clone(),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string()),
        }),
        None => Ok(msg.get("result").cloned().unwrap_or(Value::Null)),
    };
    trace!("CDP <- {} #{}", pending.method, id);
    let _ = pending.tx.send(outcome);
}
