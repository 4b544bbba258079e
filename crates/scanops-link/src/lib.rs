//! Duplex WebSocket link to the remote agent runtime.
//!
//! [`ConnectionManager::connect`] spawns one background task that owns the
//! socket. The task reconnects with bounded exponential backoff and forwards
//! every inbound text frame, in arrival order, to the single
//! [`FrameReceiver`] returned by `connect`. Frames lost while the link is
//! down are not replayed, and outbound frames queued when a connection drops
//! are discarded rather than resent on the next one.

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(10);
pub const FRAME_QUEUE_CAPACITY: usize = 256;
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct LinkConfig {
    pub url: Url,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub frame_queue: usize,
    pub outbound_queue: usize,
    /// Sent after every successful (re)connect.
    pub hello: Option<String>,
}

impl LinkConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
            frame_queue: FRAME_QUEUE_CAPACITY,
            outbound_queue: OUTBOUND_QUEUE_CAPACITY,
            hello: None,
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff_initial = initial;
        self.backoff_max = max.max(initial);
        self
    }

    pub fn with_hello(mut self, hello: impl Into<String>) -> Self {
        self.hello = Some(hello.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub text: String,
    pub received_at: DateTime<Utc>,
    /// 1-based count of the connection the frame arrived on.
    pub connection: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("link already connected")]
    AlreadyConnected,
    #[error("link closed")]
    Closed,
    #[error("link not connected (state: {0})")]
    NotConnected(ConnectionState),
    #[error("outbound queue full")]
    OutboundFull,
}

/// Single consumer of inbound frames.
pub struct FrameReceiver {
    rx: mpsc::Receiver<RawFrame>,
}

impl FrameReceiver {
    pub async fn recv(&mut self) -> Option<RawFrame> {
        self.rx.recv().await
    }
}

pub struct ConnectionManager {
    config: LinkConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    outbound_tx: Option<mpsc::Sender<String>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(config: LinkConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            state_tx: Arc::new(state_tx),
            state_rx,
            outbound_tx: None,
            shutdown_tx: None,
            task: None,
        }
    }

    pub fn connect(&mut self) -> Result<FrameReceiver, LinkError> {
        if *self.state_rx.borrow() == ConnectionState::Closed {
            return Err(LinkError::Closed);
        }
        if self.task.is_some() {
            return Err(LinkError::AlreadyConnected);
        }
        let (frame_tx, frame_rx) = mpsc::channel(self.config.frame_queue.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_queue.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let config = self.config.clone();
        let state = Arc::clone(&self.state_tx);
        self.task = Some(tokio::spawn(async move {
            link_loop(config, state, frame_tx, outbound_rx, shutdown_rx).await;
        }));
        self.outbound_tx = Some(outbound_tx);
        self.shutdown_tx = Some(shutdown_tx);
        Ok(FrameReceiver { rx: frame_rx })
    }

    /// Queues one outbound text frame. Only accepted while connected.
    pub fn send(&self, text: impl Into<String>) -> Result<(), LinkError> {
        let state = *self.state_rx.borrow();
        if state != ConnectionState::Connected {
            return Err(LinkError::NotConnected(state));
        }
        let Some(outbound) = self.outbound_tx.as_ref() else {
            return Err(LinkError::NotConnected(state));
        };
        outbound.try_send(text.into()).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => LinkError::OutboundFull,
            mpsc::error::TrySendError::Closed(_) => LinkError::Closed,
        })
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.state_rx.borrow() == ConnectionState::Connected
    }

    /// Stops the link task, including any pending reconnect sleep.
    pub async fn close(&mut self) {
        if let Some(shutdown) = self.shutdown_tx.take() {
            let _ = shutdown.send(true);
        }
        self.outbound_tx = None;
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!("link_close_timeout: aborting link task");
                task.abort();
            }
        }
        self.state_tx.send_replace(ConnectionState::Closed);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum SessionEnd {
    Dropped,
    Shutdown,
    ConsumerGone,
}

async fn link_loop(
    config: LinkConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    frames: mpsc::Sender<RawFrame>,
    mut outbound: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = config.backoff_initial;
    let mut connection = 0u64;
    let mut attempt = 0u64;

    loop {
        state.send_replace(if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });
        attempt += 1;

        let connect = tokio::select! {
            result = connect_async(config.url.as_str()) => result,
            _ = shutdown.changed() => break,
        };
        let (mut ws, _) = match connect {
            Ok(value) => value,
            Err(err) => {
                warn!("link_connect_error: {err}");
                state.send_replace(ConnectionState::Reconnecting);
                if !sleep_or_shutdown(backoff, &mut shutdown).await {
                    break;
                }
                backoff = next_backoff(backoff, config.backoff_max);
                continue;
            }
        };
        backoff = config.backoff_initial;
        connection += 1;

        let discarded = discard_outbound(&mut outbound);
        if discarded > 0 {
            warn!("link_outbound_discarded: count={discarded}");
        }
        if let Some(hello) = config.hello.as_ref() {
            if let Err(err) = ws.send(Message::Text(hello.clone())).await {
                warn!("link_hello_error: {err}");
                let _ = ws.close(None).await;
                state.send_replace(ConnectionState::Reconnecting);
                if !sleep_or_shutdown(backoff, &mut shutdown).await {
                    break;
                }
                backoff = next_backoff(backoff, config.backoff_max);
                continue;
            }
        }
        state.send_replace(ConnectionState::Connected);
        info!("link_connected: url={} connection={connection}", config.url);

        let end = loop {
            tokio::select! {
                _ = shutdown.changed() => break SessionEnd::Shutdown,
                message = ws.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if !deliver(&frames, text, connection).await {
                            break SessionEnd::ConsumerGone;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if !deliver(&frames, text, connection).await {
                                break SessionEnd::ConsumerGone;
                            }
                        }
                        Err(err) => {
                            warn!("link_binary_frame_dropped: bytes={}", err.as_bytes().len());
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!("link_closed_by_peer: {frame:?}");
                        break SessionEnd::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("link_read_error: {err}");
                        break SessionEnd::Dropped;
                    }
                    None => break SessionEnd::Dropped,
                },
                Some(text) = outbound.recv() => {
                    if let Err(err) = ws.send(Message::Text(text)).await {
                        warn!("link_send_error: {err}");
                        break SessionEnd::Dropped;
                    }
                }
            }
        };

        match end {
            SessionEnd::Shutdown | SessionEnd::ConsumerGone => {
                let _ = ws.close(None).await;
                break;
            }
            SessionEnd::Dropped => {
                state.send_replace(ConnectionState::Reconnecting);
                let discarded = discard_outbound(&mut outbound);
                if discarded > 0 {
                    warn!("link_outbound_discarded: count={discarded}");
                }
                if !sleep_or_shutdown(backoff, &mut shutdown).await {
                    break;
                }
                backoff = next_backoff(backoff, config.backoff_max);
            }
        }
    }

    state.send_replace(ConnectionState::Closed);
    debug!("link_loop_exit: connections={connection}");
}

async fn deliver(frames: &mpsc::Sender<RawFrame>, text: String, connection: u64) -> bool {
    let frame = RawFrame {
        text,
        received_at: Utc::now(),
        connection,
    };
    frames.send(frame).await.is_ok()
}

fn discard_outbound(outbound: &mut mpsc::Receiver<String>) -> usize {
    let mut discarded = 0;
    while outbound.try_recv().is_ok() {
        discarded += 1;
    }
    discarded
}

/// Returns false when shutdown was requested before the delay elapsed.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.changed() => false,
    }
}

pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    let next = current + current;
    if next > max {
        max
    } else {
        next
    }
}
