/*
[INPUT]:  Feed endpoint URL, serialized outbound frames, inbound/heartbeat handlers
[OUTPUT]: One live duplex connection driven by send, receive and heartbeat loops
[POS]:    WebSocket layer - single-connection primitive (no retry logic)
[UPDATE]: When changing loop lifecycle, queue policy or terminal error handling
*/

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::error::{FeedError, Result, TransportError};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Transport tuning knobs
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Capacity of the outbound frame queue
    pub queue_capacity: usize,
    /// Max silence on the read side, also bounds a single socket write
    pub receive_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            receive_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Running,
    Erroring,
    Destroyed,
}

#[derive(Debug)]
struct Shared {
    terminal: watch::Sender<Option<TransportError>>,
    destroyed: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        let (terminal, _rx) = watch::channel(None);
        Self {
            terminal,
            destroyed: AtomicBool::new(false),
        }
    }

    /// First writer wins; returns whether this call set the slot.
    fn fail(&self, err: TransportError) -> bool {
        self.terminal.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(err);
                true
            } else {
                false
            }
        })
    }

    fn current(&self) -> Option<TransportError> {
        self.terminal.borrow().clone()
    }

    fn state(&self) -> TransportState {
        if self.destroyed.load(Ordering::Acquire) {
            TransportState::Destroyed
        } else if self.terminal.borrow().is_some() {
            TransportState::Erroring
        } else {
            TransportState::Running
        }
    }

    fn signal(&self) -> TerminalSignal {
        TerminalSignal {
            rx: self.terminal.subscribe(),
        }
    }
}

/// Read side of the terminal-error slot.
#[derive(Debug, Clone)]
pub struct TerminalSignal {
    rx: watch::Receiver<Option<TransportError>>,
}

impl TerminalSignal {
    /// Park until the terminal error is set and return it
    pub async fn wait(&mut self) -> TransportError {
        match self.rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone().unwrap_or(TransportError::Destroyed),
            Err(_) => TransportError::Destroyed,
        }
    }

    pub fn current(&self) -> Option<TransportError> {
        self.rx.borrow().clone()
    }
}

/// Cloneable sending side of a transport.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    outbound: mpsc::Sender<String>,
    shared: Arc<Shared>,
}

impl TransportHandle {
    /// Enqueue a frame without waiting; a full queue is an error
    pub fn send(&self, frame: String) -> Result<()> {
        if let Some(err) = self.shared.current() {
            return Err(if self.shared.destroyed.load(Ordering::Acquire) {
                FeedError::NotConnected
            } else {
                FeedError::Transport(err)
            });
        }

        self.outbound.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => FeedError::QueueFull,
            TrySendError::Closed(_) => FeedError::NotConnected,
        })
    }

    /// Mark the connection dead; returns false if it already was
    pub fn fail(&self, err: TransportError) -> bool {
        self.shared.fail(err)
    }

    pub fn state(&self) -> TransportState {
        self.shared.state()
    }

    pub fn terminal(&self) -> TerminalSignal {
        self.shared.signal()
    }
}

/// Owns exactly one physical connection.
///
/// The send loop starts on connect. The receive loop starts when `listen` is
/// called and the heartbeat loop when `keep_alive` is called. All three exit
/// once the terminal error is set. The transport never reconnects on its own.
pub struct Transport {
    handle: TransportHandle,
    config: TransportConfig,
    reader: Option<WsStream>,
    send_task: JoinHandle<Option<WsSink>>,
    receive_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("state", &self.state())
            .field("config", &self.config)
            .field("listening", &self.receive_task.is_some())
            .field("keep_alive", &self.heartbeat_task.is_some())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Dial `endpoint` and start the send loop
    pub async fn connect(endpoint: &str, config: TransportConfig) -> Result<Self> {
        let (ws_stream, _response) = connect_async(endpoint).await.map_err(|err| {
            FeedError::Connect {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        })?;
        info!(%endpoint, "ws connected");

        let (write, read) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_capacity.max(1));
        let shared = Arc::new(Shared::new());

        let send_task = tokio::spawn(send_loop(
            write,
            outbound_rx,
            shared.clone(),
            config.receive_timeout,
        ));

        Ok(Self {
            handle: TransportHandle {
                outbound: outbound_tx,
                shared,
            },
            config,
            reader: Some(read),
            send_task,
            receive_task: None,
            heartbeat_task: None,
        })
    }

    /// Register the inbound frame handler and start the receive loop.
    ///
    /// Frames are delivered one at a time in receipt order. Only one handler
    /// may be registered per connection.
    pub fn listen<F>(&mut self, listener: F) -> Result<()>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let reader = self
            .reader
            .take()
            .ok_or_else(|| FeedError::Config("transport listener already registered".into()))?;

        self.receive_task = Some(tokio::spawn(receive_loop(
            reader,
            listener,
            self.handle.shared.clone(),
            self.config.receive_timeout,
        )));
        Ok(())
    }

    /// Register a periodic handler, first invoked one `interval` from now
    pub fn keep_alive<F>(&mut self, interval: Duration, handler: F) -> Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        if self.heartbeat_task.is_some() {
            return Err(FeedError::Config(
                "transport heartbeat already registered".into(),
            ));
        }
        if interval.is_zero() {
            return Err(FeedError::Config("heartbeat interval must be non-zero".into()));
        }

        self.heartbeat_task = Some(tokio::spawn(heartbeat_loop(
            interval,
            handler,
            self.handle.shared.clone(),
        )));
        Ok(())
    }

    pub fn send(&self, frame: String) -> Result<()> {
        self.handle.send(frame)
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> TransportState {
        self.handle.state()
    }

    pub fn terminal(&self) -> TerminalSignal {
        self.handle.terminal()
    }

    /// Block until the connection dies and return why
    pub async fn wait_for_error(&self) -> TransportError {
        self.terminal().wait().await
    }

    /// Tear the connection down.
    ///
    /// Sets `Destroyed` as the terminal error (unless another error got there
    /// first), waits for every loop to exit, then closes the socket. Must not
    /// be called from inside a listener or heartbeat handler of the same
    /// transport.
    pub async fn destroy(self) {
        let shared = self.handle.shared.clone();
        shared.fail(TransportError::Destroyed);

        let sink = self.send_task.await.ok().flatten();
        if let Some(task) = self.receive_task {
            let _ = task.await;
        }
        if let Some(task) = self.heartbeat_task {
            let _ = task.await;
        }

        if let Some(mut sink) = sink {
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(error = %err, "ws close handshake failed"),
                Err(_) => debug!("ws close handshake timed out"),
            }
        }
        drop(self.reader);

        shared.destroyed.store(true, Ordering::Release);
        info!("ws transport destroyed");
    }
}

async fn send_loop(
    mut write: WsSink,
    mut outbound: mpsc::Receiver<String>,
    shared: Arc<Shared>,
    write_timeout: Duration,
) -> Option<WsSink> {
    let mut terminal = shared.signal();
    loop {
        tokio::select! {
            biased;
            _ = terminal.wait() => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                debug!(bytes = frame.len(), "ws frame out");
                match tokio::time::timeout(write_timeout, write.send(WsMessage::Text(frame.into()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(error = %err, "ws send failed");
                        shared.fail(TransportError::Send(err.to_string()));
                        return None;
                    }
                    Err(_) => {
                        warn!(?write_timeout, "ws send timed out");
                        shared.fail(TransportError::Send(format!("write timed out after {write_timeout:?}")));
                        return None;
                    }
                }
            }
        }
    }
    Some(write)
}

async fn receive_loop<F>(
    mut read: WsStream,
    mut listener: F,
    shared: Arc<Shared>,
    receive_timeout: Duration,
) where
    F: FnMut(&[u8]) + Send + 'static,
{
    let mut terminal = shared.signal();
    loop {
        tokio::select! {
            biased;
            _ = terminal.wait() => break,
            incoming = tokio::time::timeout(receive_timeout, read.next()) => {
                match incoming {
                    Ok(Some(Ok(WsMessage::Binary(bytes)))) => listener(&bytes[..]),
                    Ok(Some(Ok(WsMessage::Text(text)))) => listener(text.as_str().as_bytes()),
                    Ok(Some(Ok(WsMessage::Close(frame)))) => {
                        info!(?frame, "ws closed by peer");
                        shared.fail(TransportError::Closed);
                        break;
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(err))) => {
                        warn!(error = %err, "ws receive failed");
                        shared.fail(TransportError::Receive(err.to_string()));
                        break;
                    }
                    Ok(None) => {
                        info!("ws stream ended");
                        shared.fail(TransportError::Closed);
                        break;
                    }
                    Err(_) => {
                        warn!(?receive_timeout, "ws receive timed out");
                        shared.fail(TransportError::ReceiveTimeout(receive_timeout));
                        break;
                    }
                }
            }
        }
    }
}

async fn heartbeat_loop<F>(interval: Duration, mut handler: F, shared: Arc<Shared>)
where
    F: FnMut() + Send + 'static,
{
    let mut terminal = shared.signal();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = terminal.wait() => break,
            _ = ticker.tick() => handler(),
        }
    }
}
