/*
[INPUT]:  Feed endpoint, SessionConfig, topic listeners, request topics
[OUTPUT]: Multiplexed subscriptions and request/reply pairs over one resilient connection
[POS]:    WebSocket layer - protocol state machine, liveness and reconnect orchestration
[UPDATE]: When changing dispatch rules, rendezvous handling or reconnect semantics
*/

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, info, warn};

use crate::error::{FeedError, Result, TransportError};
use crate::ws::codec::{InboundFrame, OutboundFrame, decompress};
use crate::ws::liveness::{Liveness, now_millis};
use crate::ws::transport::{
    DEFAULT_QUEUE_CAPACITY, TerminalSignal, Transport, TransportConfig, TransportHandle,
};

pub const DEFAULT_ENDPOINT: &str = "wss://api.huobi.pro/ws";
const REQUEST_ID_LEN: usize = 10;
const RAW_LOG_MAX_BYTES: usize = 1024;

/// Callback invoked with `(channel, frame)` for every push on a subscribed topic
pub type TopicListener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Session tuning, fixed for the lifetime of the session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often a ping is sent and liveness evaluated
    pub heartbeat_interval: Duration,
    /// Max silence on the read side before the connection counts as dead
    pub receive_timeout: Duration,
    /// Reconnect automatically when the connection is lost
    pub auto_reconnect: bool,
    /// Fixed pause before each reconnect attempt
    pub reconnect_delay: Duration,
    /// Outbound frame queue capacity
    pub queue_capacity: usize,
    /// Upper bound for subscribe/request waits; `None` waits indefinitely
    pub request_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            receive_timeout: Duration::from_secs(10),
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(1),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_timeout: None,
        }
    }
}

impl SessionConfig {
    fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(FeedError::Config(
                "heartbeat_interval must be non-zero".into(),
            ));
        }
        if self.receive_timeout.is_zero() {
            return Err(FeedError::Config("receive_timeout must be non-zero".into()));
        }
        if self.queue_capacity == 0 {
            return Err(FeedError::Config("queue_capacity must be non-zero".into()));
        }
        Ok(())
    }

    fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            queue_capacity: self.queue_capacity,
            receive_timeout: self.receive_timeout,
        }
    }
}

#[derive(Debug)]
struct SubscribeAck {
    err_msg: Option<String>,
}

#[derive(Debug)]
struct Reply {
    payload: Value,
    err_msg: Option<String>,
}

#[derive(Default)]
struct SessionState {
    listeners: HashMap<String, TopicListener>,
    /// Topics a `sub` was sent for on the current connection
    subscribed: HashSet<String>,
    pending_subscribes: HashMap<String, oneshot::Sender<SubscribeAck>>,
    pending_requests: HashMap<String, oneshot::Sender<Result<Reply>>>,
    outbound: Option<TransportHandle>,
    destroyed: bool,
}

struct SessionInner {
    endpoint: String,
    config: SessionConfig,
    state: Mutex<SessionState>,
    transport: AsyncMutex<Option<Transport>>,
    /// Serializes reconnect sequences
    reconnect_lock: AsyncMutex<()>,
    auto_reconnect: AtomicBool,
    closed: AtomicBool,
    /// Bumped each time a transport is installed
    generation: AtomicU64,
    liveness: Liveness,
}

/// One logical feed session over a single physical connection at a time.
///
/// Cloning is cheap; all clones drive the same session. Park a task in
/// [`Session::run`] so lost connections get re-established.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.inner.endpoint)
            .field("config", &self.inner.config)
            .field("auto_reconnect", &self.auto_reconnect())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connect to the default Huobi market feed
    pub async fn connect_default() -> Result<Self> {
        Self::connect(DEFAULT_ENDPOINT, SessionConfig::default()).await
    }

    /// Dial `endpoint` and start listening and heart-beating
    pub async fn connect(endpoint: impl Into<String>, config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new(SessionInner {
            endpoint: endpoint.into(),
            auto_reconnect: AtomicBool::new(config.auto_reconnect),
            liveness: Liveness::new(config.heartbeat_interval),
            config,
            state: Mutex::new(SessionState::default()),
            transport: AsyncMutex::new(None),
            reconnect_lock: AsyncMutex::new(()),
            closed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        });

        let transport = inner.open_transport().await?;
        inner.install(transport).await?;
        Ok(Self { inner })
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn auto_reconnect(&self) -> bool {
        self.inner.auto_reconnect.load(Ordering::Acquire)
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.inner.auto_reconnect.store(enabled, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Topics with a registered listener
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inner.state().listeners.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Subscribe `listener` to `topic`.
    ///
    /// The first call for a topic on the current connection sends `sub` and
    /// waits for the acknowledgement. Later calls only swap the listener.
    pub async fn subscribe<F>(&self, topic: &str, listener: F) -> Result<()>
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.inner.subscribe(topic, Arc::new(listener)).await
    }

    /// Stop delivering pushes for `topic`.
    ///
    /// The feed has no wire-level unsubscribe, so only the listener is dropped
    /// and the topic is not replayed after a reconnect.
    pub fn unsubscribe(&self, topic: &str) {
        debug!(%topic, "ws unsubscribe");
        self.inner.state().listeners.remove(topic);
    }

    /// Issue a one-shot `req` and wait for its reply frame
    pub async fn request(&self, topic: &str) -> Result<Value> {
        self.inner.request(topic).await
    }

    /// Park until the session is closed or destroyed.
    ///
    /// Every transport failure other than an owner-initiated teardown
    /// triggers the reconnect sequence while auto-reconnect is enabled.
    pub async fn run(&self) {
        info!(endpoint = %self.inner.endpoint, "session loop started");
        loop {
            let Some((mut terminal, generation)) = self.inner.current_terminal().await else {
                break;
            };
            let err = terminal.wait().await;

            if self.is_closed() {
                break;
            }
            let _guard = self.inner.reconnect_lock.lock().await;
            if self.inner.generation.load(Ordering::Acquire) != generation {
                debug!(error = %err, "connection already replaced");
                continue;
            }
            if err.is_destroyed() {
                continue;
            }
            if !self.auto_reconnect() {
                info!(error = %err, "connection lost, auto reconnect disabled");
                break;
            }

            warn!(error = %err, "connection lost, reconnecting");
            if let Err(err) = self.inner.reconnect_locked(err).await {
                info!(error = %err, "reconnect abandoned");
                break;
            }
        }
        info!("session loop ended");
    }

    /// Tear down the current connection and dial a fresh one now.
    ///
    /// Forces auto-reconnect on and replays every registered listener.
    pub async fn reconnect(&self) -> Result<()> {
        info!("explicit reconnect");
        if self.inner.state().destroyed {
            return Err(FeedError::SessionClosed);
        }
        self.inner.auto_reconnect.store(true, Ordering::Release);
        self.inner.closed.store(false, Ordering::Release);

        let _guard = self.inner.reconnect_lock.lock().await;
        self.inner.reconnect_locked(TransportError::Destroyed).await
    }

    /// Disable auto-reconnect and destroy the connection.
    ///
    /// Blocked subscribe/request callers fail with `SessionClosed`; listeners
    /// stay registered so a later `reconnect` can restore them.
    pub async fn close(&self) {
        info!("session close");
        self.inner.auto_reconnect.store(false, Ordering::Release);
        self.inner.closed.store(true, Ordering::Release);
        self.inner.shutdown_transport().await;
    }

    /// Close and drop every registry; the session cannot be reused
    pub async fn destroy(&self) {
        info!("session destroy");
        {
            let mut state = self.inner.state();
            state.destroyed = true;
            state.listeners.clear();
            state.subscribed.clear();
        }
        self.close().await;
    }
}

impl SessionInner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Dial a transport wired to this session; does not install it
    async fn open_transport(self: &Arc<Self>) -> Result<Transport> {
        let mut transport =
            Transport::connect(&self.endpoint, self.config.transport_config()).await?;
        self.liveness.touch(now_millis());

        let handle = transport.handle();
        let weak = Arc::downgrade(self);
        transport.listen({
            let weak = weak.clone();
            let handle = handle.clone();
            move |frame| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_frame(&handle, frame);
                }
            }
        })?;
        transport.keep_alive(self.config.heartbeat_interval, move || {
            if let Some(inner) = weak.upgrade() {
                inner.heartbeat(&handle);
            }
        })?;
        Ok(transport)
    }

    /// Make `transport` the current connection
    async fn install(&self, transport: Transport) -> Result<()> {
        let mut slot = self.transport.lock().await;
        if self.is_closed() {
            drop(slot);
            transport.destroy().await;
            return Err(FeedError::SessionClosed);
        }

        {
            let mut state = self.state();
            state.outbound = Some(transport.handle());
            state.subscribed.clear();
        }
        *slot = Some(transport);
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Terminal signal of the installed transport and its generation
    async fn current_terminal(&self) -> Option<(TerminalSignal, u64)> {
        let _guard = self.reconnect_lock.lock().await;
        if self.is_closed() {
            return None;
        }
        let slot = self.transport.lock().await;
        let terminal = slot.as_ref()?.terminal();
        Some((terminal, self.generation.load(Ordering::Acquire)))
    }

    /// Destroy the current transport and fail requests that can no longer be answered
    async fn detach(&self, reason: &TransportError) {
        let old = self.transport.lock().await.take();
        {
            let mut state = self.state();
            state.outbound = None;
            for (id, tx) in state.pending_requests.drain() {
                debug!(%id, "request abandoned by reconnect");
                let _ = tx.send(Err(FeedError::Transport(reason.clone())));
            }
        }
        if let Some(old) = old {
            old.destroy().await;
        }
    }

    async fn shutdown_transport(&self) {
        let old = self.transport.lock().await.take();
        {
            let mut state = self.state();
            state.outbound = None;
            // dropping the senders wakes every waiter with SessionClosed
            state.pending_subscribes.clear();
            state.pending_requests.clear();
        }
        if let Some(old) = old {
            old.destroy().await;
        }
    }

    /// Reconnect sequence; caller holds `reconnect_lock`.
    ///
    /// Retries forever at the fixed delay until it succeeds or auto-reconnect
    /// is switched off.
    async fn reconnect_locked(self: &Arc<Self>, reason: TransportError) -> Result<()> {
        self.detach(&reason).await;

        loop {
            info!(delay = ?self.config.reconnect_delay, "reconnecting");
            tokio::time::sleep(self.config.reconnect_delay).await;

            if self.is_closed() || !self.auto_reconnect.load(Ordering::Acquire) {
                return Err(FeedError::SessionClosed);
            }

            match self.open_transport().await {
                Ok(transport) => {
                    self.install(transport).await?;
                    info!(endpoint = %self.endpoint, "reconnected");
                    self.resubscribe();
                    return Ok(());
                }
                Err(err) => {
                    warn!(error = %err, "reconnect attempt failed");
                }
            }
        }
    }

    /// Replay `sub` for every registered listener without waiting for acks
    fn resubscribe(&self) {
        let topics: Vec<String> = {
            let mut state = self.state();
            let topics: Vec<String> = state.listeners.keys().cloned().collect();
            state.subscribed.extend(topics.iter().cloned());
            topics
        };

        for topic in topics {
            match self.send_frame(&OutboundFrame::subscribe(&topic)) {
                Ok(()) => info!(%topic, "ws resubscribe sent"),
                Err(err) => {
                    warn!(%topic, error = %err, "ws resubscribe failed");
                    self.state().subscribed.remove(&topic);
                }
            }
        }
    }

    fn send_frame(&self, frame: &OutboundFrame) -> Result<()> {
        let handle = self
            .state()
            .outbound
            .clone()
            .ok_or(FeedError::NotConnected)?;
        let text = frame.encode()?;
        debug!(frame = %text, "ws frame queued");
        handle.send(text)
    }

    async fn await_slot<T>(&self, rx: oneshot::Receiver<T>) -> Result<T> {
        let outcome = match self.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| FeedError::Timeout(limit))?,
            None => rx.await,
        };
        outcome.map_err(|_| FeedError::SessionClosed)
    }

    async fn subscribe(&self, topic: &str, listener: TopicListener) -> Result<()> {
        let pending = {
            let mut state = self.state();
            if state.destroyed {
                return Err(FeedError::SessionClosed);
            }

            let pending = if state.subscribed.contains(topic) {
                debug!(%topic, "sub sent before, listener replaced only");
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.pending_subscribes.insert(topic.to_string(), tx);
                Some(rx)
            };
            state.listeners.insert(topic.to_string(), listener.clone());
            state.subscribed.insert(topic.to_string());
            pending
        };

        let Some(rx) = pending else {
            return Ok(());
        };

        if let Err(err) = self.send_frame(&OutboundFrame::subscribe(topic)) {
            self.forget_subscribe(topic, &listener);
            return Err(err);
        }
        info!(%topic, "ws subscription sent");

        let ack = match self.await_slot(rx).await {
            Ok(ack) => ack,
            Err(err) => {
                if matches!(err, FeedError::Timeout(_)) {
                    self.forget_subscribe(topic, &listener);
                }
                return Err(err);
            }
        };

        if let Some(message) = ack.err_msg {
            self.forget_subscribe(topic, &listener);
            return Err(FeedError::Subscribe {
                topic: topic.to_string(),
                message,
            });
        }

        info!(%topic, "ws subscribed");
        Ok(())
    }

    /// Undo a failed subscribe so the caller can retry
    fn forget_subscribe(&self, topic: &str, listener: &TopicListener) {
        let mut state = self.state();
        state.pending_subscribes.remove(topic);
        state.subscribed.remove(topic);
        if state
            .listeners
            .get(topic)
            .is_some_and(|current| Arc::ptr_eq(current, listener))
        {
            state.listeners.remove(topic);
        }
    }

    async fn request(&self, topic: &str) -> Result<Value> {
        let (id, rx) = {
            let mut state = self.state();
            if state.destroyed {
                return Err(FeedError::SessionClosed);
            }
            let mut id = correlation_id();
            while state.pending_requests.contains_key(&id) {
                id = correlation_id();
            }
            let (tx, rx) = oneshot::channel();
            state.pending_requests.insert(id.clone(), tx);
            (id, rx)
        };

        if let Err(err) = self.send_frame(&OutboundFrame::request(topic, &id)) {
            self.state().pending_requests.remove(&id);
            return Err(err);
        }
        debug!(%topic, %id, "ws request sent");

        let reply = match self.await_slot(rx).await {
            Ok(reply) => reply?,
            Err(err) => {
                self.state().pending_requests.remove(&id);
                return Err(err);
            }
        };

        match reply.err_msg.filter(|message| !message.is_empty()) {
            Some(message) => Err(FeedError::Request { id, message }),
            None => Ok(reply.payload),
        }
    }

    fn handle_frame(&self, handle: &TransportHandle, raw: &[u8]) {
        let text = match decompress(raw) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, bytes = raw.len(), "ws frame dropped");
                return;
            }
        };
        let value: Value = match serde_json::from_slice(&text) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    error = %err,
                    raw = %truncate_for_log(&String::from_utf8_lossy(&text), RAW_LOG_MAX_BYTES),
                    "ws frame dropped"
                );
                return;
            }
        };

        match InboundFrame::classify(value) {
            Some(frame) => self.dispatch(handle, frame),
            None => debug!(
                raw = %truncate_for_log(&String::from_utf8_lossy(&text), RAW_LOG_MAX_BYTES),
                "ws frame unrecognized"
            ),
        }
    }

    fn dispatch(&self, handle: &TransportHandle, frame: InboundFrame) {
        match frame {
            InboundFrame::Ping { ts } => {
                self.liveness.touch(now_millis());
                let pong = OutboundFrame::Pong { pong: ts }
                    .encode()
                    .and_then(|text| handle.send(text));
                if let Err(err) = pong {
                    warn!(error = %err, "ws pong not sent");
                }
            }
            InboundFrame::Pong { .. } => {
                self.liveness.touch(now_millis());
            }
            InboundFrame::Push { channel, payload } => {
                let listener = self.state().listeners.get(&channel).cloned();
                match listener {
                    Some(listener) => listener(&channel, &payload),
                    None => debug!(%channel, "push for unregistered channel dropped"),
                }
            }
            InboundFrame::Subscribed { topic, err_msg, .. } => {
                self.deliver_ack(&topic, err_msg);
            }
            InboundFrame::Reply {
                id,
                payload,
                err_msg,
            } => {
                let slot = self.state().pending_requests.remove(&id);
                match slot {
                    Some(tx) => {
                        let _ = tx.send(Ok(Reply { payload, err_msg }));
                    }
                    None => debug!(%id, "reply without waiter dropped"),
                }
            }
            InboundFrame::ErrorNotice { id, err_msg } => {
                if !self.deliver_ack(&id, Some(err_msg.clone())) {
                    warn!(%id, error = %err_msg, "ws error notice");
                }
            }
        }
    }

    /// Hand an ack to the waiting subscriber; false if nobody waits
    fn deliver_ack(&self, topic: &str, err_msg: Option<String>) -> bool {
        let slot = self.state().pending_subscribes.remove(topic);
        match slot {
            Some(tx) => {
                let _ = tx.send(SubscribeAck { err_msg });
                true
            }
            None => {
                match err_msg {
                    Some(message) => warn!(%topic, error = %message, "subscribe rejected without waiter"),
                    None => debug!(%topic, "subscribe ack without waiter"),
                }
                false
            }
        }
    }

    fn heartbeat(&self, handle: &TransportHandle) {
        let now = now_millis();
        let ping = OutboundFrame::Ping { ping: now }
            .encode()
            .and_then(|text| handle.send(text));
        if let Err(err) = ping {
            debug!(error = %err, "ws ping not sent");
        }

        let Some(elapsed_ms) = self.liveness.stale_for(now) else {
            return;
        };
        if !self.auto_reconnect.load(Ordering::Acquire) {
            warn!(elapsed_ms, "ws heartbeat stale, auto reconnect disabled");
            return;
        }
        if handle.fail(TransportError::LivenessLost { elapsed_ms }) {
            warn!(
                elapsed_ms,
                threshold_ms = self.liveness.threshold_ms(),
                "ws heartbeat stale, dropping connection"
            );
        }
    }
}

/// Fixed-length random alphanumeric id for request correlation
fn correlation_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REQUEST_ID_LEN)
        .map(char::from)
        .collect()
}

fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + 3);
    out.push_str(&value[..end]);
    out.push_str("...");
    out
}
