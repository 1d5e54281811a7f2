//! Live channel connection manager

use crate::channel::messages::{ClientMessage, ServerMessage, Topic};
use crate::channel::transport::{ChannelConnection, ChannelTransport, WebSocketTransport};
use crate::config::ClientConfig;
use crate::credential::CredentialStore;
use crate::error::{ChannelError, ChannelResult};

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Connection state of the live channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; initial state and the state after `disconnect()`
    Disconnected,
    /// Opening the connection and authenticating
    Connecting,
    /// Authenticated and streaming
    Connected,
    /// Waiting out the backoff before the next attempt
    Reconnecting,
    /// Gave up after exhausting reconnection attempts
    Failed,
}

/// Handler for topic events: `(event name, payload)`
pub type MessageHandler = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Called with `true` once connected and `false` once the connection is lost
pub type StatusObserver = Arc<dyn Fn(bool) + Send + Sync>;

/// Called with every connection error, including the final exhaustion error
pub type ErrorObserver = Arc<dyn Fn(&ChannelError) + Send + Sync>;

/// Identifies a registered observer for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

/// Reconnect delay for the given attempt (1-based): `base * 2^(attempt-1)`,
/// capped at `max`
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(2u32.saturating_pow(exponent)).min(max)
}

/// A registered topic callback
pub struct Subscription {
    topic: Topic,
    manager: Arc<ManagerInner>,
    handler_id: Uuid,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Remove this callback. The server is told to stop sending the topic
    /// once its last callback is gone.
    pub fn unsubscribe(self) {
        self.manager.remove_handler(&self.topic, self.handler_id);
    }
}

struct SessionHandle {
    id: u64,
    shutdown: oneshot::Sender<()>,
}

struct ManagerInner {
    config: ClientConfig,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn ChannelTransport>,
    state: watch::Sender<ConnectionState>,

    // Current supervisor; replaced by connect(), taken by disconnect()
    session: Mutex<Option<SessionHandle>>,
    session_seq: AtomicU64,

    // Outbound queue of the live connection, if any
    tx: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,

    // Lock order: session, subscriptions, tx
    subscriptions: Mutex<BTreeMap<Topic, Vec<(Uuid, MessageHandler)>>>,

    status_observers: Mutex<Vec<(ObserverId, StatusObserver)>>,
    error_observers: Mutex<Vec<(ObserverId, ErrorObserver)>>,

    ping_seq: AtomicU64,
}

/// Owns the single live channel to the monitoring backend.
///
/// Reconnects with exponential backoff after unexpected drops, re-issues
/// topic subscriptions after every reconnect and gives up after
/// `max_reconnect_attempts`. This struct is cheaply cloneable as it uses an
/// internal Arc.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Create a manager using the WebSocket transport
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Self {
        Self::with_transport(config, store, Arc::new(WebSocketTransport))
    }

    pub fn with_transport(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn ChannelTransport>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(ManagerInner {
                config,
                store,
                transport,
                state,
                session: Mutex::new(None),
                session_seq: AtomicU64::new(0),
                tx: Mutex::new(None),
                subscriptions: Mutex::new(BTreeMap::new()),
                status_observers: Mutex::new(Vec::new()),
                error_observers: Mutex::new(Vec::new()),
                ping_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Get a receiver for connection state changes
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Start connecting in the background.
    ///
    /// Returns `false` without doing anything when no credential is stored.
    /// Resets the attempt counter, so this also revives a `Failed` channel.
    /// Must be called within a Tokio runtime.
    pub fn connect(&self) -> bool {
        if self.inner.store.get().is_none() {
            info!("No credential stored, not connecting channel");
            return false;
        }

        let (id, shutdown_rx) = {
            let mut session = self.inner.session.lock();
            let state = self.state();
            if session.is_some()
                && matches!(state, ConnectionState::Connecting | ConnectionState::Connected)
            {
                debug!(?state, "Channel already active");
                return true;
            }

            if let Some(stale) = session.take() {
                let _ = stale.shutdown.send(());
            }

            let id = self.inner.session_seq.fetch_add(1, Ordering::SeqCst) + 1;
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            *session = Some(SessionHandle {
                id,
                shutdown: shutdown_tx,
            });
            self.inner.state.send_replace(ConnectionState::Connecting);
            (id, shutdown_rx)
        };

        tokio::spawn(supervise(self.inner.clone(), id, shutdown_rx));
        true
    }

    /// Close the channel for good.
    ///
    /// Drops every subscription and observer after telling status observers
    /// the channel is down. Never leads to a reconnect.
    pub fn disconnect(&self) {
        let stopped = {
            let mut session = self.inner.session.lock();
            let stopped = session.take();
            self.inner.state.send_replace(ConnectionState::Disconnected);
            stopped
        };

        if let Some(stopped) = stopped {
            info!(session = stopped.id, "Disconnecting channel");
            let _ = stopped.shutdown.send(());
            self.inner.notify_status(false);
        }

        self.inner.subscriptions.lock().clear();
        *self.inner.tx.lock() = None;
        self.inner.status_observers.lock().clear();
        self.inner.error_observers.lock().clear();
    }

    /// Register `handler` for `topic`.
    ///
    /// The subscribe signal goes out when the topic gets its first handler;
    /// while disconnected it is held back and issued once connected.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&str, Value) + Send + Sync + 'static,
    {
        let handler_id = Uuid::new_v4();
        let handler: MessageHandler = Arc::new(handler);

        {
            let mut subs = self.inner.subscriptions.lock();
            let handlers = subs.entry(topic.clone()).or_default();
            let first_handler = handlers.is_empty();
            handlers.push((handler_id, handler));

            if first_handler {
                debug!(%topic, "Subscribing");
                self.inner.send(topic.subscribe_message());
            }
        }

        Subscription {
            topic,
            manager: self.inner.clone(),
            handler_id,
        }
    }

    /// Drop every handler of `topic` and tell the server
    pub fn unsubscribe(&self, topic: &Topic) {
        let mut subs = self.inner.subscriptions.lock();
        if subs.remove(topic).is_some() {
            debug!(%topic, "Unsubscribing");
            self.inner.send(topic.unsubscribe_message());
        }
    }

    /// Ask for a full node snapshot, delivered as a `realtime_nodes` event
    /// on the nodes topic
    pub fn request_realtime_nodes(&self) -> ChannelResult<()> {
        if !self.is_connected() || !self.inner.send(ClientMessage::GetRealtimeNodes) {
            return Err(ChannelError::NotConnected);
        }
        Ok(())
    }

    pub fn on_status_change<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = ObserverId(Uuid::new_v4());
        self.inner
            .status_observers
            .lock()
            .push((id, Arc::new(observer)));
        id
    }

    pub fn remove_status_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.inner.status_observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn on_error<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ChannelError) + Send + Sync + 'static,
    {
        let id = ObserverId(Uuid::new_v4());
        self.inner
            .error_observers
            .lock()
            .push((id, Arc::new(observer)));
        id
    }

    pub fn remove_error_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.inner.error_observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }
}

impl ManagerInner {
    /// Queue a frame on the live connection; `false` when there is none
    fn send(&self, message: ClientMessage) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    fn is_current(&self, session: u64) -> bool {
        self.session.lock().as_ref().map(|s| s.id) == Some(session)
    }

    fn set_state_if_current(&self, session: u64, state: ConnectionState) -> bool {
        let guard = self.session.lock();
        if guard.as_ref().map(|s| s.id) != Some(session) {
            return false;
        }
        self.state.send_replace(state);
        true
    }

    /// Install the outbound queue, queue every held topic's subscribe signal
    /// and flip to `Connected`, atomically with respect to `subscribe()`.
    fn mark_connected(&self, session: u64, tx: mpsc::UnboundedSender<ClientMessage>) -> bool {
        let guard = self.session.lock();
        if guard.as_ref().map(|s| s.id) != Some(session) {
            return false;
        }

        let subs = self.subscriptions.lock();
        for topic in subs.keys() {
            debug!(%topic, "Resubscribing");
            let _ = tx.send(topic.subscribe_message());
        }
        *self.tx.lock() = Some(tx);
        self.state.send_replace(ConnectionState::Connected);
        true
    }

    fn clear_sender(&self, session: u64) -> bool {
        let guard = self.session.lock();
        if guard.as_ref().map(|s| s.id) != Some(session) {
            return false;
        }
        *self.tx.lock() = None;
        true
    }

    fn remove_handler(&self, topic: &Topic, handler_id: Uuid) {
        let mut subs = self.subscriptions.lock();
        let Some(handlers) = subs.get_mut(topic) else {
            return;
        };
        handlers.retain(|(id, _)| *id != handler_id);
        if handlers.is_empty() {
            subs.remove(topic);
            debug!(%topic, "Last handler removed, unsubscribing");
            self.send(topic.unsubscribe_message());
        }
    }

    fn handle_message(&self, message: ServerMessage) {
        match message {
            ServerMessage::Pong { seq } => debug!(seq, "Pong"),
            ServerMessage::Error { message } => warn!("Server error: {}", message),
            ServerMessage::AuthOk { .. } | ServerMessage::AuthError { .. } => {
                debug!("Ignoring handshake frame on an authenticated channel")
            }
            data => {
                if let Some((topic, event, payload)) = data.into_topic_event() {
                    self.dispatch(&topic, event, payload);
                }
            }
        }
    }

    fn dispatch(&self, topic: &Topic, event: &str, payload: Value) {
        let handlers: Vec<MessageHandler> = match self.subscriptions.lock().get(topic) {
            Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
            None => {
                debug!(%topic, event, "No handler for event");
                return;
            }
        };

        for handler in handlers {
            handler(event, payload.clone());
        }
    }

    fn notify_status(&self, connected: bool) {
        let observers: Vec<StatusObserver> = self
            .status_observers
            .lock()
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for observer in observers {
            observer(connected);
        }
    }

    fn notify_error(&self, err: &ChannelError) {
        let observers: Vec<ErrorObserver> = self
            .error_observers
            .lock()
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for observer in observers {
            observer(err);
        }
    }
}

/// Drives one `connect()` session until it is shut down or gives up
async fn supervise(inner: Arc<ManagerInner>, session: u64, mut shutdown: oneshot::Receiver<()>) {
    let mut attempts: u32 = 0;

    loop {
        let err = match run_connection(&inner, session, &mut shutdown, &mut attempts).await {
            Ok(()) => {
                debug!(session, "Channel session ended");
                return;
            }
            Err(e) => e,
        };

        if !inner.is_current(session) {
            return;
        }

        warn!(attempt = attempts + 1, "Channel connection failed: {}", err);
        inner.notify_error(&err);

        attempts += 1;
        if attempts > inner.config.max_reconnect_attempts {
            let exhausted = ChannelError::ReconnectExhausted {
                attempts: inner.config.max_reconnect_attempts,
            };
            error!("{}", exhausted);
            inner.notify_error(&exhausted);
            inner.set_state_if_current(session, ConnectionState::Failed);
            return;
        }

        let delay = backoff_delay(
            attempts,
            inner.config.reconnect_delay,
            inner.config.max_reconnect_delay,
        );
        if !inner.set_state_if_current(session, ConnectionState::Reconnecting) {
            return;
        }
        info!(attempt = attempts, "Reconnecting in {:?}...", delay);

        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(delay) => {}
        }

        if !inner.set_state_if_current(session, ConnectionState::Connecting) {
            return;
        }
    }
}

/// One connection attempt plus, if it succeeds, the life of the connection.
///
/// `Ok(())` means the session was shut down locally; any `Err` is a failed
/// attempt or a lost connection.
async fn run_connection(
    inner: &Arc<ManagerInner>,
    session: u64,
    shutdown: &mut oneshot::Receiver<()>,
    attempts: &mut u32,
) -> ChannelResult<()> {
    // read afresh so a credential renewed since the last attempt is used
    let credential = inner.store.get().ok_or(ChannelError::NoCredential)?;

    let handshake = async {
        let mut conn = inner.transport.open(&inner.config.channel_url).await?;
        conn.send(&ClientMessage::Auth {
            token: credential.as_str().to_string(),
        })
        .await?;

        match conn.recv().await {
            Some(Ok(ServerMessage::AuthOk { client_id })) => {
                info!(client_id = ?client_id, "Channel authenticated");
                Ok(conn)
            }
            Some(Ok(ServerMessage::AuthError { message })) => {
                Err(ChannelError::Authentication(message))
            }
            Some(Ok(other)) => Err(ChannelError::Connection(format!(
                "expected auth_ok, got {}",
                other.event_name()
            ))),
            Some(Err(e)) => Err(e),
            None => Err(ChannelError::Closed),
        }
    };

    let mut conn: Box<dyn ChannelConnection> = tokio::select! {
        _ = &mut *shutdown => return Ok(()),
        result = tokio::time::timeout(inner.config.connect_timeout, handshake) => {
            result.map_err(|_| ChannelError::Timeout)??
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    if !inner.mark_connected(session, tx) {
        conn.close().await;
        return Ok(());
    }
    *attempts = 0;
    inner.notify_status(true);

    let ping_interval = inner.config.ping_interval;
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);

    let result = loop {
        tokio::select! {
            _ = &mut *shutdown => {
                conn.close().await;
                break Ok(());
            }
            Some(message) = rx.recv() => {
                if let Err(e) = conn.send(&message).await {
                    break Err(e);
                }
            }
            frame = conn.recv() => match frame {
                Some(Ok(message)) => inner.handle_message(message),
                Some(Err(ChannelError::Serialization(e))) => {
                    warn!("Ignoring malformed frame: {}", e);
                }
                Some(Err(e)) => break Err(e),
                None => break Err(ChannelError::Closed),
            },
            _ = ping.tick() => {
                let seq = inner.ping_seq.fetch_add(1, Ordering::SeqCst);
                if let Err(e) = conn.send(&ClientMessage::Ping { seq }).await {
                    break Err(e);
                }
            }
        }
    };

    if result.is_err() && inner.clear_sender(session) {
        inner.notify_status(false);
    }
    result
}
