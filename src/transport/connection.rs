//! Broker channel and event loop.
//!
//! This module owns the single WebSocket channel to the broker. Every
//! protocol session shares it through the [`ListenerRegistry`] it carries.
//!
//! # Event Loop
//!
//! Attaching a channel spawns one tokio task that handles:
//!
//! - Incoming text frames, decoded and dispatched to the registry in
//!   arrival order
//! - Outgoing frames queued by [`Connection::send`]
//! - Shutdown requests from [`Connection::disconnect`]
//!
//! # Lifecycle
//!
//! | From | Event | To | Callbacks |
//! |------|-------|----|-----------|
//! | `Disconnected` | `connect()` | `Connecting` | - |
//! | `Connecting` | channel opened | `Connected` | open |
//! | `Connecting` | open failed | `Disconnected` | error |
//! | `Connecting` | `disconnect()` | `Disconnected` | - |
//! | `Connected` | `disconnect()` | `Disconnected` | close |
//! | `Connected` | remote close / channel error | `Disconnected` | error, close, reconnect offer |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ListenerId;
use crate::protocol::{Frame, OutgoingMessage};

use super::registry::{ListenerHandle, ListenerRegistry, Subscription};

// ============================================================================
// Types
// ============================================================================

/// Callback fired when the channel opens or closes.
pub type ConnectionCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback fired on channel errors.
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Hook that decides whether to reconnect after an unexpected closure.
pub type ReconnectHook = Arc<dyn Fn(ReconnectOffer) + Send + Sync>;

// ============================================================================
// ConnectionState
// ============================================================================

/// Channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel.
    Disconnected,
    /// Opening handshake in progress.
    Connecting,
    /// Channel open; frames flow.
    Connected,
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write an encoded frame.
    Send(String),
    /// Close the channel and stop.
    Shutdown,
}

/// Why the event loop stopped.
enum LoopExit {
    /// Local shutdown request.
    Shutdown,
    /// The broker closed the channel.
    RemoteClosed,
    /// Read or write failed.
    Failed(Error),
}

// ============================================================================
// Shared State
// ============================================================================

/// State and command channel, changed together.
struct Link {
    state: ConnectionState,
    command_tx: Option<mpsc::UnboundedSender<ConnectionCommand>>,
    /// Incremented per attached channel so a stale loop cannot close a newer one.
    epoch: u64,
}

#[derive(Default)]
struct Callbacks {
    on_open: Vec<(ListenerId, ConnectionCallback)>,
    on_close: Vec<(ListenerId, ConnectionCallback)>,
    on_error: Vec<(ListenerId, ErrorCallback)>,
    reconnect: Option<ReconnectHook>,
}

/// Clones registered callbacks so none runs under the lock.
fn snapshot<T: Clone>(entries: &[(ListenerId, T)]) -> Vec<T> {
    entries.iter().map(|(_, callback)| callback.clone()).collect()
}

impl Callbacks {
    fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.on_open.len() + self.on_close.len() + self.on_error.len();
        self.on_open.retain(|(entry, _)| *entry != id);
        self.on_close.retain(|(entry, _)| *entry != id);
        self.on_error.retain(|(entry, _)| *entry != id);
        before != self.on_open.len() + self.on_close.len() + self.on_error.len()
    }
}

struct ConnectionInner {
    url: Url,
    link: Mutex<Link>,
    registry: ListenerRegistry,
    callbacks: Mutex<Callbacks>,
    directory_bound: AtomicBool,
}

// ============================================================================
// Connection
// ============================================================================

/// The one physical channel to the broker.
///
/// Cheap to clone; clones share the channel, registry and callbacks.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync`. [`Connection::send`] only enqueues a
/// frame, so it is safe to call from listener callbacks.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.inner.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a disconnected connection targeting `url`.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                url,
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    command_tx: None,
                    epoch: 0,
                }),
                registry: ListenerRegistry::new(),
                callbacks: Mutex::new(Callbacks::default()),
                directory_bound: AtomicBool::new(false),
            }),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Broker URL.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &Url {
        &self.inner.url
    }

    /// Current channel state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.link.lock().state
    }

    /// Returns `true` while frames can be sent.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Listener registry fed by this channel.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &ListenerRegistry {
        &self.inner.registry
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    /// Registers a callback fired each time the channel opens.
    ///
    /// The returned id removes it again with [`Connection::remove_callback`].
    pub fn on_open<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ListenerId::generate();
        self.inner.callbacks.lock().on_open.push((id, Arc::new(callback)));
        id
    }

    /// Registers a callback fired each time an open channel closes.
    pub fn on_close<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ListenerId::generate();
        self.inner.callbacks.lock().on_close.push((id, Arc::new(callback)));
        id
    }

    /// Registers a callback fired on channel errors.
    pub fn on_error<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        let id = ListenerId::generate();
        self.inner.callbacks.lock().on_error.push((id, Arc::new(callback)));
        id
    }

    /// Removes an open, close or error callback.
    ///
    /// Returns `false` if `id` was not registered.
    pub fn remove_callback(&self, id: ListenerId) -> bool {
        self.inner.callbacks.lock().remove(id)
    }

    /// Sets the hook consulted after an unexpected closure.
    ///
    /// Without a hook, the connection stays disconnected.
    pub fn set_reconnect_prompt<F>(&self, hook: F)
    where
        F: Fn(ReconnectOffer) + Send + Sync + 'static,
    {
        self.inner.callbacks.lock().reconnect = Some(Arc::new(hook));
    }

    /// Sets the reconnect hook from a shared handle.
    pub(crate) fn set_reconnect_hook(&self, hook: ReconnectHook) {
        self.inner.callbacks.lock().reconnect = Some(hook);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Opens the channel to the broker.
    ///
    /// Does nothing if the connection is already connecting or connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`] if the handshake fails. Error callbacks
    /// are fired with the same error.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut link = self.inner.link.lock();
            if link.state != ConnectionState::Disconnected {
                debug!(state = ?link.state, "Connect ignored");
                return Ok(());
            }
            link.state = ConnectionState::Connecting;
        }

        info!(url = %self.inner.url, "Connecting to broker");

        match connect_async(self.inner.url.as_str()).await {
            Ok((ws_stream, _)) => {
                if self.state() != ConnectionState::Connecting {
                    debug!("Connection abandoned during handshake");
                    return Ok(());
                }
                self.attach(ws_stream);
                Ok(())
            }
            Err(e) => {
                self.inner.link.lock().state = ConnectionState::Disconnected;
                let err = Error::from(e);
                error!(url = %self.inner.url, error = %err, "Failed to connect to broker");
                self.fire_error(&err);
                Err(err)
            }
        }
    }

    /// Attaches an already-open WebSocket and starts its event loop.
    ///
    /// Replaces any channel attached before. Fires open callbacks.
    /// Must be called within a tokio runtime.
    pub fn attach<S>(&self, ws_stream: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let (epoch, previous) = {
            let mut link = self.inner.link.lock();
            link.epoch += 1;
            link.state = ConnectionState::Connected;
            (link.epoch, link.command_tx.replace(command_tx))
        };

        if let Some(previous) = previous {
            let _ = previous.send(ConnectionCommand::Shutdown);
        }

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            self.inner.registry.clone(),
            Arc::downgrade(&self.inner),
            epoch,
        ));

        info!(url = %self.inner.url, epoch, "Connected to broker");
        self.fire_open();
    }

    /// Closes the channel.
    ///
    /// Close callbacks fire only if the channel was open. Disconnecting
    /// during the handshake abandons it. Does nothing if already
    /// disconnected.
    pub fn disconnect(&self) {
        let (previous, command_tx) = {
            let mut link = self.inner.link.lock();
            let previous = link.state;
            if previous == ConnectionState::Disconnected {
                return;
            }
            link.state = ConnectionState::Disconnected;
            (previous, link.command_tx.take())
        };

        if let Some(command_tx) = command_tx {
            let _ = command_tx.send(ConnectionCommand::Shutdown);
        }

        if previous == ConnectionState::Connected {
            info!(url = %self.inner.url, "Disconnected from broker");
            self.fire_close();
        } else {
            debug!(url = %self.inner.url, "Connect abandoned");
        }
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Queues a frame for the broker.
    ///
    /// If the message carries a response expectation, a one-shot listener
    /// is registered before the frame is queued and its handle returned.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if only one of response topics and
    ///   response callback is supplied
    /// - [`Error::NotConnected`] if no channel is open; the response
    ///   listener, if any, is removed again
    pub fn send(&self, message: OutgoingMessage) -> Result<Option<ListenerHandle>> {
        message.validate()?;

        let (frame, response) = message.into_parts();
        let text = frame.encode()?;

        let handle = response.map(|(topics, callback)| {
            self.inner
                .registry
                .subscribe(&topics, callback, Subscription::Once)
        });

        let queued = {
            let link = self.inner.link.lock();
            match (&link.state, &link.command_tx) {
                (ConnectionState::Connected, Some(command_tx)) => {
                    command_tx.send(ConnectionCommand::Send(text)).is_ok()
                }
                _ => false,
            }
        };

        if !queued {
            if let Some(handle) = &handle {
                handle.deregister();
            }
            debug!(topics = %frame.topics.key(), "Send while not connected");
            return Err(Error::NotConnected);
        }

        trace!(topics = %frame.topics.key(), "Frame queued");
        Ok(handle)
    }

    // ========================================================================
    // Directory Guard
    // ========================================================================

    /// Claims the connection for a protocol directory.
    ///
    /// Returns `false` if another directory already holds it.
    pub(crate) fn bind_directory(&self) -> bool {
        self.inner
            .directory_bound
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the directory claim.
    pub(crate) fn unbind_directory(&self) {
        self.inner.directory_bound.store(false, Ordering::Release);
    }

    // ========================================================================
    // Event Loop
    // ========================================================================

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        registry: ListenerRegistry,
        inner: Weak<ConnectionInner>,
        epoch: u64,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let exit = loop {
            tokio::select! {
                // Incoming frames from broker
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(&text, &registry);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break LoopExit::RemoteClosed;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break LoopExit::Failed(Error::channel_failure("read failed", e));
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break LoopExit::RemoteClosed;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from Rust API
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(text)) => {
                            if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                                error!(error = %e, "Failed to write frame");
                                break LoopExit::Failed(Error::channel_failure("write failed", e));
                            }
                        }

                        Some(ConnectionCommand::Shutdown) | None => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break LoopExit::Shutdown;
                        }
                    }
                }
            }
        };

        if let Some(inner) = inner.upgrade() {
            Self { inner }.handle_loop_exit(epoch, exit);
        }

        debug!(epoch, "Event loop terminated");
    }

    /// Decodes an inbound frame and dispatches it.
    fn handle_incoming_message(text: &str, registry: &ListenerRegistry) {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, text = %text, "Failed to parse incoming frame");
                return;
            }
        };

        let delivered = registry.dispatch(&frame.topics, &frame.contents);
        if delivered == 0 {
            trace!(topics = %frame.topics.key(), "Frame had no listeners");
        }
    }

    /// Finalizes state after the loop for `epoch` stopped.
    fn handle_loop_exit(&self, epoch: u64, exit: LoopExit) {
        if matches!(exit, LoopExit::Shutdown) {
            return;
        }

        {
            let mut link = self.inner.link.lock();
            if link.epoch != epoch || link.state == ConnectionState::Disconnected {
                return;
            }
            link.state = ConnectionState::Disconnected;
            link.command_tx = None;
        }

        warn!(url = %self.inner.url, "Broker channel closed unexpectedly");

        if let LoopExit::Failed(err) = &exit {
            self.fire_error(err);
        }
        self.fire_close();
        self.offer_reconnect();
    }

    // ========================================================================
    // Callback Dispatch
    // ========================================================================

    fn fire_open(&self) {
        let callbacks = snapshot(&self.inner.callbacks.lock().on_open);
        for callback in callbacks {
            callback();
        }
    }

    fn fire_close(&self) {
        let callbacks = snapshot(&self.inner.callbacks.lock().on_close);
        for callback in callbacks {
            callback();
        }
    }

    fn fire_error(&self, err: &Error) {
        let callbacks = snapshot(&self.inner.callbacks.lock().on_error);
        for callback in callbacks {
            callback(err);
        }
    }

    fn offer_reconnect(&self) {
        let hook = self.inner.callbacks.lock().reconnect.clone();
        match hook {
            Some(hook) => hook(ReconnectOffer {
                connection: self.clone(),
            }),
            None => debug!("No reconnect prompt configured"),
        }
    }
}

// ============================================================================
// ReconnectOffer
// ============================================================================

/// Offer to reopen the channel after an unexpected closure.
///
/// Dropping the offer declines it.
#[derive(Debug)]
pub struct ReconnectOffer {
    connection: Connection,
}

impl ReconnectOffer {
    /// Broker URL that would be reconnected to.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &Url {
        self.connection.address()
    }

    /// Accepts the offer and reconnects in the background.
    pub fn accept(self) {
        info!(url = %self.connection.address(), "Reconnect accepted");
        tokio::spawn(async move {
            if let Err(e) = self.connection.connect().await {
                warn!(error = %e, "Reconnect failed");
            }
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
