//! Protocol directory.
//!
//! Tracks which protocols the broker can open and which are open, keeping
//! one [`ProtocolSession`] per open protocol. The broker is the source of
//! truth: acknowledgements of open and close requests trigger a fresh
//! `get_open_protocols` rather than a local edit.
//!
//! # Broker Traffic
//!
//! | Trigger | Action |
//! |---------|--------|
//! | channel opened | request available and open protocols |
//! | channel closed | close every session, clear both lists |
//! | `get_protocols_response` | replace available protocols |
//! | `get_open_protocols_response` | rebuild the open list, keeping sessions still listed |
//! | `open_protocol_response` / `close_protocol_response` | re-request open protocols |
//! | `get_discovery_response` | route each payload to the session of that name |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::ListenerId;
use crate::protocol::{
    AvailableProtocol, BrokerRequest, Contents, DiscoveryPayload, OpenProtocolRequest,
    OutgoingMessage, ProtocolDescriptor, ResponseStatus, parse_available_protocols,
    parse_discovery, parse_open_protocols,
};
use crate::session::{ProtocolSession, SessionInit, SessionKinds};
use crate::transport::{Connection, ListenerHandle, Subscription};

// ============================================================================
// Types
// ============================================================================

#[derive(Default)]
struct DirectoryState {
    available: Vec<AvailableProtocol>,
    open: Vec<ProtocolSession>,
}

struct DirectoryInner {
    connection: Connection,
    kinds: SessionKinds,
    client_id: String,
    state: Mutex<DirectoryState>,
    handles: Mutex<Vec<ListenerHandle>>,
    callbacks: Mutex<Vec<ListenerId>>,
}

impl Drop for DirectoryInner {
    fn drop(&mut self) {
        for handle in self.handles.get_mut().drain(..) {
            handle.deregister();
        }
        for id in self.callbacks.get_mut().drain(..) {
            self.connection.remove_callback(id);
        }
        self.connection.unbind_directory();
    }
}

// ============================================================================
// ProtocolDirectory
// ============================================================================

/// Available and open protocols of the broker.
///
/// At most one directory can be bound to a [`Connection`] at a time.
/// Cheap to clone; the binding is released when the last clone drops.
#[derive(Clone)]
pub struct ProtocolDirectory {
    inner: Arc<DirectoryInner>,
}

impl fmt::Debug for ProtocolDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        let open: Vec<&str> = state.open.iter().map(ProtocolSession::name).collect();
        f.debug_struct("ProtocolDirectory")
            .field("available", &state.available.len())
            .field("open", &open)
            .finish_non_exhaustive()
    }
}

impl ProtocolDirectory {
    /// Binds a directory to `connection`.
    ///
    /// If the connection is already open, the directory requests both
    /// protocol lists right away.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if another directory is bound to the
    /// connection.
    pub fn new(
        connection: Connection,
        kinds: SessionKinds,
        client_id: impl Into<String>,
    ) -> Result<Self> {
        if !connection.bind_directory() {
            return Err(Error::config(
                "a protocol directory is already bound to this connection",
            ));
        }

        let directory = Self {
            inner: Arc::new(DirectoryInner {
                connection,
                kinds,
                client_id: client_id.into(),
                state: Mutex::new(DirectoryState::default()),
                handles: Mutex::new(Vec::new()),
                callbacks: Mutex::new(Vec::new()),
            }),
        };

        directory.install_listeners();

        if directory.inner.connection.is_connected() {
            directory.request_protocols();
        }

        Ok(directory)
    }

    fn downgrade(&self) -> Weak<DirectoryInner> {
        Arc::downgrade(&self.inner)
    }

    /// Runs `action` on the directory if it still exists.
    fn with_directory(weak: &Weak<DirectoryInner>, action: impl FnOnce(&ProtocolDirectory)) {
        if let Some(inner) = weak.upgrade() {
            action(&ProtocolDirectory { inner });
        }
    }

    fn install_listeners(&self) {
        let connection = &self.inner.connection;

        let weak = self.downgrade();
        let opened =
            connection.on_open(move || Self::with_directory(&weak, Self::request_protocols));

        let weak = self.downgrade();
        let closed = connection.on_close(move || Self::with_directory(&weak, Self::clear));

        self.inner.callbacks.lock().extend([opened, closed]);

        let registry = connection.registry();
        let mut handles = self.inner.handles.lock();

        for acknowledgement in [BrokerRequest::OpenProtocol, BrokerRequest::CloseProtocol] {
            let weak = self.downgrade();
            handles.push(registry.subscribe_fn(
                &acknowledgement.response_topics(),
                Subscription::Persistent,
                move |_| Self::with_directory(&weak, |d| d.request_open_protocols()),
            ));
        }

        let weak = self.downgrade();
        handles.push(registry.subscribe_fn(
            &BrokerRequest::GetProtocols.response_topics(),
            Subscription::Persistent,
            move |contents| {
                Self::with_directory(&weak, |d| {
                    d.set_available(parse_available_protocols(contents));
                });
            },
        ));

        let weak = self.downgrade();
        handles.push(registry.subscribe_fn(
            &BrokerRequest::GetOpenProtocols.response_topics(),
            Subscription::Persistent,
            move |contents| {
                Self::with_directory(&weak, |d| match parse_open_protocols(contents) {
                    Ok(descriptors) => d.rebuild_open(descriptors),
                    Err(e) => warn!(error = %e, "Ignoring open protocols response"),
                });
            },
        ));

        let weak = self.downgrade();
        handles.push(registry.subscribe_fn(
            &BrokerRequest::GetDiscovery.response_topics(),
            Subscription::Persistent,
            move |contents| {
                Self::with_directory(&weak, |d| match parse_discovery(contents) {
                    Ok(payloads) => d.apply_discovery(&payloads),
                    Err(e) => warn!(error = %e, "Ignoring discovery message"),
                });
            },
        ));
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The bound connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Session constructor table.
    #[inline]
    #[must_use]
    pub fn kinds(&self) -> &SessionKinds {
        &self.inner.kinds
    }

    /// Protocols the broker can open.
    #[must_use]
    pub fn available_protocols(&self) -> Vec<AvailableProtocol> {
        self.inner.state.lock().available.clone()
    }

    /// Sessions for the currently open protocols.
    #[must_use]
    pub fn open_protocols(&self) -> Vec<ProtocolSession> {
        self.inner.state.lock().open.clone()
    }

    /// Finds the open session named `name`.
    #[must_use]
    pub fn open_protocol_named(&self, name: &str) -> Option<ProtocolSession> {
        self.inner
            .state
            .lock()
            .open
            .iter()
            .find(|session| session.name() == name)
            .cloned()
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Requests both protocol lists.
    ///
    /// Replies are applied by the directory's own listeners.
    pub fn request_protocols(&self) {
        self.request_available_protocols();
        self.request_open_protocols();
    }

    /// Requests the list of protocols the broker can open.
    pub fn request_available_protocols(&self) {
        self.fire_and_forget(BrokerRequest::GetProtocols);
    }

    /// Requests the list of open protocols.
    pub fn request_open_protocols(&self) {
        self.fire_and_forget(BrokerRequest::GetOpenProtocols);
    }

    fn fire_and_forget(&self, request: BrokerRequest) {
        let message = OutgoingMessage::new(request.topics());
        match self.inner.connection.send(message) {
            Ok(_) => debug!(request = request.name(), "Broker request sent"),
            Err(e) => debug!(request = request.name(), error = %e, "Broker request not sent"),
        }
    }

    /// Asks the broker to open a protocol.
    ///
    /// Resolves with the broker's acknowledgement. The open list is updated
    /// by the `get_open_protocols` exchange the acknowledgement triggers.
    ///
    /// # Errors
    ///
    /// - [`Error::RemoteRejection`] if the broker refuses
    /// - [`Error::NotConnected`] if the channel is closed
    pub async fn open_protocol(&self, request: OpenProtocolRequest) -> Result<Contents> {
        info!(protocol = %request.name, "Opening protocol");
        let response = self
            .broker_request(BrokerRequest::OpenProtocol, request.to_contents())?
            .await?;
        ResponseStatus::check(response)
    }

    /// Asks the broker to close `session`.
    ///
    /// On confirmation the open session with the same name is removed and
    /// closed. On rejection nothing changes locally.
    ///
    /// # Errors
    ///
    /// - [`Error::RemoteRejection`] if the broker refuses
    /// - [`Error::NotConnected`] if the channel is closed
    pub async fn close_protocol(&self, session: &ProtocolSession) -> Result<Contents> {
        let name = session.name().to_string();
        info!(protocol = %name, "Closing protocol");

        let mut contents = Contents::new();
        contents.insert("protocol".into(), Value::String(name.clone()));

        let response = self
            .broker_request(BrokerRequest::CloseProtocol, contents)?
            .await?;
        let response = ResponseStatus::check(response)?;

        let removed = {
            let mut state = self.inner.state.lock();
            state
                .open
                .iter()
                .position(|open| open.name() == name)
                .map(|index| state.open.remove(index))
        };

        match removed {
            Some(removed) => removed.close(),
            None => debug!(protocol = %name, "Closed protocol was not in the open list"),
        }

        Ok(response)
    }

    /// Asks the broker for discovery.
    ///
    /// With `force`, the broker rediscovers instead of answering from its
    /// cache. Payloads are routed to sessions by the directory's discovery
    /// listener; the raw response is returned as well.
    ///
    /// # Errors
    ///
    /// - [`Error::RemoteRejection`] if the response carries a failure status
    /// - [`Error::NotConnected`] if the channel is closed
    pub async fn request_discovery(&self, force: bool) -> Result<Contents> {
        let mut contents = Contents::new();
        contents.insert("force".into(), Value::Bool(force));

        let response = self
            .broker_request(BrokerRequest::GetDiscovery, contents)?
            .await?;

        // Discovery replies usually carry no status; only an explicit failure rejects.
        match ResponseStatus::of(&response) {
            ResponseStatus::Failure(status) => Err(Error::remote_rejection(status, response)),
            ResponseStatus::Success | ResponseStatus::Missing => Ok(response),
        }
    }

    /// Sends `request` and returns a receiver for its response.
    fn broker_request(
        &self,
        request: BrokerRequest,
        contents: Contents,
    ) -> Result<oneshot::Receiver<Contents>> {
        let (response_tx, response_rx) = oneshot::channel();
        let response_tx = Mutex::new(Some(response_tx));

        let message = OutgoingMessage::new(request.topics())
            .contents(contents)
            .response_topics(request.response_topics())
            .on_response(move |response| {
                if let Some(tx) = response_tx.lock().take() {
                    let _ = tx.send(response.clone());
                }
            });

        self.inner.connection.send(message)?;
        Ok(response_rx)
    }

    // ========================================================================
    // Broker Events
    // ========================================================================

    fn set_available(&self, available: Vec<AvailableProtocol>) {
        debug!(count = available.len(), "Available protocols updated");
        self.inner.state.lock().available = available;
    }

    /// Replaces the open list with `descriptors`.
    ///
    /// A session whose name and kind are still listed is kept as is, with
    /// its listeners, fields and endpoints. Sessions no longer listed are
    /// closed.
    fn rebuild_open(&self, descriptors: Vec<ProtocolDescriptor>) {
        let previous = self.open_protocols();

        let sessions: Vec<ProtocolSession> = descriptors
            .into_iter()
            .map(|descriptor| {
                let kept = previous.iter().find(|session| {
                    session.is_open()
                        && session.name() == descriptor.name
                        && session.kind() == descriptor.protocol_type.as_deref()
                });
                if let Some(session) = kept {
                    return session.clone();
                }

                let init = SessionInit {
                    name: descriptor.name,
                    kind: descriptor.protocol_type,
                    client_id: self.inner.client_id.clone(),
                    connection: self.inner.connection.clone(),
                };
                let session = self.inner.kinds.construct(init);
                if let Err(e) = session.open() {
                    warn!(protocol = %session.name(), error = %e, "Failed to open session");
                }
                session
            })
            .collect();

        let names: Vec<String> = sessions.iter().map(|s| s.name().to_string()).collect();
        let displaced = std::mem::replace(&mut self.inner.state.lock().open, sessions.clone());
        for session in displaced {
            if !sessions.iter().any(|kept| kept.ptr_eq(&session)) {
                session.close();
            }
        }

        info!(protocols = ?names, "Open protocols rebuilt");
    }

    fn apply_discovery(&self, payloads: &[DiscoveryPayload]) {
        for payload in payloads {
            let Some(session) = self.open_protocol_named(&payload.name) else {
                let err = Error::no_matching_session(&payload.name);
                warn!(error = %err, "Dropping discovery payload");
                continue;
            };

            if let Err(e) = session.add_discovery_info(payload) {
                warn!(protocol = %payload.name, error = %e, "Discovery not applied");
            }
        }
    }

    fn clear(&self) {
        let open = {
            let mut state = self.inner.state.lock();
            state.available.clear();
            std::mem::take(&mut state.open)
        };

        let count = open.len();
        for session in open {
            session.close();
        }

        info!(closed = count, "Protocol directory cleared");
    }
}

// ============================================================================
// Tests
// ============================================================================
