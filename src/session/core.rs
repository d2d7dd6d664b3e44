//! Protocol session.
//!
//! One logical connection to a broker-side protocol, multiplexed over the
//! shared [`Connection`]. A session listens for everything addressed to its
//! client id, keeps a log of it, and holds the fields and endpoints that
//! discovery reports for the protocol.
//!
//! # Lifecycle
//!
//! | State | `open()` | `close()` |
//! |-------|----------|-----------|
//! | `Created` | subscribes, moves to `Open` | moves to `Closed` |
//! | `Open` | no-op | releases listeners, clears endpoints, moves to `Closed` |
//! | `Closed` | [`Error::SessionClosed`] | no-op |

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, trace};

use crate::error::{Error, Result};
use crate::protocol::{
    Contents, DiscoveryPayload, EndpointDescriptor, OutgoingMessage, ResponseStatus, Topics,
};
use crate::transport::{Connection, ListenerHandle, Subscription};

use super::endpoint::Endpoint;
use super::fields::{Fields, NAME_KEY};

// ============================================================================
// Constants
// ============================================================================

/// Client id used when none is configured.
pub const DEFAULT_CLIENT_ID: &str = "UI";

/// Topic key carrying the destination address.
pub const TO_KEY: &str = "TO";

/// Names of explicit session accessors; discovery keys never shadow them.
const RESERVED_NAMES: &[&str] = &[
    "name",
    "kind",
    "client_id",
    "state",
    "log",
    "fields",
    "get",
    "open",
    "close",
    "on_message",
    "send_message",
    "available_endpoints",
    "active_endpoints",
];

// ============================================================================
// Types
// ============================================================================

/// Builds an endpoint from its discovery descriptor.
pub type EndpointFactory =
    Arc<dyn Fn(EndpointDescriptor, &ProtocolSession) -> Endpoint + Send + Sync>;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, not yet listening.
    Created,
    /// Listening for messages addressed to the client.
    Open,
    /// Terminal.
    Closed,
}

// ============================================================================
// SessionInit
// ============================================================================

/// Everything a session constructor needs.
#[derive(Debug, Clone)]
pub struct SessionInit {
    /// Protocol name as reported by the broker.
    pub name: String,
    /// Declared protocol kind (`protocol_type`).
    pub kind: Option<String>,
    /// Address used in `TO` for messages destined to this client.
    pub client_id: String,
    /// Shared broker channel.
    pub connection: Connection,
}

impl SessionInit {
    /// Creates an init for `name` with the default client id and no kind.
    #[must_use]
    pub fn new(name: impl Into<String>, connection: Connection) -> Self {
        Self {
            name: name.into(),
            kind: None,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            connection,
        }
    }

    /// Sets the declared protocol kind.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Sets the client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }
}

// ============================================================================
// Shared State
// ============================================================================

pub(super) struct SessionInner {
    name: String,
    kind: Option<String>,
    client_id: String,
    connection: Connection,
    endpoint_factory: EndpointFactory,
    data: Mutex<SessionData>,
}

struct SessionData {
    state: SessionState,
    log: Vec<Contents>,
    fields: Fields,
    accessors: BTreeSet<String>,
    available: Vec<Endpoint>,
    active: Vec<Endpoint>,
    handles: Vec<ListenerHandle>,
}

// ============================================================================
// ProtocolSession
// ============================================================================

/// Client-side state for one open protocol.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProtocolSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.data.lock();
        f.debug_struct("ProtocolSession")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("state", &data.state)
            .field("available_endpoints", &data.available.len())
            .finish_non_exhaustive()
    }
}

impl ProtocolSession {
    /// Creates a session with the standard endpoint factory.
    #[must_use]
    pub fn new(init: SessionInit) -> Self {
        Self::with_endpoint_factory(init, Arc::new(Endpoint::new))
    }

    /// Creates a session whose endpoints are built by `factory`.
    #[must_use]
    pub fn with_endpoint_factory(init: SessionInit, factory: EndpointFactory) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                name: init.name,
                kind: init.kind,
                client_id: init.client_id,
                connection: init.connection,
                endpoint_factory: factory,
                data: Mutex::new(SessionData {
                    state: SessionState::Created,
                    log: Vec::new(),
                    fields: Fields::new(),
                    accessors: BTreeSet::new(),
                    available: Vec::new(),
                    active: Vec::new(),
                    handles: Vec::new(),
                }),
            }),
        }
    }

    pub(super) fn downgrade(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(super) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    /// Returns `true` if both handles refer to the same session.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Protocol name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Declared protocol kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.inner.kind.as_deref()
    }

    /// Client id used as `TO` for inbound messages.
    #[inline]
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Broker channel the session talks over.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.data.lock().state
    }

    /// Returns `true` while the session is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Every message received while open, oldest first.
    #[must_use]
    pub fn log(&self) -> Vec<Contents> {
        self.inner.data.lock().log.clone()
    }

    /// Snapshot of the discovery fields.
    #[must_use]
    pub fn fields(&self) -> Fields {
        self.inner.data.lock().fields.clone()
    }

    /// Reads a discovery field through its accessor name.
    ///
    /// Only names exposed by discovery resolve; a discovery key that
    /// collides with an explicit accessor is never exposed, though it
    /// remains readable through [`ProtocolSession::fields`].
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        let data = self.inner.data.lock();
        if !data.accessors.contains(name) {
            return None;
        }
        data.fields.get(name)
    }

    /// Names readable through [`ProtocolSession::get`].
    #[must_use]
    pub fn accessor_names(&self) -> Vec<String> {
        self.inner.data.lock().accessors.iter().cloned().collect()
    }

    /// Endpoints from the latest discovery.
    #[must_use]
    pub fn available_endpoints(&self) -> Vec<Endpoint> {
        self.inner.data.lock().available.clone()
    }

    /// Endpoints activated by the user.
    #[must_use]
    pub fn active_endpoints(&self) -> Vec<Endpoint> {
        self.inner.data.lock().active.clone()
    }

    /// Finds an available endpoint by name.
    #[must_use]
    pub fn endpoint(&self, name: &str) -> Option<Endpoint> {
        self.inner
            .data
            .lock()
            .available
            .iter()
            .find(|endpoint| endpoint.name() == name)
            .cloned()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts listening for messages addressed to the client.
    ///
    /// Every such message is appended to the log. Opening an open session
    /// does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session was closed.
    pub fn open(&self) -> Result<()> {
        let mut data = self.inner.data.lock();
        match data.state {
            SessionState::Open => return Ok(()),
            SessionState::Closed => return Err(Error::session_closed(&self.inner.name)),
            SessionState::Created => {}
        }

        let topics = Topics::new().with(TO_KEY, self.inner.client_id.as_str());
        let weak = Arc::downgrade(&self.inner);
        let handle = self.inner.connection.registry().subscribe_fn(
            &topics,
            Subscription::Persistent,
            move |contents| {
                if let Some(inner) = weak.upgrade() {
                    inner.data.lock().log.push(contents.clone());
                }
            },
        );

        data.handles.push(handle);
        data.state = SessionState::Open;
        drop(data);

        info!(protocol = %self.inner.name, kind = ?self.inner.kind, "Session opened");
        Ok(())
    }

    /// Releases every listener and clears endpoints.
    ///
    /// Closing a closed session does nothing.
    pub fn close(&self) {
        let handles = {
            let mut data = self.inner.data.lock();
            if data.state == SessionState::Closed {
                return;
            }
            data.state = SessionState::Closed;
            data.available.clear();
            data.active.clear();
            std::mem::take(&mut data.handles)
        };

        for handle in &handles {
            handle.deregister();
        }

        info!(
            protocol = %self.inner.name,
            listeners = handles.len(),
            "Session closed"
        );
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    /// Subscribes to messages matching `topics` plus `TO: client_id`.
    ///
    /// A `TO` already present in `topics` wins. The listener is persistent
    /// and released when the session closes. Handles of listeners already
    /// deregistered are dropped from the session here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session was closed.
    pub fn on_message<F>(&self, topics: &Topics, callback: F) -> Result<ListenerHandle>
    where
        F: Fn(&Contents) + Send + Sync + 'static,
    {
        let mut data = self.inner.data.lock();
        if data.state == SessionState::Closed {
            return Err(Error::session_closed(&self.inner.name));
        }

        let topics = Topics::new()
            .with(TO_KEY, self.inner.client_id.as_str())
            .merged(topics);
        let handle = self.inner.connection.registry().subscribe_fn(
            &topics,
            Subscription::Persistent,
            callback,
        );
        data.handles.retain(ListenerHandle::is_registered);
        data.handles.push(handle.clone());

        trace!(protocol = %self.inner.name, key = %handle.key(), "Session listener added");
        Ok(handle)
    }

    /// Sends a message and waits for its response.
    ///
    /// `TO: client_id` is added to `response_topics` unless it already has
    /// a `TO`. There is no timeout: if no response ever arrives the future
    /// stays pending. Use [`ProtocolSession::send_message_with_timeout`] to
    /// bound the wait.
    ///
    /// # Errors
    ///
    /// - [`Error::RemoteRejection`] if the response status is not a success
    /// - [`Error::NotConnected`] if the channel is closed
    /// - [`Error::SessionClosed`] if the session was closed
    pub async fn send_message(
        &self,
        topics: Topics,
        contents: Contents,
        response_topics: Topics,
    ) -> Result<Contents> {
        let (_handle, response_rx) = self.request(topics, contents, response_topics)?;
        let response = response_rx.await?;
        ResponseStatus::check(response)
    }

    /// Like [`ProtocolSession::send_message`], giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// As [`ProtocolSession::send_message`], plus [`Error::RequestTimeout`]
    /// when the wait expires. The response listener is removed on expiry.
    pub async fn send_message_with_timeout(
        &self,
        topics: Topics,
        contents: Contents,
        response_topics: Topics,
        timeout: Duration,
    ) -> Result<Contents> {
        let (handle, response_rx) = self.request(topics, contents, response_topics)?;

        match tokio::time::timeout(timeout, response_rx).await {
            Ok(response) => ResponseStatus::check(response?),
            Err(_) => {
                handle.deregister();
                debug!(
                    protocol = %self.inner.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Response timed out"
                );
                Err(Error::request_timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Queues the frame with a one-shot response listener feeding a channel.
    fn request(
        &self,
        topics: Topics,
        contents: Contents,
        mut response_topics: Topics,
    ) -> Result<(ListenerHandle, oneshot::Receiver<Contents>)> {
        if self.state() == SessionState::Closed {
            return Err(Error::session_closed(&self.inner.name));
        }

        if !response_topics.contains_key(TO_KEY) {
            response_topics.insert(TO_KEY, self.inner.client_id.as_str());
        }

        let (response_tx, response_rx) = oneshot::channel();
        let response_tx = Mutex::new(Some(response_tx));

        let message = OutgoingMessage::new(topics)
            .contents(contents)
            .response_topics(response_topics)
            .on_response(move |response| {
                if let Some(tx) = response_tx.lock().take() {
                    let _ = tx.send(response.clone());
                }
            });

        let Some(handle) = self.inner.connection.send(message)? else {
            return Err(Error::protocol("response listener was not registered"));
        };

        Ok((handle, response_rx))
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Applies a discovery payload for this protocol.
    ///
    /// Fields are merged (never removed), new field names become readable
    /// through [`ProtocolSession::get`], and the available endpoints are
    /// replaced wholesale by endpoints built from the payload's children.
    /// Active endpoints are re-pointed at their replacements by name and
    /// dropped if discovery no longer lists them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session was closed.
    pub fn add_discovery_info(&self, payload: &DiscoveryPayload) -> Result<()> {
        if self.state() == SessionState::Closed {
            return Err(Error::session_closed(&self.inner.name));
        }

        let endpoints: Vec<Endpoint> = payload
            .children
            .iter()
            .cloned()
            .map(|descriptor| (self.inner.endpoint_factory)(descriptor, self))
            .collect();

        let mut data = self.inner.data.lock();
        if data.state == SessionState::Closed {
            return Err(Error::session_closed(&self.inner.name));
        }

        data.fields.set(NAME_KEY, Value::String(payload.name.clone()));
        data.fields.merge(&payload.fields);

        let names = std::iter::once(NAME_KEY).chain(payload.fields.keys().map(String::as_str));
        for name in names {
            if !RESERVED_NAMES.contains(&name) {
                data.accessors.insert(name.to_string());
            }
        }

        let active: Vec<Endpoint> = data
            .active
            .iter()
            .filter_map(|old| endpoints.iter().find(|new| new.name() == old.name()))
            .cloned()
            .collect();
        data.active = active;
        data.available = endpoints;

        debug!(
            protocol = %self.inner.name,
            endpoints = data.available.len(),
            fields = data.fields.len(),
            "Discovery applied"
        );
        Ok(())
    }

    // ========================================================================
    // Endpoint Activation
    // ========================================================================

    /// Marks an available endpoint as active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no available endpoint has that
    /// name.
    pub fn activate_endpoint(&self, name: &str) -> Result<Endpoint> {
        let mut data = self.inner.data.lock();
        let Some(endpoint) = data.available.iter().find(|e| e.name() == name).cloned() else {
            return Err(Error::invalid_argument(format!(
                "no available endpoint named {name} on {}",
                self.inner.name
            )));
        };

        if !data.active.iter().any(|e| e.name() == name) {
            data.active.push(endpoint.clone());
        }
        Ok(endpoint)
    }

    /// Removes an endpoint from the active list.
    ///
    /// Returns `true` if it was active.
    pub fn deactivate_endpoint(&self, name: &str) -> bool {
        let mut data = self.inner.data.lock();
        let before = data.active.len();
        data.active.retain(|e| e.name() != name);
        data.active.len() != before
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::transport::testing::{BrokerSide, attached_pair, test_url, wait_for};

    fn contents(value: Value) -> Contents {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn discovery() -> DiscoveryPayload {
        DiscoveryPayload::from_value(json!({
            "NAME": "P",
            "VERSION": "1.0",
            "CHILDREN": [{"NAME": "E1", "INTERFACES": []}]
        }))
        .expect("payload")
    }

    fn session(connection: &Connection) -> ProtocolSession {
        ProtocolSession::new(SessionInit::new("P", connection.clone()).with_kind("serial"))
    }

    async fn reply(broker: &mut BrokerSide, body: Value) -> crate::protocol::Frame {
        let request = broker.next_frame().await;
        broker
            .send_frame(Topics::new().with("TO", "UI").with("FROM", "P"), body)
            .await;
        request
    }

    #[test]
    fn test_new_session() {
        let session = session(&Connection::new(test_url()));
        assert_eq!(session.name(), "P");
        assert_eq!(session.kind(), Some("serial"));
        assert_eq!(session.client_id(), DEFAULT_CLIENT_ID);
        assert_eq!(session.state(), SessionState::Created);
        assert!(session.available_endpoints().is_empty());
        assert!(session.log().is_empty());
    }

    #[test]
    fn test_open_subscribes_to_client_id() {
        let connection = Connection::new(test_url());
        let session = session(&connection);
        let to_ui = Topics::new().with("TO", "UI");

        session.open().expect("open");
        session.open().expect("second open is a no-op");
        assert!(session.is_open());
        assert_eq!(connection.registry().listener_count(&to_ui), 1);

        connection
            .registry()
            .dispatch(&to_ui, &contents(json!({"hello": 1})));
        assert_eq!(session.log(), vec![contents(json!({"hello": 1}))]);
    }

    #[test]
    fn test_deregistered_listeners_are_pruned() {
        let connection = Connection::new(test_url());
        let session = session(&connection);
        session.open().expect("open");
        let topics = Topics::new().with("FROM", "E1");

        for _ in 0..5 {
            let handle = session.on_message(&topics, |_| {}).expect("listener");
            handle.deregister();
        }

        // The client-id log listener and the latest one.
        assert_eq!(session.inner.data.lock().handles.len(), 2);
        assert_eq!(connection.registry().bucket_count(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let connection = Connection::new(test_url());
        let session = session(&connection);
        session.open().expect("open");
        session.add_discovery_info(&discovery()).expect("discovery");
        session.activate_endpoint("E1").expect("activate");

        session.close();
        session.close();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.available_endpoints().is_empty());
        assert!(session.active_endpoints().is_empty());
        assert_eq!(connection.registry().bucket_count(), 0);
        assert!(matches!(session.open(), Err(Error::SessionClosed { .. })));
    }

    #[test]
    fn test_discovery_scenario() {
        let session = session(&Connection::new(test_url()));
        session.open().expect("open");
        session.add_discovery_info(&discovery()).expect("discovery");

        assert_eq!(session.fields().version(), Some("1.0"));
        assert_eq!(session.get("VERSION"), Some(json!("1.0")));
        assert_eq!(session.get("NAME"), Some(json!("P")));

        let endpoints = session.available_endpoints();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].name(), "E1");
        assert!(endpoints[0].interfaces().is_empty());
    }

    #[test]
    fn test_discovery_replaces_endpoints_and_merges_fields() {
        let session = session(&Connection::new(test_url()));
        session.add_discovery_info(&discovery()).expect("first");
        session.activate_endpoint("E1").expect("activate");

        let second = DiscoveryPayload::from_value(json!({
            "NAME": "P",
            "PORT": "/dev/ttyUSB0",
            "CHILDREN": [{"NAME": "E2"}]
        }))
        .expect("payload");
        session.add_discovery_info(&second).expect("second");

        let names: Vec<_> = session
            .available_endpoints()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["E2"]);
        assert!(session.active_endpoints().is_empty());
        assert_eq!(session.get("VERSION"), Some(json!("1.0")));
        assert_eq!(session.get("PORT"), Some(json!("/dev/ttyUSB0")));
    }

    #[test]
    fn test_reserved_names_are_not_exposed() {
        let session = session(&Connection::new(test_url()));
        let payload = DiscoveryPayload::from_value(json!({"NAME": "P", "log": "x", "MODE": 2}))
            .expect("payload");
        session.add_discovery_info(&payload).expect("discovery");

        assert_eq!(session.get("log"), None);
        assert_eq!(session.fields().get("log"), Some(json!("x")));
        assert_eq!(session.get("MODE"), Some(json!(2)));
        assert_eq!(session.accessor_names(), vec!["MODE", "NAME"]);
    }

    #[test]
    fn test_activate_unknown_endpoint() {
        let session = session(&Connection::new(test_url()));
        assert!(matches!(
            session.activate_endpoint("nope"),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(!session.deactivate_endpoint("nope"));
    }

    #[test]
    fn test_on_message_merges_client_id() {
        let connection = Connection::new(test_url());
        let session = session(&connection);
        session.open().expect("open");

        let handle = session
            .on_message(&Topics::new().with("FROM", "P"), |_| {})
            .expect("listener");
        let expected = Topics::new().with("FROM", "P").with("TO", "UI");
        assert_eq!(handle.key(), &expected.key());

        session.close();
        assert!(!connection.registry().has_bucket(&expected));
    }

    #[tokio::test]
    async fn test_send_message_resolves_on_success() {
        let (connection, mut broker) = attached_pair().await;
        let session = session(&connection);
        session.open().expect("open");

        let pending = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .send_message(
                        Topics::new().with("TO", "P"),
                        contents(json!({"cmd": 1})),
                        Topics::new().with("FROM", "P"),
                    )
                    .await
            }
        });

        let request = reply(&mut broker, json!({"status": 0, "value": 42})).await;
        assert_eq!(request.topics.get_str("TO"), Some("P"));
        assert_eq!(request.contents.get("cmd"), Some(&json!(1)));

        let response = pending.await.expect("task").expect("success");
        assert_eq!(response.get("value"), Some(&json!(42)));
        // Exact topic match: the reply is not addressed to the bare `{TO: UI}` log key.
        assert!(session.log().is_empty());
    }

    #[tokio::test]
    async fn test_send_message_rejects_on_failure_status() {
        let (connection, mut broker) = attached_pair().await;
        let session = session(&connection);

        let pending = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .send_message(
                        Topics::new().with("TO", "P"),
                        Contents::new(),
                        Topics::new().with("FROM", "P"),
                    )
                    .await
            }
        });

        reply(&mut broker, json!({"STATUS": -1, "DESCRIPTION": "busy"})).await;

        let err = pending.await.expect("task").unwrap_err();
        assert!(err.is_remote_rejection());
        assert_eq!(
            err.response().and_then(|r| r.get("DESCRIPTION")),
            Some(&json!("busy"))
        );
    }

    #[tokio::test]
    async fn test_send_message_with_timeout_removes_listener() {
        let (connection, _broker) = attached_pair().await;
        let session = session(&connection);
        let response_topics = Topics::new().with("FROM", "P");

        let err = session
            .send_message_with_timeout(
                Topics::new().with("TO", "P"),
                Contents::new(),
                response_topics.clone(),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(!connection
            .registry()
            .has_bucket(&response_topics.with("TO", "UI")));
    }

    #[tokio::test]
    async fn test_send_message_on_closed_session() {
        let session = session(&Connection::new(test_url()));
        session.close();
        let result = session
            .send_message(Topics::new(), Contents::new(), Topics::new())
            .await;
        assert!(matches!(result, Err(Error::SessionClosed { .. })));
    }

    #[tokio::test]
    async fn test_send_message_while_disconnected() {
        let connection = Connection::new(test_url());
        let session = session(&connection);
        let result = session
            .send_message(Topics::new().with("TO", "P"), Contents::new(), Topics::new())
            .await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(connection.registry().bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_channel_error_leaves_request_pending() {
        let (connection, mut broker) = attached_pair().await;
        let failures = Arc::new(Mutex::new(0usize));
        connection.on_error({
            let failures = failures.clone();
            move |err| {
                if matches!(err, Error::ChannelFailure { .. }) {
                    *failures.lock() += 1;
                }
            }
        });
        let session = session(&connection);

        let mut pending = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .send_message(
                        Topics::new().with("TO", "P"),
                        Contents::new(),
                        Topics::new().with("FROM", "P"),
                    )
                    .await
            }
        });

        broker.next_frame().await;
        drop(broker);
        wait_for(|| *failures.lock() == 1).await;

        let waited = tokio::time::timeout(Duration::from_millis(100), &mut pending).await;
        assert!(waited.is_err());
        assert!(!pending.is_finished());
        pending.abort();
    }
}
