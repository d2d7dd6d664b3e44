//! Endpoint datastreams.
//!
//! A datastream follows one named value stream of an endpoint. Stream
//! updates arrive on
//! `{TX_TYPE: "DIRECT", MSG_TYPE: "STREAM", TO: <client>, FROM: <endpoint>, STREAM: <name>}`
//! and carry the new value under `VALUE`.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use crate::error::Result;
use crate::identifiers::ListenerId;
use crate::protocol::{Contents, Topics};
use crate::transport::ListenerHandle;

use super::core::{ProtocolSession, TO_KEY};
use super::endpoint::FROM_KEY;

// ============================================================================
// Constants
// ============================================================================

/// `TX_TYPE` of endpoint-addressed traffic.
pub const DIRECT_TX_TYPE: &str = "DIRECT";

/// `MSG_TYPE` of stream traffic.
pub const STREAM_MSG_TYPE: &str = "STREAM";

const TX_TYPE_KEY: &str = "TX_TYPE";
const MSG_TYPE_KEY: &str = "MSG_TYPE";
const STREAM_KEY: &str = "STREAM";
const STOP_KEY: &str = "STOP";
const VALUE_KEY: &str = "VALUE";

/// Callback fired with each new stream value.
pub type ChangeCallback = Arc<dyn Fn(&Value) + Send + Sync>;

// ============================================================================
// Shared State
// ============================================================================

#[derive(Default)]
struct StreamState {
    value: Mutex<Option<Value>>,
    callbacks: Mutex<Vec<(ListenerId, ChangeCallback)>>,
}

impl StreamState {
    fn update(&self, contents: &Contents) {
        let Some(value) = contents.get(VALUE_KEY) else {
            trace!("Stream message without a value");
            return;
        };

        *self.value.lock() = Some(value.clone());

        let callbacks: Vec<ChangeCallback> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }
}

// ============================================================================
// Datastream
// ============================================================================

/// Latest value of an endpoint stream, with change notification.
#[derive(Clone)]
pub struct Datastream {
    name: String,
    endpoint: String,
    session: ProtocolSession,
    state: Arc<StreamState>,
    listener: ListenerHandle,
}

impl fmt::Debug for Datastream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastream")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("value", &*self.state.value.lock())
            .finish()
    }
}

impl Datastream {
    /// Subscribes to stream `name` of `endpoint` through `session`.
    pub(super) fn subscribe(
        session: &ProtocolSession,
        endpoint: &str,
        name: String,
    ) -> Result<Self> {
        let state = Arc::new(StreamState::default());
        let topics = Topics::new()
            .with(TX_TYPE_KEY, DIRECT_TX_TYPE)
            .with(MSG_TYPE_KEY, STREAM_MSG_TYPE)
            .with(FROM_KEY, endpoint)
            .with(STREAM_KEY, name.as_str());

        let weak: Weak<StreamState> = Arc::downgrade(&state);
        let listener = session.on_message(&topics, move |contents| {
            if let Some(state) = weak.upgrade() {
                state.update(contents);
            }
        })?;

        trace!(endpoint, stream = %name, "Datastream subscribed");

        Ok(Self {
            name,
            endpoint: endpoint.to_string(),
            session: session.clone(),
            state,
            listener,
        })
    }

    /// Stream name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the endpoint producing the stream.
    #[inline]
    #[must_use]
    pub fn endpoint_name(&self) -> &str {
        &self.endpoint
    }

    /// Latest value, if any has arrived.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.state.value.lock().clone()
    }

    /// Registers a callback fired on every new value.
    pub fn on_change<F>(&self, callback: F) -> ChangeHandle
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = ListenerId::generate();
        self.state.callbacks.lock().push((id, Arc::new(callback)));
        ChangeHandle {
            id,
            state: Arc::downgrade(&self.state),
        }
    }

    /// Asks the endpoint to start (`stop == false`) or stop streaming.
    ///
    /// # Errors
    ///
    /// As [`ProtocolSession::send_message`].
    pub async fn listen(&self, stop: bool) -> Result<Contents> {
        let topics = Topics::new()
            .with(TX_TYPE_KEY, DIRECT_TX_TYPE)
            .with(MSG_TYPE_KEY, STREAM_MSG_TYPE)
            .with(TO_KEY, self.endpoint.as_str());

        let mut contents = Contents::new();
        contents.insert(STREAM_KEY.into(), Value::String(self.name.clone()));
        contents.insert(STOP_KEY.into(), Value::Bool(stop));

        let response_topics = Topics::new()
            .with(TX_TYPE_KEY, DIRECT_TX_TYPE)
            .with(MSG_TYPE_KEY, STREAM_MSG_TYPE)
            .with(FROM_KEY, self.endpoint.as_str());

        self.session
            .send_message(topics, contents, response_topics)
            .await
    }

    /// Stops following the stream.
    ///
    /// Closing the session has the same effect.
    pub fn close(&self) {
        self.listener.deregister();
    }
}

// ============================================================================
// ChangeHandle
// ============================================================================

/// Token that removes one change callback.
#[derive(Debug, Clone)]
pub struct ChangeHandle {
    id: ListenerId,
    state: Weak<StreamState>,
}

impl ChangeHandle {
    /// Removes the callback. Calling it again does nothing.
    pub fn deregister(&self) {
        if let Some(state) = self.state.upgrade() {
            state.callbacks.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;

    use crate::protocol::{DiscoveryPayload, EndpointDescriptor};
    use crate::session::SessionInit;
    use crate::transport::Connection;
    use crate::transport::testing::{attached_pair, test_url};

    fn stream_topics() -> Topics {
        Topics::new()
            .with("TX_TYPE", "DIRECT")
            .with("MSG_TYPE", "STREAM")
            .with("TO", "UI")
            .with("FROM", "E1")
            .with("STREAM", "temperature")
    }

    fn open_session(connection: &Connection) -> ProtocolSession {
        let session = ProtocolSession::new(SessionInit::new("P", connection.clone()));
        session.open().expect("open");
        let mut payload = DiscoveryPayload::new("P");
        payload.children.push(EndpointDescriptor::new("E1"));
        session.add_discovery_info(&payload).expect("discovery");
        session
    }

    fn value_contents(value: Value) -> Contents {
        let mut contents = Contents::new();
        contents.insert("VALUE".into(), value);
        contents
    }

    #[test]
    fn test_stream_updates_value_and_notifies() {
        let connection = Connection::new(test_url());
        let session = open_session(&connection);
        let stream = session
            .endpoint("E1")
            .expect("endpoint")
            .datastream("temperature")
            .expect("stream");
        assert_eq!(stream.value(), None);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = stream.on_change(move |value| sink.lock().push(value.clone()));

        connection
            .registry()
            .dispatch(&stream_topics(), &value_contents(json!(21.5)));
        assert_eq!(stream.value(), Some(json!(21.5)));

        handle.deregister();
        handle.deregister();
        connection
            .registry()
            .dispatch(&stream_topics(), &value_contents(json!(22.0)));

        assert_eq!(stream.value(), Some(json!(22.0)));
        assert_eq!(*seen.lock(), vec![json!(21.5)]);
    }

    #[test]
    fn test_message_without_value_is_ignored() {
        let connection = Connection::new(test_url());
        let session = open_session(&connection);
        let stream = session
            .endpoint("E1")
            .expect("endpoint")
            .datastream("temperature")
            .expect("stream");

        connection
            .registry()
            .dispatch(&stream_topics(), &Contents::new());
        assert_eq!(stream.value(), None);
    }

    #[test]
    fn test_session_close_releases_stream() {
        let connection = Connection::new(test_url());
        let session = open_session(&connection);
        let _stream = session
            .endpoint("E1")
            .expect("endpoint")
            .datastream("temperature")
            .expect("stream");
        assert!(connection.registry().has_bucket(&stream_topics()));

        session.close();
        assert!(!connection.registry().has_bucket(&stream_topics()));
    }

    #[tokio::test]
    async fn test_listen_sends_stream_request() {
        let (connection, mut broker) = attached_pair().await;
        let session = open_session(&connection);
        let stream = session
            .endpoint("E1")
            .expect("endpoint")
            .datastream("temperature")
            .expect("stream");

        let pending = tokio::spawn(async move { stream.listen(false).await });

        let request = broker.next_frame().await;
        assert_eq!(request.topics.get_str("TO"), Some("E1"));
        assert_eq!(request.topics.get_str("MSG_TYPE"), Some("STREAM"));
        assert_eq!(request.contents.get("STREAM"), Some(&json!("temperature")));
        assert_eq!(request.contents.get("STOP"), Some(&json!(false)));

        broker
            .send_frame(
                Topics::new()
                    .with("TX_TYPE", "DIRECT")
                    .with("MSG_TYPE", "STREAM")
                    .with("TO", "UI")
                    .with("FROM", "E1"),
                json!({"STATUS": 0}),
            )
            .await;

        tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .expect("in time")
            .expect("task")
            .expect("accepted");
    }
}
