//! Endpoints discovered under a protocol.
//!
//! An endpoint is built from one `CHILDREN` entry of a discovery payload
//! and keeps a weak reference back to its session. Discovery replaces the
//! session's endpoint list wholesale, so an endpoint held across a
//! discovery round is orphaned: it still talks through the session but is
//! no longer listed by it.

use std::fmt;
use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::protocol::{Contents, EndpointDescriptor, Topics};
use crate::transport::ListenerHandle;

use super::core::{ProtocolSession, SessionInner};
use super::stream::Datastream;

/// Kind label of endpoints built by the standard factory.
pub const STANDARD_ENDPOINT_KIND: &str = "StandardEndpoint";

/// Topic key carrying the sender address.
pub const FROM_KEY: &str = "FROM";

// ============================================================================
// Endpoint
// ============================================================================

/// A child unit of a protocol, such as a sensor or an actuator.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

struct EndpointInner {
    descriptor: EndpointDescriptor,
    kind: String,
    protocol: String,
    session: Weak<SessionInner>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.inner.descriptor.name)
            .field("kind", &self.inner.kind)
            .field("protocol", &self.inner.protocol)
            .finish()
    }
}

impl Endpoint {
    /// Builds a standard endpoint.
    ///
    /// This is the default endpoint factory of a session.
    #[must_use]
    pub fn new(descriptor: EndpointDescriptor, session: &ProtocolSession) -> Self {
        Self::with_kind(descriptor, session, STANDARD_ENDPOINT_KIND)
    }

    /// Builds an endpoint with a custom kind label.
    #[must_use]
    pub fn with_kind(
        descriptor: EndpointDescriptor,
        session: &ProtocolSession,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(EndpointInner {
                descriptor,
                kind: kind.into(),
                protocol: session.name().to_string(),
                session: session.downgrade(),
            }),
        }
    }

    /// Endpoint name (`NAME`).
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.descriptor.name
    }

    /// Interfaces the endpoint implements (`INTERFACES`).
    #[inline]
    #[must_use]
    pub fn interfaces(&self) -> &[String] {
        &self.inner.descriptor.interfaces
    }

    /// Kind label chosen by the endpoint factory.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    /// Name of the protocol that listed this endpoint.
    #[inline]
    #[must_use]
    pub fn protocol_name(&self) -> &str {
        &self.inner.protocol
    }

    /// Remaining discovery keys of the endpoint.
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &Contents {
        &self.inner.descriptor.fields
    }

    /// Reads one discovery key.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.descriptor.fields.get(key)
    }

    /// Returns `true` if the endpoint lists `interface`.
    #[must_use]
    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces().iter().any(|i| i == interface)
    }

    /// The owning session, if it still exists.
    #[must_use]
    pub fn session(&self) -> Option<ProtocolSession> {
        self.inner.session.upgrade().map(ProtocolSession::from_inner)
    }

    fn live_session(&self) -> Result<ProtocolSession> {
        self.session()
            .ok_or_else(|| Error::session_closed(&self.inner.protocol))
    }

    /// Sends a message through the owning session.
    ///
    /// # Errors
    ///
    /// As [`ProtocolSession::send_message`], plus [`Error::SessionClosed`]
    /// if the session no longer exists.
    pub async fn send_message(
        &self,
        topics: Topics,
        contents: Contents,
        response_topics: Topics,
    ) -> Result<Contents> {
        self.live_session()?
            .send_message(topics, contents, response_topics)
            .await
    }

    /// Subscribes to messages from this endpoint.
    ///
    /// `FROM: name` is added to `topics` unless it has one; the session adds
    /// its client id as `TO`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session is closed or gone.
    pub fn on_message<F>(&self, topics: &Topics, callback: F) -> Result<ListenerHandle>
    where
        F: Fn(&Contents) + Send + Sync + 'static,
    {
        let topics = Topics::new().with(FROM_KEY, self.name()).merged(topics);
        self.live_session()?.on_message(&topics, callback)
    }

    /// Opens a datastream named `stream` on this endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session is closed or gone.
    pub fn datastream(&self, stream: impl Into<String>) -> Result<Datastream> {
        Datastream::subscribe(&self.live_session()?, self.name(), stream.into())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::session::{EndpointFactory, SessionInit};
    use crate::transport::Connection;
    use crate::transport::testing::test_url;

    fn descriptor() -> EndpointDescriptor {
        serde_json::from_value(json!({
            "NAME": "E1",
            "INTERFACES": ["motor"],
            "ID": 100
        }))
        .expect("descriptor")
    }

    #[test]
    fn test_endpoint_accessors() {
        let session = ProtocolSession::new(SessionInit::new("P", Connection::new(test_url())));
        let endpoint = Endpoint::new(descriptor(), &session);

        assert_eq!(endpoint.name(), "E1");
        assert_eq!(endpoint.kind(), STANDARD_ENDPOINT_KIND);
        assert_eq!(endpoint.protocol_name(), "P");
        assert!(endpoint.implements("motor"));
        assert!(!endpoint.implements("sensor"));
        assert_eq!(endpoint.get("ID"), Some(&json!(100)));
        assert_eq!(endpoint.session().map(|s| s.name().to_string()), Some("P".into()));
    }

    #[test]
    fn test_custom_endpoint_factory() {
        let factory: EndpointFactory =
            Arc::new(|descriptor: EndpointDescriptor, session: &ProtocolSession| {
                Endpoint::with_kind(descriptor, session, "Motor")
            });
        let session = ProtocolSession::with_endpoint_factory(
            SessionInit::new("P", Connection::new(test_url())),
            factory,
        );

        let mut payload = crate::protocol::DiscoveryPayload::new("P");
        payload.children.push(descriptor());
        session.add_discovery_info(&payload).expect("discovery");

        assert_eq!(session.available_endpoints()[0].kind(), "Motor");
    }

    #[test]
    fn test_on_message_merges_from_and_to() {
        let connection = Connection::new(test_url());
        let session = ProtocolSession::new(SessionInit::new("P", connection.clone()));
        let endpoint = Endpoint::new(descriptor(), &session);

        let handle = endpoint
            .on_message(&Topics::new().with("MSG_TYPE", "EVENT"), |_| {})
            .expect("listener");
        let expected = Topics::new()
            .with("MSG_TYPE", "EVENT")
            .with("FROM", "E1")
            .with("TO", "UI");
        assert_eq!(handle.key(), &expected.key());
    }

    #[test]
    fn test_orphaned_endpoint_after_session_dropped() {
        let session = ProtocolSession::new(SessionInit::new("P", Connection::new(test_url())));
        let endpoint = Endpoint::new(descriptor(), &session);
        drop(session);

        assert!(endpoint.session().is_none());
        assert!(matches!(
            endpoint.on_message(&Topics::new(), |_| {}),
            Err(Error::SessionClosed { .. })
        ));
    }
}
