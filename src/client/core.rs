//! Broker client.
//!
//! Bundles the connection with its protocol directory, which is the usual
//! way to drive the console from application code.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::directory::ProtocolDirectory;
use crate::error::Result;
use crate::session::{ProtocolSession, SessionKinds};
use crate::transport::{Connection, ConnectionState};

use super::builder::ClientBuilder;
use super::options::ClientOptions;

// ============================================================================
// Client
// ============================================================================

/// A connection to the broker plus its protocol directory.
///
/// Use [`Client::builder()`] to configure one. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    options: ClientOptions,
    connection: Connection,
    directory: ProtocolDirectory,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.options.address)
            .field("client_id", &self.options.client_id)
            .field("state", &self.connection.state())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Creates a client from validated parts.
    pub(crate) fn new(options: ClientOptions, kinds: SessionKinds) -> Result<Self> {
        let connection = Connection::new(options.url()?);
        let directory = ProtocolDirectory::new(connection.clone(), kinds, &options.client_id)?;

        Ok(Self {
            options,
            connection,
            directory,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Options the client was built with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// The broker connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The protocol directory bound to the connection.
    #[inline]
    #[must_use]
    pub fn directory(&self) -> &ProtocolDirectory {
        &self.directory
    }

    /// Current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Sessions for the currently open protocols.
    #[must_use]
    pub fn open_protocols(&self) -> Vec<ProtocolSession> {
        self.directory.open_protocols()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connects to the broker.
    ///
    /// The directory requests the protocol lists once the channel opens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`](crate::Error::WebSocket) if the
    /// handshake fails.
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    /// Closes the channel. Open sessions are closed by the directory.
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::protocol::BrokerRequest;
    use crate::transport::testing::{BrokerSide, wait_for};

    #[test]
    fn test_new_binds_directory() {
        let client = Client::builder().build().expect("client");
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.connection().address().as_str(), "ws://localhost:8085/");

        let second = ProtocolDirectory::new(client.connection().clone(), SessionKinds::new(), "UI");
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_sessions_use_client_id() {
        let client = Client::builder().client_id("bench").build().expect("client");
        let mut broker = BrokerSide::attach(client.connection()).await;

        broker
            .send_frame(
                BrokerRequest::GetOpenProtocols.response_topics(),
                json!({"protocols": [{"name": "P"}]}),
            )
            .await;
        wait_for(|| client.open_protocols().len() == 1).await;
        assert_eq!(client.open_protocols()[0].client_id(), "bench");

        client.disconnect();
        wait_for(|| client.open_protocols().is_empty()).await;
    }
}
