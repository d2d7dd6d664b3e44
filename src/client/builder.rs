//! Builder pattern for client configuration.
//!
//! # Example
//!
//! ```no_run
//! use parlay_link::{Client, ProtocolSession};
//!
//! # async fn example() -> parlay_link::Result<()> {
//! let client = Client::builder()
//!     .address("localhost:8085")
//!     .session_kind("PCOM", ProtocolSession::new)
//!     .reconnect_prompt(|offer| offer.accept())
//!     .build()?;
//!
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::session::{ProtocolSession, SessionInit, SessionKinds};
use crate::transport::{ReconnectHook, ReconnectOffer};

use super::core::Client;
use super::options::ClientOptions;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`].
///
/// Use [`Client::builder()`] to create one.
#[derive(Clone, Default)]
pub struct ClientBuilder {
    options: ClientOptions,
    kinds: SessionKinds,
    reconnect: Option<ReconnectHook>,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("options", &self.options)
            .field("kinds", &self.kinds)
            .field("reconnect", &self.reconnect.is_some())
            .finish()
    }
}

impl ClientBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the broker address (`host:port`).
    #[inline]
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.options = self.options.with_address(address);
        self
    }

    /// Sets the client id used as the `TO` address of this console.
    #[inline]
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.options = self.options.with_client_id(client_id);
        self
    }

    /// Replaces all options at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the hook consulted after the channel closes unexpectedly.
    #[must_use]
    pub fn reconnect_prompt<F>(mut self, hook: F) -> Self
    where
        F: Fn(ReconnectOffer) + Send + Sync + 'static,
    {
        self.reconnect = Some(Arc::new(hook));
        self
    }

    /// Registers a session constructor for a declared protocol kind.
    #[must_use]
    pub fn session_kind<F>(mut self, kind: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(SessionInit) -> ProtocolSession + Send + Sync + 'static,
    {
        self.kinds.register(kind, constructor);
        self
    }

    /// Replaces the whole session kind table.
    #[inline]
    #[must_use]
    pub fn session_kinds(mut self, kinds: SessionKinds) -> Self {
        self.kinds = kinds;
        self
    }

    /// Builds the client with validation.
    ///
    /// Does not connect; call [`Client::connect`].
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) for an invalid address
    /// - [`Error::Config`](crate::Error::Config) for an empty client id
    pub fn build(self) -> Result<Client> {
        self.options.validate()?;

        let client = Client::new(self.options, self.kinds)?;
        if let Some(hook) = self.reconnect {
            client.connection().set_reconnect_hook(hook);
        }

        Ok(client)
    }
}

// ============================================================================
// Tests
// ============================================================================
