//! Broker client options.
//!
//! # Example
//!
//! ```
//! use parlay_link::ClientOptions;
//!
//! let options = ClientOptions::new()
//!     .with_address("10.0.0.5:9000")
//!     .with_client_id("console-2");
//!
//! assert_eq!(options.url().unwrap().as_str(), "ws://10.0.0.5:9000/");
//! ```

// ============================================================================
// Imports
// ============================================================================

use url::Url;

use crate::error::{Error, Result};
use crate::session::DEFAULT_CLIENT_ID;

// ============================================================================
// Constants
// ============================================================================

/// Broker address used when none is configured.
pub const DEFAULT_ADDRESS: &str = "localhost:8085";

// ============================================================================
// ClientOptions
// ============================================================================

/// Where the broker lives and how this console identifies itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Broker address as `host:port`.
    pub address: String,

    /// Address of this console in `TO` topics.
    pub client_id: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientOptions {
    /// Creates options with the default address and client id.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
        }
    }

    /// Sets the broker address (`host:port`).
    #[inline]
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Sets the client id.
    #[inline]
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// WebSocket URL of the broker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the address is empty, carries a scheme
    /// or path, or has no port.
    pub fn url(&self) -> Result<Url> {
        let address = self.address.trim();

        if address.is_empty() {
            return Err(Error::config("Broker address is empty"));
        }

        if address.contains('/') {
            return Err(Error::config(format!(
                "Broker address must be host:port, got '{address}'"
            )));
        }

        let has_port = address
            .rsplit_once(':')
            .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
        if !has_port {
            return Err(Error::config(format!(
                "Broker address '{address}' has no port"
            )));
        }

        Url::parse(&format!("ws://{address}"))
            .map_err(|e| Error::config(format!("Invalid broker address '{address}': {e}")))
    }

    /// Checks the options without building anything.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for an invalid address
    /// - [`Error::Config`] for an empty client id
    pub fn validate(&self) -> Result<()> {
        self.url()?;
        if self.client_id.trim().is_empty() {
            return Err(Error::config("Client id is empty"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.address, "localhost:8085");
        assert_eq!(options.client_id, "UI");
        assert_eq!(
            options.url().expect("url").as_str(),
            "ws://localhost:8085/"
        );
    }

    #[test]
    fn test_with_methods() {
        let options = ClientOptions::new()
            .with_address("broker.lab:9001")
            .with_client_id("bench");
        assert_eq!(options.address, "broker.lab:9001");
        assert_eq!(options.client_id, "bench");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_invalid_addresses() {
        for address in ["", "   ", "ws://host:1", "host:1/path", "host", "host:notaport"] {
            let result = ClientOptions::new().with_address(address).url();
            assert!(
                matches!(result, Err(Error::Config { .. })),
                "address {address:?} accepted"
            );
        }
    }

    #[test]
    fn test_empty_client_id_rejected() {
        let result = ClientOptions::new().with_client_id(" ").validate();
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
