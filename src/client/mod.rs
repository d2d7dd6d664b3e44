//! Broker client.
//!
//! The entry point for application code: configure with
//! [`Client::builder()`], connect, then work with the protocol directory.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Connection plus protocol directory |
//! | [`ClientBuilder`] | Fluent configuration builder |
//! | [`ClientOptions`] | Broker address and client id |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for client configuration.
pub mod builder;

/// Core client implementation.
pub mod core;

/// Broker address and client id.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::Client;
pub use builder::ClientBuilder;
pub use options::{ClientOptions, DEFAULT_ADDRESS};
