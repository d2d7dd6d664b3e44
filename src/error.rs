//! Error types for the Parlay messaging core.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use parlay_link::{Error, Result};
//!
//! async fn example(session: &ProtocolSession) -> Result<()> {
//!     match session.send_message(topics, contents, response_topics).await {
//!         Ok(response) => println!("{response:?}"),
//!         Err(Error::RemoteRejection { status, .. }) => println!("rejected: {status}"),
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | API boundary | [`Error::InvalidArgument`] |
//! | Channel | [`Error::ChannelFailure`], [`Error::NotConnected`] |
//! | Remote | [`Error::RemoteRejection`], [`Error::Protocol`] |
//! | Sessions | [`Error::NoMatchingSession`], [`Error::SessionClosed`] |
//! | Timing | [`Error::RequestTimeout`] |
//! | External | [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::protocol::Contents;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client configuration is invalid, or when a second
    /// protocol directory is bound to the same connection.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // API Boundary Errors
    // ========================================================================
    /// Malformed topic or contents shape at the API boundary.
    ///
    /// Raised synchronously, before anything is transmitted.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// Read or write failure on an open broker channel.
    ///
    /// Delivered to error callbacks. Requests already in flight are not
    /// rejected by it.
    #[error("Channel failure: {message}")]
    ChannelFailure {
        /// What the channel was doing when it failed.
        message: String,
        /// Underlying WebSocket error.
        #[source]
        source: WsError,
    },

    /// A frame was sent while no channel was open.
    #[error("Not connected to broker")]
    NotConnected,

    // ========================================================================
    // Remote Errors
    // ========================================================================
    /// A response arrived but signaled a failure status.
    ///
    /// The full response payload is kept so callers can inspect the reason.
    #[error("Remote rejected request with status {status}")]
    RemoteRejection {
        /// Status value reported by the remote side (`null` if absent).
        status: Value,
        /// The complete response contents.
        response: Contents,
    },

    /// Protocol violation or unexpected payload shape from the broker.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// A discovery payload named a protocol with no open session.
    #[error("No open session for protocol: {name}")]
    NoMatchingSession {
        /// Protocol name carried by the payload.
        name: String,
    },

    /// Operation attempted on a session that has already been closed.
    #[error("Session closed: {name}")]
    SessionClosed {
        /// Protocol name of the closed session.
        name: String,
    },

    // ========================================================================
    // Timing Errors
    // ========================================================================
    /// A caller-imposed response timeout expired.
    #[error("Request timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Broker address could not be turned into a URL.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a channel failure error wrapping `source`.
    #[inline]
    pub fn channel_failure(message: impl Into<String>, source: WsError) -> Self {
        Self::ChannelFailure {
            message: message.into(),
            source,
        }
    }

    /// Creates a remote rejection error carrying the full response.
    #[inline]
    pub fn remote_rejection(status: Value, response: Contents) -> Self {
        Self::RemoteRejection { status, response }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a no matching session error.
    #[inline]
    pub fn no_matching_session(name: impl Into<String>) -> Self {
        Self::NoMatchingSession { name: name.into() }
    }

    /// Creates a session closed error.
    #[inline]
    pub fn session_closed(name: impl Into<String>) -> Self {
        Self::SessionClosed { name: name.into() }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(timeout_ms: u64) -> Self {
        Self::RequestTimeout { timeout_ms }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// Returns `true` if the remote side answered with a failure status.
    #[inline]
    #[must_use]
    pub fn is_remote_rejection(&self) -> bool {
        matches!(self, Self::RemoteRejection { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ChannelFailure { .. }
                | Self::NotConnected
                | Self::WebSocket(_)
                | Self::ChannelClosed(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry or after reconnecting.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout { .. }
                | Self::RemoteRejection { .. }
                | Self::NotConnected
                | Self::ChannelFailure { .. }
        )
    }

    /// Returns the rejected response payload, if this is a remote rejection.
    #[inline]
    #[must_use]
    pub fn response(&self) -> Option<&Contents> {
        match self {
            Self::RemoteRejection { response, .. } => Some(response),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
