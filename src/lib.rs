//! Parlay link - client-side messaging core for a device-control console.
//!
//! One persistent WebSocket channel to a Parlay broker carries messages for
//! many protocols (instrument connections) and their discovered endpoints.
//! Messages are addressed by topics rather than ids: a response is matched
//! to its request purely by the shape of its topics.
//!
//! # Architecture
//!
//! - **Topics**: a mapping of keys to JSON values, canonicalized into a
//!   deterministic key so that equal mappings always route the same way
//! - **Registry**: canonical key to listeners, with one-shot and persistent
//!   subscriptions that can be removed safely during dispatch
//! - **Connection**: the single channel; one event-loop task per channel
//!   decodes frames and dispatches them in arrival order
//! - **Sessions**: one per open protocol, extended at runtime by discovery
//! - **Directory**: tracks available and open protocols from broker replies
//!
//! # Quick Start
//!
//! ```no_run
//! use parlay_link::{Client, Result, Topics};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder().address("localhost:8085").build()?;
//!     client.connect().await?;
//!
//!     client.directory().request_discovery(false).await?;
//!
//!     for session in client.open_protocols() {
//!         let reply = session
//!             .send_message(
//!                 Topics::new().with("MSG_TYPE", "COMMAND"),
//!                 Default::default(),
//!                 Topics::new().with("MSG_TYPE", "RESPONSE"),
//!             )
//!             .await?;
//!         println!("{}: {reply:?}", session.name());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Client builder and options |
//! | [`directory`] | Available and open protocols |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Topics, frames and broker messages |
//! | [`session`] | Protocol sessions, endpoints and datastreams |
//! | [`transport`] | Connection and listener registry |

// ============================================================================
// Modules
// ============================================================================

/// Client builder and options.
///
/// Use [`Client::builder()`] to create a configured client.
pub mod client;

/// Available and open protocols of the broker.
pub mod directory;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Topics, frames and the broker request vocabulary.
pub mod protocol;

/// Protocol sessions, endpoints and datastreams.
pub mod session;

/// WebSocket connection and listener registry.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{Client, ClientBuilder, ClientOptions};

// Directory types
pub use directory::ProtocolDirectory;

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::ListenerId;

// Protocol types
pub use protocol::{
    AvailableProtocol, BrokerRequest, Contents, DiscoveryPayload, EndpointDescriptor, Frame,
    OpenProtocolRequest, OutgoingMessage, ProtocolDescriptor, ResponseStatus, TopicKey, Topics,
};

// Session types
pub use session::{
    ChangeHandle, Datastream, Endpoint, Fields, ProtocolSession, SessionInit, SessionKinds,
    SessionState,
};

// Transport types
pub use transport::{
    Connection, ConnectionState, ListenerHandle, ListenerRegistry, ReconnectOffer, Subscription,
};
