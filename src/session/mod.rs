//! Protocol sessions.
//!
//! A session is the console's view of one protocol open on the broker:
//! its discovery fields, its endpoints, and the messages addressed to the
//! console. Sessions share the single [`Connection`](crate::Connection).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | Session state machine and messaging |
//! | `fields` | Typed discovery fields |
//! | `endpoint` | Discovered child endpoints |
//! | `stream` | Endpoint datastreams |
//! | `kind` | Protocol-kind to constructor table |

// ============================================================================
// Submodules
// ============================================================================

/// Session state machine and messaging.
pub mod core;

/// Discovered child endpoints.
pub mod endpoint;

/// Typed discovery fields.
pub mod fields;

/// Protocol-kind to constructor table.
pub mod kind;

/// Endpoint datastreams.
pub mod stream;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{
    DEFAULT_CLIENT_ID, EndpointFactory, ProtocolSession, SessionInit, SessionState, TO_KEY,
};
pub use endpoint::{Endpoint, FROM_KEY, STANDARD_ENDPOINT_KIND};
pub use fields::Fields;
pub use kind::{DIRECT_MESSAGE_KIND, SessionConstructor, SessionKinds};
pub use stream::{ChangeCallback, ChangeHandle, Datastream};
