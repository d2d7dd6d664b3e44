//! Wire message types.
//!
//! This module defines the frame format shared with the broker and the
//! canonical encoding of topic descriptors.
//!
//! # Protocol Overview
//!
//! | Type | Direction | Purpose |
//! |------|-----------|---------|
//! | [`Frame`] | Both | `{topics, contents}` envelope |
//! | [`OutgoingMessage`] | Local → Broker | Frame plus optional response expectation |
//! | [`BrokerRequest`] | Local → Broker | Directory control requests |
//! | [`DiscoveryPayload`] | Broker → Local | Protocol fields and child endpoints |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `topic` | Topic descriptors and canonical keys |
//! | `frame` | Frame envelope and status convention |
//! | `broker` | Broker control vocabulary and discovery payloads |

// ============================================================================
// Submodules
// ============================================================================

/// Broker control vocabulary and discovery payloads.
pub mod broker;

/// Frame envelope and response status.
pub mod frame;

/// Topic descriptors and canonical keys.
pub mod topic;

// ============================================================================
// Re-exports
// ============================================================================

pub use broker::{
    AvailableProtocol, BROKER_TYPE, BrokerRequest, DiscoveryPayload, EndpointDescriptor,
    OpenProtocolRequest, ProtocolDescriptor, ProtocolParameter, parse_available_protocols,
    parse_discovery, parse_open_protocols,
};
pub use frame::{Contents, Frame, Listener, OutgoingMessage, ResponseStatus};
pub use topic::{TopicKey, Topics, encode};
