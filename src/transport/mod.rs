//! WebSocket transport layer.
//!
//! This module handles the single channel between the console (Rust) and
//! the broker, and the topic-keyed listener table every frame is
//! dispatched through.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                          ┌──────────────┐
//! │  Console (Rust)      │                          │  Broker      │
//! │                      │        WebSocket         │              │
//! │  Connection          │◄────────────────────────►│  protocols,  │
//! │   └ ListenerRegistry │      host:port           │  discovery   │
//! │      ├ sessions      │                          │              │
//! │      └ directory     │                          │              │
//! └──────────────────────┘                          └──────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket channel, event loop and lifecycle callbacks |
//! | `registry` | Topic-keyed listener table |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket channel and event loop.
pub mod connection;

/// Topic-keyed listener table.
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{
    Connection, ConnectionCallback, ConnectionState, ErrorCallback, ReconnectHook, ReconnectOffer,
};
pub use registry::{ListenerHandle, ListenerRegistry, Subscription};
