//! Protocol directory.
//!
//! Keeps the console's picture of which protocols the broker can open and
//! which are open, with one session per open protocol.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ProtocolDirectory`] | Available and open protocols of one connection |

// ============================================================================
// Submodules
// ============================================================================

/// Directory state and broker request handling.
pub mod core;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::ProtocolDirectory;
