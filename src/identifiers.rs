//! Type-safe identifiers.
//!
//! Newtype wrappers prevent mixing identifiers with plain strings or numbers.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`ListenerId`] | Identity of one listener entry inside a topic bucket |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use uuid::Uuid;

// ============================================================================
// ListenerId
// ============================================================================

/// Identity of a single registered listener.
///
/// Deregistration removes an entry by this identity rather than by its
/// position, so removing one listener never shifts another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Generates a new random listener ID.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
