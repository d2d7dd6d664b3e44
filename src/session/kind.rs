//! Protocol-kind lookup table.
//!
//! The broker reports each open protocol with a `protocol_type`. The
//! directory looks that kind up here to pick a session constructor and falls
//! back to the default (direct-message) constructor for unknown kinds.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use super::core::{ProtocolSession, SessionInit};

/// Kind name of the built-in direct-message session.
pub const DIRECT_MESSAGE_KIND: &str = "DirectMessage";

/// Builds a session for one declared protocol kind.
pub type SessionConstructor = Arc<dyn Fn(SessionInit) -> ProtocolSession + Send + Sync>;

// ============================================================================
// SessionKinds
// ============================================================================

/// Maps declared protocol kinds to session constructors.
#[derive(Clone)]
pub struct SessionKinds {
    kinds: FxHashMap<String, SessionConstructor>,
    default: SessionConstructor,
}

impl Default for SessionKinds {
    fn default() -> Self {
        let direct: SessionConstructor = Arc::new(ProtocolSession::new);
        let mut kinds = FxHashMap::default();
        kinds.insert(DIRECT_MESSAGE_KIND.to_string(), Arc::clone(&direct));
        Self {
            kinds,
            default: direct,
        }
    }
}

impl fmt::Debug for SessionKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("SessionKinds")
            .field("kinds", &kinds)
            .finish_non_exhaustive()
    }
}

impl SessionKinds {
    /// Creates a table holding only the direct-message kind.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `constructor` for `kind`, replacing any previous entry.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(SessionInit) -> ProtocolSession + Send + Sync + 'static,
    {
        self.kinds.insert(kind.into(), Arc::new(constructor));
    }

    /// Builder form of [`SessionKinds::register`].
    #[must_use]
    pub fn with<F>(mut self, kind: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(SessionInit) -> ProtocolSession + Send + Sync + 'static,
    {
        self.register(kind, constructor);
        self
    }

    /// Replaces the fallback constructor for unknown kinds.
    pub fn set_default<F>(&mut self, constructor: F)
    where
        F: Fn(SessionInit) -> ProtocolSession + Send + Sync + 'static,
    {
        self.default = Arc::new(constructor);
    }

    /// Returns `true` if `kind` has its own constructor.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Constructor for `kind`, or the default.
    #[must_use]
    pub fn resolve(&self, kind: Option<&str>) -> &SessionConstructor {
        match kind.and_then(|kind| self.kinds.get(kind)) {
            Some(constructor) => constructor,
            None => {
                debug!(kind = ?kind, "Unknown protocol kind, using direct message session");
                &self.default
            }
        }
    }

    /// Builds a session using the constructor for `init.kind`.
    #[must_use]
    pub fn construct(&self, init: SessionInit) -> ProtocolSession {
        let constructor = Arc::clone(self.resolve(init.kind.as_deref()));
        constructor(init)
    }
}

// ============================================================================
// Tests
// ============================================================================
