//! Listener registry.
//!
//! Maps canonical topic keys to ordered lists of listeners and dispatches
//! inbound contents to them.
//!
//! # Dispatch Rules
//!
//! - Listeners for one key fire in registration order.
//! - [`Subscription::Once`] entries are removed after the pass that invoked
//!   them, even if a listener in the same pass panicked.
//! - A panicking listener is logged and skipped; later listeners still run.
//! - `subscribe` and deregistration calls made while a dispatch is running
//!   (from a listener, or from another task) are queued and applied when the
//!   outermost dispatch finishes. The pass in progress always sees the
//!   registry as it was when the pass started.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{error, trace};

use crate::identifiers::ListenerId;
use crate::protocol::{Contents, Listener, TopicKey, Topics};

// ============================================================================
// Subscription
// ============================================================================

/// How long a listener stays registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    /// Removed automatically after its first invocation.
    Once,
    /// Kept until explicitly deregistered.
    Persistent,
}

// ============================================================================
// Types
// ============================================================================

/// A registered listener.
struct ListenerEntry {
    id: ListenerId,
    listener: Listener,
    subscription: Subscription,
}

/// Structural change queued while a dispatch is running.
enum DeferredOp {
    Subscribe(TopicKey, ListenerEntry),
    Deregister(TopicKey, ListenerId),
}

/// Registry state guarded by one lock.
#[derive(Default)]
struct RegistryState {
    buckets: FxHashMap<TopicKey, Vec<ListenerEntry>>,
    dispatch_depth: usize,
    deferred: Vec<DeferredOp>,
}

impl RegistryState {
    fn insert(&mut self, key: TopicKey, entry: ListenerEntry) {
        self.buckets.entry(key).or_default().push(entry);
    }

    fn contains(&self, key: &TopicKey, id: ListenerId) -> bool {
        self.buckets
            .get(key)
            .is_some_and(|bucket| bucket.iter().any(|entry| entry.id == id))
    }

    fn remove(&mut self, key: &TopicKey, id: ListenerId) -> bool {
        let Some(bucket) = self.buckets.get_mut(key) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|entry| entry.id != id);
        let removed = bucket.len() != before;
        if bucket.is_empty() {
            self.buckets.remove(key);
        }
        removed
    }

    fn apply_deferred(&mut self) {
        for op in std::mem::take(&mut self.deferred) {
            match op {
                DeferredOp::Subscribe(key, entry) => self.insert(key, entry),
                DeferredOp::Deregister(key, id) => {
                    self.remove(&key, id);
                }
            }
        }
    }
}

// ============================================================================
// ListenerRegistry
// ============================================================================

/// Topic-keyed listener table.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ListenerRegistry")
            .field("buckets", &state.buckets.len())
            .field("dispatch_depth", &state.dispatch_depth)
            .finish_non_exhaustive()
    }
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for frames whose topics canonicalize like `topics`.
    ///
    /// Returns the handle that removes exactly this entry.
    pub fn subscribe(
        &self,
        topics: &Topics,
        listener: Listener,
        subscription: Subscription,
    ) -> ListenerHandle {
        let key = topics.key();
        let id = ListenerId::generate();
        let entry = ListenerEntry {
            id,
            listener,
            subscription,
        };

        let mut state = self.state.lock();
        if state.dispatch_depth > 0 {
            state.deferred.push(DeferredOp::Subscribe(key.clone(), entry));
        } else {
            state.insert(key.clone(), entry);
        }
        drop(state);

        trace!(%key, %id, ?subscription, "Listener registered");

        ListenerHandle {
            key,
            id,
            registry: Arc::downgrade(&self.state),
        }
    }

    /// Convenience wrapper around [`ListenerRegistry::subscribe`].
    pub fn subscribe_fn<F>(
        &self,
        topics: &Topics,
        subscription: Subscription,
        callback: F,
    ) -> ListenerHandle
    where
        F: Fn(&Contents) + Send + Sync + 'static,
    {
        self.subscribe(topics, Arc::new(callback), subscription)
    }

    /// Delivers `contents` to every listener registered for `topics`.
    ///
    /// Returns the number of listeners invoked.
    pub fn dispatch(&self, topics: &Topics, contents: &Contents) -> usize {
        let key = topics.key();

        let snapshot: Vec<(ListenerId, Listener, Subscription)> = {
            let mut state = self.state.lock();
            let Some(bucket) = state.buckets.get(&key) else {
                trace!(%key, "No listeners for topics");
                return 0;
            };
            let snapshot = bucket
                .iter()
                .map(|entry| (entry.id, Arc::clone(&entry.listener), entry.subscription))
                .collect();
            state.dispatch_depth += 1;
            snapshot
        };

        for (id, listener, _) in &snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(contents))) {
                error!(
                    %key,
                    listener = %id,
                    panic = %panic_message(panic.as_ref()),
                    "Listener panicked during dispatch"
                );
            }
        }

        let mut state = self.state.lock();
        for (id, _, subscription) in &snapshot {
            if *subscription == Subscription::Once {
                state.remove(&key, *id);
            }
        }
        state.dispatch_depth -= 1;
        if state.dispatch_depth == 0 {
            state.apply_deferred();
        }

        snapshot.len()
    }

    /// Returns the number of listeners registered for `topics`.
    #[must_use]
    pub fn listener_count(&self, topics: &Topics) -> usize {
        self.state
            .lock()
            .buckets
            .get(&topics.key())
            .map_or(0, Vec::len)
    }

    /// Returns `true` if a bucket exists for `topics`.
    #[must_use]
    pub fn has_bucket(&self, topics: &Topics) -> bool {
        self.state.lock().buckets.contains_key(&topics.key())
    }

    /// Returns the number of non-empty buckets.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.state.lock().buckets.len()
    }
}

// ============================================================================
// ListenerHandle
// ============================================================================

/// Token that removes one registered listener.
///
/// Dropping the handle does not deregister. Calling
/// [`ListenerHandle::deregister`] after the listener is already gone (a
/// one-shot that fired, or a second call) does nothing.
#[derive(Clone)]
pub struct ListenerHandle {
    key: TopicKey,
    id: ListenerId,
    registry: Weak<Mutex<RegistryState>>,
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

impl ListenerHandle {
    /// Removes the listener, deleting its bucket if it becomes empty.
    pub fn deregister(&self) {
        let Some(state) = self.registry.upgrade() else {
            return;
        };

        let mut state = state.lock();
        if state.dispatch_depth > 0 {
            state
                .deferred
                .push(DeferredOp::Deregister(self.key.clone(), self.id));
        } else if state.remove(&self.key, self.id) {
            trace!(key = %self.key, id = %self.id, "Listener deregistered");
        }
    }

    /// Returns `true` while the listener is still in the registry.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|state| state.lock().contains(&self.key, self.id))
    }

    /// Canonical key the listener is registered under.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &TopicKey {
        &self.key
    }

    /// Identity of the listener.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    fn topics() -> Topics {
        Topics::new().with("TO", "UI").with("FROM", "P")
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Contents) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move |_: &Contents| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_subscribe_then_deregister_leaves_no_bucket() {
        let registry = ListenerRegistry::new();
        let handle = registry.subscribe_fn(&topics(), Subscription::Persistent, |_| {});
        assert!(registry.has_bucket(&topics()));

        handle.deregister();
        assert!(!registry.has_bucket(&topics()));
        assert_eq!(registry.bucket_count(), 0);
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let registry = ListenerRegistry::new();
        let (count, callback) = counter();
        registry.subscribe_fn(&topics(), Subscription::Persistent, callback);

        let reordered = Topics::new().with("FROM", "P").with("TO", "UI");
        assert_eq!(registry.dispatch(&reordered, &Contents::new()), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_once_listener_removed_after_dispatch() {
        let registry = ListenerRegistry::new();
        let (count, callback) = counter();
        registry.subscribe_fn(&topics(), Subscription::Once, callback);

        assert_eq!(registry.dispatch(&topics(), &Contents::new()), 1);
        assert_eq!(registry.dispatch(&topics(), &Contents::new()), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!registry.has_bucket(&topics()));
    }

    #[test]
    fn test_persistent_listener_stays() {
        let registry = ListenerRegistry::new();
        let (count, callback) = counter();
        let handle = registry.subscribe_fn(&topics(), Subscription::Persistent, callback);

        for _ in 0..3 {
            registry.dispatch(&topics(), &Contents::new());
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(registry.listener_count(&topics()), 1);

        handle.deregister();
        registry.dispatch(&topics(), &Contents::new());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry = ListenerRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..4 {
            let order = Arc::clone(&order);
            let subscription = if n % 2 == 0 {
                Subscription::Once
            } else {
                Subscription::Persistent
            };
            registry.subscribe_fn(&topics(), subscription, move |_| order.lock().push(n));
        }

        registry.dispatch(&topics(), &Contents::new());
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
        assert_eq!(registry.listener_count(&topics()), 2);
    }

    #[test]
    fn test_contents_passed_through() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        registry.subscribe_fn(&topics(), Subscription::Once, move |contents| {
            *slot.lock() = contents.get("value").cloned();
        });

        let mut contents = Contents::new();
        contents.insert("value".into(), json!(42));
        registry.dispatch(&topics(), &contents);
        assert_eq!(*seen.lock(), Some(json!(42)));
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let registry = ListenerRegistry::new();
        let (count, callback) = counter();

        registry.subscribe_fn(&topics(), Subscription::Once, |_| panic!("listener failure"));
        registry.subscribe_fn(&topics(), Subscription::Once, callback);

        assert_eq!(registry.dispatch(&topics(), &Contents::new()), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        // Both one-shots were cleaned up despite the panic.
        assert!(!registry.has_bucket(&topics()));
    }

    #[test]
    fn test_deregister_after_once_fired_is_noop() {
        let registry = ListenerRegistry::new();
        let handle = registry.subscribe_fn(&topics(), Subscription::Once, |_| {});
        let other = registry.subscribe_fn(&topics(), Subscription::Persistent, |_| {});

        registry.dispatch(&topics(), &Contents::new());
        handle.deregister();
        handle.deregister();

        assert_eq!(registry.listener_count(&topics()), 1);
        other.deregister();
        assert_eq!(registry.bucket_count(), 0);
    }

    #[test]
    fn test_deregister_removes_only_its_entry() {
        let registry = ListenerRegistry::new();
        let (first_count, first) = counter();
        let (second_count, second) = counter();
        let first_handle = registry.subscribe_fn(&topics(), Subscription::Persistent, first);
        registry.subscribe_fn(&topics(), Subscription::Persistent, second);

        first_handle.deregister();
        registry.dispatch(&topics(), &Contents::new());

        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_during_dispatch_is_deferred() {
        let registry = ListenerRegistry::new();
        let (count, callback) = counter();
        let callback = Arc::new(callback);

        let inner = registry.clone();
        registry.subscribe_fn(&topics(), Subscription::Once, move |_| {
            let callback = Arc::clone(&callback);
            inner.subscribe_fn(&topics(), Subscription::Persistent, move |c| callback(c));
        });

        // Listener added mid-pass must not fire in the same pass.
        registry.dispatch(&topics(), &Contents::new());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(registry.listener_count(&topics()), 1);

        registry.dispatch(&topics(), &Contents::new());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deregister_during_dispatch_is_deferred() {
        let registry = ListenerRegistry::new();
        let (count, callback) = counter();
        let later: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&later);
        registry.subscribe_fn(&topics(), Subscription::Persistent, move |_| {
            if let Some(handle) = slot.lock().as_ref() {
                handle.deregister();
            }
        });
        let handle = registry.subscribe_fn(&topics(), Subscription::Persistent, callback);
        *later.lock() = Some(handle);

        // The later listener still sees the pass that removed it.
        registry.dispatch(&topics(), &Contents::new());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.listener_count(&topics()), 1);

        registry.dispatch(&topics(), &Contents::new());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_can_deregister_itself() {
        let registry = ListenerRegistry::new();
        let own: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));
        let (count, callback) = counter();

        let slot = Arc::clone(&own);
        let handle = registry.subscribe_fn(&topics(), Subscription::Persistent, move |c| {
            callback(c);
            if let Some(handle) = slot.lock().take() {
                handle.deregister();
            }
        });
        *own.lock() = Some(handle);

        registry.dispatch(&topics(), &Contents::new());
        registry.dispatch(&topics(), &Contents::new());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!registry.has_bucket(&topics()));
    }

    #[test]
    fn test_handle_outlives_registry() {
        let registry = ListenerRegistry::new();
        let handle = registry.subscribe_fn(&topics(), Subscription::Persistent, |_| {});
        drop(registry);
        handle.deregister();
    }

    #[test]
    fn test_is_registered_tracks_removal() {
        let registry = ListenerRegistry::new();
        let once = registry.subscribe_fn(&topics(), Subscription::Once, |_| {});
        let kept = registry.subscribe_fn(&topics(), Subscription::Persistent, |_| {});
        assert!(once.is_registered());

        registry.dispatch(&topics(), &Contents::new());
        assert!(!once.is_registered());
        assert!(kept.is_registered());

        kept.deregister();
        assert!(!kept.is_registered());
    }
}
