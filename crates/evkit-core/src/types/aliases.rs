//! Type aliases for commonly used complex types.
//!
//! Listener callbacks, execution contexts and shared registry state are
//! nested `Arc`/lock/trait-object types. Naming them keeps the bus and
//! listener signatures readable and lets the underlying type change in
//! one place.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use evkit_core::types::*;
//!
//! // Instead of: Arc<Mutex<Vec<&'static str>>>
//! let order: ThreadSafe<Vec<&'static str>> = thread_safe(Vec::new());
//! ```

use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::sync::Arc;

use crate::event::Event;
use crate::event_type::EventTypeKey;
use crate::listener::EventListener;

// =============================================================================
// THREAD-SAFE SHARED TYPES (Arc<Mutex<T>> / Arc<RwLock<T>>)
// =============================================================================

/// A thread-safe, mutex-protected wrapper for cross-thread sharing.
///
/// Uses `parking_lot::Mutex`, which does not poison when a listener panics
/// while another handle holds the lock.
pub type ThreadSafe<T> = Arc<Mutex<T>>;

/// A thread-safe reader-writer lock wrapper for read-heavy workloads.
///
/// Bus registries are read on every publish and written only on
/// subscribe/unsubscribe.
pub type ThreadSafeRw<T> = Arc<RwLock<T>>;

// =============================================================================
// DISPATCH TYPES
// =============================================================================

/// Shared handle to a registered listener.
///
/// Channels, delivery logs and callers all hold the same instance; identity
/// is pointer identity.
pub type ListenerHandle = Arc<EventListener>;

/// An execution context bound to (or passed into) a listener.
pub type ListenerContext = Arc<dyn Any + Send + Sync>;

/// The erased callback stored by a listener.
///
/// Receives the event and the effective execution context, if any.
pub type ListenerFn =
    dyn Fn(&Event, Option<&ListenerContext>) -> anyhow::Result<()> + Send + Sync;

/// Debug hook invoked with every event after it finishes.
pub type LoggerHook = Arc<dyn Fn(&Event) + Send + Sync>;

/// Memoized hierarchy chain of a type, root first.
pub type HierarchyChain = Arc<[EventTypeKey]>;

// =============================================================================
// CONSTRUCTOR HELPERS
// =============================================================================

/// Create a new `ThreadSafe<T>` from a value.
#[inline]
pub fn thread_safe<T>(value: T) -> ThreadSafe<T> {
    Arc::new(Mutex::new(value))
}

/// Create a new `ThreadSafeRw<T>` from a value.
#[inline]
pub fn thread_safe_rw<T>(value: T) -> ThreadSafeRw<T> {
    Arc::new(RwLock::new(value))
}
