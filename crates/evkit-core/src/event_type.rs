//! Event type identity and hierarchy
//!
//! Every event type is a Rust type implementing [`EventType`]. The trait
//! declares the type's supertype through the associated `Parent` type; the
//! global type registry assigns each type a process-lifetime
//! [`EventTypeKey`] the first time it is used.
//!
//! [`RootEvent`] is pre-registered under [`EventTypeKey::ROOT`] and has no
//! parent, so every upward walk terminates there.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use evkit_core::event_type;
//!
//! #[derive(Debug)]
//! struct Connection { peer: String }
//! event_type!(Connection);
//!
//! #[derive(Debug)]
//! struct Connected { base: Connection, latency_ms: u32 }
//! event_type!(Connected => Connection, base);
//! ```
//!
//! Parent chains must be acyclic: a type that (transitively) names itself as
//! its parent never finishes registering.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Unique key of a registered event type
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EventTypeKey(u32);

impl EventTypeKey {
    /// Key of [`RootEvent`].
    pub const ROOT: EventTypeKey = EventTypeKey(0);

    /// Raw key value
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Whether this is the root type's key
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl std::fmt::Display for EventTypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventType#{}", self.0)
    }
}

/// A declared event type
///
/// Implement through the [`event_type!`](crate::event_type!) macro unless a
/// custom name or parent view is needed.
pub trait EventType: Any + Send + Sync + Sized {
    /// The declared supertype. Top-level types use [`RootEvent`].
    type Parent: EventType;

    /// Human-readable type name used in logs and errors
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// View of this payload as its parent type, if it embeds one
    ///
    /// Lets listeners registered on a supertype read the supertype's fields
    /// from a subtype event.
    fn as_parent(&self) -> Option<&Self::Parent> {
        None
    }

    /// Mutable view of this payload as its parent type
    fn as_parent_mut(&mut self) -> Option<&mut Self::Parent> {
        None
    }

    /// The registry key of this type, registering it on first use
    fn key() -> EventTypeKey {
        key_of::<Self>()
    }
}

/// The pre-registered root of every event type hierarchy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootEvent;

impl EventType for RootEvent {
    type Parent = RootEvent;

    fn type_name() -> &'static str {
        "RootEvent"
    }
}

/// Registry description of an event type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTypeInfo {
    /// The assigned key.
    pub key: EventTypeKey,
    /// Display name of the type.
    pub name: &'static str,
    /// Key of the declared parent; `None` only for the root.
    pub parent: Option<EventTypeKey>,
    /// Rust type identity.
    pub type_id: TypeId,
}

pub(crate) type Upcast = for<'a> fn(&'a (dyn Any + 'static)) -> Option<&'a (dyn Any + 'static)>;
pub(crate) type UpcastMut =
    for<'a> fn(&'a mut (dyn Any + 'static)) -> Option<&'a mut (dyn Any + 'static)>;

struct TypeEntry {
    info: EventTypeInfo,
    upcast: Upcast,
    upcast_mut: UpcastMut,
}

struct TypeRegistry {
    by_type: HashMap<TypeId, EventTypeKey>,
    entries: Vec<TypeEntry>,
}

impl TypeRegistry {
    fn with_root() -> Self {
        let type_id = TypeId::of::<RootEvent>();
        let mut by_type = HashMap::new();
        by_type.insert(type_id, EventTypeKey::ROOT);
        Self {
            by_type,
            entries: vec![TypeEntry {
                info: EventTypeInfo {
                    key: EventTypeKey::ROOT,
                    name: RootEvent::type_name(),
                    parent: None,
                    type_id,
                },
                upcast: upcast::<RootEvent>,
                upcast_mut: upcast_mut::<RootEvent>,
            }],
        }
    }

    fn entry(&self, key: EventTypeKey) -> Option<&TypeEntry> {
        self.entries.get(key.0 as usize)
    }
}

static REGISTRY: OnceLock<RwLock<TypeRegistry>> = OnceLock::new();

fn registry() -> &'static RwLock<TypeRegistry> {
    REGISTRY.get_or_init(|| RwLock::new(TypeRegistry::with_root()))
}

fn upcast<'a, T: EventType>(data: &'a (dyn Any + 'static)) -> Option<&'a (dyn Any + 'static)> {
    data.downcast_ref::<T>()?
        .as_parent()
        .map(|parent| parent as &(dyn Any + 'static))
}

fn upcast_mut<'a, T: EventType>(
    data: &'a mut (dyn Any + 'static),
) -> Option<&'a mut (dyn Any + 'static)> {
    data.downcast_mut::<T>()?
        .as_parent_mut()
        .map(|parent| parent as &mut (dyn Any + 'static))
}

/// Get the key of `T`, registering `T` (and its ancestors) on first use
pub fn key_of<T: EventType>() -> EventTypeKey {
    let type_id = TypeId::of::<T>();
    if let Some(key) = registry().read().by_type.get(&type_id) {
        return *key;
    }

    // Ancestors first; the lock is not held across the recursion.
    let parent = key_of::<T::Parent>();

    let mut registry = registry().write();
    if let Some(key) = registry.by_type.get(&type_id) {
        return *key;
    }
    let key = EventTypeKey(registry.entries.len() as u32);
    registry.entries.push(TypeEntry {
        info: EventTypeInfo {
            key,
            name: T::type_name(),
            parent: Some(parent),
            type_id,
        },
        upcast: upcast::<T>,
        upcast_mut: upcast_mut::<T>,
    });
    registry.by_type.insert(type_id, key);
    tracing::trace!("Registered event type {} as {} (parent {})", T::type_name(), key, parent);
    key
}

/// Explicitly register `T` and its parent relation
///
/// Registration also happens implicitly on first use; calling this up front
/// keeps key assignment order deterministic.
pub fn register<T: EventType>() -> EventTypeKey {
    key_of::<T>()
}

/// Registry description of a key
pub fn describe(key: EventTypeKey) -> Option<EventTypeInfo> {
    registry().read().entry(key).map(|entry| entry.info)
}

/// Parent key of a registered type; `None` for the root or unknown keys
pub fn parent_of(key: EventTypeKey) -> Option<EventTypeKey> {
    describe(key).and_then(|info| info.parent)
}

/// Display name of a registered type
pub fn name_of(key: EventTypeKey) -> Option<&'static str> {
    describe(key).map(|info| info.name)
}

/// Whether `key` is `ancestor` or one of its descendants
pub fn is_subtype_of(key: EventTypeKey, ancestor: EventTypeKey) -> bool {
    let registry = registry().read();
    let mut current = Some(key);
    while let Some(k) = current {
        if k == ancestor {
            return true;
        }
        current = registry.entry(k).and_then(|entry| entry.info.parent);
    }
    false
}

/// Number of registered types, the root included
pub fn registered_count() -> usize {
    registry().read().entries.len()
}

pub(crate) fn upcasts(key: EventTypeKey) -> Option<(Upcast, UpcastMut)> {
    registry()
        .read()
        .entry(key)
        .map(|entry| (entry.upcast, entry.upcast_mut))
}

/// Implement [`EventType`](crate::event_type::EventType) for a type
///
/// - `event_type!(Ty)` declares a top-level type (parent is the root).
/// - `event_type!(Ty => Parent)` declares `Parent` as the supertype.
/// - `event_type!(Ty => Parent, field)` additionally exposes `self.field`
///   as the parent view.
#[macro_export]
macro_rules! event_type {
    ($ty:ty => $parent:ty, $field:ident) => {
        impl $crate::event_type::EventType for $ty {
            type Parent = $parent;

            fn type_name() -> &'static str {
                stringify!($ty)
            }

            fn as_parent(&self) -> Option<&Self::Parent> {
                Some(&self.$field)
            }

            fn as_parent_mut(&mut self) -> Option<&mut Self::Parent> {
                Some(&mut self.$field)
            }
        }
    };
    ($ty:ty => $parent:ty) => {
        impl $crate::event_type::EventType for $ty {
            type Parent = $parent;

            fn type_name() -> &'static str {
                stringify!($ty)
            }
        }
    };
    ($ty:ty) => {
        $crate::event_type!($ty => $crate::event_type::RootEvent);
    };
}
