//! Event listeners
//!
//! An [`EventListener`] wraps a callback with a priority and optional
//! descriptive name/owner. Priorities order listeners within one dispatch:
//! lower values run first, and must lie in
//! [`PRIORITY_MIN`]..=[`PRIORITY_MAX`].
//!
//! The tier constants [`PRIORITY_PRE`], [`PRIORITY_DEFAULT`] and
//! [`PRIORITY_POST`] mark the conventional pre-process, default and
//! post-process stages.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::bus::BusId;
use crate::error::ListenerError;
use crate::event::Event;
use crate::event_type::EventTypeKey;
use crate::types::{ListenerContext, ListenerFn, ListenerHandle};

/// Lowest accepted priority.
pub const PRIORITY_MIN: i32 = -20_000;
/// Pre-process tier.
pub const PRIORITY_PRE: i32 = -10_000;
/// Default tier.
pub const PRIORITY_DEFAULT: i32 = 0;
/// Post-process tier.
pub const PRIORITY_POST: i32 = 10_000;
/// Highest accepted priority.
pub const PRIORITY_MAX: i32 = 20_000;

/// Unique listener id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Listener({})", &self.0.to_string()[..8])
    }
}

/// A prioritized event handler
pub struct EventListener {
    id: ListenerId,
    priority: i32,
    name: Option<String>,
    owner: Option<String>,
    context: Option<ListenerContext>,
    callback: Box<ListenerFn>,
    /// (bus, type key) channels this listener is registered on
    memberships: Mutex<HashSet<(BusId, EventTypeKey)>>,
}

impl EventListener {
    /// Create a listener
    ///
    /// Fails with [`ListenerError::PriorityOutOfRange`] outside
    /// [`PRIORITY_MIN`]..=[`PRIORITY_MAX`].
    pub fn new<F>(priority: i32, callback: F) -> Result<Self, ListenerError>
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::build(
            priority,
            None,
            Box::new(move |event: &Event, _: Option<&ListenerContext>| {
                callback(event)
            }),
        )
    }

    /// Create a listener bound to a typed execution context
    ///
    /// The callback receives the bound context, or the override passed to
    /// [`EventListener::invoke_with`]. An override of a different type makes
    /// the invocation fail.
    pub fn with_context<C, F>(
        priority: i32,
        context: Arc<C>,
        callback: F,
    ) -> Result<Self, ListenerError>
    where
        C: Any + Send + Sync,
        F: Fn(&Event, &C) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let context: ListenerContext = context;
        Self::build(
            priority,
            Some(context),
            Box::new(move |event: &Event, context: Option<&ListenerContext>| {
                let context = context
                    .ok_or_else(|| anyhow::anyhow!("listener has no execution context"))?
                    .downcast_ref::<C>()
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "execution context is not a {}",
                            std::any::type_name::<C>()
                        )
                    })?;
                callback(event, context)
            }),
        )
    }

    fn build(
        priority: i32,
        context: Option<ListenerContext>,
        callback: Box<ListenerFn>,
    ) -> Result<Self, ListenerError> {
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
            return Err(ListenerError::PriorityOutOfRange {
                priority,
                min: PRIORITY_MIN,
                max: PRIORITY_MAX,
            });
        }
        Ok(Self {
            id: ListenerId::new(),
            priority,
            name: None,
            owner: None,
            context,
            callback,
            memberships: Mutex::new(HashSet::new()),
        })
    }

    /// Set a descriptive name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set a descriptive owner
    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Wrap into a shareable handle for subscription
    pub fn into_handle(self) -> ListenerHandle {
        Arc::new(self)
    }

    /// Unique id
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Dispatch priority
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Descriptive name
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Descriptive owner
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Whether an execution context is bound
    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    /// Call the callback with the bound execution context
    pub fn invoke(&self, event: &Event) -> anyhow::Result<()> {
        (self.callback)(event, self.context.as_ref())
    }

    /// Call the callback with an overriding execution context
    pub fn invoke_with(&self, event: &Event, context: &ListenerContext) -> anyhow::Result<()> {
        (self.callback)(event, Some(context))
    }

    /// Whether the listener is registered on any channel of any bus
    pub fn is_subscribed(&self) -> bool {
        !self.memberships.lock().is_empty()
    }

    /// Type keys this listener is registered under on `bus`
    pub fn channels(&self, bus: BusId) -> Vec<EventTypeKey> {
        let mut keys: Vec<EventTypeKey> = self
            .memberships
            .lock()
            .iter()
            .filter(|(member_of, _)| *member_of == bus)
            .map(|(_, key)| *key)
            .collect();
        keys.sort();
        keys
    }

    pub(crate) fn add_membership(&self, bus: BusId, key: EventTypeKey) {
        self.memberships.lock().insert((bus, key));
    }

    /// Remove and return every membership on `bus`
    pub(crate) fn take_memberships(&self, bus: BusId) -> Vec<EventTypeKey> {
        let mut memberships = self.memberships.lock();
        let keys: Vec<EventTypeKey> = memberships
            .iter()
            .filter(|(member_of, _)| *member_of == bus)
            .map(|(_, key)| *key)
            .collect();
        memberships.retain(|(member_of, _)| *member_of != bus);
        keys
    }
}

impl std::fmt::Display for EventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.owner, &self.name) {
            (Some(owner), Some(name)) => write!(f, "{}::{}", owner, name),
            (None, Some(name)) => write!(f, "{}", name),
            _ => write!(f, "{}", self.id),
        }
    }
}

impl std::fmt::Debug for EventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListener")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("priority", &self.priority)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}
