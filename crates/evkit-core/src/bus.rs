//! Event Bus implementation.
//!
//! Provides the EventBus registry and dispatch engine, and the global
//! default bus instance.
//!
//! A bus keeps one channel per event type key holding the listeners
//! registered directly on that type, plus a memoized hierarchy chain per
//! key (root first). Publishing concatenates the channels along the
//! event type's chain, sorts the pool by priority (stable, so equal
//! priorities keep subscription order) and invokes listeners until the
//! pool is exhausted or the event finishes.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

use crate::config::EventBusConfig;
use crate::error::{BusError, Error};
use crate::event::{Event, EventFuture};
use crate::event_type::{self, EventType, EventTypeKey};
use crate::listener::EventListener;
use crate::types::{HierarchyChain, ListenerHandle, LoggerHook};

/// Abort reason given to an event whose listener failed.
pub const LISTENER_FAILURE_REASON: &str = "Uncaught error in event listener";

/// Name of the global bus.
pub const DEFAULT_BUS_NAME: &str = "default";

/// Unique bus id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusId(Uuid);

impl BusId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for BusId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bus({})", &self.0.to_string()[..8])
    }
}

/// Channels and hierarchy cache of one bus
struct Registry {
    channels: HashMap<EventTypeKey, Vec<ListenerHandle>>,
    hierarchy: HashMap<EventTypeKey, HierarchyChain>,
}

impl Registry {
    fn new() -> Self {
        let mut channels = HashMap::new();
        channels.insert(EventTypeKey::ROOT, Vec::new());
        let mut hierarchy = HashMap::new();
        let root: HierarchyChain = Arc::from(vec![EventTypeKey::ROOT]);
        hierarchy.insert(EventTypeKey::ROOT, root);
        Self {
            channels,
            hierarchy,
        }
    }

    /// Chain of `key`, computing and memoizing it and any unvisited
    /// ancestors on first use
    fn ensure_chain(&mut self, key: EventTypeKey) -> Result<HierarchyChain, BusError> {
        if let Some(chain) = self.hierarchy.get(&key) {
            return Ok(chain.clone());
        }
        if event_type::describe(key).is_none() {
            return Err(BusError::UnknownEventType {
                key: key.as_u32(),
            });
        }

        // Walk up until a memoized ancestor; the root always is.
        let mut unvisited = vec![key];
        let mut current = key;
        let base = loop {
            let parent = event_type::parent_of(current).ok_or(BusError::UnknownEventType {
                key: current.as_u32(),
            })?;
            if let Some(chain) = self.hierarchy.get(&parent) {
                break chain.clone();
            }
            unvisited.push(parent);
            current = parent;
        };

        let mut chain: Vec<EventTypeKey> = base.to_vec();
        for visited in unvisited.into_iter().rev() {
            chain.push(visited);
            self.hierarchy.insert(visited, Arc::from(chain.clone()));
            self.channels.entry(visited).or_default();
        }
        self.hierarchy
            .get(&key)
            .cloned()
            .ok_or(BusError::UnknownEventType { key: key.as_u32() })
    }

    /// Listeners along `chain`, sorted by priority
    fn pool(&self, chain: &[EventTypeKey]) -> Vec<ListenerHandle> {
        let mut pool: Vec<ListenerHandle> = chain
            .iter()
            .filter_map(|key| self.channels.get(key))
            .flatten()
            .cloned()
            .collect();
        // Stable: equal priorities keep concatenation order.
        pool.sort_by_key(|listener| listener.priority());
        pool
    }
}

struct BusInner {
    id: BusId,
    name: String,
    config: EventBusConfig,
    registry: RwLock<Registry>,
    logger: RwLock<Option<LoggerHook>>,
    published: AtomicU64,
    aborted: AtomicU64,
}

/// Named event registry and dispatch engine
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a new event bus with default configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, EventBusConfig::default())
    }

    /// Create a new event bus with custom configuration
    pub fn with_config(name: impl Into<String>, config: EventBusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                id: BusId::new(),
                name: name.into(),
                config,
                registry: RwLock::new(Registry::new()),
                logger: RwLock::new(None),
                published: AtomicU64::new(0),
                aborted: AtomicU64::new(0),
            }),
        }
    }

    /// Unique bus id
    pub fn id(&self) -> BusId {
        self.inner.id
    }

    /// Bus name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the current configuration
    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Subscribe a listener to events of type `T` and its subtypes
    pub fn subscribe<T: EventType>(&self, listener: &ListenerHandle) -> Result<(), BusError> {
        self.subscribe_key(T::key(), listener)
    }

    /// Subscribe a listener to the channel of a registered type key
    ///
    /// Fails with [`BusError::DuplicateSubscription`] when the listener is
    /// already in that channel.
    pub fn subscribe_key(
        &self,
        key: EventTypeKey,
        listener: &ListenerHandle,
    ) -> Result<(), BusError> {
        {
            let mut registry = self.inner.registry.write();
            registry.ensure_chain(key)?;
            let channel = registry.channels.entry(key).or_default();
            if channel.iter().any(|member| Arc::ptr_eq(member, listener)) {
                return Err(BusError::DuplicateSubscription {
                    listener: listener.to_string(),
                    event_type: type_label(key),
                    bus: self.inner.name.clone(),
                });
            }
            channel.push(listener.clone());
        }
        listener.add_membership(self.inner.id, key);
        tracing::debug!(
            "{} subscribed to {} on bus '{}'",
            listener,
            type_label(key),
            self.inner.name
        );
        Ok(())
    }

    /// Create a named listener and subscribe it to `T`
    pub fn listen<T, F>(
        &self,
        name: impl Into<String>,
        owner: impl Into<String>,
        priority: i32,
        callback: F,
    ) -> Result<ListenerHandle, Error>
    where
        T: EventType,
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let listener = EventListener::new(priority, callback)?
            .named(name)
            .owned_by(owner)
            .into_handle();
        self.subscribe::<T>(&listener)?;
        Ok(listener)
    }

    /// Create an anonymous listener and subscribe it to `T`
    pub fn on<T, F>(&self, priority: i32, callback: F) -> Result<ListenerHandle, Error>
    where
        T: EventType,
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let listener = EventListener::new(priority, callback)?.into_handle();
        self.subscribe::<T>(&listener)?;
        Ok(listener)
    }

    /// Remove a listener from every channel of this bus
    ///
    /// Returns true if the listener was subscribed here.
    pub fn unsubscribe(&self, listener: &ListenerHandle) -> bool {
        let keys = listener.take_memberships(self.inner.id);
        if keys.is_empty() {
            return false;
        }
        let mut registry = self.inner.registry.write();
        for key in &keys {
            if let Some(channel) = registry.channels.get_mut(key) {
                channel.retain(|member| !Arc::ptr_eq(member, listener));
            }
        }
        tracing::debug!(
            "{} unsubscribed from {} channel(s) on bus '{}'",
            listener,
            keys.len(),
            self.inner.name
        );
        true
    }

    /// Set the debug hook invoked with every finished event
    pub fn logger<F>(&self, hook: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        *self.inner.logger.write() = Some(Arc::new(hook));
    }

    /// Remove the debug hook
    pub fn clear_logger(&self) {
        *self.inner.logger.write() = None;
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Dispatch an event to every listener along its type's hierarchy
    ///
    /// Runs synchronously on the calling thread. Fails only when the event
    /// was already processed; listener failures abort the event and are
    /// reported through the returned future.
    pub fn publish(&self, event: &Event) -> Result<EventFuture, BusError> {
        let future = event.begin_dispatch()?;
        // Registered at construction, so resolution cannot fail for a live event.
        let pool = self.candidates(event.type_key()).unwrap_or_else(|err| {
            tracing::error!("Cannot resolve listeners for {}: {}", event, err);
            Vec::new()
        });
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        // Settles the event if a listener panic unwinds out of the loop.
        let guard = DispatchGuard {
            bus: self,
            event,
            armed: true,
        };

        for listener in &pool {
            event.delivered(listener);
            if self.inner.config.trace_deliveries {
                tracing::trace!(
                    "Delivering {} to {} (priority {})",
                    event,
                    listener,
                    listener.priority()
                );
            }
            match self.invoke(listener, event) {
                Ok(()) => {
                    if event.is_finished() {
                        break;
                    }
                }
                Err(err) => {
                    event.abort(LISTENER_FAILURE_REASON);
                    tracing::error!(
                        "Listener {} failed while handling {}: {:#}",
                        listener,
                        event,
                        err
                    );
                    break;
                }
            }
        }

        guard.disarm();
        self.settle(event);
        if self.inner.config.log_finished {
            let status = event.status();
            tracing::debug!(
                "{} {} on bus '{}' after {} of {} listener(s)",
                event,
                status,
                self.inner.name,
                event.delivery_count(),
                pool.len()
            );
        }
        self.notify_logger(event);
        Ok(future)
    }

    /// Finish the event exactly once and count it if aborted
    fn settle(&self, event: &Event) {
        event.finish();
        if event.status().aborted {
            self.inner.aborted.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn candidates(&self, key: EventTypeKey) -> Result<Vec<ListenerHandle>, BusError> {
        {
            let registry = self.inner.registry.read();
            if let Some(chain) = registry.hierarchy.get(&key) {
                return Ok(registry.pool(chain));
            }
        }
        let mut registry = self.inner.registry.write();
        let chain = registry.ensure_chain(key)?;
        Ok(registry.pool(&chain))
    }

    fn invoke(&self, listener: &ListenerHandle, event: &Event) -> anyhow::Result<()> {
        if !self.inner.config.capture_panics {
            return listener.invoke(event);
        }
        match panic::catch_unwind(AssertUnwindSafe(|| listener.invoke(event))) {
            Ok(result) => result,
            Err(payload) => Err(anyhow::anyhow!(
                "listener panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }

    fn notify_logger(&self, event: &Event) {
        let hook = self.inner.logger.read().clone();
        if let Some(hook) = hook {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(event))) {
                tracing::warn!(
                    "Logger hook on bus '{}' panicked for {}: {}",
                    self.inner.name,
                    event,
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Total number of channel memberships across all channels
    pub fn listener_count(&self) -> usize {
        self.inner
            .registry
            .read()
            .channels
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Number of listeners registered directly on `key`
    pub fn channel_len(&self, key: EventTypeKey) -> usize {
        self.inner
            .registry
            .read()
            .channels
            .get(&key)
            .map_or(0, Vec::len)
    }

    /// Memoized hierarchy chain of `key`, root first, if computed yet
    pub fn hierarchy_of(&self, key: EventTypeKey) -> Option<HierarchyChain> {
        self.inner.registry.read().hierarchy.get(&key).cloned()
    }

    /// Number of events dispatched by this bus
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Number of dispatched events that ended aborted
    pub fn aborted_count(&self) -> u64 {
        self.inner.aborted.load(Ordering::Relaxed)
    }
}

/// Finishes an event whose dispatch is unwinding
struct DispatchGuard<'a> {
    bus: &'a EventBus,
    event: &'a Event,
    armed: bool,
}

impl DispatchGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if !self.event.is_finished() {
            self.event.abort(LISTENER_FAILURE_REASON);
        }
        tracing::error!(
            "Listener panicked while handling {} on bus '{}'",
            self.event,
            self.bus.inner.name
        );
        self.bus.settle(self.event);
        self.bus.notify_logger(self.event);
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("listeners", &self.listener_count())
            .field("config", &self.inner.config)
            .finish()
    }
}

fn type_label(key: EventTypeKey) -> String {
    event_type::name_of(key)
        .map(str::to_string)
        .unwrap_or_else(|| key.to_string())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Global event bus instance
static EVENT_BUS: OnceLock<EventBus> = OnceLock::new();

/// Get or initialize the global event bus
///
/// Events that were never bound to a bus are published here.
pub fn event_bus() -> &'static EventBus {
    EVENT_BUS.get_or_init(|| EventBus::new(DEFAULT_BUS_NAME))
}

/// Initialize the global event bus with custom configuration
///
/// Must be called before any calls to `event_bus()`. Returns the rejected
/// configuration if the event bus has already been initialized.
pub fn init_event_bus(config: EventBusConfig) -> Result<(), EventBusConfig> {
    EVENT_BUS
        .set(EventBus::with_config(DEFAULT_BUS_NAME, config))
        .map_err(|bus| bus.inner.config.clone())
}

/// Convenience macro to publish an event on the global event bus
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::bus::event_bus().publish(&$event)
    };
}

/// Convenience macro to subscribe a callback on the global event bus
///
/// `on_event!(Type, callback)` uses the default priority;
/// `on_event!(Type, priority, callback)` sets it explicitly.
#[macro_export]
macro_rules! on_event {
    ($ty:ty, $priority:expr, $handler:expr) => {
        $crate::bus::event_bus().on::<$ty, _>($priority, $handler)
    };
    ($ty:ty, $handler:expr) => {
        $crate::bus::event_bus().on::<$ty, _>($crate::listener::PRIORITY_DEFAULT, $handler)
    };
}
