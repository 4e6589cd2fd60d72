//! # evkit core
//!
//! Event types, listeners and the dispatch bus.
//!
//! ## Overview
//!
//! - Event types form a single-rooted hierarchy declared through
//!   [`EventType::Parent`]; a listener registered on a type also receives
//!   events of every subtype.
//! - Listeners run in ascending priority order. Equal priorities keep
//!   subscription order.
//! - A listener may `stop` (success) or `abort` (failure) the event; later
//!   listeners in that dispatch do not run.
//! - Listener errors never escape `publish()`; they abort the event and
//!   surface through the returned [`EventFuture`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use evkit_core::{event_type, Event, EventBus};
//!
//! struct Request { path: String }
//! event_type!(Request);
//!
//! struct Upload { base: Request, bytes: u64 }
//! event_type!(Upload => Request, base);
//!
//! let bus = EventBus::new("http");
//! bus.listen::<Request, _>("access_log", "http", 0, |event| {
//!     if let Some(request) = event.data::<Request>() {
//!         tracing::info!("{}", request.path);
//!     }
//!     Ok(())
//! })?;
//!
//! let event = Event::new(Upload { base: Request { path: "/files".into() }, bytes: 512 })
//!     .on_bus(&bus);
//! let outcome = event.publish()?.wait();
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod event_type;
pub mod listener;
pub mod types;

pub use bus::{event_bus, init_event_bus, BusId, EventBus, DEFAULT_BUS_NAME, LISTENER_FAILURE_REASON};
pub use config::EventBusConfig;
pub use error::{BusError, ConfigError, Error, EventError, ListenerError, Result};
pub use event::{Event, EventFuture, EventOutcome, EventStatus};
pub use event_type::{EventType, EventTypeInfo, EventTypeKey, RootEvent};
pub use listener::{
    EventListener, ListenerId, PRIORITY_DEFAULT, PRIORITY_MAX, PRIORITY_MIN, PRIORITY_POST,
    PRIORITY_PRE,
};

// Re-export type aliases for convenience
pub use types::{
    thread_safe, thread_safe_rw, HierarchyChain, ListenerContext, ListenerHandle, LoggerHook,
    ThreadSafe, ThreadSafeRw,
};
