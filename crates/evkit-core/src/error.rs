//! Error handling for evkit
//!
//! Provides the error types for every layer of the dispatch core:
//! - Listener errors (construction/configuration)
//! - Bus errors (subscription and publish preconditions)
//! - Event errors (outcome of a dispatch as seen by the publisher)
//! - Config errors (loading bus configuration)
//!
//! All error types use `thiserror` for ergonomic error handling.
//! Failures raised inside listener callbacks are never returned from
//! `publish()`; they become an aborted event and surface through
//! [`EventError::Aborted`].

use thiserror::Error;

/// Listener error type
///
/// Raised synchronously when a listener is constructed with an invalid
/// configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    /// Priority outside the accepted range
    #[error("Listener priority {priority} out of range [{min}, {max}]")]
    PriorityOutOfRange {
        /// The rejected priority.
        priority: i32,
        /// Lowest accepted priority.
        min: i32,
        /// Highest accepted priority.
        max: i32,
    },
}

/// Bus error type
///
/// Structural errors reported at the call site of `subscribe` or `publish`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The listener is already registered on this exact channel
    #[error("Listener {listener} already subscribed to {event_type} on bus '{bus}'")]
    DuplicateSubscription {
        /// Display form of the listener.
        listener: String,
        /// Name of the event type the channel belongs to.
        event_type: String,
        /// Name of the bus.
        bus: String,
    },

    /// The event was already finished or is being dispatched
    #[error("Event {event_type} ({event_id}) has already been processed")]
    AlreadyProcessed {
        /// Name of the event type.
        event_type: String,
        /// Short event id.
        event_id: String,
    },

    /// The event type key is not known to the type registry
    #[error("Unknown event type key {key}")]
    UnknownEventType {
        /// The raw key value.
        key: u32,
    },
}

/// Event outcome error type
///
/// The rejection value of an [`EventFuture`](crate::event::EventFuture).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The event was aborted by a listener or by a listener failure
    #[error("Event aborted: {reason}")]
    Aborted {
        /// The stored abort reason.
        reason: String,
    },

    /// The event was dropped before it was finished
    #[error("Event was dropped before it finished")]
    Abandoned,
}

/// Config error type
///
/// Represents errors loading an [`EventBusConfig`](crate::config::EventBusConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main error type for evkit
///
/// A unified error type that can represent any error from the core.
#[derive(Error, Debug)]
pub enum Error {
    /// Listener error
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// Bus error
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Event outcome error
    #[error(transparent)]
    Event(#[from] EventError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Check if this is a duplicate subscription error
    pub fn is_duplicate_subscription(&self) -> bool {
        matches!(self, Error::Bus(BusError::DuplicateSubscription { .. }))
    }

    /// Check if this is an already-processed error
    pub fn is_already_processed(&self) -> bool {
        matches!(self, Error::Bus(BusError::AlreadyProcessed { .. }))
    }

    /// Check if this is a listener configuration error
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Error::Listener(_) | Error::Config(_))
    }

    /// Check if this is an event abort
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Event(EventError::Aborted { .. }))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_error_message() {
        let err = ListenerError::PriorityOutOfRange {
            priority: 30000,
            min: -20000,
            max: 20000,
        };
        assert_eq!(
            err.to_string(),
            "Listener priority 30000 out of range [-20000, 20000]"
        );
    }

    #[test]
    fn test_unified_error_predicates() {
        let err: Error = BusError::AlreadyProcessed {
            event_type: "Ping".to_string(),
            event_id: "abcd".to_string(),
        }
        .into();
        assert!(err.is_already_processed());
        assert!(!err.is_duplicate_subscription());

        let err: Error = EventError::Aborted {
            reason: "nope".to_string(),
        }
        .into();
        assert!(err.is_aborted());
        assert_eq!(err.to_string(), "Event aborted: nope");
    }
}
