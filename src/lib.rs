//! # evkit
//!
//! In-process event dispatch for Rust applications:
//! - Event types form a single-rooted hierarchy; listeners on a type also
//!   receive its subtypes
//! - Listeners run in ascending priority order and may stop or abort the
//!   chain
//! - Every published event settles a future with its outcome
//!
//! ## Architecture
//!
//! 1. **evkit-core** - Event types, events, listeners, buses, configuration
//! 2. **evkit** - Facade re-exporting the core plus logging setup

pub use evkit_core::{bus, config, error, event, event_type, listener, types};
pub use evkit_core::{emit, on_event};

pub use evkit_core::{
    event_bus, init_event_bus, thread_safe, thread_safe_rw, BusError, BusId, ConfigError, Error,
    Event, EventBus, EventBusConfig, EventError, EventFuture, EventListener, EventOutcome,
    EventStatus, EventType, EventTypeInfo, EventTypeKey, HierarchyChain, ListenerContext,
    ListenerError, ListenerHandle, ListenerId, LoggerHook, Result, RootEvent, ThreadSafe,
    ThreadSafeRw, DEFAULT_BUS_NAME, LISTENER_FAILURE_REASON, PRIORITY_DEFAULT, PRIORITY_MAX,
    PRIORITY_MIN, PRIORITY_POST, PRIORITY_PRE,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    init_logging_with(tracing::Level::INFO)
}

/// Initialize logging with a minimum level added to the `RUST_LOG` filter
///
/// Fails if a global subscriber is already installed.
pub fn init_logging_with(level: tracing::Level) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::debug!("{}", build_info());
    Ok(())
}

/// Crate version and build date, for startup logs
pub fn build_info() -> String {
    format!("evkit {} (built {})", VERSION, BUILD_DATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_metadata() {
        assert!(!VERSION.is_empty());
        assert!(BUILD_DATE.ends_with("UTC"));
        assert!(build_info().contains(VERSION));
    }

    #[test]
    fn test_second_logging_init_fails() {
        // Only the first installation in a process can succeed.
        let first = init_logging_with(tracing::Level::WARN);
        let second = init_logging();
        assert!(first.is_ok());
        assert!(second.is_err());
    }
}
