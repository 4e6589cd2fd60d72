//! Type system utilities and aliases.
//!
//! This module provides type aliases for the shared handles and callback
//! shapes used throughout the dispatch core.
//!
//! ## Modules
//!
//! - [`aliases`]: Type aliases for `Arc<Mutex<T>>`, listener callbacks, hooks, etc.

pub mod aliases;

pub use aliases::*;
