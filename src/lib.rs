//! ustrace - dynamic context and process identity layer of a userspace tracer
//!
//! This library decides which metadata rides along with each trace event and
//! keeps it correct across fork, exec and namespace changes: context field
//! registration and serialization, per-thread identity caches, a publish-once
//! trace clock override with plugin loading, and fork/execve interposition.

pub mod catalog;
pub mod channel;
pub mod cli;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod interpose;
pub mod lifecycle;
pub mod namespace;
pub mod pid_context;
pub mod plugin;
pub mod report;
pub mod types;

pub use error::{ContextError, Result};

use std::sync::Once;

static INIT: Once = Once::new();

/// One-time process initialization from the environment
///
/// Sets up debug logging if requested, then loads the configured clock
/// plugin. Later calls do nothing.
pub fn init() {
    INIT.call_once(|| init_with(&config::TracerConfig::from_env()));
}

/// Initialize from an explicit configuration
pub fn init_with(config: &config::TracerConfig) {
    config::init_tracing(config.debug);
    plugin::load_from_config(config);
}
