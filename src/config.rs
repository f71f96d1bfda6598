//! Environment configuration and logging setup
//!
//! | Setting                | Meaning                                   |
//! |------------------------|-------------------------------------------|
//! | `USTRACE_CLOCK_PLUGIN` | Clock plugin library path (secure)        |
//! | `USTRACE_DEBUG`        | `1`/`true`/`yes`/`on` enables debug logs  |
//!
//! Secure settings are ignored when the process runs with elevated
//! credentials, so a setuid program cannot be told to load a library.

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub const CLOCK_PLUGIN_ENV: &str = "USTRACE_CLOCK_PLUGIN";
pub const DEBUG_ENV: &str = "USTRACE_DEBUG";

const SECURE_SETTINGS: &[&str] = &[CLOCK_PLUGIN_ENV];

/// Real and effective credentials differ (setuid/setgid execution)
pub fn is_privileged() -> bool {
    nix::unistd::getuid() != nix::unistd::geteuid()
        || nix::unistd::getgid() != nix::unistd::getegid()
}

/// Read a setting, empty values count as unset
pub fn getenv(key: &str) -> Option<String> {
    if SECURE_SETTINGS.contains(&key) && is_privileged() {
        tracing::debug!(setting = key, "ignoring secure setting in privileged process");
        return None;
    }
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Boolean setting: "1", "true", "yes", "on" (case-insensitive)
pub fn getenv_bool(key: &str, default: bool) -> bool {
    match getenv(key) {
        Some(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

/// Tracer configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TracerConfig {
    /// Clock plugin library; `None` keeps the built-in clock
    pub clock_plugin: Option<PathBuf>,
    /// Verbose diagnostics on stderr
    pub debug: bool,
}

impl TracerConfig {
    pub fn from_env() -> Self {
        Self {
            clock_plugin: getenv(CLOCK_PLUGIN_ENV).map(PathBuf::from),
            debug: getenv_bool(DEBUG_ENV, false),
        }
    }

    pub fn with_clock_plugin(mut self, path: impl Into<PathBuf>) -> Self {
        self.clock_plugin = Some(path.into());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Install a stderr subscriber when debugging is requested
///
/// A subscriber already installed by the host application is left alone.
pub fn init_tracing(debug: bool) {
    if debug {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .try_init();
    }
}
