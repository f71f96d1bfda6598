//! Error taxonomy for the dynamic-context layer
//!
//! Registry and clock errors go back to the immediate caller. Interposer
//! errors surface to the traced program as a failed libc call, and plugin
//! load errors are logged then swallowed by [`crate::plugin::load_from_config`].

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Out of memory while registering context field")]
    OutOfMemory,

    #[error("Context field already registered: {name}")]
    AlreadyExists { name: String },

    #[error("Trace clock override is already active")]
    Busy,

    #[error("Trace clock override is missing the {missing} callback")]
    InvalidConfiguration { missing: &'static str },

    #[error("Unknown context field: {name}")]
    UnknownContext { name: String },

    #[error("Invalid integer type: {0}")]
    InvalidType(String),

    #[error("Unable to resolve genuine libc entry point {symbol}")]
    SymbolResolution { symbol: &'static str },

    #[error("Cannot load clock plugin {}: {reason}", path.display())]
    PluginLoad { path: PathBuf, reason: String },

    #[error("Channel could not reserve {requested} bytes")]
    NoSpace { requested: usize },

    #[error("Context layout computed at revision {found}, registry is at revision {expected}")]
    StaleLayout { expected: u64, found: u64 },
}

impl ContextError {
    /// Negative errno returned through the C ABI
    pub fn errno(&self) -> i32 {
        match self {
            ContextError::OutOfMemory => -libc::ENOMEM,
            ContextError::AlreadyExists { .. } => -libc::EEXIST,
            ContextError::Busy => -libc::EBUSY,
            ContextError::InvalidConfiguration { .. } | ContextError::InvalidType(_) => {
                -libc::EINVAL
            }
            ContextError::UnknownContext { .. }
            | ContextError::SymbolResolution { .. }
            | ContextError::PluginLoad { .. } => -libc::ENOENT,
            ContextError::NoSpace { .. } => -libc::ENOSPC,
            ContextError::StaleLayout { .. } => -libc::EAGAIN,
        }
    }
}

pub type Result<T> = std::result::Result<T, ContextError>;
