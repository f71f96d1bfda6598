//! Process lifecycle notifications
//!
//! The interposer reports two transitions: a fork, observed in the new
//! child, and a potential exec, observed while the current image is still
//! mapped. [`TracerNotifier`] is the default receiver: it drops every
//! per-thread and per-process identity cache inherited from the parent,
//! then forwards to the tracer core installed with [`install_tracer_core`].

use crate::error::{ContextError, Result};
use std::sync::OnceLock;

/// Receiver of lifecycle notifications
///
/// Both calls are synchronous; the intercepted libc call does not proceed
/// until they return.
pub trait LifecycleHooks: Send + Sync {
    /// Runs in the child, before it returns from `fork()`
    fn on_process_forked(&self);

    /// Runs before the genuine `execve()`
    fn on_potential_image_replacement(&self);
}

static TRACER_CORE: OnceLock<Box<dyn LifecycleHooks>> = OnceLock::new();

/// Install the tracer core's handlers, once per process
pub fn install_tracer_core(core: Box<dyn LifecycleHooks>) -> Result<()> {
    TRACER_CORE.set(core).map_err(|_| ContextError::Busy)
}

pub fn tracer_core_installed() -> bool {
    TRACER_CORE.get().is_some()
}

/// Default notification target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracerNotifier;

impl LifecycleHooks for TracerNotifier {
    fn on_process_forked(&self) {
        crate::namespace::reset_all();
        crate::pid_context::reset_on_fork();

        if let Some(core) = TRACER_CORE.get() {
            core.on_process_forked();
        }
    }

    fn on_potential_image_replacement(&self) {
        tracing::trace!("potential exec");
        if let Some(core) = TRACER_CORE.get() {
            core.on_potential_image_replacement();
        }
    }
}
