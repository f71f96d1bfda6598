//! Process and thread id context fields (`vpid`, `vtid`)
//!
//! Both ids are cached: the process id once per process, the thread id once
//! per thread. A forked child inherits the parent's caches, so the fork
//! notification calls [`reset_on_fork`] before anything is recorded.

use crate::channel::{Channel, EventContext};
use crate::context::{integer_size, record_integer, ContextField, ContextRegistry, ContextValue};
use crate::error::Result;
use crate::types::IntegerType;
use libc::pid_t;
use std::cell::Cell;
use std::sync::atomic::{AtomicI32, Ordering};

static CACHED_VPID: AtomicI32 = AtomicI32::new(0);

thread_local! {
    static CACHED_VTID: Cell<pid_t> = const { Cell::new(0) };
}

/// Process id of the caller, as seen from its pid namespace
pub fn vpid() -> pid_t {
    let cached = CACHED_VPID.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let pid = nix::unistd::getpid().as_raw();
    CACHED_VPID.store(pid, Ordering::Relaxed);
    pid
}

/// Kernel thread id of the caller
pub fn vtid() -> pid_t {
    CACHED_VTID.with(|cell| {
        let cached = cell.get();
        if cached != 0 {
            return cached;
        }
        let tid = nix::unistd::gettid().as_raw();
        cell.set(tid);
        tid
    })
}

/// Drop the ids inherited from the parent; runs in the child
pub fn reset_on_fork() {
    CACHED_VPID.store(0, Ordering::Relaxed);
    CACHED_VTID.with(|cell| cell.set(0));
}

struct VpidContext;

impl ContextField for VpidContext {
    fn size(&self, offset: usize) -> usize {
        integer_size::<pid_t>(offset)
    }

    fn record(&self, ctx: &mut EventContext, chan: &mut dyn Channel) {
        record_integer(ctx, chan, vpid());
    }

    fn value(&self) -> ContextValue {
        ContextValue::S64(vpid() as i64)
    }
}

struct VtidContext;

impl ContextField for VtidContext {
    fn size(&self, offset: usize) -> usize {
        integer_size::<pid_t>(offset)
    }

    fn record(&self, ctx: &mut EventContext, chan: &mut dyn Channel) {
        record_integer(ctx, chan, vtid());
    }

    fn value(&self) -> ContextValue {
        ContextValue::S64(vtid() as i64)
    }
}

/// Register the `vpid` field
pub fn add_vpid_context(registry: &mut ContextRegistry) -> Result<()> {
    registry.register("vpid", IntegerType::of::<pid_t>(), Box::new(VpidContext))
}

/// Register the `vtid` field
pub fn add_vtid_context(registry: &mut ContextRegistry) -> Result<()> {
    registry.register("vtid", IntegerType::of::<pid_t>(), Box::new(VtidContext))
}
