//! Namespace identity context fields
//!
//! A namespace is identified by the inode number of its `/proc` handle. The
//! lookup costs a `stat(2)`, so each thread caches the result per namespace
//! kind and only queries again after an explicit reset.
//!
//! Cache states:
//!
//! ```text
//! Uninitialized ──query──▶ Known(ino) | Unavailable
//!       ▲                         │
//!       └────────── reset ────────┘
//! ```
//!
//! A failed lookup is cached as `Unavailable` (recorded as inode 0) so it is
//! not retried on every event.
//!
//! A namespace can change through `clone(2)`/`fork(2)` with a `CLONE_NEW*`
//! flag, `setns(2)` and `unshare(2)`. The fork notification resets every
//! kind; `setns`/`unshare` wrappers call [`reset_for_clone_flags`].

use crate::channel::{Channel, EventContext};
use crate::context::{integer_size, record_integer, ContextField, ContextRegistry, ContextValue};
use crate::error::Result;
use crate::types::IntegerType;
use libc::ino_t;
use std::cell::Cell;
use std::sync::Arc;

/// Inode recorded when the namespace could not be looked up
pub const NS_INO_UNAVAILABLE: ino_t = 0;

// Older libc releases do not export it
const CLONE_NEWTIME: libc::c_int = 0x0000_0080;

/// Kernel namespace kinds exposed under `/proc/<tid>/ns`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    Cgroup,
    Ipc,
    Mnt,
    Net,
    Pid,
    Time,
    User,
    Uts,
}

impl NamespaceKind {
    pub const ALL: [NamespaceKind; 8] = [
        NamespaceKind::Cgroup,
        NamespaceKind::Ipc,
        NamespaceKind::Mnt,
        NamespaceKind::Net,
        NamespaceKind::Pid,
        NamespaceKind::Time,
        NamespaceKind::User,
        NamespaceKind::Uts,
    ];

    /// Entry name under `/proc/<tid>/ns`
    pub fn proc_name(self) -> &'static str {
        match self {
            NamespaceKind::Cgroup => "cgroup",
            NamespaceKind::Ipc => "ipc",
            NamespaceKind::Mnt => "mnt",
            NamespaceKind::Net => "net",
            NamespaceKind::Pid => "pid",
            NamespaceKind::Time => "time",
            NamespaceKind::User => "user",
            NamespaceKind::Uts => "uts",
        }
    }

    /// Context field name
    pub fn field_name(self) -> &'static str {
        match self {
            NamespaceKind::Cgroup => "cgroup_ns",
            NamespaceKind::Ipc => "ipc_ns",
            NamespaceKind::Mnt => "mnt_ns",
            NamespaceKind::Net => "net_ns",
            NamespaceKind::Pid => "pid_ns",
            NamespaceKind::Time => "time_ns",
            NamespaceKind::User => "user_ns",
            NamespaceKind::Uts => "uts_ns",
        }
    }

    /// `CLONE_NEW*` flag that moves a task into a new namespace of this kind
    pub fn clone_flag(self) -> libc::c_int {
        match self {
            NamespaceKind::Cgroup => libc::CLONE_NEWCGROUP,
            NamespaceKind::Ipc => libc::CLONE_NEWIPC,
            NamespaceKind::Mnt => libc::CLONE_NEWNS,
            NamespaceKind::Net => libc::CLONE_NEWNET,
            NamespaceKind::Pid => libc::CLONE_NEWPID,
            NamespaceKind::Time => CLONE_NEWTIME,
            NamespaceKind::User => libc::CLONE_NEWUSER,
            NamespaceKind::Uts => libc::CLONE_NEWUTS,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Cached identity of one namespace kind on the current thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsIdentity {
    Uninitialized,
    Unavailable,
    Known(ino_t),
}

impl NsIdentity {
    /// Value written into the event stream
    pub fn inode(self) -> ino_t {
        match self {
            NsIdentity::Known(ino) => ino,
            NsIdentity::Unavailable | NsIdentity::Uninitialized => NS_INO_UNAVAILABLE,
        }
    }
}

thread_local! {
    static NS_CACHE: Cell<[NsIdentity; NamespaceKind::ALL.len()]> =
        const { Cell::new([NsIdentity::Uninitialized; NamespaceKind::ALL.len()]) };
}

/// Source of namespace inode numbers
pub trait NamespaceLookup: Send + Sync {
    /// Inode of the calling thread's namespace, `None` if it cannot be read
    fn lookup(&self, kind: NamespaceKind) -> Option<ino_t>;
}

/// Lookup through `/proc`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcfsLookup;

impl NamespaceLookup for ProcfsLookup {
    fn lookup(&self, kind: NamespaceKind) -> Option<ino_t> {
        // /proc/thread-self appeared in Linux 3.17
        let fast = format!("/proc/thread-self/ns/{}", kind.proc_name());
        if let Ok(st) = nix::sys::stat::stat(fast.as_str()) {
            return Some(st.st_ino);
        }

        let tid = nix::unistd::gettid();
        let fallback = format!("/proc/self/task/{}/ns/{}", tid, kind.proc_name());
        match nix::sys::stat::stat(fallback.as_str()) {
            Ok(st) => Some(st.st_ino),
            Err(err) => {
                tracing::debug!(
                    namespace = kind.proc_name(),
                    %err,
                    "namespace identity unavailable"
                );
                None
            }
        }
    }
}

/// Cached state without querying
pub fn cached(kind: NamespaceKind) -> NsIdentity {
    NS_CACHE.with(|cache| cache.get()[kind.index()])
}

fn store(kind: NamespaceKind, identity: NsIdentity) {
    NS_CACHE.with(|cache| {
        let mut slots = cache.get();
        slots[kind.index()] = identity;
        cache.set(slots);
    });
}

/// Identity of the calling thread's namespace, querying on first use
///
/// Never returns `Uninitialized`.
pub fn identity(kind: NamespaceKind, lookup: &dyn NamespaceLookup) -> NsIdentity {
    let current = cached(kind);
    if current != NsIdentity::Uninitialized {
        return current;
    }

    let resolved = match lookup.lookup(kind) {
        Some(ino) => NsIdentity::Known(ino),
        None => NsIdentity::Unavailable,
    };
    store(kind, resolved);
    resolved
}

/// Inode of the calling thread's namespace (0 when unavailable)
pub fn get_identity(kind: NamespaceKind, lookup: &dyn NamespaceLookup) -> ino_t {
    identity(kind, lookup).inode()
}

/// IPC namespace inode of the calling thread
pub fn ipc_ns() -> ino_t {
    get_identity(NamespaceKind::Ipc, &ProcfsLookup)
}

/// Forget the calling thread's cached identity for `kind`
pub fn reset(kind: NamespaceKind) {
    store(kind, NsIdentity::Uninitialized);
}

/// Forget the calling thread's cached IPC namespace
pub fn reset_ipc_ns() {
    reset(NamespaceKind::Ipc);
}

/// Forget every cached namespace of the calling thread
pub fn reset_all() {
    NS_CACHE.with(|cache| cache.set([NsIdentity::Uninitialized; NamespaceKind::ALL.len()]));
}

/// Forget the kinds a `setns(2)`/`unshare(2)` with `flags` may have changed
///
/// `setns(fd, 0)` can join any kind, so zero resets everything.
pub fn reset_for_clone_flags(flags: libc::c_int) {
    if flags == 0 {
        reset_all();
        return;
    }
    for kind in NamespaceKind::ALL {
        if flags & kind.clone_flag() != 0 {
            reset(kind);
        }
    }
}

/// Context field recording one namespace identity
pub struct NamespaceContext {
    kind: NamespaceKind,
    lookup: Arc<dyn NamespaceLookup>,
}

impl NamespaceContext {
    pub fn new(kind: NamespaceKind, lookup: Arc<dyn NamespaceLookup>) -> Self {
        Self { kind, lookup }
    }
}

impl ContextField for NamespaceContext {
    fn size(&self, offset: usize) -> usize {
        integer_size::<ino_t>(offset)
    }

    fn record(&self, ctx: &mut EventContext, chan: &mut dyn Channel) {
        let ino = get_identity(self.kind, self.lookup.as_ref());
        record_integer(ctx, chan, ino);
    }

    fn value(&self) -> ContextValue {
        ContextValue::S64(get_identity(self.kind, self.lookup.as_ref()) as i64)
    }
}

/// Register the `<kind>_ns` field, reading identities from `/proc`
pub fn add_namespace_context(registry: &mut ContextRegistry, kind: NamespaceKind) -> Result<()> {
    add_namespace_context_with(registry, kind, Arc::new(ProcfsLookup))
}

/// Register the `<kind>_ns` field with a custom lookup
pub fn add_namespace_context_with(
    registry: &mut ContextRegistry,
    kind: NamespaceKind,
    lookup: Arc<dyn NamespaceLookup>,
) -> Result<()> {
    registry.register(
        kind.field_name(),
        IntegerType::of::<ino_t>(),
        Box::new(NamespaceContext::new(kind, lookup)),
    )
}

/// Register the `ipc_ns` field
pub fn add_ipc_ns_context(registry: &mut ContextRegistry) -> Result<()> {
    add_namespace_context(registry, NamespaceKind::Ipc)
}
