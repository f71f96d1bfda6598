//! fork/execve interposition
//!
//! [`Interposer`] stands in for the two libc calls that change process
//! identity. It forwards arguments and return values untouched; the only
//! behavior it adds is locating the genuine entry point once and notifying
//! its [`LifecycleHooks`]:
//!
//! ```text
//! fork():   resolve ─▶ genuine fork ─▶ (child only) on_process_forked ─▶ return pid
//! execve(): resolve ─▶ on_potential_image_replacement ─▶ genuine execve ─▶ (failure) return
//! ```
//!
//! If the genuine entry point cannot be found the intercepted call fails:
//! there is no safe way to duplicate or replace the process without it.
//!
//! With the `preload` feature the crate exports `fork` and `execve`
//! symbols backed by [`INTERPOSER`], for use through `LD_PRELOAD`.

use crate::error::{ContextError, Result};
use crate::lifecycle::{LifecycleHooks, TracerNotifier};
use libc::{c_char, c_int, c_void, pid_t};
use std::ffi::CStr;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

pub type ForkFn = unsafe extern "C" fn() -> pid_t;
pub type ExecveFn =
    unsafe extern "C" fn(*const c_char, *const *const c_char, *const *const c_char) -> c_int;

/// Looks up a symbol by name, null when absent
pub type SymbolResolver = fn(&CStr) -> *mut c_void;

/// Next definition of `name` after this object in lookup order
pub fn next_symbol(name: &CStr) -> *mut c_void {
    // SAFETY: name is a valid C string, RTLD_NEXT is a pseudo-handle
    unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) }
}

/// Lazily resolved genuine libc entry point
///
/// The address is published with a compare-and-swap, so concurrent first
/// calls agree on one fully written pointer. A failed lookup is not cached.
pub struct GenuineSymbol {
    name: &'static CStr,
    slot: AtomicPtr<c_void>,
    resolver: SymbolResolver,
}

impl GenuineSymbol {
    pub const fn new(name: &'static CStr, resolver: SymbolResolver) -> Self {
        Self {
            name,
            slot: AtomicPtr::new(ptr::null_mut()),
            resolver,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name.to_str().unwrap_or("<non-utf8>")
    }

    pub fn is_resolved(&self) -> bool {
        !self.slot.load(Ordering::Acquire).is_null()
    }

    pub fn resolve(&self) -> Result<NonNull<c_void>> {
        if let Some(cached) = NonNull::new(self.slot.load(Ordering::Acquire)) {
            return Ok(cached);
        }

        let Some(found) = NonNull::new((self.resolver)(self.name)) else {
            tracing::error!(symbol = self.name(), "unable to find genuine libc entry point");
            return Err(ContextError::SymbolResolution {
                symbol: self.name(),
            });
        };

        match self.slot.compare_exchange(
            ptr::null_mut(),
            found.as_ptr(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(found),
            // Lost the race; both resolved the same symbol
            Err(winner) => Ok(NonNull::new(winner).unwrap_or(found)),
        }
    }
}

impl std::fmt::Debug for GenuineSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenuineSymbol")
            .field("name", &self.name)
            .field("address", &self.slot.load(Ordering::Acquire))
            .finish()
    }
}

/// Decorator around fork/execve that notifies `H` at lifecycle points
#[derive(Debug)]
pub struct Interposer<H> {
    fork: GenuineSymbol,
    execve: GenuineSymbol,
    hooks: H,
}

impl<H: LifecycleHooks> Interposer<H> {
    /// Resolve the genuine calls through `dlsym(RTLD_NEXT, ...)`
    pub const fn new(hooks: H) -> Self {
        Self::with_resolver(hooks, next_symbol)
    }

    pub const fn with_resolver(hooks: H, resolver: SymbolResolver) -> Self {
        Self {
            fork: GenuineSymbol::new(c"fork", resolver),
            execve: GenuineSymbol::new(c"execve", resolver),
            hooks,
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn fork_symbol(&self) -> &GenuineSymbol {
        &self.fork
    }

    pub fn execve_symbol(&self) -> &GenuineSymbol {
        &self.execve
    }

    /// Genuine `fork()`; the child is notified before it gets the return value
    ///
    /// `Ok` carries the genuine return value verbatim, `-1` included.
    pub fn fork(&self) -> Result<pid_t> {
        let genuine = self.fork.resolve()?;
        // SAFETY: the resolved symbol is libc's fork
        let genuine: ForkFn =
            unsafe { std::mem::transmute::<*mut c_void, ForkFn>(genuine.as_ptr()) };

        let pid = unsafe { genuine() };
        if pid == 0 {
            self.hooks.on_process_forked();
        }
        Ok(pid)
    }

    /// Genuine `execve()`, after notifying a potential exec
    ///
    /// Only returns if the exec failed, with the genuine return value.
    ///
    /// # Safety
    ///
    /// Same contract as `execve(2)`: `path` is a C string, `argv` and `envp`
    /// are NULL-terminated arrays of C strings.
    pub unsafe fn execve(
        &self,
        path: *const c_char,
        argv: *const *const c_char,
        envp: *const *const c_char,
    ) -> Result<c_int> {
        let genuine = self.execve.resolve()?;
        // SAFETY: the resolved symbol is libc's execve
        let genuine: ExecveFn =
            unsafe { std::mem::transmute::<*mut c_void, ExecveFn>(genuine.as_ptr()) };

        self.hooks.on_potential_image_replacement();
        Ok(unsafe { genuine(path, argv, envp) })
    }
}

/// Process-wide interposer notifying the tracer
pub static INTERPOSER: Interposer<TracerNotifier> = Interposer::new(TracerNotifier);

#[cfg(feature = "preload")]
mod preload {
    use super::INTERPOSER;
    use libc::{c_char, c_int, pid_t};

    #[no_mangle]
    pub extern "C" fn fork() -> pid_t {
        INTERPOSER.fork().unwrap_or(-1)
    }

    /// # Safety
    ///
    /// Same contract as `execve(2)`.
    #[no_mangle]
    pub unsafe extern "C" fn execve(
        path: *const c_char,
        argv: *const *const c_char,
        envp: *const *const c_char,
    ) -> c_int {
        unsafe { INTERPOSER.execve(path, argv, envp) }.unwrap_or(-1)
    }

    extern "C" fn preload_init() {
        crate::init();
    }

    #[used]
    #[link_section = ".init_array"]
    static PRELOAD_INIT: extern "C" fn() = preload_init;
}
