//! Clock plugin loading
//!
//! A clock plugin is a shared library exporting `ustrace_clock_plugin_init`.
//! The init function configures [`crate::clock::TRACE_CLOCK`] through the
//! `ustrace_trace_clock_set_*_cb` exports and enables it. The library stays
//! loaded for the lifetime of the process.
//!
//! Load failures never abort the traced program: [`load_from_config`] logs
//! them and tracing keeps the built-in clock.

use crate::config::TracerConfig;
use crate::error::{ContextError, Result};
use libc::c_void;
use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Entry point every clock plugin exports
pub const CLOCK_PLUGIN_INIT_SYMBOL: &CStr = c"ustrace_clock_plugin_init";

type PluginInitFn = unsafe extern "C" fn();

static PLUGIN_HANDLE: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

/// A plugin init function has already run in this process
pub fn is_loaded() -> bool {
    !PLUGIN_HANDLE.load(Ordering::Acquire).is_null()
}

fn dl_error() -> String {
    // SAFETY: dlerror returns NULL or a thread-local NUL-terminated string
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        return "unknown dynamic loader error".to_string();
    }
    unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
}

/// Load `path` and run its init entry point
///
/// A second call after a successful load is a no-op.
pub fn load_clock_plugin(path: &Path) -> Result<()> {
    if is_loaded() {
        tracing::debug!(path = %path.display(), "clock plugin already loaded");
        return Ok(());
    }

    let load_error = |reason: String| ContextError::PluginLoad {
        path: path.to_path_buf(),
        reason,
    };

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| load_error("path contains a NUL byte".to_string()))?;

    // SAFETY: c_path is a valid C string
    let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW) };
    if handle.is_null() {
        return Err(load_error(dl_error()));
    }

    // Clear any stale error before the lookup
    unsafe { libc::dlerror() };
    // SAFETY: handle comes from a successful dlopen
    let init = unsafe { libc::dlsym(handle, CLOCK_PLUGIN_INIT_SYMBOL.as_ptr()) };
    if init.is_null() {
        let reason = format!(
            "cannot find initialization function {}(): {}",
            CLOCK_PLUGIN_INIT_SYMBOL.to_string_lossy(),
            dl_error()
        );
        unsafe { libc::dlclose(handle) };
        return Err(load_error(reason));
    }

    if PLUGIN_HANDLE
        .compare_exchange(ptr::null_mut(), handle, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        // Another thread loaded a plugin first
        unsafe { libc::dlclose(handle) };
        return Ok(());
    }

    // SAFETY: the symbol is the plugin's `void (*)(void)` init function
    let init: PluginInitFn = unsafe { std::mem::transmute::<*mut c_void, PluginInitFn>(init) };
    unsafe { init() };

    tracing::debug!(
        path = %path.display(),
        clock = %crate::clock::name(),
        "clock plugin initialized"
    );
    Ok(())
}

/// Load the configured plugin, falling back to the built-in clock on failure
///
/// Returns whether a plugin was loaded.
pub fn load_from_config(config: &TracerConfig) -> bool {
    let Some(path) = config.clock_plugin.as_deref() else {
        return false;
    };

    match load_clock_plugin(path) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(%err, "falling back to the built-in trace clock");
            false
        }
    }
}
