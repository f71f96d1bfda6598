//! Trace clock and its publish-once override
//!
//! Event timestamps come from the built-in monotonic clock unless an
//! override has been published. An override moves through three states:
//!
//! ```text
//! Unset ──set_*()──▶ Configuring ──enable()──▶ Active (immutable)
//! ```
//!
//! Setters and `enable()` are meant to run before tracing starts (usually
//! from a clock plugin's init function). Readers may run concurrently at any
//! time: the published record sits in a `OnceLock`, so observing "active"
//! (an acquire load) also makes every callback of the record visible.
//!
//! Callbacks use the C ABI so a dynamically loaded plugin can provide them
//! through the `ustrace_trace_clock_set_*_cb` exports at the bottom of this
//! module.

use crate::error::{ContextError, Result};
use libc::{c_char, c_int};
use std::borrow::Cow;
use std::ffi::CStr;
use std::sync::{Mutex, OnceLock, PoisonError};

pub type Read64Fn = extern "C" fn() -> u64;
pub type FreqFn = extern "C" fn() -> u64;
pub type NameFn = extern "C" fn() -> *const c_char;
pub type DescriptionFn = extern "C" fn() -> *const c_char;
/// Writes a NUL-terminated uuid string into a [`CLOCK_UUID_LEN`] buffer, returns 0 on success
pub type UuidFn = extern "C" fn(*mut c_char) -> c_int;

/// Textual uuid plus terminating NUL
pub const CLOCK_UUID_LEN: usize = 37;

const BOOT_ID_PATH: &str = "/proc/sys/kernel/random/boot_id";

/// Time source used for event timestamps
pub trait TraceClock: Send + Sync {
    /// Current time in clock ticks
    fn read64(&self) -> u64;

    /// Ticks per second
    fn freq(&self) -> u64;

    fn name(&self) -> Cow<'static, str>;

    fn description(&self) -> Cow<'static, str>;

    /// Identity of the clock domain, `None` if unknown
    fn uuid(&self) -> Option<String>;
}

/// Built-in `CLOCK_MONOTONIC` clock, nanosecond ticks
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

static MONOTONIC: MonotonicClock = MonotonicClock;

impl TraceClock for MonotonicClock {
    fn read64(&self) -> u64 {
        nix::time::clock_gettime(nix::time::ClockId::CLOCK_MONOTONIC)
            .map(|ts| ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64)
            .unwrap_or(0)
    }

    fn freq(&self) -> u64 {
        1_000_000_000
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("monotonic")
    }

    fn description(&self) -> Cow<'static, str> {
        Cow::Borrowed("Monotonic Clock")
    }

    fn uuid(&self) -> Option<String> {
        boot_id()
    }
}

/// Kernel boot id, shared by every monotonic clock of this boot
fn boot_id() -> Option<String> {
    let raw = std::fs::read_to_string(BOOT_ID_PATH).ok()?;
    let id = raw.trim();
    (id.len() == CLOCK_UUID_LEN - 1).then(|| id.to_string())
}

/// Callbacks collected before publication
#[derive(Debug, Clone, Copy, Default)]
struct ClockCallbacks {
    read64: Option<Read64Fn>,
    freq: Option<FreqFn>,
    name: Option<NameFn>,
    description: Option<DescriptionFn>,
    uuid: Option<UuidFn>,
}

#[derive(Debug, Default)]
struct Staging {
    callbacks: ClockCallbacks,
    touched: bool,
}

/// Published override, every mandatory callback present
#[derive(Debug, Clone, Copy)]
pub struct ActiveClock {
    read64: Read64Fn,
    freq: FreqFn,
    name: NameFn,
    description: DescriptionFn,
    uuid: Option<UuidFn>,
}

impl ActiveClock {
    fn from_callbacks(cb: &ClockCallbacks) -> Result<Self> {
        Ok(Self {
            read64: cb
                .read64
                .ok_or(ContextError::InvalidConfiguration { missing: "read64" })?,
            freq: cb
                .freq
                .ok_or(ContextError::InvalidConfiguration { missing: "freq" })?,
            name: cb
                .name
                .ok_or(ContextError::InvalidConfiguration { missing: "name" })?,
            description: cb.description.ok_or(ContextError::InvalidConfiguration {
                missing: "description",
            })?,
            uuid: cb.uuid,
        })
    }
}

/// Read a string returned by a plugin callback
///
/// Plugins hand out pointers to static NUL-terminated strings.
fn plugin_str(ptr: *const c_char) -> Cow<'static, str> {
    if ptr.is_null() {
        return Cow::Borrowed("");
    }
    // SAFETY: non-null, and the callback contract is a 'static C string
    let s: &'static CStr = unsafe { CStr::from_ptr(ptr) };
    s.to_string_lossy()
}

impl TraceClock for ActiveClock {
    fn read64(&self) -> u64 {
        (self.read64)()
    }

    fn freq(&self) -> u64 {
        (self.freq)()
    }

    fn name(&self) -> Cow<'static, str> {
        plugin_str((self.name)())
    }

    fn description(&self) -> Cow<'static, str> {
        plugin_str((self.description)())
    }

    fn uuid(&self) -> Option<String> {
        let Some(uuid) = self.uuid else {
            return boot_id();
        };
        let mut buf = [0 as c_char; CLOCK_UUID_LEN];
        if uuid(buf.as_mut_ptr()) != 0 {
            return None;
        }
        buf[CLOCK_UUID_LEN - 1] = 0;
        // SAFETY: the buffer is NUL-terminated by the line above
        let s = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Some(s.to_string_lossy().into_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Unset,
    Configuring,
    Active,
}

/// Publish-once trace clock override
#[derive(Debug)]
pub struct ClockOverride {
    staging: Mutex<Staging>,
    active: OnceLock<ActiveClock>,
}

impl Default for ClockOverride {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockOverride {
    pub const fn new() -> Self {
        Self {
            staging: Mutex::new(Staging {
                callbacks: ClockCallbacks {
                    read64: None,
                    freq: None,
                    name: None,
                    description: None,
                    uuid: None,
                },
                touched: false,
            }),
            active: OnceLock::new(),
        }
    }

    fn configure(&self, apply: impl FnOnce(&mut ClockCallbacks)) -> Result<()> {
        let mut staging = self.staging.lock().unwrap_or_else(PoisonError::into_inner);
        // enable() publishes while holding the same lock
        if self.active.get().is_some() {
            return Err(ContextError::Busy);
        }
        apply(&mut staging.callbacks);
        staging.touched = true;
        Ok(())
    }

    pub fn set_read64(&self, read64: Read64Fn) -> Result<()> {
        self.configure(|cb| cb.read64 = Some(read64))
    }

    pub fn set_freq(&self, freq: FreqFn) -> Result<()> {
        self.configure(|cb| cb.freq = Some(freq))
    }

    pub fn set_name(&self, name: NameFn) -> Result<()> {
        self.configure(|cb| cb.name = Some(name))
    }

    pub fn set_description(&self, description: DescriptionFn) -> Result<()> {
        self.configure(|cb| cb.description = Some(description))
    }

    /// Optional; without it the boot id is reported
    pub fn set_uuid(&self, uuid: UuidFn) -> Result<()> {
        self.configure(|cb| cb.uuid = Some(uuid))
    }

    /// Publish the collected callbacks
    pub fn enable(&self) -> Result<()> {
        let staging = self.staging.lock().unwrap_or_else(PoisonError::into_inner);
        if self.active.get().is_some() {
            return Err(ContextError::Busy);
        }
        let clock = ActiveClock::from_callbacks(&staging.callbacks)?;
        self.active.set(clock).map_err(|_| ContextError::Busy)?;

        tracing::debug!(
            clock = %clock.name(),
            freq = clock.freq(),
            "trace clock override enabled"
        );
        Ok(())
    }

    pub fn state(&self) -> ClockState {
        if self.active.get().is_some() {
            return ClockState::Active;
        }
        let staging = self.staging.lock().unwrap_or_else(PoisonError::into_inner);
        if staging.touched {
            ClockState::Configuring
        } else {
            ClockState::Unset
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.get().is_some()
    }

    /// Published override, if any
    pub fn active(&self) -> Option<&ActiveClock> {
        self.active.get()
    }

    /// Override if published, built-in monotonic clock otherwise
    #[inline]
    pub fn current(&self) -> &dyn TraceClock {
        match self.active.get() {
            Some(clock) => clock,
            None => &MONOTONIC,
        }
    }
}

/// Process-wide trace clock override
pub static TRACE_CLOCK: ClockOverride = ClockOverride::new();

/// Clock used for event timestamps
#[inline]
pub fn trace_clock() -> &'static dyn TraceClock {
    TRACE_CLOCK.current()
}

#[inline]
pub fn read64() -> u64 {
    trace_clock().read64()
}

pub fn freq() -> u64 {
    trace_clock().freq()
}

pub fn name() -> Cow<'static, str> {
    trace_clock().name()
}

pub fn description() -> Cow<'static, str> {
    trace_clock().description()
}

pub fn uuid() -> Option<String> {
    trace_clock().uuid()
}

fn status(result: Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(err) => err.errno(),
    }
}

#[no_mangle]
pub extern "C" fn ustrace_trace_clock_set_read64_cb(read64: Option<Read64Fn>) -> c_int {
    status(TRACE_CLOCK.configure(|cb| cb.read64 = read64))
}

#[no_mangle]
pub extern "C" fn ustrace_trace_clock_set_freq_cb(freq: Option<FreqFn>) -> c_int {
    status(TRACE_CLOCK.configure(|cb| cb.freq = freq))
}

#[no_mangle]
pub extern "C" fn ustrace_trace_clock_set_name_cb(name: Option<NameFn>) -> c_int {
    status(TRACE_CLOCK.configure(|cb| cb.name = name))
}

#[no_mangle]
pub extern "C" fn ustrace_trace_clock_set_description_cb(
    description: Option<DescriptionFn>,
) -> c_int {
    status(TRACE_CLOCK.configure(|cb| cb.description = description))
}

#[no_mangle]
pub extern "C" fn ustrace_trace_clock_set_uuid_cb(uuid: Option<UuidFn>) -> c_int {
    status(TRACE_CLOCK.configure(|cb| cb.uuid = uuid))
}

#[no_mangle]
pub extern "C" fn ustrace_enable_trace_clock_override() -> c_int {
    status(TRACE_CLOCK.enable())
}
