//! Probe-side event recording
//!
//! Event layout:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┬─────────┐
//! │ timestamp u64│ context fields (wire order)  │ payload │
//! └──────────────┴──────────────────────────────┴─────────┘
//!  offset 0        offset 8, each field aligned
//! ```

use crate::channel::Channel;
use crate::clock::{self, TraceClock};
use crate::context::{record_integer, ContextRegistry};
use crate::error::Result;
use std::ops::Range;

/// Bytes of the timestamp header
pub const HEADER_SIZE: usize = std::mem::size_of::<u64>();

/// Where one recorded event landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub timestamp: u64,
    /// Position of the event in the channel
    pub start: usize,
    pub size: usize,
    /// Context section, relative to the event start
    pub context: Range<usize>,
}

impl RecordedEvent {
    /// Context section of the committed event bytes
    pub fn context_bytes<'a>(&self, event: &'a [u8]) -> &'a [u8] {
        &event[self.context.clone()]
    }
}

/// Records events carrying a registry's context fields
pub struct EventRecorder<'a> {
    registry: &'a ContextRegistry,
    /// `None` follows the process-wide trace clock on every event
    clock: Option<&'a dyn TraceClock>,
}

impl<'a> EventRecorder<'a> {
    /// Timestamps from the process-wide trace clock, override included
    pub fn new(registry: &'a ContextRegistry) -> Self {
        Self {
            registry,
            clock: None,
        }
    }

    pub fn with_clock(registry: &'a ContextRegistry, clock: &'a dyn TraceClock) -> Self {
        Self {
            registry,
            clock: Some(clock),
        }
    }

    /// Bytes an event with `payload_len` payload bytes occupies
    pub fn event_size(&self, payload_len: usize) -> usize {
        HEADER_SIZE + self.registry.size(HEADER_SIZE) + payload_len
    }

    /// Size, reserve, then write header, context fields and payload
    pub fn record(&self, chan: &mut dyn Channel, payload: &[u8]) -> Result<RecordedEvent> {
        let layout = self.registry.layout(HEADER_SIZE);
        let size = HEADER_SIZE + layout.size + payload.len();
        let largest_align = layout.largest_align.max(std::mem::align_of::<u64>());

        let mut ctx = chan.reserve(size, largest_align)?;
        let clock: &dyn TraceClock = match self.clock {
            Some(fixed) => fixed,
            None => clock::trace_clock(),
        };
        let timestamp = clock.read64();
        record_integer(&mut ctx, chan, timestamp);
        self.registry.record(&layout, &mut ctx, chan)?;
        chan.write(&mut ctx, payload);
        chan.commit(&ctx);

        Ok(RecordedEvent {
            timestamp,
            start: ctx.start(),
            size,
            context: layout.offset..layout.offset + layout.size,
        })
    }
}
