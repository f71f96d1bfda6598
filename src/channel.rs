//! Channel contract consumed by the context layer
//!
//! The ring buffer itself (per-CPU buffers, sub-buffer switching, consumer
//! handoff) lives outside this crate. Context fields only need three things
//! from it: space reserved for an event, an alignment primitive and a byte
//! writer. [`BufferChannel`] is a flat in-memory implementation of that
//! contract, used by the diagnostic binary, the benches and the tests.

use crate::error::{ContextError, Result};

/// Padding needed to bring `offset` up to `alignment` (a power of two)
#[inline]
pub fn align_padding(offset: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    offset.wrapping_neg() & (alignment - 1)
}

/// Write cursor for one reserved event slot
///
/// `offset` is relative to the start of the event. Channels align the start
/// of every slot on the largest field alignment, so aligning the relative
/// offset gives the same decision as aligning the absolute one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    start: usize,
    offset: usize,
    reserved: usize,
    largest_align: usize,
}

impl EventContext {
    pub fn new(start: usize, reserved: usize, largest_align: usize) -> Self {
        Self {
            start,
            offset: 0,
            reserved,
            largest_align,
        }
    }

    /// Absolute position of the slot in the channel
    pub fn start(&self) -> usize {
        self.start
    }

    /// Cursor relative to the start of the slot
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn reserved(&self) -> usize {
        self.reserved
    }

    pub fn largest_align(&self) -> usize {
        self.largest_align
    }

    pub fn remaining(&self) -> usize {
        self.reserved.saturating_sub(self.offset)
    }

    /// Move the cursor past alignment padding, returning the padding size
    pub fn align(&mut self, alignment: usize) -> usize {
        let pad = align_padding(self.offset, alignment);
        self.offset += pad;
        pad
    }

    fn advance(&mut self, len: usize) {
        self.offset += len;
    }
}

/// Reserve/align/write primitives of a trace channel
pub trait Channel {
    /// Reserve `size` bytes for one event, slot start aligned on `largest_align`
    fn reserve(&mut self, size: usize, largest_align: usize) -> Result<EventContext>;

    /// Pad the cursor so the next write lands on `alignment`
    fn align(&mut self, ctx: &mut EventContext, alignment: usize);

    /// Append raw bytes at the cursor
    fn write(&mut self, ctx: &mut EventContext, bytes: &[u8]);

    /// Hand the slot over to consumers
    fn commit(&mut self, ctx: &EventContext);
}

/// Flat, bounded, in-memory channel
#[derive(Debug, Default)]
pub struct BufferChannel {
    data: Vec<u8>,
    capacity: usize,
    events: Vec<(usize, usize)>,
    overruns: u64,
}

impl BufferChannel {
    /// Create a channel holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity.min(64 * 1024)),
            capacity,
            events: Vec::new(),
            overruns: 0,
        }
    }

    /// Committed event bytes, in commit order
    pub fn events(&self) -> impl Iterator<Item = &[u8]> {
        self.events
            .iter()
            .map(move |&(start, len)| &self.data[start..start + len])
    }

    pub fn event(&self, index: usize) -> Option<&[u8]> {
        self.events
            .get(index)
            .map(|&(start, len)| &self.data[start..start + len])
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Bytes used, including inter-event padding
    pub fn bytes_used(&self) -> usize {
        self.data.len()
    }

    /// Writes that would have overflowed their reservation
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.events.clear();
        self.overruns = 0;
    }
}

impl Channel for BufferChannel {
    fn reserve(&mut self, size: usize, largest_align: usize) -> Result<EventContext> {
        let align = largest_align.max(1);
        let start = self.data.len() + align_padding(self.data.len(), align);
        let end = start
            .checked_add(size)
            .ok_or(ContextError::NoSpace { requested: size })?;
        if end > self.capacity {
            return Err(ContextError::NoSpace { requested: size });
        }
        self.data.resize(end, 0);
        Ok(EventContext::new(start, size, align))
    }

    fn align(&mut self, ctx: &mut EventContext, alignment: usize) {
        // Reserved bytes are already zeroed, padding is just a cursor move
        ctx.align(alignment);
    }

    fn write(&mut self, ctx: &mut EventContext, bytes: &[u8]) {
        let len = bytes.len().min(ctx.remaining());
        if len < bytes.len() {
            self.overruns += 1;
            tracing::error!(
                requested = bytes.len(),
                remaining = ctx.remaining(),
                "context write overflows its reservation"
            );
        }
        // Alignment padding may have pushed the cursor past the slot
        let at = ctx.start() + ctx.offset().min(ctx.reserved());
        self.data[at..at + len].copy_from_slice(&bytes[..len]);
        ctx.advance(len);
    }

    fn commit(&mut self, ctx: &EventContext) {
        self.events.push((ctx.start(), ctx.reserved()));
    }
}
