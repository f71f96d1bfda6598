//! Text and JSON rendering of recorded events

use crate::channel::{BufferChannel, Channel};
use crate::clock;
use crate::context::{ContextRegistry, ContextValue};
use crate::error::{ContextError, Result};
use crate::event::EventRecorder;
use serde::Serialize;
use std::fmt::Write as _;

/// Trace clock in use
#[derive(Debug, Clone, Serialize)]
pub struct JsonClock {
    pub name: String,
    pub description: String,
    pub freq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl JsonClock {
    pub fn current() -> Self {
        Self {
            name: clock::name().into_owned(),
            description: clock::description().into_owned(),
            freq: clock::freq(),
            uuid: clock::uuid(),
        }
    }
}

/// One context field value
#[derive(Debug, Clone, Serialize)]
pub struct JsonField {
    pub name: String,
    pub value: ContextValue,
}

/// One recorded event
#[derive(Debug, Clone, Serialize)]
pub struct JsonEvent {
    pub index: usize,
    pub timestamp: u64,
    pub size: usize,
    pub fields: Vec<JsonField>,
    /// Event bytes, hex encoded
    pub bytes: String,
}

/// Everything one process recorded
#[derive(Debug, Clone, Serialize)]
pub struct JsonReport {
    /// "parent" or "child"
    pub process: &'static str,
    pub pid: u32,
    pub clock: JsonClock,
    pub events: Vec<JsonEvent>,
}

/// Record `count` events into a fresh channel and describe them
pub fn capture(
    registry: &ContextRegistry,
    count: usize,
    payload: &[u8],
    process: &'static str,
) -> Result<JsonReport> {
    let recorder = EventRecorder::new(registry);
    let event_size = recorder.event_size(payload.len());
    // Room for every event plus its worst-case slot alignment padding
    let capacity = event_size
        .checked_add(std::mem::align_of::<u64>().max(registry.largest_align()))
        .and_then(|slot| slot.checked_mul(count))
        .ok_or(ContextError::NoSpace {
            requested: event_size,
        })?;
    let mut chan = BufferChannel::new(capacity);
    let mut events = Vec::new();
    events
        .try_reserve(count)
        .map_err(|_| ContextError::OutOfMemory)?;

    for index in 0..count {
        let recorded = recorder.record(&mut chan as &mut dyn Channel, payload)?;
        let bytes = chan.event(index).unwrap_or_default();
        events.push(JsonEvent {
            index,
            timestamp: recorded.timestamp,
            size: recorded.size,
            fields: registry
                .values()
                .into_iter()
                .map(|(name, value)| JsonField {
                    name: name.to_string(),
                    value,
                })
                .collect(),
            bytes: hex::encode(bytes),
        });
    }

    Ok(JsonReport {
        process,
        pid: std::process::id(),
        clock: JsonClock::current(),
        events,
    })
}

/// Human-readable rendering
pub fn to_text(report: &JsonReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "[{} pid {}] clock: {} ({} Hz)",
        report.process, report.pid, report.clock.name, report.clock.freq
    );
    for event in &report.events {
        let _ = write!(
            out,
            "event {}: ts={} size={}",
            event.index, event.timestamp, event.size
        );
        for field in &event.fields {
            let ContextValue::S64(v) = field.value;
            let _ = write!(out, " {}={}", field.name, v);
        }
        let _ = writeln!(out, " bytes={}", event.bytes);
    }
    out
}
