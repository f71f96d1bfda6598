//! Context registry: registration, layout and the size/record contract

use proptest::prelude::*;
use ustrace::channel::{BufferChannel, Channel, EventContext};
use ustrace::context::{
    integer_size, record_integer, ContextField, ContextRegistry, ContextValue,
};
use ustrace::types::{HostInteger, IntegerType};
use ustrace::ContextError;

/// Field holding a fixed host integer
struct Fixed<T>(T);

impl<T: HostInteger + Send + Sync + 'static> ContextField for Fixed<T> {
    fn size(&self, offset: usize) -> usize {
        integer_size::<T>(offset)
    }

    fn record(&self, ctx: &mut EventContext, chan: &mut dyn Channel) {
        record_integer(ctx, chan, self.0);
    }

    fn value(&self) -> ContextValue {
        ContextValue::S64(self.0.to_i64())
    }
}

fn add<T: HostInteger + Send + Sync + 'static>(registry: &mut ContextRegistry, name: &str, v: T) {
    registry
        .register(name, IntegerType::of::<T>(), Box::new(Fixed(v)))
        .unwrap();
}

fn add_by_width(registry: &mut ContextRegistry, name: &str, width: u8) {
    match width {
        0 => add(registry, name, 0xABu8),
        1 => add(registry, name, 0x1234u16),
        2 => add(registry, name, 0x1234_5678u32),
        _ => add(registry, name, 0x0102_0304_0506_0708u64),
    }
}

// ============================================================================
// Registration
// ============================================================================

#[test]
fn test_registration_order_is_wire_order() {
    let mut registry = ContextRegistry::new();
    add(&mut registry, "first", 1u8);
    add(&mut registry, "second", 2u64);
    add(&mut registry, "third", 3u16);

    assert_eq!(registry.names(), vec!["first", "second", "third"]);
    let values: Vec<_> = registry.values().into_iter().map(|(_, v)| v).collect();
    assert_eq!(
        values,
        vec![
            ContextValue::S64(1),
            ContextValue::S64(2),
            ContextValue::S64(3)
        ]
    );
}

#[test]
fn test_duplicate_leaves_registry_untouched() {
    let mut registry = ContextRegistry::new();
    add(&mut registry, "ipc_ns", 1u64);
    let revision = registry.revision();

    let err = registry
        .register("ipc_ns", IntegerType::of::<u8>(), Box::new(Fixed(9u8)))
        .unwrap_err();

    assert!(matches!(err, ContextError::AlreadyExists { ref name } if name == "ipc_ns"));
    assert_eq!(err.errno(), -libc::EEXIST);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.revision(), revision);
    assert_eq!(registry.largest_align(), 8);
}

#[test]
fn test_remove_then_register_again() {
    let mut registry = ContextRegistry::new();
    add(&mut registry, "a", 1u32);
    add(&mut registry, "b", 2u64);

    let removed = registry.remove("b").unwrap();
    assert_eq!(removed.name(), "b");
    assert_eq!(registry.largest_align(), 4);
    assert!(registry.remove("b").is_none());

    add(&mut registry, "b", 3u64);
    assert_eq!(registry.find("b").unwrap().value(), ContextValue::S64(3));
}

#[test]
fn test_append_slot_dropped_without_populate() {
    let mut registry = ContextRegistry::new();
    add(&mut registry, "a", 1u32);
    let revision = registry.revision();

    {
        let slot = registry.append().unwrap();
        assert!(slot.find("a").is_some());
    }

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.revision(), revision);
}

// ============================================================================
// Layout
// ============================================================================

#[test]
fn test_padding_follows_offset() {
    let mut registry = ContextRegistry::new();
    add(&mut registry, "byte", 0x11u8);
    add(&mut registry, "word", 0x2222_2222u32);

    // 1 byte, 3 padding, 4 bytes
    assert_eq!(registry.size(0), 8);
    // byte at 1, padding to 4, word at 4..8
    assert_eq!(registry.size(1), 7);
    // byte at 3, word at 4..8
    assert_eq!(registry.size(3), 5);
}

#[test]
fn test_record_matches_declared_layout() {
    let mut registry = ContextRegistry::new();
    add(&mut registry, "byte", 0x11u8);
    add(&mut registry, "word", 0x2222_2222u32);

    let layout = registry.layout(0);
    let mut chan = BufferChannel::new(64);
    let mut ctx = chan.reserve(layout.size, layout.largest_align).unwrap();
    registry.record(&layout, &mut ctx, &mut chan).unwrap();
    chan.commit(&ctx);

    let bytes = chan.event(0).unwrap();
    assert_eq!(bytes.len(), 8);
    assert_eq!(bytes[0], 0x11);
    assert_eq!(&bytes[1..4], &[0, 0, 0]);
    assert_eq!(&bytes[4..8], &0x2222_2222u32.to_ne_bytes());
    assert_eq!(chan.overruns(), 0);
}

#[test]
fn test_layout_goes_stale_after_mutation() {
    let mut registry = ContextRegistry::new();
    add(&mut registry, "a", 1u32);
    let layout = registry.layout(0);

    add(&mut registry, "b", 2u32);

    let mut chan = BufferChannel::new(64);
    let mut ctx = chan.reserve(layout.size, layout.largest_align).unwrap();
    let err = registry.record(&layout, &mut ctx, &mut chan).unwrap_err();
    assert_eq!(
        err,
        ContextError::StaleLayout {
            expected: registry.revision(),
            found: layout.revision,
        }
    );
}

#[test]
fn test_empty_registry_is_zero_sized() {
    let registry = ContextRegistry::new();
    assert!(registry.is_empty());
    for offset in 0..16 {
        assert_eq!(registry.size(offset), 0);
    }
}

// ============================================================================
// Property tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_record_fills_exactly_the_sized_bytes(
        widths in prop::collection::vec(0u8..4, 0..12),
        offset in 0usize..16,
    ) {
        let mut registry = ContextRegistry::new();
        for (i, width) in widths.iter().enumerate() {
            add_by_width(&mut registry, &format!("f{i}"), *width);
        }

        let layout = registry.layout(offset);
        let mut chan = BufferChannel::new(offset + layout.size + 64);
        let mut ctx = chan
            .reserve(offset + layout.size, layout.largest_align)
            .unwrap();
        chan.write(&mut ctx, &vec![0xEE; offset]);
        registry.record(&layout, &mut ctx, &mut chan).unwrap();

        prop_assert_eq!(ctx.offset(), offset + layout.size);
        prop_assert_eq!(chan.overruns(), 0);
    }

    #[test]
    fn prop_size_never_shrinks_with_more_fields(
        widths in prop::collection::vec(0u8..4, 1..12),
        offset in 0usize..16,
    ) {
        let mut registry = ContextRegistry::new();
        let mut previous = 0;
        for (i, width) in widths.iter().enumerate() {
            add_by_width(&mut registry, &format!("f{i}"), *width);
            let size = registry.size(offset);
            prop_assert!(size > previous);
            previous = size;
        }
    }
}
