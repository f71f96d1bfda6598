//! Context field registry
//!
//! The registry owns the ordered list of context fields attached to every
//! event of a channel. Registration order is wire order. Each field
//! contributes to two passes per event:
//!
//! ```text
//! probe fires
//!   ├─ size pass:   offset = Σ field.size(offset)      (alignment included)
//!   ├─ channel reserves `offset` bytes
//!   └─ record pass: field.record(ctx, chan)            (same alignment, raw bytes)
//! ```
//!
//! Both passes must take identical alignment decisions since the first one
//! determines the layout the second one writes into. The registry revision
//! ties a size pass to the registry state it was computed against.
//!
//! Mutation takes `&mut self` and the passes take `&self`, so a field can
//! never be removed while a size/record pass is borrowing the registry.

use crate::channel::{align_padding, Channel, EventContext};
use crate::error::{ContextError, Result};
use crate::types::{HostInteger, IntegerType};
use serde::Serialize;

/// Value of a context field, as seen by filters and the diagnostic binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ContextValue {
    S64(i64),
}

/// Per-event behaviors of one context field
pub trait ContextField: Send + Sync {
    /// Bytes this field occupies when it starts at `offset`, padding included
    fn size(&self, offset: usize) -> usize;

    /// Align and write the field's raw bytes
    fn record(&self, ctx: &mut EventContext, chan: &mut dyn Channel);

    /// Current value
    fn value(&self) -> ContextValue;
}

/// Size of a host integer placed at `offset`
#[inline]
pub fn integer_size<T: HostInteger>(offset: usize) -> usize {
    align_padding(offset, std::mem::align_of::<T>()) + std::mem::size_of::<T>()
}

/// Align on `T` and write `value` in host byte order
#[inline]
pub fn record_integer<T: HostInteger>(ctx: &mut EventContext, chan: &mut dyn Channel, value: T) {
    chan.align(ctx, std::mem::align_of::<T>());
    chan.write(ctx, &value.to_ne_bytes_vec());
}

/// A registered context field
pub struct ContextFieldDescriptor {
    name: String,
    ty: IntegerType,
    field: Box<dyn ContextField>,
}

impl ContextFieldDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &IntegerType {
        &self.ty
    }

    pub fn size(&self, offset: usize) -> usize {
        self.field.size(offset)
    }

    pub fn record(&self, ctx: &mut EventContext, chan: &mut dyn Channel) {
        self.field.record(ctx, chan)
    }

    pub fn value(&self) -> ContextValue {
        self.field.value()
    }
}

impl std::fmt::Debug for ContextFieldDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextFieldDescriptor")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .finish_non_exhaustive()
    }
}

/// Layout of the context section of one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLayout {
    pub revision: u64,
    /// Event offset the context section starts at
    pub offset: usize,
    /// Bytes of the context section, padding included
    pub size: usize,
    pub largest_align: usize,
}

/// Reserved, not yet visible, slot at the end of the registry
///
/// Dropping the slot without populating it releases the reservation and
/// leaves the registry untouched.
pub struct FieldSlot<'a> {
    registry: &'a mut ContextRegistry,
}

impl FieldSlot<'_> {
    /// Lookup among the live fields
    pub fn find(&self, name: &str) -> Option<&ContextFieldDescriptor> {
        self.registry.find(name)
    }

    fn populate(self, descriptor: ContextFieldDescriptor) {
        // Capacity was reserved by `append`, this push does not allocate
        self.registry.fields.push(descriptor);
    }
}

/// Ordered set of context fields with unique names
#[derive(Debug)]
pub struct ContextRegistry {
    fields: Vec<ContextFieldDescriptor>,
    revision: u64,
    largest_align: usize,
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            revision: 0,
            largest_align: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in wire order
    pub fn iter(&self) -> impl Iterator<Item = &ContextFieldDescriptor> {
        self.fields.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name()).collect()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Largest alignment, in bytes, among live fields
    pub fn largest_align(&self) -> usize {
        self.largest_align
    }

    /// Reserve storage for one more field
    pub fn append(&mut self) -> Result<FieldSlot<'_>> {
        if fault::inject(fault::Step::Append) {
            return Err(ContextError::OutOfMemory);
        }
        self.fields
            .try_reserve(1)
            .map_err(|_| ContextError::OutOfMemory)?;
        Ok(FieldSlot { registry: self })
    }

    /// Linear lookup by name
    pub fn find(&self, name: &str) -> Option<&ContextFieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Register a field under `name`
    ///
    /// `ty` must declare at least the alignment the field's size pass uses,
    /// since slot starts are aligned on the largest declared alignment.
    /// On failure the registry is left exactly as it was: the slot
    /// reservation and the type descriptor are released.
    pub fn register(
        &mut self,
        name: &str,
        ty: IntegerType,
        field: Box<dyn ContextField>,
    ) -> Result<()> {
        check_alignment(name, &ty, field.as_ref())?;
        let slot = self.append()?;
        if slot.find(name).is_some() {
            return Err(ContextError::AlreadyExists {
                name: name.to_string(),
            });
        }
        let name = duplicate_name(name)?;
        slot.populate(ContextFieldDescriptor { name, ty, field });
        self.update();

        tracing::debug!(
            field = self.fields.last().map(|f| f.name()).unwrap_or_default(),
            revision = self.revision,
            "context field registered"
        );
        Ok(())
    }

    /// Detach a field; dropping the returned descriptor frees it
    pub fn remove(&mut self, name: &str) -> Option<ContextFieldDescriptor> {
        let index = self.fields.iter().position(|f| f.name == name)?;
        let removed = self.fields.remove(index);
        self.update();

        tracing::debug!(field = name, revision = self.revision, "context field removed");
        Some(removed)
    }

    /// Recompute derived layout state and bump the revision
    pub fn update(&mut self) {
        self.largest_align = self
            .fields
            .iter()
            .map(|f| f.ty.alignment())
            .max()
            .unwrap_or(1);
        self.revision += 1;
    }

    /// Size pass: bytes of the context section when it starts at `offset`
    pub fn size(&self, offset: usize) -> usize {
        self.fields
            .iter()
            .fold(offset, |running, f| running + f.size(running))
            - offset
    }

    /// Size pass bound to the current revision
    pub fn layout(&self, offset: usize) -> ContextLayout {
        ContextLayout {
            revision: self.revision,
            offset,
            size: self.size(offset),
            largest_align: self.largest_align,
        }
    }

    /// Record pass over every field, in registration order
    pub fn record(
        &self,
        layout: &ContextLayout,
        ctx: &mut EventContext,
        chan: &mut dyn Channel,
    ) -> Result<()> {
        if layout.revision != self.revision {
            return Err(ContextError::StaleLayout {
                expected: self.revision,
                found: layout.revision,
            });
        }
        debug_assert_eq!(ctx.offset(), layout.offset);

        for field in &self.fields {
            field.record(ctx, chan);
        }

        debug_assert_eq!(ctx.offset(), layout.offset + layout.size);
        Ok(())
    }

    /// Current value of every field, in wire order
    pub fn values(&self) -> Vec<(&str, ContextValue)> {
        self.fields.iter().map(|f| (f.name(), f.value())).collect()
    }
}

/// Largest field alignment the declared-alignment check can see
const MAX_FIELD_ALIGN: usize = 64;

/// Reject a field whose size pass pads at offsets `ty` calls aligned
fn check_alignment(name: &str, ty: &IntegerType, field: &dyn ContextField) -> Result<()> {
    let align = ty.alignment().max(1);
    let base = field.size(0);
    let mut offset = align;
    while offset <= MAX_FIELD_ALIGN {
        if field.size(offset) != base {
            return Err(ContextError::InvalidType(format!(
                "{name}: declared alignment {align} is smaller than the field's own"
            )));
        }
        offset += align;
    }
    Ok(())
}

fn duplicate_name(name: &str) -> Result<String> {
    if fault::inject(fault::Step::DuplicateName) {
        return Err(ContextError::OutOfMemory);
    }
    let mut owned = String::new();
    owned
        .try_reserve_exact(name.len())
        .map_err(|_| ContextError::OutOfMemory)?;
    owned.push_str(name);
    Ok(owned)
}

/// Allocation-failure injection for the registration rollback tests
mod fault {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(super) enum Step {
        Append,
        DuplicateName,
    }

    #[cfg(test)]
    thread_local! {
        pub(super) static FAIL_AT: std::cell::Cell<Option<Step>> = const { std::cell::Cell::new(None) };
    }

    #[cfg(test)]
    pub(super) fn inject(step: Step) -> bool {
        FAIL_AT.with(|cell| cell.get() == Some(step))
    }

    #[cfg(not(test))]
    #[inline(always)]
    pub(super) fn inject(_step: Step) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::BufferChannel;

    struct Constant(u32);

    impl ContextField for Constant {
        fn size(&self, offset: usize) -> usize {
            integer_size::<u32>(offset)
        }

        fn record(&self, ctx: &mut EventContext, chan: &mut dyn Channel) {
            record_integer(ctx, chan, self.0);
        }

        fn value(&self) -> ContextValue {
            ContextValue::S64(self.0 as i64)
        }
    }

    struct Byte(u8);

    impl ContextField for Byte {
        fn size(&self, offset: usize) -> usize {
            integer_size::<u8>(offset)
        }

        fn record(&self, ctx: &mut EventContext, chan: &mut dyn Channel) {
            record_integer(ctx, chan, self.0);
        }

        fn value(&self) -> ContextValue {
            ContextValue::S64(self.0 as i64)
        }
    }

    fn register_constant(registry: &mut ContextRegistry, name: &str, v: u32) -> Result<()> {
        registry.register(name, IntegerType::of::<u32>(), Box::new(Constant(v)))
    }

    #[test]
    fn test_register_and_find() {
        let mut registry = ContextRegistry::new();
        register_constant(&mut registry, "a", 1).unwrap();
        register_constant(&mut registry, "b", 2).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.find("b").unwrap().value(), ContextValue::S64(2));
        assert!(registry.find("c").is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ContextRegistry::new();
        register_constant(&mut registry, "a", 1).unwrap();
        let revision = registry.revision();

        let err = register_constant(&mut registry, "a", 9).unwrap_err();
        assert_eq!(
            err,
            ContextError::AlreadyExists {
                name: "a".to_string()
            }
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.revision(), revision);
        assert_eq!(registry.find("a").unwrap().value(), ContextValue::S64(1));
    }

    #[test]
    fn test_append_failure_rolls_back() {
        let mut registry = ContextRegistry::new();
        register_constant(&mut registry, "a", 1).unwrap();
        let before = (registry.len(), registry.revision(), registry.largest_align());

        fault::FAIL_AT.with(|c| c.set(Some(fault::Step::Append)));
        let err = registry.register("wide", IntegerType::of::<u64>(), Box::new(Constant(2)));
        fault::FAIL_AT.with(|c| c.set(None));

        assert_eq!(err, Err(ContextError::OutOfMemory));
        assert_eq!(
            (registry.len(), registry.revision(), registry.largest_align()),
            before
        );
        assert_eq!(registry.names(), vec!["a"]);
    }

    #[test]
    fn test_name_duplication_failure_rolls_back() {
        let mut registry = ContextRegistry::new();
        register_constant(&mut registry, "a", 1).unwrap();
        let before = (registry.len(), registry.revision());

        fault::FAIL_AT.with(|c| c.set(Some(fault::Step::DuplicateName)));
        let err = register_constant(&mut registry, "b", 2);
        fault::FAIL_AT.with(|c| c.set(None));

        assert_eq!(err, Err(ContextError::OutOfMemory));
        assert_eq!((registry.len(), registry.revision()), before);
        assert!(registry.find("b").is_none());

        // The registry still accepts the same name afterwards
        register_constant(&mut registry, "b", 2).unwrap();
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_dropped_slot_is_invisible() {
        let mut registry = ContextRegistry::new();
        {
            let slot = registry.append().unwrap();
            assert!(slot.find("a").is_none());
        }
        assert!(registry.is_empty());
        assert_eq!(registry.revision(), 0);
    }

    #[test]
    fn test_remove_bumps_revision() {
        let mut registry = ContextRegistry::new();
        register_constant(&mut registry, "a", 1).unwrap();
        registry
            .register("w", IntegerType::of::<u64>(), Box::new(Constant(2)))
            .unwrap();
        assert_eq!(registry.largest_align(), std::mem::align_of::<u64>());

        let revision = registry.revision();
        let removed = registry.remove("w").unwrap();
        assert_eq!(removed.name(), "w");
        assert_eq!(registry.revision(), revision + 1);
        assert_eq!(registry.largest_align(), 4);
        assert!(registry.remove("w").is_none());
    }

    #[test]
    fn test_size_accounts_for_padding() {
        let mut registry = ContextRegistry::new();
        registry
            .register("b", IntegerType::of::<u8>(), Box::new(Byte(7)))
            .unwrap();
        register_constant(&mut registry, "c", 0x0102_0304).unwrap();

        // byte at 0, pad 3, u32 at 4
        assert_eq!(registry.size(0), 8);
        // byte at 1, pad 2, u32 at 4
        assert_eq!(registry.size(1), 7);
    }

    #[test]
    fn test_record_matches_size() {
        let mut registry = ContextRegistry::new();
        registry
            .register("b", IntegerType::of::<u8>(), Box::new(Byte(7)))
            .unwrap();
        register_constant(&mut registry, "c", 0x0102_0304).unwrap();

        let mut chan = BufferChannel::new(64);
        let layout = registry.layout(0);
        let mut ctx = chan.reserve(layout.size, layout.largest_align).unwrap();
        registry.record(&layout, &mut ctx, &mut chan).unwrap();
        chan.commit(&ctx);

        let event = chan.event(0).unwrap();
        assert_eq!(event[0], 7);
        assert_eq!(&event[4..8], &0x0102_0304u32.to_ne_bytes());
        assert_eq!(chan.overruns(), 0);
    }

    #[test]
    fn test_understated_alignment_rejected() {
        let mut registry = ContextRegistry::new();
        register_constant(&mut registry, "a", 1).unwrap();
        let revision = registry.revision();

        // u32 field declared as a byte
        let err = registry
            .register("c", IntegerType::of::<u8>(), Box::new(Constant(2)))
            .unwrap_err();

        assert!(matches!(err, ContextError::InvalidType(_)));
        assert_eq!(registry.names(), vec!["a"]);
        assert_eq!(registry.revision(), revision);
    }

    #[test]
    fn test_stale_layout_refused() {
        let mut registry = ContextRegistry::new();
        register_constant(&mut registry, "a", 1).unwrap();
        let layout = registry.layout(0);
        register_constant(&mut registry, "b", 2).unwrap();

        let mut chan = BufferChannel::new(64);
        let mut ctx = chan.reserve(layout.size, layout.largest_align).unwrap();
        assert!(matches!(
            registry.record(&layout, &mut ctx, &mut chan),
            Err(ContextError::StaleLayout { .. })
        ));
    }
}
