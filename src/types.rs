//! Integer type descriptors for context fields
//!
//! A context field is described to trace readers by its integer layout:
//! bit width, alignment, signedness, byte order and display base. Only the
//! integer subset of the event type system lives here.

use crate::error::{ContextError, Result};
use serde::Serialize;

/// Byte order of an integer in the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of the running host
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

/// Integer type descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntegerType {
    pub size_bits: u32,
    pub alignment_bits: u32,
    pub signed: bool,
    pub byte_order: ByteOrder,
    pub base: u8,
}

impl IntegerType {
    /// Build a descriptor, rejecting layouts no reader can decode
    pub fn new(
        size_bits: u32,
        alignment_bits: u32,
        signed: bool,
        byte_order: ByteOrder,
        base: u8,
    ) -> Result<Self> {
        if !matches!(size_bits, 8 | 16 | 32 | 64) {
            return Err(ContextError::InvalidType(format!(
                "unsupported width {} bits",
                size_bits
            )));
        }
        if alignment_bits < 8 || !alignment_bits.is_power_of_two() || alignment_bits > size_bits
        {
            return Err(ContextError::InvalidType(format!(
                "alignment {} bits for a {}-bit integer",
                alignment_bits, size_bits
            )));
        }
        if !matches!(base, 2 | 8 | 10 | 16) {
            return Err(ContextError::InvalidType(format!("display base {}", base)));
        }

        Ok(Self {
            size_bits,
            alignment_bits,
            signed,
            byte_order,
            base,
        })
    }

    /// Host layout of `T`, host byte order, base 10
    pub fn of<T: HostInteger>() -> Self {
        Self {
            size_bits: (std::mem::size_of::<T>() * 8) as u32,
            alignment_bits: (std::mem::align_of::<T>() * 8) as u32,
            signed: T::SIGNED,
            byte_order: ByteOrder::native(),
            base: 10,
        }
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        (self.size_bits / 8) as usize
    }

    /// Alignment in bytes
    pub fn alignment(&self) -> usize {
        (self.alignment_bits / 8) as usize
    }
}

/// Host integer types a context field can carry
pub trait HostInteger: Copy {
    const SIGNED: bool;

    /// Raw host-order bytes, as written into the event stream
    fn to_ne_bytes_vec(self) -> Vec<u8>;

    /// Widen to the 64-bit value exposed by `get_value`
    fn to_i64(self) -> i64;
}

macro_rules! host_integer {
    ($($t:ty => $signed:expr),* $(,)?) => {
        $(
            impl HostInteger for $t {
                const SIGNED: bool = $signed;

                fn to_ne_bytes_vec(self) -> Vec<u8> {
                    self.to_ne_bytes().to_vec()
                }

                fn to_i64(self) -> i64 {
                    self as i64
                }
            }
        )*
    };
}

host_integer!(
    u8 => false, u16 => false, u32 => false, u64 => false,
    i8 => true, i16 => true, i32 => true, i64 => true,
);
