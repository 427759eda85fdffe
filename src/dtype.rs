//! Element types and device tags
//!
//! `DType` is a sum type over element representations where every variant
//! carries its own bit width. Byte sizing for packed storage has exactly one
//! definition site (`DType::packed_len`), so adding a new width cannot be
//! forgotten in a separate allocation switch.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element type of a tensor
///
/// Sub-byte types (`Int4`, `Int2`, `Bit1`) are stored packed, multiple codes
/// per byte. The 4-bit row-wise codec in [`crate::quantize`] produces
/// `Int4` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit IEEE 754 float
    F32,
    /// 16-bit IEEE 754 half-precision float
    F16,
    /// 8-bit signed integer
    Int8,
    /// 4-bit code, two per byte
    Int4,
    /// 2-bit code, four per byte
    Int2,
    /// 1-bit code, eight per byte
    Bit1,
}

impl DType {
    /// Bits of storage per element
    #[must_use]
    pub const fn bits(self) -> usize {
        match self {
            DType::F32 => 32,
            DType::F16 => 16,
            DType::Int8 => 8,
            DType::Int4 => 4,
            DType::Int2 => 2,
            DType::Bit1 => 1,
        }
    }

    /// Bytes needed to store `count` elements of this type, packed
    ///
    /// `ceil(count * bits / 8)`: a trailing partial byte is rounded up, so
    /// e.g. 7 `Int4` elements need 4 bytes and 9 `Bit1` elements need 2.
    #[must_use]
    pub const fn packed_len(self, count: usize) -> usize {
        (count * self.bits()).div_ceil(8)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "FLOAT32",
            DType::F16 => "FLOAT16",
            DType::Int8 => "INT8",
            DType::Int4 => "INT4",
            DType::Int2 => "INT2",
            DType::Bit1 => "BIT1",
        };
        write!(f, "{name}")
    }
}

/// Device a tensor's buffer lives on
///
/// `Gpu` is a declared capability without an implementation behind it:
/// requesting it fails with
/// [`ApretarError::UnsupportedDevice`](crate::ApretarError::UnsupportedDevice)
/// at allocation time rather than producing a tensor with no storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    /// Host memory
    Cpu,
    /// Device memory (unimplemented)
    Gpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "CPU"),
            Device::Gpu => write!(f, "GPU"),
        }
    }
}
