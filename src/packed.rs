//! Packed sub-byte storage
//!
//! [`PackedBuffer`] owns a fixed-length byte sequence holding multiple
//! sub-byte codes per byte. The length is computed once at allocation from
//! element count and bit width and never changes afterwards; the buffer is
//! freed by ownership when the holding value is dropped.
//!
//! The raw bytes are exposed read-only because the packed layout is the
//! wire format, but there is deliberately no per-code indexing API here:
//! the nibble offset convention is centralized in [`crate::quantize`].

use serde::{Deserialize, Serialize};

use crate::error::{ApretarError, Result};

/// Owned, fixed-length packed byte store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedBuffer {
    bytes: Vec<u8>,
}

impl PackedBuffer {
    /// Bytes needed for `count` elements of `bits` width each
    ///
    /// `ceil(count * bits / 8)` — a trailing partial byte is rounded up.
    #[must_use]
    pub const fn byte_len(count: usize, bits: usize) -> usize {
        (count * bits).div_ceil(8)
    }

    /// Allocate a zero-filled buffer for `count` elements of `bits` width
    ///
    /// # Errors
    ///
    /// Returns [`ApretarError::AllocationFailure`] if the backing storage
    /// cannot be reserved. A failed allocation never yields an empty
    /// buffer posing as a valid one.
    pub fn zeroed(count: usize, bits: usize) -> Result<Self> {
        let len = Self::byte_len(count, bits);
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| ApretarError::AllocationFailure { bytes: len })?;
        bytes.resize(len, 0);
        Ok(Self { bytes })
    }

    /// Wrap bytes already in packed layout (e.g. read back from storage)
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if the buffer holds no bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Read-only view of the packed bytes (the wire format)
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable view for the codec's packing loop
    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Consume the buffer, returning the raw bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
