//! Error types for apretar
//!
//! All failure modes in this crate are deterministic input-validation
//! failures. None is transient, so nothing here is ever retried, and no
//! operation degrades to a partial result: a returned error means no output
//! was produced.

use thiserror::Error;

use crate::dtype::{DType, Device};

/// Error type for all apretar operations
#[derive(Debug, Error)]
pub enum ApretarError {
    /// Incompatible dimensions: matmul operands, decode geometry, scale
    /// vector length, or a buffer whose byte length disagrees with the
    /// shape it claims to hold.
    #[error("Shape mismatch: {reason}")]
    ShapeMismatch {
        /// Human-readable description of the mismatch
        reason: String,
    },

    /// A device capability that is declared but not implemented was
    /// requested. The GPU path fails here instead of handing back a
    /// tensor with no storage behind it.
    #[error("Unsupported device: {device} (only CPU tensors can be allocated)")]
    UnsupportedDevice {
        /// The device that was requested
        device: Device,
    },

    /// Conversion between element types that the codec does not cover.
    #[error("Unsupported dtype conversion: {from} -> {to}")]
    UnsupportedDtypeConversion {
        /// Source element type
        from: DType,
        /// Requested element type
        to: DType,
    },

    /// The backing byte buffer could not be obtained.
    #[error("Allocation failure: could not reserve {bytes} bytes")]
    AllocationFailure {
        /// Number of bytes requested
        bytes: usize,
    },
}

/// Result type alias for apretar operations
pub type Result<T> = std::result::Result<T, ApretarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_display() {
        let err = ApretarError::ShapeMismatch {
            reason: "2x3 vs 4x5".to_string(),
        };
        assert!(err.to_string().contains("2x3 vs 4x5"));
    }

    #[test]
    fn test_unsupported_device_display() {
        let err = ApretarError::UnsupportedDevice {
            device: Device::Gpu,
        };
        assert!(err.to_string().contains("GPU"));
    }

    #[test]
    fn test_dtype_conversion_display() {
        let err = ApretarError::UnsupportedDtypeConversion {
            from: DType::Bit1,
            to: DType::F32,
        };
        let msg = err.to_string();
        assert!(msg.contains("BIT1"));
        assert!(msg.contains("FLOAT32"));
    }
}
