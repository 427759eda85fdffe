//! Tensor implementation
//!
//! This module provides the `Tensor` container: a shape, an element type, a
//! device tag, and an owned packed byte buffer sized from the element
//! type's packing rule. The buffer is allocated zero-filled at construction
//! and freed exactly once when the tensor is dropped; there is no manual
//! free and no way to end up with a tensor whose storage silently failed to
//! materialize.

use std::fmt;

use half::f16;
use serde::{Deserialize, Serialize};

use crate::dtype::{DType, Device};
use crate::error::{ApretarError, Result};
use crate::packed::PackedBuffer;
use crate::quantize::quantize_q4r;

/// Dense or packed tensor with dtype and device bookkeeping
///
/// # Examples
///
/// ```
/// use apretar::{DType, Device, Tensor};
///
/// let t = Tensor::new(vec![2, 3], DType::Int4, Device::Cpu).unwrap();
/// assert_eq!(t.shape(), &[2, 3]);
/// assert_eq!(t.element_count(), 6);
/// assert_eq!(t.byte_len(), 3); // two 4-bit codes per byte
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tensor {
    /// Shape of the tensor
    shape: Vec<usize>,
    /// Element representation
    dtype: DType,
    /// Where the buffer lives
    device: Device,
    /// Owned storage, `dtype.packed_len(element_count)` bytes
    data: PackedBuffer,
}

impl Tensor {
    /// Create a zero-initialized tensor
    ///
    /// # Errors
    ///
    /// Returns `Err` if:
    /// - Shape is empty or contains a zero dimension
    /// - `device` is [`Device::Gpu`] (declared capability, unimplemented —
    ///   fails here rather than returning a handle with no storage)
    /// - The buffer cannot be allocated
    ///
    /// # Examples
    ///
    /// ```
    /// use apretar::{DType, Device, Tensor};
    ///
    /// let t = Tensor::new(vec![4, 4], DType::F32, Device::Cpu).unwrap();
    /// assert_eq!(t.byte_len(), 64);
    /// ```
    pub fn new(shape: Vec<usize>, dtype: DType, device: Device) -> Result<Self> {
        if device == Device::Gpu {
            return Err(ApretarError::UnsupportedDevice { device });
        }
        let count = checked_shape_size(&shape)?;
        let data = PackedBuffer::zeroed(count, dtype.bits())?;
        Ok(Self {
            shape,
            dtype,
            device,
            data,
        })
    }

    /// Create a CPU tensor from f32 values
    ///
    /// Supported targets: [`DType::F32`] (bit-exact little-endian bytes)
    /// and [`DType::F16`] (narrowed per value). Sub-byte types have no
    /// direct float conversion — they go through the codec in
    /// [`crate::quantize`].
    ///
    /// # Errors
    ///
    /// Returns [`ApretarError::UnsupportedDtypeConversion`] for other
    /// dtypes, or [`ApretarError::ShapeMismatch`] if `values.len()`
    /// doesn't match the shape.
    pub fn from_f32(shape: Vec<usize>, values: &[f32], dtype: DType) -> Result<Self> {
        let count = checked_shape_size(&shape)?;
        if values.len() != count {
            return Err(ApretarError::ShapeMismatch {
                reason: format!(
                    "data length {} doesn't match shape {:?} ({} elements)",
                    values.len(),
                    shape,
                    count
                ),
            });
        }

        let bytes: Vec<u8> = match dtype {
            DType::F32 => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            DType::F16 => values
                .iter()
                .flat_map(|&v| f16::from_f32(v).to_le_bytes())
                .collect(),
            other => {
                return Err(ApretarError::UnsupportedDtypeConversion {
                    from: DType::F32,
                    to: other,
                })
            }
        };

        Ok(Self {
            shape,
            dtype,
            device: Device::Cpu,
            data: PackedBuffer::from_bytes(bytes),
        })
    }

    /// Read the tensor back as f32 values
    ///
    /// # Errors
    ///
    /// Returns [`ApretarError::UnsupportedDtypeConversion`] unless the
    /// tensor is [`DType::F32`] or [`DType::F16`].
    pub fn to_f32(&self) -> Result<Vec<f32>> {
        let bytes = self.data.as_bytes();
        match self.dtype {
            DType::F32 => Ok(bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()),
            DType::F16 => Ok(bytes
                .chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect()),
            other => Err(ApretarError::UnsupportedDtypeConversion {
                from: other,
                to: DType::F32,
            }),
        }
    }

    /// Get the shape of the tensor
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the number of dimensions
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get the element type
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Get the device tag
    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Get the total number of elements (product of the shape)
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Get the byte length of the backing buffer
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Get a reference to the backing buffer
    #[must_use]
    pub fn data(&self) -> &PackedBuffer {
        &self.data
    }

    /// Matrix multiplication through the quantized kernel
    ///
    /// Validates `a.cols == b.rows`, quantizes `a` row-wise to Q4R once,
    /// then runs the fused matvec against each column of `b` — the weight
    /// matrix is consumed in packed form, never reconstructed in float.
    /// The result is a FLOAT32 tensor of shape `[a.rows, b.cols]`.
    ///
    /// # Errors
    ///
    /// - [`ApretarError::ShapeMismatch`] if either operand is not 2-D or
    ///   `a.cols != b.rows`
    /// - [`ApretarError::UnsupportedDtypeConversion`] if either operand is
    ///   not FLOAT32
    ///
    /// # Examples
    ///
    /// ```
    /// use apretar::{DType, Tensor};
    ///
    /// let a = Tensor::from_f32(vec![2, 2], &[7.0, 0.0, 0.0, 7.0], DType::F32).unwrap();
    /// let b = Tensor::from_f32(vec![2, 1], &[1.0, 2.0], DType::F32).unwrap();
    /// let y = Tensor::matmul(&a, &b).unwrap();
    /// assert_eq!(y.shape(), &[2, 1]);
    /// assert_eq!(y.to_f32().unwrap(), vec![7.0, 14.0]);
    /// ```
    pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let (m, k) = a.dims2()?;
        let (k2, p) = b.dims2()?;

        if a.dtype != DType::F32 {
            return Err(ApretarError::UnsupportedDtypeConversion {
                from: a.dtype,
                to: DType::Int4,
            });
        }
        if b.dtype != DType::F32 {
            return Err(ApretarError::UnsupportedDtypeConversion {
                from: b.dtype,
                to: DType::F32,
            });
        }
        if k != k2 {
            return Err(ApretarError::ShapeMismatch {
                reason: format!("matmul: a is {m}x{k}, b is {k2}x{p}"),
            });
        }

        let weights = quantize_q4r(&a.to_f32()?, m, k)?;
        let b_data = b.to_f32()?;

        let mut out = vec![0.0f32; m * p];
        let mut column = vec![0.0f32; k];
        for j in 0..p {
            for (i, slot) in column.iter_mut().enumerate() {
                *slot = b_data[i * p + j];
            }
            let y = weights.matvec(&column)?;
            for (i, &v) in y.iter().enumerate() {
                out[i * p + j] = v;
            }
        }

        Tensor::from_f32(vec![m, p], &out, DType::F32)
    }

    fn dims2(&self) -> Result<(usize, usize)> {
        match self.shape.as_slice() {
            &[r, c] => Ok((r, c)),
            other => Err(ApretarError::ShapeMismatch {
                reason: format!("expected a 2-D tensor, got shape {other:?}"),
            }),
        }
    }
}

fn checked_shape_size(shape: &[usize]) -> Result<usize> {
    if shape.is_empty() {
        return Err(ApretarError::ShapeMismatch {
            reason: "shape cannot be empty".to_string(),
        });
    }
    if shape.contains(&0) {
        return Err(ApretarError::ShapeMismatch {
            reason: format!("shape {shape:?} contains a zero dimension"),
        });
    }
    Ok(shape.iter().product())
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(shape={:?}, dtype={}, device={}, bytes={})",
            self.shape,
            self.dtype,
            self.device,
            self.data.len()
        )
    }
}
