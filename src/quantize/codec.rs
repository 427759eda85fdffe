//! Q4R encode and decode
//!
//! Encoding is row-independent: each row computes its own absmax scale and
//! packs its codes into a disjoint slice of the output buffer, so rows are
//! dispatched across rayon workers above a size threshold with no
//! synchronization beyond the final join.

use serde::{Deserialize, Serialize};

use super::{fused, pack_pair, row_bytes, unpack_byte, Q4R_MAX};
use crate::error::{ApretarError, Result};
use crate::packed::PackedBuffer;

/// Row count below which encoding stays sequential.
///
/// A row costs on the order of a microsecond to encode; rayon dispatch
/// costs ~10us, so small matrices lose by going parallel.
const PARALLEL_THRESHOLD: usize = 256;

/// A weight matrix quantized to the Q4R format
///
/// Holds the packed codes, one strictly-positive scale per row, and the
/// logical geometry. Produced by exactly one [`quantize_q4r`] call and
/// treated as immutable until the next re-encode; the kernels never mutate
/// it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Q4RMatrix {
    packed: PackedBuffer,
    scales: Vec<f32>,
    rows: usize,
    cols: usize,
}

impl Q4RMatrix {
    /// Reassemble a matrix from wire parts
    ///
    /// # Errors
    ///
    /// Returns [`ApretarError::ShapeMismatch`] if the scale vector length
    /// is not `rows`, the packed byte length is not `rows * ceil(cols/2)`,
    /// or any scale is not strictly positive and finite.
    pub fn from_parts(
        packed: PackedBuffer,
        scales: Vec<f32>,
        rows: usize,
        cols: usize,
    ) -> Result<Self> {
        validate_geometry(packed.as_bytes(), &scales, rows, cols)?;
        if let Some((idx, &s)) = scales
            .iter()
            .enumerate()
            .find(|(_, s)| !(s.is_finite() && **s > 0.0))
        {
            return Err(ApretarError::ShapeMismatch {
                reason: format!("scale vector entry {idx} is {s}, scales must be strictly positive"),
            });
        }
        Ok(Self {
            packed,
            scales,
            rows,
            cols,
        })
    }

    /// The packed code buffer (wire format bytes)
    #[must_use]
    pub fn packed(&self) -> &PackedBuffer {
        &self.packed
    }

    /// One scale per row, in row order
    #[must_use]
    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    /// Number of rows (output channels)
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Packed bytes per row
    #[must_use]
    pub fn row_stride(&self) -> usize {
        row_bytes(self.cols)
    }

    /// Decode back to a dense row-major f32 matrix
    ///
    /// The synthetic pad element of odd-length rows is dropped, so the
    /// output length is exactly `rows * cols`.
    #[must_use]
    pub fn dequantize(&self) -> Vec<f32> {
        dequantize_unchecked(self.packed.as_bytes(), &self.scales, self.rows, self.cols)
    }

    /// Fused matrix x vector product against the packed representation
    ///
    /// # Errors
    ///
    /// Returns [`ApretarError::ShapeMismatch`] if `x.len() != cols`.
    pub fn matvec(&self, x: &[f32]) -> Result<Vec<f32>> {
        fused::fused_q4r_parallel_matvec(
            self.packed.as_bytes(),
            &self.scales,
            x,
            self.rows,
            self.cols,
        )
    }
}

/// Quantize a dense row-major f32 matrix to Q4R
///
/// Per row, independently: `scale = max_abs / 7` (or `1.0` for an
/// all-zero row, keeping decode well-defined), then each value maps to
/// `clamp(round(v / scale), -7, 7)`. Rounding is to nearest, ties away
/// from zero. Odd `cols` pairs the final element with an implicit `0.0`.
/// Scales are strictly positive by construction.
///
/// # Arguments
///
/// * `input` - Row-major values, length `rows * cols`
/// * `rows` - Number of rows (one scale each)
/// * `cols` - Number of columns
///
/// # Errors
///
/// Returns [`ApretarError::ShapeMismatch`] if `input.len() != rows * cols`,
/// or [`ApretarError::AllocationFailure`] if the packed buffer cannot be
/// allocated.
pub fn quantize_q4r(input: &[f32], rows: usize, cols: usize) -> Result<Q4RMatrix> {
    if input.len() != rows * cols {
        return Err(ApretarError::ShapeMismatch {
            reason: format!(
                "Q4R input length {} doesn't match {}x{} = {}",
                input.len(),
                rows,
                cols,
                rows * cols
            ),
        });
    }

    let stride = row_bytes(cols);
    // Stored element count includes the per-row pad nibble for odd cols.
    let mut packed = PackedBuffer::zeroed(rows * stride * 2, 4)?;

    if cols == 0 {
        // Nothing to pack; scales still must exist, one per row.
        return Ok(Q4RMatrix {
            packed,
            scales: vec![1.0; rows],
            rows,
            cols,
        });
    }

    let mut scales = vec![0.0f32; rows];

    if rows < PARALLEL_THRESHOLD {
        for ((out_row, scale), in_row) in packed
            .as_mut_bytes()
            .chunks_mut(stride)
            .zip(scales.iter_mut())
            .zip(input.chunks(cols))
        {
            *scale = encode_row(in_row, out_row);
        }
    } else {
        use rayon::prelude::*;

        packed
            .as_mut_bytes()
            .par_chunks_mut(stride)
            .zip(scales.par_iter_mut())
            .zip(input.par_chunks(cols))
            .for_each(|((out_row, scale), in_row)| {
                *scale = encode_row(in_row, out_row);
            });
    }

    Ok(Q4RMatrix {
        packed,
        scales,
        rows,
        cols,
    })
}

/// Decode packed Q4R parts to a dense row-major f32 matrix
///
/// # Errors
///
/// Returns [`ApretarError::ShapeMismatch`] if `scales.len() != rows` or the
/// packed length is not `rows * ceil(cols/2)`. No partial output is
/// produced on error.
pub fn dequantize_q4r(packed: &[u8], scales: &[f32], rows: usize, cols: usize) -> Result<Vec<f32>> {
    validate_geometry(packed, scales, rows, cols)?;
    Ok(dequantize_unchecked(packed, scales, rows, cols))
}

fn validate_geometry(packed: &[u8], scales: &[f32], rows: usize, cols: usize) -> Result<()> {
    if scales.len() != rows {
        return Err(ApretarError::ShapeMismatch {
            reason: format!(
                "scale vector length {} doesn't match {} rows",
                scales.len(),
                rows
            ),
        });
    }
    let expected = rows * row_bytes(cols);
    if packed.len() != expected {
        return Err(ApretarError::ShapeMismatch {
            reason: format!(
                "Q4R packed length {} doesn't match {}x{} (expected {} bytes)",
                packed.len(),
                rows,
                cols,
                expected
            ),
        });
    }
    Ok(())
}

/// Encode one row into its packed slice, returning the row scale
#[allow(clippy::cast_precision_loss)]
fn encode_row(row: &[f32], out: &mut [u8]) -> f32 {
    let max_abs = row.iter().fold(0.0f32, |acc, &v| acc.max(v.abs()));
    // An (effectively) all-zero row quantizes to all-zero codes with a
    // substitute scale of 1.0, keeping scales strictly positive and decode
    // well-defined.
    let scale = if max_abs > 1e-10 {
        max_abs / Q4R_MAX as f32
    } else {
        1.0
    };

    for (byte, pair) in out.iter_mut().zip(row.chunks(2)) {
        let c1 = quantize_value(pair[0], scale);
        let c2 = if pair.len() == 2 {
            quantize_value(pair[1], scale)
        } else {
            0
        };
        *byte = pack_pair(c1, c2);
    }

    scale
}

/// `clamp(round(v / scale), -7, 7)`, ties rounding away from zero
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn quantize_value(v: f32, scale: f32) -> i32 {
    (v / scale)
        .round()
        .clamp(-(Q4R_MAX as f32), Q4R_MAX as f32) as i32
}

#[allow(clippy::cast_precision_loss)]
fn dequantize_unchecked(packed: &[u8], scales: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    let stride = row_bytes(cols);
    let mut out = Vec::with_capacity(rows * cols);

    for r in 0..rows {
        let scale = scales[r];
        let row = &packed[r * stride..(r + 1) * stride];
        for (byte_idx, &byte) in row.iter().enumerate() {
            let (c1, c2) = unpack_byte(byte);
            out.push(c1 as f32 * scale);
            // The low nibble of the last byte is the pad for odd cols.
            if byte_idx * 2 + 1 < cols {
                out.push(c2 as f32 * scale);
            }
        }
    }

    out
}
