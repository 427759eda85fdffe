//! Fused dequantize-and-accumulate kernels
//!
//! Each output row is one fused dot product over the packed codes: unpack a
//! byte, dequantize its two codes (`code * scale`), multiply by the matching
//! activation elements, and add into an f32 accumulator. Accumulation is
//! always f32 regardless of the packed width. The full-precision weight
//! matrix is never materialized; doing so would throw away the 8x memory
//! bandwidth advantage that is the point of the packed representation.
//!
//! Rows neither read nor write each other's data, so the matvec variants
//! dispatch rows across rayon workers above a size threshold.

use super::{row_bytes, unpack_byte};
use crate::error::{ApretarError, Result};

/// Output row count below which matvec stays sequential.
///
/// Break-even vs. rayon dispatch overhead sits near 200 rows for
/// inference-sized matrices; 256 keeps small layers on the cheap path.
const PARALLEL_THRESHOLD: usize = 256;

/// Rows per work unit in the parallel path, sized so one unit's weight
/// bytes stay resident in L2 while the activation vector is reused.
const CHUNK_SIZE: usize = 64;

/// Fused dot product of one packed Q4R row against a dense vector
///
/// For odd `x.len()` the final byte contributes only its high nibble; the
/// low nibble is the encoder's pad.
///
/// # Arguments
///
/// * `row_data` - Packed codes for one row, `ceil(x.len()/2)` bytes
/// * `scale` - The row's scale factor
/// * `x` - Dense activation vector
///
/// # Errors
///
/// Returns [`ApretarError::ShapeMismatch`] if `row_data.len()` doesn't
/// match `ceil(x.len()/2)`.
pub fn fused_q4r_dot(row_data: &[u8], scale: f32, x: &[f32]) -> Result<f32> {
    if row_data.len() != row_bytes(x.len()) {
        return Err(ApretarError::ShapeMismatch {
            reason: format!(
                "Q4R row is {} bytes, activation length {} needs {}",
                row_data.len(),
                x.len(),
                row_bytes(x.len())
            ),
        });
    }
    Ok(dot_unchecked(row_data, scale, x))
}

#[inline]
#[allow(clippy::cast_precision_loss)]
fn dot_unchecked(row_data: &[u8], scale: f32, x: &[f32]) -> f32 {
    let mut acc = 0.0f32;

    let mut pairs = x.chunks_exact(2);
    for (&byte, pair) in row_data.iter().zip(pairs.by_ref()) {
        let (c1, c2) = unpack_byte(byte);
        acc += (c1 as f32 * scale) * pair[0];
        acc += (c2 as f32 * scale) * pair[1];
    }

    if let &[last] = pairs.remainder() {
        let (c1, _pad) = unpack_byte(row_data[row_data.len() - 1]);
        acc += (c1 as f32 * scale) * last;
    }

    acc
}

fn validate_matvec(packed: &[u8], scales: &[f32], x: &[f32], m: usize, n: usize) -> Result<usize> {
    let stride = row_bytes(n);
    let expected = m * stride;
    if packed.len() != expected {
        return Err(ApretarError::ShapeMismatch {
            reason: format!(
                "Q4R weight data is {} bytes, {}x{} needs {}",
                packed.len(),
                m,
                n,
                expected
            ),
        });
    }
    if scales.len() != m {
        return Err(ApretarError::ShapeMismatch {
            reason: format!("scale vector length {} doesn't match {} rows", scales.len(), m),
        });
    }
    if x.len() != n {
        return Err(ApretarError::ShapeMismatch {
            reason: format!("activation length {} doesn't match {} cols", x.len(), n),
        });
    }
    Ok(stride)
}

/// Fused Q4R matrix x vector product, sequential
///
/// Computes `y[m] = sum_n dequant(W[m][n]) * x[n]` without materializing a
/// dequantized copy of `W`. A zero-row or zero-column `W` is a no-op
/// producing an empty (or all-zero) `y`, not an error.
///
/// # Errors
///
/// Returns [`ApretarError::ShapeMismatch`] if the packed byte length,
/// scale vector length, or activation length is inconsistent with `m`, `n`.
pub fn fused_q4r_matvec(
    packed: &[u8],
    scales: &[f32],
    x: &[f32],
    m: usize,
    n: usize,
) -> Result<Vec<f32>> {
    let stride = validate_matvec(packed, scales, x, m, n)?;
    Ok((0..m)
        .map(|r| dot_unchecked(&packed[r * stride..(r + 1) * stride], scales[r], x))
        .collect())
}

/// Fused Q4R matrix x vector product with adaptive parallelism
///
/// Sequential below a row-count threshold, rayon work-stealing above it.
/// Rows only read the shared inputs and write disjoint outputs, so the
/// only synchronization is the final gather.
///
/// # Errors
///
/// Same validation as [`fused_q4r_matvec`].
pub fn fused_q4r_parallel_matvec(
    packed: &[u8],
    scales: &[f32],
    x: &[f32],
    m: usize,
    n: usize,
) -> Result<Vec<f32>> {
    let stride = validate_matvec(packed, scales, x, m, n)?;

    if m < PARALLEL_THRESHOLD {
        return Ok((0..m)
            .map(|r| dot_unchecked(&packed[r * stride..(r + 1) * stride], scales[r], x))
            .collect());
    }

    use rayon::prelude::*;

    Ok((0..m)
        .into_par_iter()
        .with_min_len(CHUNK_SIZE)
        .map(|r| dot_unchecked(&packed[r * stride..(r + 1) * stride], scales[r], x))
        .collect())
}

/// Fused Q4R matvec writing into a caller-provided buffer
///
/// Zero-allocation variant for hot inference paths where `y` is reused
/// across calls.
///
/// # Errors
///
/// Same validation as [`fused_q4r_matvec`], plus
/// [`ApretarError::ShapeMismatch`] if `out.len() < m`.
pub fn fused_q4r_parallel_matvec_into(
    packed: &[u8],
    scales: &[f32],
    x: &[f32],
    m: usize,
    n: usize,
    out: &mut [f32],
) -> Result<()> {
    let stride = validate_matvec(packed, scales, x, m, n)?;
    if out.len() < m {
        return Err(ApretarError::ShapeMismatch {
            reason: format!("output buffer length {} is smaller than {} rows", out.len(), m),
        });
    }

    if m < PARALLEL_THRESHOLD {
        for (r, slot) in out[..m].iter_mut().enumerate() {
            *slot = dot_unchecked(&packed[r * stride..(r + 1) * stride], scales[r], x);
        }
        return Ok(());
    }

    use rayon::prelude::*;

    out[..m]
        .par_iter_mut()
        .enumerate()
        .with_min_len(CHUNK_SIZE)
        .for_each(|(r, slot)| {
            *slot = dot_unchecked(&packed[r * stride..(r + 1) * stride], scales[r], x);
        });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantize::quantize_q4r;

    #[test]
    fn test_dot_even_length() {
        // codes [1, -2] at scale 0.5 -> weights [0.5, -1.0]
        let row = [((1 + 8) as u8) << 4 | (-2 + 8) as u8];
        let y = fused_q4r_dot(&row, 0.5, &[2.0, 3.0]).unwrap();
        assert!((y - (0.5 * 2.0 - 1.0 * 3.0)).abs() < 1e-6);
    }

    #[test]
    fn test_dot_odd_length_ignores_pad() {
        // High nibble code 7, low nibble deliberately nonzero garbage
        let row = [0xF0];
        let y = fused_q4r_dot(&row, 1.0, &[2.0]).unwrap();
        assert!((y - 14.0).abs() < 1e-6);
    }

    #[test]
    fn test_dot_row_length_mismatch() {
        let result = fused_q4r_dot(&[0x88, 0x88], 1.0, &[1.0, 2.0]);
        assert!(matches!(result, Err(ApretarError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_matvec_matches_dequantized_product() {
        let w = [1.0, -2.0, 3.0, 4.0, 0.5, -0.5];
        let m = quantize_q4r(&w, 2, 3).unwrap();
        let x = [1.0, 2.0, 3.0];

        let y = fused_q4r_matvec(m.packed().as_bytes(), m.scales(), &x, 2, 3).unwrap();

        let dense = m.dequantize();
        for r in 0..2 {
            let expected: f32 = (0..3).map(|c| dense[r * 3 + c] * x[c]).sum();
            assert!((y[r] - expected).abs() < 1e-5, "row {r}");
        }
    }

    #[test]
    fn test_matvec_wrong_scales_length() {
        let m = quantize_q4r(&[1.0, 2.0, 3.0, 4.0], 2, 2).unwrap();
        let result = fused_q4r_matvec(m.packed().as_bytes(), &[1.0], &[1.0, 1.0], 2, 2);
        assert!(matches!(result, Err(ApretarError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_matvec_wrong_packed_length() {
        let result = fused_q4r_matvec(&[0x88; 3], &[1.0, 1.0], &[1.0, 1.0], 2, 2);
        assert!(matches!(result, Err(ApretarError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_matvec_wrong_activation_length() {
        let m = quantize_q4r(&[1.0, 2.0, 3.0, 4.0], 2, 2).unwrap();
        let result = fused_q4r_matvec(m.packed().as_bytes(), m.scales(), &[1.0], 2, 2);
        assert!(matches!(result, Err(ApretarError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_matvec_zero_rows_is_noop() {
        let y = fused_q4r_matvec(&[], &[], &[1.0, 2.0], 0, 2).unwrap();
        assert!(y.is_empty());
    }

    #[test]
    fn test_matvec_zero_cols_yields_zeros() {
        let y = fused_q4r_matvec(&[], &[1.0, 1.0, 1.0], &[], 3, 0).unwrap();
        assert_eq!(y, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let rows = 300;
        let cols = 17;
        let w: Vec<f32> = (0..rows * cols)
            .map(|i| ((i * 31 % 97) as f32) / 10.0 - 4.0)
            .collect();
        let x: Vec<f32> = (0..cols).map(|i| (i as f32) * 0.25 - 2.0).collect();

        let m = quantize_q4r(&w, rows, cols).unwrap();
        let seq = fused_q4r_matvec(m.packed().as_bytes(), m.scales(), &x, rows, cols).unwrap();
        let par =
            fused_q4r_parallel_matvec(m.packed().as_bytes(), m.scales(), &x, rows, cols).unwrap();

        assert_eq!(seq.len(), par.len());
        for (a, b) in seq.iter().zip(par.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_matvec_into_writes_all_rows() {
        let m = quantize_q4r(&[1.0, 2.0, 3.0, 4.0], 2, 2).unwrap();
        let x = [1.0, 1.0];
        let mut out = [f32::NAN; 2];

        fused_q4r_parallel_matvec_into(m.packed().as_bytes(), m.scales(), &x, 2, 2, &mut out)
            .unwrap();

        let expected = fused_q4r_matvec(m.packed().as_bytes(), m.scales(), &x, 2, 2).unwrap();
        assert_eq!(out.to_vec(), expected);
    }

    #[test]
    fn test_matvec_into_buffer_too_small() {
        let m = quantize_q4r(&[1.0, 2.0, 3.0, 4.0], 2, 2).unwrap();
        let mut out = [0.0f32; 1];
        let result = fused_q4r_parallel_matvec_into(
            m.packed().as_bytes(),
            m.scales(),
            &[1.0, 1.0],
            2,
            2,
            &mut out,
        );
        assert!(matches!(result, Err(ApretarError::ShapeMismatch { .. })));
    }
}
