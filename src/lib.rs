//! # Apretar
//!
//! Low-bit weight quantization codec with fused quantized matmul kernels.
//!
//! Apretar (Spanish: "to squeeze, to compress") converts dense float32
//! weight matrices into packed sub-byte codes with one scale factor per
//! row, and computes matrix x vector products directly against the packed
//! representation — each weight is dequantized at the moment it is
//! consumed, never as a full-precision intermediate copy.
//!
//! ## Features
//!
//! - **Q4R codec**: symmetric row-wise 4-bit quantization, two codes per
//!   byte, `scale = max_abs / 7` per row
//! - **Fused kernels**: dequantize-on-the-fly matvec, f32 accumulation,
//!   rayon row-parallelism above a size threshold
//! - **Packed storage**: owned fixed-length buffers sized
//!   `ceil(count * bits / 8)`, zero-filled, freed by ownership
//! - **Capability-gated devices**: the GPU path fails fast with a named
//!   error instead of handing back a tensor with no storage
//!
//! ## Example
//!
//! ```rust
//! use apretar::quantize::{fused_q4r_parallel_matvec, quantize_q4r};
//!
//! // Quantize a 2x4 weight matrix to 4-bit codes + per-row scales
//! let weights = [
//!     0.5, -1.0, 2.0, 7.0, //
//!     -3.0, 3.0, 1.5, 0.0,
//! ];
//! let q = quantize_q4r(&weights, 2, 4).unwrap();
//! assert_eq!(q.packed().len(), 4); // 8 values packed into 4 bytes
//! assert_eq!(q.scales().len(), 2); // one scale per row
//!
//! // Multiply against a dense activation vector in packed form
//! let x = [1.0, 1.0, 1.0, 1.0];
//! let y = fused_q4r_parallel_matvec(q.packed().as_bytes(), q.scales(), &x, 2, 4).unwrap();
//! assert_eq!(y.len(), 2);
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (after deny/warn so they override)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::float_cmp)] // Exact comparisons are intentional in tests
#![allow(clippy::uninlined_format_args)]

pub mod dtype;
pub mod error;
pub mod packed;
pub mod quantize;
pub mod tensor;

pub use dtype::{DType, Device};
pub use error::{ApretarError, Result};
pub use packed::PackedBuffer;
pub use quantize::Q4RMatrix;
pub use tensor::Tensor;
