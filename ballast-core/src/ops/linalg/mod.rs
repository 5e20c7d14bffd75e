// ballast-core/src/ops/linalg/mod.rs

//! Small dense linear algebra on 2-D tensors.
//!
//! Everything here promotes to `f64` internally and returns `f32` tensors.
//! Decompositions report failure as `BallastError::NumericalDegeneracy` so
//! callers can keep their previous factors.

pub mod eigh;
pub mod matmul;
pub mod qr;
pub mod triangular;

pub use eigh::{eigh_op, symmetric_eigen};
pub use matmul::{gram_op, matmul_op, transpose_op};
pub use qr::{gram_schmidt, qr_op};
pub use triangular::{
    pack_triu_op, packed_len, solve_upper_transposed_along, spectral_norm_lower_bound, triu_op,
    unpack_triu_op,
};
