//! Core array type, linear algebra and parameters for the ballast optimizers.
//!
//! `Tensor` is a dense row-major `f32` array. The `ops` module adds the
//! decompositions the preconditioning optimizers need (symmetric
//! eigendecomposition, QR, triangular solves) and bfloat16 conversion used
//! for reduced-precision state storage.

pub mod error;
pub mod nn;
pub mod ops;
pub mod storage;
pub mod tensor;
pub mod types;
pub mod utils;

pub use error::BallastError;
pub use nn::{ParamId, Parameter};
pub use storage::StoredTensor;
pub use tensor::Tensor;
pub use types::DType;
// Re-export traits required by public functions
pub use num_traits;
