// ballast-core/src/ops/mod.rs

//! Operations that do not fit as `Tensor` methods: linear algebra and
//! storage dtype conversion.

pub mod dtype;
pub mod linalg;
