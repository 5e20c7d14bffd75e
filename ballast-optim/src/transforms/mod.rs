//! Chain step implementations.

pub mod moments;
pub mod psgd;
pub mod soap;
