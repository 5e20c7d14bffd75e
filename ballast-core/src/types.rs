use crate::error::BallastError;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Storage data types for optimizer state.
///
/// All arithmetic runs in `f32`. State buffers may be kept in a narrower
/// (or wider) type and are converted on every read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DType {
    /// 32-bit floating-point type. Same as the computation type.
    #[default]
    F32,
    /// 64-bit floating-point type.
    F64,
    /// bfloat16: the upper half of an IEEE `f32` (8 exponent bits, 7 mantissa bits).
    BF16,
}

impl DType {
    pub fn name(&self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::BF16 => "bfloat16",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = BallastError;

    /// Accepts the usual spellings ("float32", "f32", "bfloat16", "bf16", ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "float32" | "f32" | "float" => Ok(DType::F32),
            "float64" | "f64" | "double" => Ok(DType::F64),
            "bfloat16" | "bf16" => Ok(DType::BF16),
            other => Err(BallastError::ConfigurationError(format!(
                "Unknown storage dtype '{}', expected one of float32, float64, bfloat16",
                other
            ))),
        }
    }
}
