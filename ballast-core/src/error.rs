use thiserror::Error;

/// Custom error type for the ballast crates.
#[derive(Error, Debug, PartialEq, Clone)] // PartialEq for easier testing
pub enum BallastError {
    #[error("Shape mismatch: expected {expected:?}, got {actual:?} during operation {operation}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
        operation: String,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid axis {axis} for tensor of rank {rank}")]
    InvalidAxis { axis: usize, rank: usize },

    #[error("Tensor creation error: data length {data_len} does not match shape {shape:?}")]
    TensorCreationError { data_len: usize, shape: Vec<usize> },

    /// Invalid hyperparameters or option combinations, detected at construction.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Stored optimizer state is incompatible with the optimizer or its parameters.
    #[error("State error: {0}")]
    StateError(String),

    /// The requested operation is not valid in the optimizer's current mode (train/eval).
    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    /// A decomposition failed to converge or produced non-finite values.
    #[error("Numerical degeneracy in {operation}: {reason}")]
    NumericalDegeneracy { operation: String, reason: String },

    #[error("Failed to acquire {lock_type} lock: {reason}")]
    LockError { lock_type: String, reason: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}
