use ballast_core::Parameter;
use std::sync::{Arc, RwLock};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A shared, lockable parameter as held by optimizers.
pub type ParamRef = Arc<RwLock<Parameter>>;

/// A group of parameters sharing hyperparameter overrides.
///
/// Unset options fall back to the optimizer defaults.
#[derive(Clone, Debug)]
pub struct ParamGroup {
    pub params: Vec<ParamRef>,
    pub options: ParamGroupOptions,
}

/// Per-group overrides of the optimizer defaults.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParamGroupOptions {
    pub lr: Option<f32>,
    pub betas: Option<(f32, f32)>,
    pub eps: Option<f32>,
    pub weight_decay: Option<f32>,
    pub warmup_steps: Option<u64>,
}

impl ParamGroup {
    /// Creates a new parameter group with default options.
    pub fn new(params: Vec<ParamRef>) -> Self {
        ParamGroup {
            params,
            options: ParamGroupOptions::default(),
        }
    }

    pub fn with_options(params: Vec<ParamRef>, options: ParamGroupOptions) -> Self {
        ParamGroup { params, options }
    }

    pub fn set_lr(&mut self, lr: f32) {
        self.options.lr = Some(lr);
    }

    pub fn get_lr(&self) -> Option<f32> {
        self.options.lr
    }
}
