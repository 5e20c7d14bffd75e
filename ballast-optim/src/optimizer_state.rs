//! Optimizer state: per-parameter accumulators and the serializable snapshot.
//!
//! Each parameter owns a flat map of named values. Transformations see only
//! their own namespace of that map through a [`StateSlice`], so two instances
//! of the same transformation in one chain never collide.

use crate::config::{FeatureFlags, OptimizerConfig, Variant};
use crate::param_group::ParamGroupOptions;
use ballast_core::{BallastError, DType, StoredTensor, Tensor};
use rand::rngs::StdRng;
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One named state entry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StateValue {
    Tensor(StoredTensor),
    Scalar(f64),
    Count(u64),
}

impl StateValue {
    fn kind(&self) -> &'static str {
        match self {
            StateValue::Tensor(_) => "tensor",
            StateValue::Scalar(_) => "scalar",
            StateValue::Count(_) => "count",
        }
    }
}

/// State of one parameter.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParamState {
    /// Number of completed steps.
    pub step: u64,
    /// Seed for this parameter's random draws.
    pub seed: u64,
    pub values: BTreeMap<String, StateValue>,
}

impl ParamState {
    pub fn new(seed: u64) -> Self {
        ParamState {
            step: 0,
            seed,
            values: BTreeMap::new(),
        }
    }
}

/// Train/eval mode. Only schedule-free optimizers distinguish the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

/// Snapshot returned by `Optimizer::state_dict`.
///
/// Parameters are keyed by their position across all groups (group order,
/// then order within the group), so a snapshot can be loaded into a fresh
/// optimizer built over new parameter objects of the same shapes.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OptimizerState {
    pub variant: Variant,
    pub flags: FeatureFlags,
    pub defaults: OptimizerConfig,
    pub groups: Vec<ParamGroupOptions>,
    pub group_sizes: Vec<usize>,
    pub params: BTreeMap<usize, ParamState>,
    pub mode: Mode,
}

impl OptimizerState {
    /// Checks that this snapshot can be loaded into an optimizer of `variant`
    /// with `flags` whose groups hold `group_sizes` parameters.
    pub fn check_compatible(
        &self,
        variant: Variant,
        flags: &FeatureFlags,
        group_sizes: &[usize],
    ) -> Result<(), BallastError> {
        if self.variant != variant {
            return Err(BallastError::StateError(format!(
                "State belongs to {}, cannot load into {}",
                self.variant, variant
            )));
        }
        if &self.flags != flags {
            return Err(BallastError::StateError(format!(
                "Feature flags differ: state has {:?}, optimizer has {:?}",
                self.flags, flags
            )));
        }
        if self.group_sizes != group_sizes || self.groups.len() != group_sizes.len() {
            return Err(BallastError::StateError(format!(
                "Parameter groups differ: state has sizes {:?}, optimizer has {:?}",
                self.group_sizes, group_sizes
            )));
        }
        let total: usize = group_sizes.iter().sum();
        if let Some((&index, _)) = self.params.iter().next_back() {
            if index >= total {
                return Err(BallastError::StateError(format!(
                    "State refers to parameter {} but the optimizer has {}",
                    index, total
                )));
            }
        }
        Ok(())
    }
}

/// A transformation's view of one parameter's state.
///
/// Keys are `prefix.name`. Tensors are decoded to `f32` on read and encoded to
/// the slice's storage dtype on write (stochastic rounding for bfloat16).
pub struct StateSlice<'a> {
    values: &'a mut BTreeMap<String, StateValue>,
    prefix: String,
    dtype: DType,
    rng: &'a mut StdRng,
}

impl<'a> StateSlice<'a> {
    pub fn new(
        values: &'a mut BTreeMap<String, StateValue>,
        prefix: impl Into<String>,
        dtype: DType,
        rng: &'a mut StdRng,
    ) -> Self {
        StateSlice {
            values,
            prefix: prefix.into(),
            dtype,
            rng,
        }
    }

    fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Sub-namespace `prefix.sub`, borrowing this slice.
    pub fn child(&mut self, sub: &str) -> StateSlice<'_> {
        let prefix = self.key(sub);
        StateSlice {
            values: &mut *self.values,
            prefix,
            dtype: self.dtype,
            rng: &mut *self.rng,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&self.key(name))
    }

    pub fn remove(&mut self, name: &str) {
        let key = self.key(name);
        self.values.remove(&key);
    }

    fn wrong_kind(&self, name: &str, found: &StateValue, wanted: &str) -> BallastError {
        BallastError::StateError(format!(
            "State entry '{}' is a {}, expected a {}",
            self.key(name),
            found.kind(),
            wanted
        ))
    }

    /// Decoded tensor entry, if present.
    pub fn tensor(&self, name: &str) -> Result<Option<Tensor>, BallastError> {
        match self.values.get(&self.key(name)) {
            None => Ok(None),
            Some(StateValue::Tensor(t)) => Ok(Some(t.decode())),
            Some(other) => Err(self.wrong_kind(name, other, "tensor")),
        }
    }

    /// Decoded tensor entry that must exist with the given shape.
    ///
    /// # Errors
    /// `StateError` if absent, `ShapeMismatch` if the stored shape differs.
    pub fn require_tensor(&self, name: &str, shape: &[usize]) -> Result<Tensor, BallastError> {
        let t = self.tensor(name)?.ok_or_else(|| {
            BallastError::StateError(format!("Missing state entry '{}'", self.key(name)))
        })?;
        if t.shape() != shape {
            return Err(BallastError::ShapeMismatch {
                expected: shape.to_vec(),
                actual: t.shape().to_vec(),
                operation: format!("load state '{}'", self.key(name)),
            });
        }
        Ok(t)
    }

    /// Tensor entry of the given shape, or zeros if absent.
    pub fn tensor_or_zeros(&self, name: &str, shape: &[usize]) -> Result<Tensor, BallastError> {
        if self.contains(name) {
            self.require_tensor(name, shape)
        } else {
            Ok(Tensor::zeros(shape))
        }
    }

    /// Stores `t` in the slice's storage dtype.
    pub fn put_tensor(&mut self, name: &str, t: &Tensor) {
        let dtype = self.dtype;
        self.put_tensor_as(name, t, dtype);
    }

    /// Stores `t` in an explicit dtype.
    pub fn put_tensor_as(&mut self, name: &str, t: &Tensor, dtype: DType) {
        let stored = StoredTensor::encode(t, dtype, &mut *self.rng);
        let key = self.key(name);
        self.values.insert(key, StateValue::Tensor(stored));
    }

    pub fn scalar(&self, name: &str) -> Result<Option<f64>, BallastError> {
        match self.values.get(&self.key(name)) {
            None => Ok(None),
            Some(StateValue::Scalar(v)) => Ok(Some(*v)),
            Some(other) => Err(self.wrong_kind(name, other, "scalar")),
        }
    }

    pub fn set_scalar(&mut self, name: &str, value: f64) {
        let key = self.key(name);
        self.values.insert(key, StateValue::Scalar(value));
    }

    pub fn count(&self, name: &str) -> Result<Option<u64>, BallastError> {
        match self.values.get(&self.key(name)) {
            None => Ok(None),
            Some(StateValue::Count(v)) => Ok(Some(*v)),
            Some(other) => Err(self.wrong_kind(name, other, "count")),
        }
    }

    pub fn set_count(&mut self, name: &str, value: u64) {
        let key = self.key(name);
        self.values.insert(key, StateValue::Count(value));
    }
}

#[cfg(test)]
#[path = "optimizer_state_test.rs"]
mod tests;
