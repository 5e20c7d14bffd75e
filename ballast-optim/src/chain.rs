//! The transformation chain.
//!
//! A chain is an ordered list of stateful steps. Each step has a fixed
//! namespace into the parameter's state map and sees only that namespace.
//! Repeated transformations get distinct namespaces (`exp_avg`, `exp_avg#1`, ...),
//! so reordering or repeating steps never aliases state.

use crate::config::{FeatureFlags, OptimizerConfig, Variant};
use crate::optimizer_state::{StateSlice, StateValue};
use crate::schedule::{salt, step_rng};
use crate::transforms::{moments, psgd, soap};
use ballast_core::{BallastError, DType, Tensor};
use rand::rngs::StdRng;
use std::collections::BTreeMap;

/// Everything a transformation may read about the current step.
pub struct StepContext<'a> {
    /// 1-based step of this parameter.
    pub step: u64,
    pub beta1: f32,
    /// Second-moment decay, already annealed when `palm` is set.
    pub beta2: f32,
    pub eps: f32,
    /// The chain input: clipped and mars-corrected gradient.
    pub grad: &'a Tensor,
    pub config: &'a OptimizerConfig,
    pub flags: FeatureFlags,
    /// Per-parameter seed.
    pub seed: u64,
}

impl<'a> StepContext<'a> {
    /// Random stream for `salt` at this step.
    pub fn rng(&self, salt: u64) -> StdRng {
        step_rng(self.seed, self.step, salt)
    }
}

/// Result of one chain step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Update(Tensor),
    /// Do not touch the parameter this step (state updates still commit).
    Skip,
}

/// Built-in transformations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    /// First-moment EMA; returns the average.
    ExpAvg,
    /// Second-moment EMA; returns the input divided by its root.
    ScaleByExpAvgSq,
    UpdateByAdam,
    UpdateByLaProp,
    UpdateByAdopt,
    Soap,
    Psgd,
}

impl Transform {
    /// Base namespace of the transformation's state.
    pub fn name(&self) -> &'static str {
        match self {
            Transform::ExpAvg => "exp_avg",
            Transform::ScaleByExpAvgSq => "exp_avg_sq",
            Transform::UpdateByAdam => "adam",
            Transform::UpdateByLaProp => "laprop",
            Transform::UpdateByAdopt => "adopt",
            Transform::Soap => "soap",
            Transform::Psgd => "psgd",
        }
    }

    pub fn apply(
        &self,
        ctx: &StepContext<'_>,
        state: &mut StateSlice<'_>,
        input: Tensor,
    ) -> Result<StepOutcome, BallastError> {
        match self {
            Transform::ExpAvg => moments::exp_avg(ctx, state, input),
            Transform::ScaleByExpAvgSq => moments::scale_by_exp_avg_sq(ctx, state, input),
            Transform::UpdateByAdam => moments::update_by_adam(ctx, state, input),
            Transform::UpdateByLaProp => moments::update_by_laprop(ctx, state, input),
            Transform::UpdateByAdopt => moments::update_by_adopt(ctx, state, input),
            Transform::Soap => soap::soap_step(ctx, state, input),
            Transform::Psgd => psgd::psgd_step(ctx, state, input),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStep {
    pub transform: Transform,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    steps: Vec<ChainStep>,
}

impl Chain {
    /// The chain used by each algorithm family.
    pub fn for_variant(variant: Variant, flags: &FeatureFlags) -> Chain {
        let builder = ChainBuilder::new();
        match variant {
            Variant::AdamW => builder.push(Transform::UpdateByAdam),
            Variant::RmsProp | Variant::SfAdamW => builder.push(Transform::ScaleByExpAvgSq),
            Variant::Adopt => builder.push(Transform::UpdateByAdopt),
            Variant::LaProp => builder.push(Transform::UpdateByLaProp),
            Variant::Soap => builder.push(Transform::Soap),
            Variant::PsgdKron => {
                let builder = if flags.exp_avg_input {
                    builder.push(Transform::ExpAvg)
                } else {
                    builder
                };
                builder.push(Transform::Psgd)
            }
        }
        .build()
    }

    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step on `input`, stopping at the first `Skip`.
    ///
    /// # Errors
    /// `ShapeMismatch` if a step returns an update of a different shape, plus
    /// whatever the steps themselves report.
    pub fn run(
        &self,
        ctx: &StepContext<'_>,
        values: &mut BTreeMap<String, StateValue>,
        dtype: DType,
        input: Tensor,
    ) -> Result<StepOutcome, BallastError> {
        let mut rounding = ctx.rng(salt::ROUNDING);
        let mut v = input;
        for step in &self.steps {
            let shape = v.shape().to_vec();
            let mut slice = StateSlice::new(values, step.namespace.as_str(), dtype, &mut rounding);
            match step.transform.apply(ctx, &mut slice, v)? {
                StepOutcome::Update(next) => {
                    if next.shape() != shape.as_slice() {
                        return Err(BallastError::ShapeMismatch {
                            expected: shape,
                            actual: next.shape().to_vec(),
                            operation: format!("chain step '{}'", step.namespace),
                        });
                    }
                    v = next;
                }
                StepOutcome::Skip => {
                    log::trace!("chain step '{}' skipped the update", step.namespace);
                    return Ok(StepOutcome::Skip);
                }
            }
        }
        Ok(StepOutcome::Update(v))
    }
}

/// Builds a [`Chain`], assigning namespaces.
#[derive(Debug, Default)]
pub struct ChainBuilder {
    steps: Vec<ChainStep>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        ChainBuilder::default()
    }

    pub fn push(mut self, transform: Transform) -> Self {
        let copies = self
            .steps
            .iter()
            .filter(|s| s.transform == transform)
            .count();
        let namespace = if copies == 0 {
            transform.name().to_string()
        } else {
            format!("{}#{}", transform.name(), copies)
        };
        self.steps.push(ChainStep {
            transform,
            namespace,
        });
        self
    }

    /// Appends `count` copies of `transform`.
    pub fn repeat(self, transform: Transform, count: usize) -> Self {
        (0..count).fold(self, |b, _| b.push(transform))
    }

    pub fn build(self) -> Chain {
        Chain { steps: self.steps }
    }
}

#[cfg(test)]
#[path = "chain_test.rs"]
mod tests;
