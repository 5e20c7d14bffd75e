//! The base optimizer driver.
//!
//! Per parameter with a gradient, one step runs: warmup, gradient clipping,
//! mars correction, the transformation chain, caution masking, decoupled
//! weight decay, update clipping, and the write-back `p -= lr · u`.
//!
//! Steps are transactional. Every parameter's new value and state are computed
//! on copies first; nothing is written unless all of them succeeded.

use crate::blend::{caution, mars_correction};
use crate::chain::{Chain, StepContext, StepOutcome};
use crate::config::{FeatureFlags, OptimizerConfig, Variant};
use crate::grad_clipping::ClipPolicy;
use crate::optimizer_state::{Mode, OptimizerState, ParamState, StateSlice};
use crate::optimizer_trait::Optimizer;
use crate::param_group::{ParamGroup, ParamRef};
use crate::schedule::{mix_seed, palm_beta2, salt, step_rng, warmup_lr};
use ballast_core::{BallastError, ParamId, Parameter, Tensor};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Output of the shared part of a step.
pub(crate) struct Transformed {
    pub step: u64,
    pub lr: f32,
    /// `None` when the chain skipped this step.
    pub update: Option<Tensor>,
}

/// A parameter's staged result, committed at the end of the step.
pub(crate) struct Staged {
    param: ParamRef,
    id: ParamId,
    state: ParamState,
    value: Option<Tensor>,
}

fn lock_error(what: &str, reason: impl std::fmt::Display) -> BallastError {
    BallastError::LockError {
        lock_type: what.to_string(),
        reason: reason.to_string(),
    }
}

/// Optimizer driving one transformation chain.
pub struct BaseOptimizer {
    variant: Variant,
    flags: FeatureFlags,
    defaults: OptimizerConfig,
    chain: Chain,
    param_groups: Vec<ParamGroup>,
    state: BTreeMap<ParamId, ParamState>,
}

impl std::fmt::Debug for BaseOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseOptimizer")
            .field("variant", &self.variant)
            .field("flags", &self.flags)
            .field("chain", &self.chain)
            .field("groups", &self.param_groups.len())
            .field("params_with_state", &self.state.len())
            .finish()
    }
}

impl BaseOptimizer {
    /// Creates an optimizer of `variant` over `params` with the chain of that family.
    ///
    /// # Errors
    /// `ConfigurationError` for invalid settings, for the schedule-free family
    /// (use [`ScheduleFreeOptimizer`](crate::ScheduleFreeOptimizer)), or when a
    /// parameter is listed twice.
    pub fn new(
        variant: Variant,
        flags: FeatureFlags,
        params: Vec<ParamRef>,
        config: OptimizerConfig,
    ) -> Result<Self, BallastError> {
        if variant.is_schedule_free() {
            return Err(BallastError::ConfigurationError(format!(
                "{} needs ScheduleFreeOptimizer",
                variant
            )));
        }
        let chain = Chain::for_variant(variant, &flags);
        Self::build(variant, flags, params, config, chain)
    }

    /// Creates an optimizer running a custom chain.
    pub fn with_chain(
        variant: Variant,
        flags: FeatureFlags,
        params: Vec<ParamRef>,
        config: OptimizerConfig,
        chain: Chain,
    ) -> Result<Self, BallastError> {
        if chain.is_empty() {
            return Err(BallastError::ConfigurationError(
                "transformation chain is empty".to_string(),
            ));
        }
        Self::build(variant, flags, params, config, chain)
    }

    pub(crate) fn build(
        variant: Variant,
        flags: FeatureFlags,
        params: Vec<ParamRef>,
        config: OptimizerConfig,
        chain: Chain,
    ) -> Result<Self, BallastError> {
        config.validate(variant, &flags)?;
        let mut optimizer = BaseOptimizer {
            variant,
            flags,
            defaults: config,
            chain,
            param_groups: Vec::new(),
            state: BTreeMap::new(),
        };
        optimizer.push_group(ParamGroup::new(params))?;
        log::debug!(
            "Created {} optimizer with chain {:?}",
            variant,
            optimizer
                .chain
                .steps()
                .iter()
                .map(|s| s.namespace.as_str())
                .collect::<Vec<_>>()
        );
        Ok(optimizer)
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn flags(&self) -> &FeatureFlags {
        &self.flags
    }

    pub fn defaults(&self) -> &OptimizerConfig {
        &self.defaults
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// State of `param`, if it has been stepped.
    pub fn param_state(&self, param: &ParamRef) -> Option<&ParamState> {
        let id = param.read().ok()?.id();
        self.state.get(&id)
    }

    /// Resolved configuration of group `index`.
    pub fn group_config(&self, index: usize) -> Option<OptimizerConfig> {
        self.param_groups
            .get(index)
            .map(|g| self.defaults.resolved(&g.options))
    }

    fn push_group(&mut self, group: ParamGroup) -> Result<(), BallastError> {
        self.defaults
            .resolved(&group.options)
            .validate(self.variant, &self.flags)?;
        let mut seen: HashSet<ParamId> = HashSet::new();
        for existing in self.param_groups.iter().flat_map(|g| g.params.iter()) {
            seen.insert(existing.read().map_err(|e| lock_error("read", e))?.id());
        }
        for param in &group.params {
            let guard = param.read().map_err(|e| lock_error("read", e))?;
            if !seen.insert(guard.id()) {
                return Err(BallastError::ConfigurationError(format!(
                    "Parameter {} appears more than once in the optimizer",
                    guard.display_name()
                )));
            }
        }
        self.param_groups.push(group);
        Ok(())
    }

    fn group_sizes(&self) -> Vec<usize> {
        self.param_groups.iter().map(|g| g.params.len()).collect()
    }

    /// Warmup, gradient clipping, mars, chain and caution for one parameter.
    /// Advances `state.step`.
    pub(crate) fn transform(
        &self,
        cfg: &OptimizerConfig,
        state: &mut ParamState,
        param: &Tensor,
        grad: &Tensor,
    ) -> Result<Transformed, BallastError> {
        param.check_same_shape(grad, "gradient")?;
        let t = state.step + 1;
        let lr = warmup_lr(cfg.lr, t, cfg.warmup_steps);

        let clipped = cfg
            .gradient_clipping
            .apply(grad, param, ClipPolicy::Identity)?;
        let input = if cfg.mars {
            let mut rng = step_rng(state.seed, t, salt::MARS);
            let mut slice = StateSlice::new(&mut state.values, "mars", cfg.storage_dtype, &mut rng);
            let previous = slice.tensor_or_zeros("old_grad", clipped.shape())?;
            let corrected = mars_correction(&clipped, &previous, cfg.mars_gamma, cfg.betas.0)?;
            slice.put_tensor("old_grad", &clipped);
            corrected
        } else {
            clipped
        };

        let beta2 = if self.flags.palm {
            palm_beta2(t, cfg.beta2_scale)
        } else {
            cfg.betas.1
        };
        let ctx = StepContext {
            step: t,
            beta1: cfg.betas.0,
            beta2,
            eps: cfg.eps,
            grad: &input,
            config: cfg,
            flags: self.flags,
            seed: state.seed,
        };
        let outcome = self
            .chain
            .run(&ctx, &mut state.values, cfg.storage_dtype, input.clone())?;
        state.step = t;

        let update = match outcome {
            StepOutcome::Skip => None,
            StepOutcome::Update(u) if cfg.caution => Some(caution(&u, &input)?),
            StepOutcome::Update(u) => Some(u),
        };
        Ok(Transformed {
            step: t,
            lr,
            update,
        })
    }

    /// Default update-clipping policy of this optimizer.
    pub(crate) fn default_update_clip(&self) -> ClipPolicy {
        OptimizerConfig::default_update_clip(self.variant)
    }

    /// Visits every parameter and stages the results of `visit`.
    ///
    /// `visit` receives the group configuration, the parameter's position, its
    /// current state and the parameter; it returns `None` to leave the
    /// parameter alone, or its new state and optionally a new value.
    pub(crate) fn stage<F>(&self, mut visit: F) -> Result<Vec<Staged>, BallastError>
    where
        F: FnMut(
            &OptimizerConfig,
            usize,
            Option<&ParamState>,
            &Parameter,
        ) -> Result<Option<(ParamState, Option<Tensor>)>, BallastError>,
    {
        let mut staged = Vec::new();
        let mut position = 0usize;
        for group in &self.param_groups {
            let cfg = self.defaults.resolved(&group.options);
            for param in &group.params {
                let index = position;
                position += 1;
                let guard = param.read().map_err(|e| lock_error("read", e))?;
                let id = guard.id();
                if let Some((state, value)) = visit(&cfg, index, self.state.get(&id), &*guard)? {
                    staged.push(Staged {
                        param: Arc::clone(param),
                        id,
                        state,
                        value,
                    });
                }
            }
        }
        Ok(staged)
    }

    /// Writes staged results. All write locks are taken before anything changes.
    pub(crate) fn commit(&mut self, staged: Vec<Staged>) -> Result<(), BallastError> {
        let targets: Vec<Option<ParamRef>> = staged
            .iter()
            .map(|s| s.value.as_ref().map(|_| Arc::clone(&s.param)))
            .collect();
        let mut guards = Vec::with_capacity(targets.len());
        for target in &targets {
            guards.push(match target {
                Some(param) => Some(param.write().map_err(|e| lock_error("write", e))?),
                None => None,
            });
        }
        for (s, guard) in staged.iter().zip(guards.iter()) {
            if let (Some(value), Some(guard)) = (&s.value, guard) {
                if guard.shape() != value.shape() {
                    return Err(BallastError::InternalError(format!(
                        "staged value for {} changed shape",
                        guard.display_name()
                    )));
                }
            }
        }
        for (s, guard) in staged.into_iter().zip(guards) {
            if let (Some(value), Some(mut guard)) = (s.value, guard) {
                guard.set_data(value)?;
            }
            self.state.insert(s.id, s.state);
        }
        Ok(())
    }

    pub(crate) fn snapshot(&self, mode: Mode) -> Result<OptimizerState, BallastError> {
        let mut params = BTreeMap::new();
        let mut position = 0usize;
        for group in &self.param_groups {
            for param in &group.params {
                let id = param.read().map_err(|e| lock_error("read", e))?.id();
                if let Some(state) = self.state.get(&id) {
                    params.insert(position, state.clone());
                }
                position += 1;
            }
        }
        Ok(OptimizerState {
            variant: self.variant,
            flags: self.flags,
            defaults: self.defaults.clone(),
            groups: self.param_groups.iter().map(|g| g.options.clone()).collect(),
            group_sizes: self.group_sizes(),
            params,
            mode,
        })
    }

    pub(crate) fn restore(&mut self, snapshot: &OptimizerState) -> Result<(), BallastError> {
        snapshot.check_compatible(self.variant, &self.flags, &self.group_sizes())?;
        let mut defaults = snapshot.defaults.clone();
        defaults.gradient_clipping = self.defaults.gradient_clipping.clone();
        defaults.update_clipping = self.defaults.update_clipping.clone();
        defaults.validate(self.variant, &self.flags)?;
        for options in &snapshot.groups {
            defaults.resolved(options).validate(self.variant, &self.flags)?;
        }

        let mut ids = Vec::new();
        for group in &self.param_groups {
            for param in &group.params {
                ids.push(param.read().map_err(|e| lock_error("read", e))?.id());
            }
        }
        let mut state = BTreeMap::new();
        for (&index, param_state) in &snapshot.params {
            let id = ids.get(index).copied().ok_or_else(|| {
                BallastError::StateError(format!("No parameter at position {}", index))
            })?;
            state.insert(id, param_state.clone());
        }

        self.defaults = defaults;
        for (group, options) in self.param_groups.iter_mut().zip(&snapshot.groups) {
            group.options = options.clone();
        }
        self.state = state;
        Ok(())
    }
}

/// Fresh state for the parameter at `position`.
pub(crate) fn fresh_state(cfg: &OptimizerConfig, position: usize) -> ParamState {
    ParamState::new(mix_seed(cfg.seed, position as u64))
}

impl Optimizer for BaseOptimizer {
    fn step(&mut self) -> Result<(), BallastError> {
        let default_clip = self.default_update_clip();
        let staged = self.stage(|cfg, index, existing, param| {
            let Some(grad) = param.grad() else {
                log::trace!("{}: no gradient, skipped", param.display_name());
                return Ok(None);
            };
            let mut state = existing
                .cloned()
                .unwrap_or_else(|| fresh_state(cfg, index));
            let out = self.transform(cfg, &mut state, param.tensor(), grad)?;
            let Some(update) = out.update else {
                return Ok(Some((state, None)));
            };
            let mut value = param.tensor().clone();
            if cfg.weight_decay != 0.0 {
                value.mul_scalar_(1.0 - out.lr * cfg.weight_decay);
            }
            let update = cfg.update_clipping.apply(&update, &value, default_clip)?;
            value.add_scaled_(&update, -out.lr)?;
            Ok(Some((state, Some(value))))
        })?;
        log::debug!("{}: stepping {} parameters", self.variant, staged.len());
        self.commit(staged)
    }

    fn zero_grad(&mut self) {
        for param in self.param_groups.iter().flat_map(|g| g.params.iter()) {
            match param.write() {
                Ok(mut guard) => guard.zero_grad(),
                Err(poisoned) => {
                    log::warn!("Lock for a parameter in zero_grad was poisoned. Recovering.");
                    poisoned.into_inner().zero_grad();
                }
            }
        }
    }

    fn add_param_group(&mut self, param_group: ParamGroup) -> Result<(), BallastError> {
        self.push_group(param_group)
    }

    fn param_groups(&self) -> &[ParamGroup] {
        &self.param_groups
    }

    fn param_groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.param_groups
    }

    fn state_dict(&self) -> Result<OptimizerState, BallastError> {
        self.snapshot(Mode::Train)
    }

    fn load_state_dict(&mut self, state_dict: &OptimizerState) -> Result<(), BallastError> {
        if state_dict.mode != Mode::Train {
            return Err(BallastError::StateError(
                "state was saved in eval mode".to_string(),
            ));
        }
        self.restore(state_dict)
    }
}

#[cfg(test)]
#[path = "driver_test.rs"]
mod tests;
