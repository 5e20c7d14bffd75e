//! Schedule-free averaging over the RMSprop-style chain.
//!
//! In train mode the parameter holds the interpolated point `y`; the state
//! holds the base sequence `z` together with the running averaging weight.
//! `eval()` swaps the parameter to the averaged point `x` and `train()` swaps
//! it back.

use crate::chain::Chain;
use crate::config::{FeatureFlags, OptimizerConfig, Variant};
use crate::driver::{fresh_state, BaseOptimizer};
use crate::optimizer_state::{Mode, OptimizerState, StateSlice};
use crate::optimizer_trait::Optimizer;
use crate::param_group::{ParamGroup, ParamRef};
use crate::schedule::{salt, step_rng};
use ballast_core::{BallastError, DType};

const NAMESPACE: &str = "sf";
const Z: &str = "z";
const WEIGHT_SUM: &str = "weight_sum";
const LR_MAX: &str = "lr_max";
/// Train point saved while in eval mode.
const STASH: &str = "y";

#[derive(Debug)]
pub struct ScheduleFreeOptimizer {
    base: BaseOptimizer,
    mode: Mode,
}

impl ScheduleFreeOptimizer {
    /// # Errors
    /// `ConfigurationError` if `variant` is not schedule-free, for invalid
    /// settings (including `betas.0 == 0`), or for duplicated parameters.
    pub fn new(
        variant: Variant,
        flags: FeatureFlags,
        params: Vec<ParamRef>,
        config: OptimizerConfig,
    ) -> Result<Self, BallastError> {
        if !variant.is_schedule_free() {
            return Err(BallastError::ConfigurationError(format!(
                "{} is not a schedule-free optimizer",
                variant
            )));
        }
        let chain = Chain::for_variant(variant, &flags);
        let base = BaseOptimizer::build(variant, flags, params, config, chain)?;
        Ok(ScheduleFreeOptimizer {
            base,
            mode: Mode::Train,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn base(&self) -> &BaseOptimizer {
        &self.base
    }

    /// Switches parameters to the averaged point `x`. No-op if already in eval mode.
    pub fn eval(&mut self) -> Result<(), BallastError> {
        self.switch(Mode::Eval)
    }

    /// Switches parameters back to the train point `y`. No-op if already in train mode.
    pub fn train(&mut self) -> Result<(), BallastError> {
        self.switch(Mode::Train)
    }

    fn switch(&mut self, target: Mode) -> Result<(), BallastError> {
        if self.mode == target {
            return Ok(());
        }
        let staged = self.base.stage(|cfg, _, existing, param| {
            let Some(existing) = existing else {
                return Ok(None);
            };
            let mut state = existing.clone();
            let beta1 = cfg.betas.0;
            let mut rng = step_rng(state.seed, state.step, salt::ROUNDING);
            let mut sf = StateSlice::new(&mut state.values, NAMESPACE, cfg.storage_dtype, &mut rng);
            if !sf.contains(Z) {
                return Ok(None);
            }
            let z = sf.require_tensor(Z, param.shape())?;
            let value = match target {
                Mode::Eval => {
                    let y = param.tensor();
                    sf.put_tensor_as(STASH, y, DType::F32);
                    let mut x = y.clone();
                    x.lerp_(&z, 1.0 - 1.0 / beta1)?;
                    x
                }
                Mode::Train if sf.contains(STASH) => {
                    let y = sf.require_tensor(STASH, param.shape())?;
                    sf.remove(STASH);
                    y
                }
                Mode::Train => {
                    let mut y = param.tensor().clone();
                    y.lerp_(&z, 1.0 - beta1)?;
                    y
                }
            };
            Ok(Some((state, Some(value))))
        })?;
        log::debug!("{}: switching {} parameters to {:?}", self.base.variant(), staged.len(), target);
        self.base.commit(staged)?;
        self.mode = target;
        Ok(())
    }
}

impl Optimizer for ScheduleFreeOptimizer {
    fn step(&mut self) -> Result<(), BallastError> {
        if self.mode == Mode::Eval {
            return Err(BallastError::InvalidMode(
                "step() called in eval mode; call train() first".to_string(),
            ));
        }
        let default_clip = self.base.default_update_clip();
        let base = &self.base;
        let staged = base.stage(|cfg, index, existing, param| {
            let Some(grad) = param.grad() else {
                log::trace!("{}: no gradient, skipped", param.display_name());
                return Ok(None);
            };
            let mut state = existing
                .cloned()
                .unwrap_or_else(|| fresh_state(cfg, index));
            let y = param.tensor();
            let out = base.transform(cfg, &mut state, y, grad)?;
            let Some(update) = out.update else {
                return Ok(Some((state, None)));
            };
            let mut u = cfg.update_clipping.apply(&update, y, default_clip)?;
            if cfg.weight_decay != 0.0 {
                u.add_scaled_(y, cfg.weight_decay)?;
            }

            let mut rng = step_rng(state.seed, out.step, salt::SCHEDULE_FREE);
            let mut sf = StateSlice::new(&mut state.values, NAMESPACE, cfg.storage_dtype, &mut rng);
            let mut z = if sf.contains(Z) {
                sf.require_tensor(Z, y.shape())?
            } else {
                y.clone()
            };
            let lr = out.lr as f64;
            let lr_max = sf.scalar(LR_MAX)?.unwrap_or(-1.0).max(lr);
            let weight = lr_max.powf(cfg.weight_lr_power as f64)
                * (out.step.max(1) as f64).powf(cfg.r as f64);
            let weight_sum = sf.scalar(WEIGHT_SUM)?.unwrap_or(0.0) + weight;
            let ckp = if weight_sum == 0.0 {
                0.0
            } else {
                (weight / weight_sum) as f32
            };

            let mut value = y.clone();
            value.lerp_(&z, ckp)?;
            value.add_scaled_(&u, out.lr * (cfg.betas.0 * (1.0 - ckp) - 1.0))?;
            z.add_scaled_(&u, -out.lr)?;

            sf.put_tensor(Z, &z);
            sf.set_scalar(LR_MAX, lr_max);
            sf.set_scalar(WEIGHT_SUM, weight_sum);
            Ok(Some((state, Some(value))))
        })?;
        log::debug!("{}: stepping {} parameters", self.base.variant(), staged.len());
        self.base.commit(staged)
    }

    fn zero_grad(&mut self) {
        self.base.zero_grad()
    }

    fn add_param_group(&mut self, param_group: ParamGroup) -> Result<(), BallastError> {
        self.base.add_param_group(param_group)
    }

    fn param_groups(&self) -> &[ParamGroup] {
        self.base.param_groups()
    }

    fn param_groups_mut(&mut self) -> &mut [ParamGroup] {
        self.base.param_groups_mut()
    }

    fn state_dict(&self) -> Result<OptimizerState, BallastError> {
        self.base.snapshot(self.mode)
    }

    /// Restores state and the mode it was saved in. The parameters are taken
    /// to hold the point of that mode.
    ///
    /// # Errors
    /// `InvalidMode` while in eval mode, since the parameters then hold `x`
    /// of the current state; call `train()` first.
    fn load_state_dict(&mut self, state_dict: &OptimizerState) -> Result<(), BallastError> {
        if self.mode == Mode::Eval {
            return Err(BallastError::InvalidMode(
                "cannot load state in eval mode, call train() first".to_string(),
            ));
        }
        self.base.restore(state_dict)?;
        self.mode = state_dict.mode;
        Ok(())
    }
}

#[cfg(test)]
#[path = "schedule_free_test.rs"]
mod tests;
