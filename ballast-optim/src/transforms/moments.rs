//! Adam-family moment transformations.
//!
//! All averages use [`beta_debias`] as their decay, which makes them
//! bias-corrected as stored: after `t` steps of a constant input `g` the
//! first moment is exactly `g`.

use crate::chain::{StepContext, StepOutcome};
use crate::optimizer_state::StateSlice;
use crate::schedule::beta_debias;
use ballast_core::{BallastError, Tensor};

const EXP_AVG: &str = "exp_avg";
const EXP_AVG_SQ: &str = "exp_avg_sq";

pub fn exp_avg(
    ctx: &StepContext<'_>,
    state: &mut StateSlice<'_>,
    v: Tensor,
) -> Result<StepOutcome, BallastError> {
    let mut m = state.tensor_or_zeros(EXP_AVG, v.shape())?;
    m.lerp_(&v, 1.0 - beta_debias(ctx.beta1, ctx.step))?;
    state.put_tensor(EXP_AVG, &m);
    Ok(StepOutcome::Update(m))
}

pub fn scale_by_exp_avg_sq(
    ctx: &StepContext<'_>,
    state: &mut StateSlice<'_>,
    v: Tensor,
) -> Result<StepOutcome, BallastError> {
    let mut s = state.tensor_or_zeros(EXP_AVG_SQ, v.shape())?;
    s.ema_sq_(&v, beta_debias(ctx.beta2, ctx.step))?;
    state.put_tensor(EXP_AVG_SQ, &s);
    Ok(StepOutcome::Update(v.div_sqrt_clamped(&s, ctx.eps)?))
}

pub fn update_by_adam(
    ctx: &StepContext<'_>,
    state: &mut StateSlice<'_>,
    v: Tensor,
) -> Result<StepOutcome, BallastError> {
    let mut m = state.tensor_or_zeros(EXP_AVG, v.shape())?;
    let mut s = state.tensor_or_zeros(EXP_AVG_SQ, v.shape())?;
    m.lerp_(&v, 1.0 - beta_debias(ctx.beta1, ctx.step))?;
    s.ema_sq_(&v, beta_debias(ctx.beta2, ctx.step))?;
    let update = m.div_sqrt_clamped(&s, ctx.eps)?;
    state.put_tensor(EXP_AVG, &m);
    state.put_tensor(EXP_AVG_SQ, &s);
    Ok(StepOutcome::Update(update))
}

/// LaProp: normalise by the updated second moment, then average.
pub fn update_by_laprop(
    ctx: &StepContext<'_>,
    state: &mut StateSlice<'_>,
    v: Tensor,
) -> Result<StepOutcome, BallastError> {
    let mut m = state.tensor_or_zeros(EXP_AVG, v.shape())?;
    let mut s = state.tensor_or_zeros(EXP_AVG_SQ, v.shape())?;
    s.ema_sq_(&v, beta_debias(ctx.beta2, ctx.step))?;
    let normalised = v.div_sqrt_clamped(&s, ctx.eps)?;
    m.lerp_(&normalised, 1.0 - beta_debias(ctx.beta1, ctx.step))?;
    state.put_tensor(EXP_AVG, &m);
    state.put_tensor(EXP_AVG_SQ, &s);
    Ok(StepOutcome::Update(m))
}

/// ADOPT: the second moment used to normalise a gradient never includes that
/// gradient, and the returned momentum lags one step.
///
/// Step 1 seeds the second moment, step 2 seeds the momentum; both skip.
pub fn update_by_adopt(
    ctx: &StepContext<'_>,
    state: &mut StateSlice<'_>,
    v: Tensor,
) -> Result<StepOutcome, BallastError> {
    let t = ctx.step;
    if t <= 1 {
        state.put_tensor(EXP_AVG_SQ, &v.map(|g| g * g));
        return Ok(StepOutcome::Skip);
    }
    let mut s = state.require_tensor(EXP_AVG_SQ, v.shape())?;
    let normalised = v.div_sqrt_clamped(&s, ctx.eps)?;
    if t == 2 {
        s.ema_sq_(&v, beta_debias(ctx.beta2, 2))?;
        state.put_tensor(EXP_AVG, &normalised);
        state.put_tensor(EXP_AVG_SQ, &s);
        return Ok(StepOutcome::Skip);
    }

    let mut m = state.require_tensor(EXP_AVG, v.shape())?;
    let update = m.clone();
    m.lerp_(&normalised, 1.0 - beta_debias(ctx.beta1, t - 2))?;
    s.ema_sq_(&v, beta_debias(ctx.beta2, t - 1))?;
    state.put_tensor(EXP_AVG, &m);
    state.put_tensor(EXP_AVG_SQ, &s);
    Ok(StepOutcome::Update(update))
}

#[cfg(test)]
#[path = "moments_test.rs"]
mod tests;
