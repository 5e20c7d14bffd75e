//! PSGD with a Kronecker-factored preconditioner.
//!
//! Each shard keeps one factor `Q.i` per axis, either a diagonal vector or an
//! upper-triangular matrix (optionally packed row by row). The preconditioned
//! gradient is `G ×ᵢ QᵢᵀQᵢ`. Factors are fitted with a random probe on steps
//! selected by the update-probability schedule.

use crate::chain::{StepContext, StepOutcome};
use crate::config::{MemorySaveMode, PsgdConfig};
use crate::layout::Layout;
use crate::optimizer_state::StateSlice;
use crate::schedule::{salt, update_probability};
use ballast_core::ops::linalg::{
    matmul_op, pack_triu_op, packed_len, solve_upper_transposed_along, spectral_norm_lower_bound,
    transpose_op, triu_op, unpack_triu_op,
};
use ballast_core::tensor::create::randn;
use ballast_core::{BallastError, DType, Tensor};
use rand::rngs::StdRng;
use rand::Rng;

const PROB_STEP: &str = "prob_step";
const CUMULATIVE_PROB: &str = "cumulative_prob";

fn q_key(axis: usize) -> String {
    format!("Q.{}", axis)
}

fn cache_key(axis: usize) -> String {
    format!("Q_cache.{}", axis)
}

/// A per-axis factor.
#[derive(Debug, Clone, PartialEq)]
pub enum Factor {
    Diag(Tensor),
    Triangular(Tensor),
}

impl Factor {
    fn is_finite(&self) -> bool {
        match self {
            Factor::Diag(q) | Factor::Triangular(q) => q.is_finite(),
        }
    }

    /// `x ×_axis Q`
    fn apply(&self, x: &Tensor, axis: usize) -> Result<Tensor, BallastError> {
        match self {
            Factor::Diag(q) => x.mode_scale(axis, q),
            Factor::Triangular(q) => x.mode_product(axis, q),
        }
    }

    /// `x ×_axis Q⁻ᵀ`
    fn solve(&self, x: &Tensor, axis: usize) -> Result<Tensor, BallastError> {
        match self {
            Factor::Diag(q) => {
                if let Some(i) = q.data().iter().position(|&d| d == 0.0 || !d.is_finite()) {
                    return Err(BallastError::NumericalDegeneracy {
                        operation: "psgd diagonal solve".to_string(),
                        reason: format!("factor entry {} is singular", i),
                    });
                }
                x.mode_scale(axis, &q.map(|d| 1.0 / d))
            }
            Factor::Triangular(q) => solve_upper_transposed_along(x, axis, q),
        }
    }

    /// `QᵀQ` (the squared diagonal for diagonal factors).
    fn gram(&self) -> Result<Tensor, BallastError> {
        match self {
            Factor::Diag(q) => Ok(q.map(|d| d * d)),
            Factor::Triangular(q) => matmul_op(&transpose_op(q)?, q),
        }
    }
}

/// Which axes of `shape` get diagonal factors.
pub fn diagonal_axes(shape: &[usize], psgd: &PsgdConfig) -> Vec<bool> {
    let rank = shape.len();
    let forced: Vec<bool> = match psgd.memory_save_mode {
        None => vec![false; rank],
        Some(MemorySaveMode::AllDiag) => vec![true; rank],
        Some(MemorySaveMode::OneDiag) => {
            let largest = (0..rank).max_by_key(|&i| shape[i]);
            (0..rank).map(|i| Some(i) == largest).collect()
        }
    };
    (0..rank)
        .map(|i| {
            shape[i] == 1
                || shape[i] > psgd.max_size_triangular
                || rank < psgd.min_ndim_triangular
                || forced[i]
        })
        .collect()
}

fn initial_factors(shape: &[usize], psgd: &PsgdConfig) -> Vec<Factor> {
    let scale = psgd.precond_init_scale.powf(1.0 / shape.len().max(1) as f32);
    diagonal_axes(shape, psgd)
        .into_iter()
        .zip(shape)
        .map(|(diag, &n)| {
            if diag {
                Factor::Diag(Tensor::full(&[n], scale))
            } else {
                Factor::Triangular(ballast_core::tensor::create::eye_scaled(n, scale))
            }
        })
        .collect()
}

fn load_factors(
    state: &StateSlice<'_>,
    shape: &[usize],
    psgd: &PsgdConfig,
) -> Result<Option<Vec<Factor>>, BallastError> {
    if !(0..shape.len()).all(|i| state.contains(&q_key(i))) {
        return Ok(None);
    }
    let mut factors = Vec::with_capacity(shape.len());
    for (i, diag) in diagonal_axes(shape, psgd).into_iter().enumerate() {
        let n = shape[i];
        let factor = if diag {
            Factor::Diag(state.require_tensor(&q_key(i), &[n])?)
        } else if psgd.store_triu_as_line {
            let line = state.require_tensor(&q_key(i), &[packed_len(n)])?;
            Factor::Triangular(unpack_triu_op(&line, n)?)
        } else {
            Factor::Triangular(state.require_tensor(&q_key(i), &[n, n])?)
        };
        factors.push(factor);
    }
    Ok(Some(factors))
}

fn store_factors(
    state: &mut StateSlice<'_>,
    factors: &[Factor],
    psgd: &PsgdConfig,
) -> Result<(), BallastError> {
    for (i, factor) in factors.iter().enumerate() {
        match factor {
            Factor::Diag(q) => state.put_tensor_as(&q_key(i), q, psgd.q_dtype),
            Factor::Triangular(q) if psgd.store_triu_as_line => {
                state.put_tensor_as(&q_key(i), &pack_triu_op(q)?, psgd.q_dtype)
            }
            Factor::Triangular(q) => state.put_tensor_as(&q_key(i), q, psgd.q_dtype),
        }
    }
    Ok(())
}

/// Stores `factors` in `q_dtype` and returns them as stored, so every later
/// use (including the cache) sees the rounded values.
fn persist_factors(
    state: &mut StateSlice<'_>,
    factors: &[Factor],
    shape: &[usize],
    psgd: &PsgdConfig,
) -> Result<Vec<Factor>, BallastError> {
    store_factors(state, factors, psgd)?;
    load_factors(state, shape, psgd)?.ok_or_else(|| {
        BallastError::InternalError("PSGD factors missing right after being stored".to_string())
    })
}

fn store_cache(state: &mut StateSlice<'_>, factors: &[Factor]) -> Result<Vec<Tensor>, BallastError> {
    let grams = factors.iter().map(Factor::gram).collect::<Result<Vec<_>, _>>()?;
    for (i, g) in grams.iter().enumerate() {
        state.put_tensor_as(&cache_key(i), g, DType::F32);
    }
    Ok(grams)
}

/// Per-axis `QᵀQ`, from the cache when enabled and present.
fn preconditioner_grams(
    state: &mut StateSlice<'_>,
    factors: &[Factor],
    cached: bool,
) -> Result<Vec<Tensor>, BallastError> {
    if !cached {
        return factors.iter().map(Factor::gram).collect();
    }
    let all_present = (0..factors.len()).all(|i| state.contains(&cache_key(i)));
    if !all_present {
        return store_cache(state, factors);
    }
    factors
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let shape = match f {
                Factor::Diag(q) => vec![q.numel()],
                Factor::Triangular(q) => q.shape().to_vec(),
            };
            state.require_tensor(&cache_key(i), &shape)
        })
        .collect()
}

/// `G ×ᵢ QᵢᵀQᵢ`
fn precondition(g: &Tensor, factors: &[Factor], grams: &[Tensor]) -> Result<Tensor, BallastError> {
    let mut out = g.clone();
    for (axis, (factor, gram)) in factors.iter().zip(grams).enumerate() {
        out = match factor {
            Factor::Diag(_) => out.mode_scale(axis, gram)?,
            Factor::Triangular(_) => out.mode_product(axis, gram)?,
        };
    }
    Ok(out)
}

/// One fitting step of every factor on `src` with a Gaussian probe.
pub fn update_factors(
    factors: &[Factor],
    src: &Tensor,
    precond_lr: f32,
    rng: &mut StdRng,
) -> Result<Vec<Factor>, BallastError> {
    let probe = randn(src.shape(), rng);
    let mut a = src.clone();
    let mut b = probe;
    for (axis, factor) in factors.iter().enumerate() {
        a = factor.apply(&a, axis)?;
        b = factor.solve(&b, axis)?;
    }

    let mut updated = Vec::with_capacity(factors.len());
    for (axis, factor) in factors.iter().enumerate() {
        let next = match factor {
            Factor::Triangular(q) => {
                let t1 = a.mode_gram(axis)?;
                let t2 = b.mode_gram(axis)?;
                let diff = t1.zip_map(&t2, "psgd factor update", |x, y| x - y)?;
                let total = t1.zip_map(&t2, "psgd factor update", |x, y| x + y)?;
                let norm = spectral_norm_lower_bound(&total)?.max(f32::MIN_POSITIVE);
                let mut q_new = q.clone();
                q_new.add_scaled_(&matmul_op(&triu_op(&diff)?, q)?, -precond_lr / norm)?;
                Factor::Triangular(q_new)
            }
            Factor::Diag(q) => {
                let t1 = a.mode_sum_sq(axis)?;
                let t2 = b.mode_sum_sq(axis)?;
                let diff = t1.zip_map(&t2, "psgd factor update", |x, y| x - y)?;
                let total = t1.zip_map(&t2, "psgd factor update", |x, y| x + y)?;
                let norm = total.max_abs().max(f32::MIN_POSITIVE);
                let mut step = diff;
                step.mul_(q)?;
                let mut q_new = q.clone();
                q_new.add_scaled_(&step, -precond_lr / norm)?;
                Factor::Diag(q_new)
            }
        };
        updated.push(next);
    }
    Ok(updated)
}

/// Draws this step's update decision. One draw per parameter.
fn should_update(ctx: &StepContext<'_>, state: &mut StateSlice<'_>) -> Result<bool, BallastError> {
    let psgd = &ctx.config.psgd;
    let n = state.count(PROB_STEP)?.unwrap_or(0);
    let schedule = psgd.update_probability.unwrap_or_default();
    let p = update_probability(&schedule, n);
    state.set_count(PROB_STEP, n + 1);
    if psgd.stochastic_schedule {
        return Ok(ctx.rng(salt::PSGD_SCHEDULE).gen::<f32>() < p);
    }
    let old = state.scalar(CUMULATIVE_PROB)?.unwrap_or(0.0);
    let new = old + p as f64;
    state.set_scalar(CUMULATIVE_PROB, new);
    Ok(new.floor() > old.floor())
}

/// Fits the factors, keeping the old ones if the fit degenerates.
fn refit(factors: Vec<Factor>, src: &Tensor, psgd: &PsgdConfig, rng: &mut StdRng) -> (Vec<Factor>, bool) {
    match update_factors(&factors, src, psgd.precond_lr, rng) {
        Ok(next) if next.iter().all(Factor::is_finite) => (next, true),
        Ok(_) => {
            log::warn!("PSGD: non-finite factor update, keeping the previous preconditioner");
            (factors, false)
        }
        Err(e) => {
            log::warn!("PSGD: factor update failed ({}), keeping the previous preconditioner", e);
            (factors, false)
        }
    }
}

/// Refits the factors and, if they changed, stores them and refreshes the cache.
fn refit_and_store(
    shard: &mut StateSlice<'_>,
    factors: Vec<Factor>,
    src: &Tensor,
    shape: &[usize],
    ctx: &StepContext<'_>,
    rng: &mut StdRng,
) -> Result<Vec<Factor>, BallastError> {
    let psgd = &ctx.config.psgd;
    let (next, changed) = refit(factors, src, psgd, rng);
    if !changed {
        return Ok(next);
    }
    let stored = persist_factors(shard, &next, shape, psgd)?;
    if ctx.flags.cached {
        store_cache(shard, &stored)?;
    }
    Ok(stored)
}

pub fn psgd_step(
    ctx: &StepContext<'_>,
    state: &mut StateSlice<'_>,
    v: Tensor,
) -> Result<StepOutcome, BallastError> {
    let psgd = &ctx.config.psgd;
    let layout = Layout::new(v.shape(), psgd.merge_dims, psgd.split, psgd.max_size_triangular);
    let src = if psgd.momentum_into_precond_update {
        v.clone()
    } else {
        ctx.grad.clone()
    };
    let do_update = should_update(ctx, state)?;
    let mut probe_rng = ctx.rng(salt::PSGD_PROBE);
    let delayed = ctx.flags.delayed;
    let cached = ctx.flags.cached;

    let grads = layout.gather(&v)?;
    let sources = layout.gather(&src)?;
    let mut parts = Vec::with_capacity(grads.len());
    for (k, (g, s)) in grads.iter().zip(&sources).enumerate() {
        let mut shard = state.child(&k.to_string());
        let mut factors = match load_factors(&shard, g.shape(), psgd)? {
            Some(f) => f,
            None => persist_factors(&mut shard, &initial_factors(g.shape(), psgd), g.shape(), psgd)?,
        };

        let out = if delayed {
            let grams = preconditioner_grams(&mut shard, &factors, cached)?;
            let out = precondition(g, &factors, &grams)?;
            if do_update {
                refit_and_store(&mut shard, factors, s, g.shape(), ctx, &mut probe_rng)?;
            }
            out
        } else {
            if do_update {
                factors = refit_and_store(&mut shard, factors, s, g.shape(), ctx, &mut probe_rng)?;
            }
            let grams = preconditioner_grams(&mut shard, &factors, cached)?;
            precondition(g, &factors, &grams)?
        };
        parts.push(out);
    }
    if do_update {
        log::trace!("PSGD: preconditioner updated at step {}", ctx.step);
    }
    Ok(StepOutcome::Update(layout.scatter(parts)?))
}

#[cfg(test)]
#[path = "psgd_test.rs"]
mod tests;
