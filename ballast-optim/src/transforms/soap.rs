//! SOAP: Adam run in the eigenbasis of Shampoo's per-axis statistics.
//!
//! Per shard state: `exp_avg`/`exp_avg_sq` in the rotated frame, and for each
//! preconditioned axis `i` the statistics `GG.i` and the basis `Q.i`
//! (columns ordered by decreasing eigenvalue estimate).

use crate::chain::{StepContext, StepOutcome};
use crate::config::SoapConfig;
use crate::layout::Layout;
use crate::optimizer_state::StateSlice;
use crate::schedule::{beta_debias, precond_probability, salt};
use ballast_core::ops::linalg::{eigh_op, matmul_op, qr_op, transpose_op};
use ballast_core::{BallastError, DType, Tensor};
use rand::Rng;

const EXP_AVG: &str = "exp_avg";
const EXP_AVG_SQ: &str = "exp_avg_sq";

fn gg_key(axis: usize) -> String {
    format!("GG.{}", axis)
}

fn q_key(axis: usize) -> String {
    format!("Q.{}", axis)
}

pub fn soap_step(
    ctx: &StepContext<'_>,
    state: &mut StateSlice<'_>,
    v: Tensor,
) -> Result<StepOutcome, BallastError> {
    let soap = &ctx.config.soap;
    let layout = Layout::new(v.shape(), soap.merge_dims, soap.split, soap.max_precond_dim);
    let refresh = refresh_due(ctx, soap)?;

    let mut parts = Vec::with_capacity(layout.shards().len());
    let mut initialised = false;
    for (k, g) in layout.gather(&v)?.into_iter().enumerate() {
        let mut shard = state.child(&k.to_string());
        match shard_step(ctx, soap, &mut shard, &g, refresh)? {
            Some(u) => parts.push(u),
            None => initialised = true,
        }
    }
    if initialised {
        return Ok(StepOutcome::Skip);
    }
    Ok(StepOutcome::Update(layout.scatter(parts)?))
}

/// Whether the bases are refreshed this step. Drawn once per parameter.
fn refresh_due(ctx: &StepContext<'_>, soap: &SoapConfig) -> Result<bool, BallastError> {
    if ctx.flags.use_precond_schedule {
        let (a, b) = soap.precond_scheduler.ok_or_else(|| {
            BallastError::ConfigurationError("precond_scheduler is not set".to_string())
        })?;
        let p = precond_probability(ctx.step, a, b);
        Ok(ctx.rng(salt::SOAP_SCHEDULE).gen::<f32>() < p)
    } else {
        let freq = soap.precondition_frequency.filter(|&f| f > 0).ok_or_else(|| {
            BallastError::ConfigurationError("precondition_frequency is not set".to_string())
        })?;
        Ok(ctx.step % freq == 0)
    }
}

/// Axes of `shape` that get a basis.
pub fn preconditioned_axes(shape: &[usize], soap: &SoapConfig) -> Vec<usize> {
    if shape.len() <= 1 && !soap.precondition_1d {
        return Vec::new();
    }
    (0..shape.len())
        .filter(|&i| shape[i] <= soap.max_precond_dim)
        .collect()
}

/// Eigenvectors of `gg` by decreasing eigenvalue; the identity if the
/// eigensolver fails.
fn initial_basis(gg: &Tensor) -> Tensor {
    let n = gg.shape()[0];
    match eigh_op(gg) {
        Ok((_, vectors)) if vectors.is_finite() => {
            let descending: Vec<usize> = (0..n).rev().collect();
            match vectors.index_select(1, &descending) {
                Ok(q) => q,
                Err(e) => {
                    log::warn!("SOAP: reordering eigenvectors failed ({}), using identity basis", e);
                    Tensor::eye(n)
                }
            }
        }
        Ok(_) => {
            log::warn!("SOAP: non-finite eigenvectors for a {}x{} block, using identity basis", n, n);
            Tensor::eye(n)
        }
        Err(e) => {
            log::warn!("SOAP: {}; using identity basis", e);
            Tensor::eye(n)
        }
    }
}

/// Projects `x` into (`into = true`) or out of the bases.
fn project(x: &Tensor, bases: &[(usize, Tensor)], into: bool) -> Result<Tensor, BallastError> {
    let mut out = x.clone();
    for (axis, q) in bases {
        out = if into {
            out.mode_product(*axis, &transpose_op(q)?)?
        } else {
            out.mode_product(*axis, q)?
        };
    }
    Ok(out)
}

/// One shard. Returns `None` on the initialising step.
fn shard_step(
    ctx: &StepContext<'_>,
    soap: &SoapConfig,
    state: &mut StateSlice<'_>,
    g: &Tensor,
    refresh: bool,
) -> Result<Option<Tensor>, BallastError> {
    let axes = preconditioned_axes(g.shape(), soap);
    if !state.contains(EXP_AVG) {
        for &i in &axes {
            let gg = g.mode_gram(i)?;
            let q = initial_basis(&gg);
            state.put_tensor_as(&gg_key(i), &gg, DType::F32);
            state.put_tensor_as(&q_key(i), &q, DType::F32);
        }
        state.put_tensor(EXP_AVG, &Tensor::zeros(g.shape()));
        state.put_tensor(EXP_AVG_SQ, &Tensor::zeros(g.shape()));
        return Ok(None);
    }

    let bases = axes
        .iter()
        .map(|&i| {
            let n = g.shape()[i];
            Ok((i, state.require_tensor(&q_key(i), &[n, n])?))
        })
        .collect::<Result<Vec<_>, BallastError>>()?;

    let t = ctx.step;
    let (beta1, beta2) = if soap.correct_bias {
        (beta_debias(ctx.beta1, t - 1), beta_debias(ctx.beta2, t - 1))
    } else {
        (ctx.beta1, ctx.beta2)
    };
    let rotated = project(g, &bases, true)?;
    let mut m = state.require_tensor(EXP_AVG, g.shape())?;
    let mut s = state.require_tensor(EXP_AVG_SQ, g.shape())?;
    m.lerp_(&rotated, 1.0 - beta1)?;
    s.ema_sq_(&rotated, beta2)?;
    let update = project(&m.div_sqrt_clamped(&s, ctx.eps)?, &bases, false)?;

    let weight = 1.0 - beta_debias(soap.shampoo_beta, t);
    for (i, _) in &bases {
        let n = g.shape()[*i];
        let mut gg = state.require_tensor(&gg_key(*i), &[n, n])?;
        gg.lerp_(&g.mode_gram(*i)?, weight)?;
        state.put_tensor_as(&gg_key(*i), &gg, DType::F32);
    }

    if refresh {
        for (i, q_old) in &bases {
            let n = g.shape()[*i];
            let gg = state.require_tensor(&gg_key(*i), &[n, n])?;
            if let Some((q_new, order)) = power_iteration(&gg, q_old, *i) {
                s = s.index_select(*i, &order)?;
                m = m.mode_product(*i, q_old)?.mode_product(*i, &transpose_op(&q_new)?)?;
                state.put_tensor_as(&q_key(*i), &q_new, DType::F32);
            }
        }
        log::debug!("SOAP: refreshed {} bases at step {}", bases.len(), t);
    }

    state.put_tensor(EXP_AVG, &m);
    state.put_tensor(EXP_AVG_SQ, &s);
    Ok(Some(update))
}

/// One power-iteration step on `gg` from `q`, re-orthonormalised by QR.
///
/// Columns are ordered by the eigenvalue estimates `qⱼᵀ·GG·qⱼ`, largest first;
/// returns the new basis and that ordering, or `None` (stale basis kept) when
/// the result is unusable.
fn power_iteration(gg: &Tensor, q: &Tensor, axis: usize) -> Option<(Tensor, Vec<usize>)> {
    let attempt = || -> Result<(Tensor, Vec<usize>), BallastError> {
        let n = q.shape()[0];
        let tmp = matmul_op(gg, q)?;
        let estimates: Vec<f32> = (0..n)
            .map(|j| (0..n).map(|r| q.data()[r * n + j] * tmp.data()[r * n + j]).sum())
            .collect();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| estimates[b].total_cmp(&estimates[a]));
        let (q_new, _) = qr_op(&tmp.index_select(1, &order)?)?;
        Ok((q_new, order))
    };
    match attempt() {
        Ok((q_new, order)) if q_new.is_finite() => Some((q_new, order)),
        Ok(_) => {
            log::warn!("SOAP: non-finite basis for axis {}, keeping the previous one", axis);
            None
        }
        Err(e) => {
            log::warn!("SOAP: basis refresh for axis {} failed ({}), keeping the previous one", axis, e);
            None
        }
    }
}

#[cfg(test)]
#[path = "soap_test.rs"]
mod tests;
