//! Step-dependent scalars: warmup, debiased betas and update probabilities,
//! plus the deterministic per-step random streams.

use crate::config::{ProbSchedule, UpdateProbability};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Salts separating the random streams drawn within one step.
pub(crate) mod salt {
    pub const ROUNDING: u64 = 1;
    pub const PSGD_PROBE: u64 = 2;
    pub const PSGD_SCHEDULE: u64 = 3;
    pub const SOAP_SCHEDULE: u64 = 4;
    pub const MARS: u64 = 5;
    pub const SCHEDULE_FREE: u64 = 6;
}

/// Linear warmup: `lr · step / warmup_steps` while `step < warmup_steps`.
pub fn warmup_lr(lr: f32, step: u64, warmup_steps: u64) -> f32 {
    if step < warmup_steps {
        lr * step as f32 / warmup_steps as f32
    } else {
        lr
    }
}

/// Bias-corrected decay for an EMA at `step` (1-based):
/// `1 - (1 - beta) / (1 - beta^step)`.
///
/// Using this as the EMA decay makes the running average unbiased, so no
/// separate correction is applied when reading it. At step 1 it is 0.
pub fn beta_debias(beta: f32, step: u64) -> f32 {
    if step == 0 || beta == 0.0 {
        return 0.0;
    }
    let b = beta as f64;
    let exponent = step.min(i32::MAX as u64) as i32;
    (1.0 - (1.0 - b) / (1.0 - b.powi(exponent))) as f32
}

/// Annealed second-moment decay `1 - step^(-scale)`.
pub fn palm_beta2(step: u64, scale: f32) -> f32 {
    let t = step.max(1) as f64;
    (1.0 - t.powf(-(scale as f64))) as f32
}

/// PSGD factor-update probability after `n` completed schedule steps.
pub fn update_probability(p: &UpdateProbability, n: u64) -> f32 {
    match p {
        UpdateProbability::Constant(c) => *c,
        UpdateProbability::Schedule(s) => scheduled_probability(s, n),
    }
}

fn scheduled_probability(s: &ProbSchedule, n: u64) -> f32 {
    let shifted = n as f64 - s.flat_start as f64;
    let p = s.max_prob as f64 * (-(s.decay as f64) * shifted).exp();
    (p as f32).clamp(s.min_prob, s.max_prob)
}

/// SOAP basis-refresh probability `1 / (log10(step^a)^b + 1)`.
pub fn precond_probability(step: u64, a: f32, b: f32) -> f32 {
    let t = step.max(1) as f64;
    let x = t.powf(a as f64).log10();
    let p = 1.0 / (x.powf(b as f64) + 1.0);
    if p.is_finite() {
        p as f32
    } else {
        1.0
    }
}

/// SplitMix64 finaliser.
pub fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

pub fn mix_seed(a: u64, b: u64) -> u64 {
    splitmix64(a ^ splitmix64(b))
}

/// Random stream for one parameter, one step and one purpose.
///
/// Streams depend only on `(seed, step, salt)`, so a restored optimizer draws
/// the same numbers as the one it was saved from.
pub fn step_rng(seed: u64, step: u64, salt: u64) -> StdRng {
    StdRng::seed_from_u64(mix_seed(mix_seed(seed, step), salt))
}

#[cfg(test)]
#[path = "schedule_test.rs"]
mod tests;
