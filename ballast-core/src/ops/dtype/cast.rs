use rand::Rng;

/// Rounds an `f32` to the nearest bfloat16 (ties to even). NaN stays NaN.
pub fn round_bf16_nearest(x: f32) -> u16 {
    let bits = x.to_bits();
    if x.is_nan() {
        return ((bits >> 16) as u16) | 0x0040;
    }
    let rounding_bias = 0x7FFF + ((bits >> 16) & 1);
    ((bits + rounding_bias) >> 16) as u16
}

/// Rounds an `f32` to bfloat16 stochastically: the value is rounded up with
/// probability proportional to the discarded low mantissa bits.
///
/// Values that are already exactly representable are returned unchanged, so
/// re-encoding a decoded value never drifts. Non-finite values round to nearest.
pub fn round_bf16_stochastic<R: Rng + ?Sized>(x: f32, rng: &mut R) -> u16 {
    if !x.is_finite() {
        return round_bf16_nearest(x);
    }
    let bits = x.to_bits();
    let noise: u32 = rng.gen_range(0..(1u32 << 16));
    let rounded = bits.wrapping_add(noise) & 0xFFFF_0000;
    // Rounding the largest finite magnitudes up would produce an infinity.
    if !f32::from_bits(rounded).is_finite() {
        return (bits >> 16) as u16;
    }
    (rounded >> 16) as u16
}

/// Widens bfloat16 bits back to `f32`. Exact.
pub fn bf16_to_f32(bits: u16) -> f32 {
    f32::from_bits((bits as u32) << 16)
}

#[cfg(test)]
#[path = "cast_test.rs"]
mod tests;
