//! Scalar rounding to the narrow float formats used by the kernels.
//!
//! Values stay in `f32` storage; these functions snap them onto the grid of
//! the target format so that arithmetic afterwards sees exactly what the
//! device would.

use half::bf16;

/// Largest finite FP8 E4M3 (fn) magnitude.
pub const FP8_E4M3_MAX: f32 = 448.0;

/// Smallest normal exponent of E4M3 (bias 7).
const FP8_E4M3_MIN_EXP: i32 = -6;

/// Mantissa bits of E4M3.
const FP8_E4M3_MANTISSA_BITS: i32 = 3;

/// Round to the nearest FP8 E4M3 (fn) value, ties to even.
///
/// The fn variant has no infinities: anything that rounds past
/// [`FP8_E4M3_MAX`], and infinities themselves, become NaN. Subnormals below
/// `2^-6` share the quantum `2^-9`. Signed zero is kept.
pub fn round_fp8_e4m3(x: f32) -> f32 {
    if x.is_nan() || x.is_infinite() {
        return f32::NAN;
    }
    if x == 0.0 {
        return x;
    }
    let a = x.abs();
    let exp = ((a.to_bits() >> 23) & 0xff) as i32 - 127;
    let exp = exp.max(FP8_E4M3_MIN_EXP);
    let quantum = 2f32.powi(exp - FP8_E4M3_MANTISSA_BITS);
    let q = (a / quantum).round_ties_even() * quantum;
    if q > FP8_E4M3_MAX {
        f32::NAN
    } else {
        q.copysign(x)
    }
}

/// Round to the nearest BF16 value, ties to even.
pub fn round_bf16(x: f32) -> f32 {
    bf16::from_f32(x).to_f32()
}
