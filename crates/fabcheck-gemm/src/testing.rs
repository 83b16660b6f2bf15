//! Testing utilities shipped alongside the kernels.

use crate::error::GemmError;
use crate::tensor::Tensor;
use std::time::{Duration, Instant};

/// Names under which the testing module exports its utilities. `bench` is
/// exported as `bench_kineto` to match the accelerator library's module.
pub const EXPORTS: &[&str] = &["bench_kineto", "calc_diff", "count_bytes"];

/// `1 - 2·Σxy / Σ(x² + y²)`, accumulated in `f64`.
///
/// Zero for identical non-zero inputs. Two all-zero inputs give NaN, which
/// never passes a tolerance check.
pub fn calc_diff(x: &Tensor, y: &Tensor) -> Result<f64, GemmError> {
    if x.shape() != y.shape() {
        return Err(GemmError::Shape {
            op: "calc_diff",
            expected: format!("{:?}", x.shape()),
            found: format!("{:?}", y.shape()),
        });
    }
    let (mut xy, mut sq) = (0.0f64, 0.0f64);
    for (a, b) in x.data().iter().zip(y.data()) {
        let (a, b) = (*a as f64, *b as f64);
        xy += a * b;
        sq += a * a + b * b;
    }
    Ok(1.0 - 2.0 * xy / sq)
}

/// Device bytes occupied by `tensors`.
pub fn count_bytes(tensors: &[&Tensor]) -> usize {
    tensors
        .iter()
        .map(|t| t.len() * t.dtype().size_bytes())
        .sum()
}

/// Mean wall time of `f` over `iters` runs, after `warmup` untimed runs.
pub fn bench<F: FnMut()>(mut f: F, warmup: u32, iters: u32) -> Duration {
    for _ in 0..warmup {
        f();
    }
    let iters = iters.max(1);
    let start = Instant::now();
    for _ in 0..iters {
        f();
    }
    start.elapsed() / iters
}
