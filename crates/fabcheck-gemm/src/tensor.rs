//! Row-major 2-D host tensors with a logical element type.
//!
//! Storage is always `f32`; the [`DType`] records which grid the values have
//! been rounded onto.

use crate::error::GemmError;
use crate::fp8::{round_bf16, round_fp8_e4m3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fmt;
use std::ops::Range;

/// Logical element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    F32,
    Bf16,
    Fp8E4m3,
}

impl DType {
    /// Bytes per element on the device.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::Bf16 => 2,
            DType::Fp8E4m3 => 1,
        }
    }

    /// Snap a value onto this type's grid.
    pub fn round(self, x: f32) -> f32 {
        match self {
            DType::F32 => x,
            DType::Bf16 => round_bf16(x),
            DType::Fp8E4m3 => round_fp8_e4m3(x),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F32 => "float32",
            DType::Bf16 => "bfloat16",
            DType::Fp8E4m3 => "float8_e4m3fn",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    rows: usize,
    cols: usize,
    dtype: DType,
    data: Vec<f32>,
}

impl Tensor {
    pub fn zeros(rows: usize, cols: usize, dtype: DType) -> Self {
        Self {
            rows,
            cols,
            dtype,
            data: vec![0.0; rows * cols],
        }
    }

    /// Wrap `data`, rounding every element to `dtype`.
    pub fn from_vec(
        rows: usize,
        cols: usize,
        dtype: DType,
        mut data: Vec<f32>,
    ) -> Result<Self, GemmError> {
        if data.len() != rows * cols {
            return Err(GemmError::Shape {
                op: "from_vec",
                expected: format!("{} elements", rows * cols),
                found: format!("{} elements", data.len()),
            });
        }
        for v in &mut data {
            *v = dtype.round(*v);
        }
        Ok(Self {
            rows,
            cols,
            dtype,
            data,
        })
    }

    /// Standard normal `f32` samples (Box-Muller).
    pub fn randn<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Self {
        let len = rows * cols;
        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            // 1 - [0, 1) keeps the log argument away from zero.
            let u1: f64 = 1.0 - rng.gen::<f64>();
            let u2: f64 = rng.gen();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = TAU * u2;
            data.push((r * theta.cos()) as f32);
            if data.len() < len {
                data.push((r * theta.sin()) as f32);
            }
        }
        Self {
            rows,
            cols,
            dtype: DType::F32,
            data,
        }
    }

    /// Copy with every element rounded to `dtype`.
    pub fn to_dtype(&self, dtype: DType) -> Tensor {
        Tensor {
            rows: self.rows,
            cols: self.cols,
            dtype,
            data: self.data.iter().map(|v| dtype.round(*v)).collect(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Store `value` at `(i, j)` after rounding it to this tensor's dtype.
    pub(crate) fn set(&mut self, i: usize, j: usize, value: f32) {
        self.data[i * self.cols + j] = self.dtype.round(value);
    }

    /// Copy of a contiguous range of rows.
    pub fn slice_rows(&self, range: Range<usize>) -> Result<Tensor, GemmError> {
        if range.start > range.end || range.end > self.rows {
            return Err(GemmError::Shape {
                op: "slice_rows",
                expected: format!("rows within 0..{}", self.rows),
                found: format!("{range:?}"),
            });
        }
        Ok(Tensor {
            rows: range.len(),
            cols: self.cols,
            dtype: self.dtype,
            data: self.data[range.start * self.cols..range.end * self.cols].to_vec(),
        })
    }

    /// Stack tensors vertically, in order.
    pub fn concat_rows(parts: &[Tensor]) -> Result<Tensor, GemmError> {
        let Some(first) = parts.first() else {
            return Err(GemmError::Shape {
                op: "concat_rows",
                expected: "at least one tensor".to_string(),
                found: "none".to_string(),
            });
        };
        let mut data = Vec::with_capacity(parts.iter().map(Tensor::len).sum());
        let mut rows = 0;
        for part in parts {
            if part.cols != first.cols || part.dtype != first.dtype {
                return Err(GemmError::Shape {
                    op: "concat_rows",
                    expected: format!("[_, {}] {}", first.cols, first.dtype),
                    found: format!("[{}, {}] {}", part.rows, part.cols, part.dtype),
                });
            }
            rows += part.rows;
            data.extend_from_slice(&part.data);
        }
        Ok(Tensor {
            rows,
            cols: first.cols,
            dtype: first.dtype,
            data,
        })
    }

    /// `self · rhs` for `self: m×k`, `rhs: k×n`.
    ///
    /// Accumulates in `f32` and rounds the result to the shared operand dtype.
    pub fn matmul(&self, rhs: &Tensor) -> Result<Tensor, GemmError> {
        self.check_mm_operands("mm", rhs)?;
        if self.cols != rhs.rows {
            return Err(GemmError::Shape {
                op: "mm",
                expected: format!("rhs with {} rows", self.cols),
                found: format!("[{}, {}]", rhs.rows, rhs.cols),
            });
        }
        let (m, k, n) = (self.rows, self.cols, rhs.cols);
        let mut out = Tensor::zeros(m, n, self.dtype);
        for i in 0..m {
            let a = self.row(i);
            for j in 0..n {
                let mut acc = 0.0f32;
                for (p, av) in a.iter().enumerate().take(k) {
                    acc += av * rhs.data[p * n + j];
                }
                out.set(i, j, acc);
            }
        }
        Ok(out)
    }

    /// `self · rhsᵀ` for `self: m×k`, `rhs: n×k`.
    pub fn matmul_nt(&self, rhs: &Tensor) -> Result<Tensor, GemmError> {
        self.check_mm_operands("mm", rhs)?;
        if self.cols != rhs.cols {
            return Err(GemmError::Shape {
                op: "mm",
                expected: format!("rhsᵀ with {} rows", self.cols),
                found: format!("[{}, {}]", rhs.cols, rhs.rows),
            });
        }
        let mut out = Tensor::zeros(self.rows, rhs.rows, self.dtype);
        for i in 0..self.rows {
            for j in 0..rhs.rows {
                out.set(i, j, dot(self.row(i), rhs.row(j)));
            }
        }
        Ok(out)
    }

    fn check_mm_operands(&self, op: &'static str, rhs: &Tensor) -> Result<(), GemmError> {
        if self.dtype == DType::Fp8E4m3 {
            return Err(GemmError::DType {
                op,
                dtype: self.dtype,
            });
        }
        if self.dtype != rhs.dtype {
            return Err(GemmError::DType {
                op,
                dtype: rhs.dtype,
            });
        }
        Ok(())
    }
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn t(rows: usize, cols: usize, data: &[f32]) -> Tensor {
        Tensor::from_vec(rows, cols, DType::F32, data.to_vec()).unwrap()
    }

    #[test]
    fn test_from_vec_checks_length() {
        assert!(Tensor::from_vec(2, 2, DType::F32, vec![1.0; 3]).is_err());
        let fp8 = Tensor::from_vec(1, 2, DType::Fp8E4m3, vec![3.3, 500.0]).unwrap();
        assert_eq!(fp8.data()[0], 3.25);
        assert!(fp8.data()[1].is_nan());
    }

    #[test]
    fn test_randn_is_standard_normal() {
        let mut rng = StdRng::seed_from_u64(42);
        let x = Tensor::randn(256, 256, &mut rng);
        assert_eq!(x.shape(), (256, 256));
        assert_eq!(x.dtype(), DType::F32);
        let n = x.len() as f64;
        let mean = x.data().iter().map(|v| *v as f64).sum::<f64>() / n;
        let var = x.data().iter().map(|v| (*v as f64 - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 0.02, "mean {mean}");
        assert!((var - 1.0).abs() < 0.03, "var {var}");
    }

    #[test]
    fn test_randn_odd_length_and_seeded() {
        let a = Tensor::randn(3, 3, &mut StdRng::seed_from_u64(7));
        let b = Tensor::randn(3, 3, &mut StdRng::seed_from_u64(7));
        assert_eq!(a.len(), 9);
        assert_eq!(a, b);
    }

    #[test]
    fn test_matmul() {
        let a = t(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = t(3, 2, &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), (2, 2));
        assert_eq!(c.data(), &[58.0, 64.0, 139.0, 154.0]);
        assert!(a.matmul(&a).is_err());
    }

    #[test]
    fn test_matmul_nt_matches_matmul() {
        let a = t(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        // Rows of bt are the columns of b above.
        let bt = t(2, 3, &[7.0, 9.0, 11.0, 8.0, 10.0, 12.0]);
        assert_eq!(a.matmul_nt(&bt).unwrap().data(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_rejects_fp8_and_mixed() {
        let a = t(2, 2, &[1.0; 4]);
        let fp8 = a.to_dtype(DType::Fp8E4m3);
        assert!(matches!(fp8.matmul(&fp8), Err(GemmError::DType { .. })));
        assert!(matches!(
            a.matmul(&a.to_dtype(DType::Bf16)),
            Err(GemmError::DType { .. })
        ));
    }

    #[test]
    fn test_bf16_matmul_output_is_bf16() {
        let a = t(1, 1, &[1.0 + 2f32.powi(-9)]).to_dtype(DType::Bf16);
        let c = a.matmul(&a).unwrap();
        assert_eq!(c.dtype(), DType::Bf16);
        assert_eq!(c.data()[0], 1.0);
    }

    #[test]
    fn test_slice_and_concat() {
        let a = t(4, 2, &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let top = a.slice_rows(0..1).unwrap();
        let rest = a.slice_rows(1..4).unwrap();
        assert_eq!(rest.row(0), &[2.0, 3.0]);
        assert_eq!(Tensor::concat_rows(&[top, rest]).unwrap(), a);
        assert!(a.slice_rows(3..5).is_err());
        assert!(Tensor::concat_rows(&[]).is_err());
        assert!(Tensor::concat_rows(&[a.clone(), t(1, 3, &[0.0; 3])]).is_err());
    }
}
