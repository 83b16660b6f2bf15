//! Kernel library and device runtime seams, with host implementations.

use crate::error::GemmError;
use crate::tensor::{dot, DType, Tensor};
use crate::testing;
use std::thread;

/// Entry points the smoke tests require from a kernel library.
pub const REQUIRED_SYMBOLS: &[&str] = &[
    "fp8_gemm_nt",
    "m_grouped_fp8_gemm_nt_contiguous",
    "get_num_sms",
    "get_tc_util",
];

/// Utilities the smoke tests require from the library's testing module.
pub const REQUIRED_TESTING_SYMBOLS: &[&str] = &["calc_diff", "count_bytes", "bench_kineto"];

/// An operand with its per-tensor scale.
#[derive(Debug, Clone, Copy)]
pub struct Scaled<'a> {
    pub tensor: &'a Tensor,
    pub scale: f32,
}

impl<'a> Scaled<'a> {
    pub fn new(tensor: &'a Tensor, scale: f32) -> Self {
        Self { tensor, scale }
    }
}

/// A GEMM kernel library.
pub trait GemmKernels {
    fn library_name(&self) -> &str;

    /// Where the library was loaded from.
    fn location(&self) -> String;

    /// Public entry points the library exports.
    fn symbols(&self) -> &[&'static str];

    /// Exports of the testing module, or `None` when it is absent.
    fn testing_symbols(&self) -> Option<&[&'static str]>;

    /// Streaming multiprocessors the kernels may use.
    fn num_sms(&self) -> usize;

    /// Tensor-core utilisation target, in percent.
    fn tc_util(&self) -> u32;

    /// `out = (a · bᵀ) · a.scale · b.scale` for FP8 `a: m×k`, `b: n×k` and a
    /// BF16 `out: m×n`.
    fn fp8_gemm_nt(&self, a: Scaled<'_>, b: Scaled<'_>, out: &mut Tensor)
        -> Result<(), GemmError>;

    /// Grouped variant: row `r` of `a` is multiplied by `bs[m_indices[r]]`.
    /// Rows with a negative index are padding and are left untouched.
    fn m_grouped_fp8_gemm_nt_contiguous(
        &self,
        a: Scaled<'_>,
        bs: &[Scaled<'_>],
        out: &mut Tensor,
        m_indices: &[i32],
    ) -> Result<(), GemmError>;

    /// Relative difference used to judge kernel output against a reference.
    fn calc_diff(&self, x: &Tensor, y: &Tensor) -> Result<f64, GemmError>;
}

/// The accelerator runtime the kernels execute on.
pub trait DeviceRuntime {
    fn is_available(&self) -> bool;
    fn device_count(&self) -> usize;
    fn set_device(&mut self, ordinal: usize) -> Result<(), GemmError>;
    fn current_device(&self) -> usize;
    fn device_name(&self, ordinal: usize) -> Result<String, GemmError>;
    fn runtime_version(&self) -> String;
    fn supports(&self, dtype: DType) -> bool;
}

// ---------------------------------------------------------------------------
// Host implementations
// ---------------------------------------------------------------------------

/// CPU reference kernels. FP8 operands, `f32` accumulation, BF16 output.
#[derive(Debug, Clone)]
pub struct HostKernels {
    num_sms: usize,
}

impl HostKernels {
    pub fn new() -> Self {
        let num_sms = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self { num_sms }
    }
}

impl Default for HostKernels {
    fn default() -> Self {
        Self::new()
    }
}

fn expect_dtype(op: &'static str, t: &Tensor, dtype: DType) -> Result<(), GemmError> {
    if t.dtype() != dtype {
        return Err(GemmError::DType {
            op,
            dtype: t.dtype(),
        });
    }
    Ok(())
}

fn expect_shape(
    op: &'static str,
    t: &Tensor,
    rows: usize,
    cols: usize,
) -> Result<(), GemmError> {
    if t.shape() != (rows, cols) {
        return Err(GemmError::Shape {
            op,
            expected: format!("[{rows}, {cols}]"),
            found: format!("[{}, {}]", t.rows(), t.cols()),
        });
    }
    Ok(())
}

impl GemmKernels for HostKernels {
    fn library_name(&self) -> &str {
        "host"
    }

    fn location(&self) -> String {
        format!("built-in ({} {})", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }

    fn symbols(&self) -> &[&'static str] {
        REQUIRED_SYMBOLS
    }

    fn testing_symbols(&self) -> Option<&[&'static str]> {
        Some(testing::EXPORTS)
    }

    fn num_sms(&self) -> usize {
        self.num_sms
    }

    fn tc_util(&self) -> u32 {
        100
    }

    fn fp8_gemm_nt(
        &self,
        a: Scaled<'_>,
        b: Scaled<'_>,
        out: &mut Tensor,
    ) -> Result<(), GemmError> {
        const OP: &str = "fp8_gemm_nt";
        expect_dtype(OP, a.tensor, DType::Fp8E4m3)?;
        expect_dtype(OP, b.tensor, DType::Fp8E4m3)?;
        expect_dtype(OP, out, DType::Bf16)?;
        let (m, k) = a.tensor.shape();
        let n = b.tensor.rows();
        expect_shape(OP, b.tensor, n, k)?;
        expect_shape(OP, out, m, n)?;

        let scale = a.scale * b.scale;
        for i in 0..m {
            let row = a.tensor.row(i);
            for j in 0..n {
                out.set(i, j, dot(row, b.tensor.row(j)) * scale);
            }
        }
        Ok(())
    }

    fn m_grouped_fp8_gemm_nt_contiguous(
        &self,
        a: Scaled<'_>,
        bs: &[Scaled<'_>],
        out: &mut Tensor,
        m_indices: &[i32],
    ) -> Result<(), GemmError> {
        const OP: &str = "m_grouped_fp8_gemm_nt_contiguous";
        expect_dtype(OP, a.tensor, DType::Fp8E4m3)?;
        expect_dtype(OP, out, DType::Bf16)?;
        let (total_m, k) = a.tensor.shape();
        let Some(first) = bs.first() else {
            return Err(GemmError::Shape {
                op: OP,
                expected: "at least one group".to_string(),
                found: "0 groups".to_string(),
            });
        };
        let n = first.tensor.rows();
        for b in bs {
            expect_dtype(OP, b.tensor, DType::Fp8E4m3)?;
            expect_shape(OP, b.tensor, n, k)?;
        }
        expect_shape(OP, out, total_m, n)?;
        if m_indices.len() != total_m {
            return Err(GemmError::Shape {
                op: OP,
                expected: format!("{total_m} m_indices"),
                found: format!("{}", m_indices.len()),
            });
        }

        for (row, &index) in m_indices.iter().enumerate() {
            if index < 0 {
                continue;
            }
            let Some(b) = bs.get(index as usize) else {
                return Err(GemmError::GroupIndex {
                    row,
                    index,
                    groups: bs.len(),
                });
            };
            let scale = a.scale * b.scale;
            let a_row = a.tensor.row(row);
            for j in 0..n {
                out.set(row, j, dot(a_row, b.tensor.row(j)) * scale);
            }
        }
        Ok(())
    }

    fn calc_diff(&self, x: &Tensor, y: &Tensor) -> Result<f64, GemmError> {
        testing::calc_diff(x, y)
    }
}

/// The host itself as a single device.
#[derive(Debug, Clone, Default)]
pub struct HostRuntime {
    current: usize,
}

impl HostRuntime {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceRuntime for HostRuntime {
    fn is_available(&self) -> bool {
        true
    }

    fn device_count(&self) -> usize {
        1
    }

    fn set_device(&mut self, ordinal: usize) -> Result<(), GemmError> {
        if ordinal >= self.device_count() {
            return Err(GemmError::InvalidDevice {
                ordinal,
                count: self.device_count(),
            });
        }
        self.current = ordinal;
        Ok(())
    }

    fn current_device(&self) -> usize {
        self.current
    }

    fn device_name(&self, ordinal: usize) -> Result<String, GemmError> {
        if ordinal >= self.device_count() {
            return Err(GemmError::InvalidDevice {
                ordinal,
                count: self.device_count(),
            });
        }
        let threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Ok(format!("Host CPU ({threads} threads)"))
    }

    fn runtime_version(&self) -> String {
        format!("host-{}", env!("CARGO_PKG_VERSION"))
    }

    fn supports(&self, _dtype: DType) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fp8(rows: usize, cols: usize, data: &[f32]) -> Tensor {
        Tensor::from_vec(rows, cols, DType::Fp8E4m3, data.to_vec()).unwrap()
    }

    #[test]
    fn test_host_exports_required_symbols() {
        let k = HostKernels::new();
        for s in REQUIRED_SYMBOLS {
            assert!(k.symbols().contains(s), "{s}");
        }
        let testing = k.testing_symbols().unwrap();
        for s in REQUIRED_TESTING_SYMBOLS {
            assert!(testing.contains(s), "{s}");
        }
        assert!(k.num_sms() >= 1);
    }

    #[test]
    fn test_fp8_gemm_nt_small() {
        let a = fp8(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let b = fp8(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        let mut out = Tensor::zeros(2, 2, DType::Bf16);
        HostKernels::new()
            .fp8_gemm_nt(Scaled::new(&a, 2.0), Scaled::new(&b, 0.5), &mut out)
            .unwrap();
        assert_eq!(out.data(), &[1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_fp8_gemm_nt_rejects_bad_operands() {
        let k = HostKernels::new();
        let a = fp8(2, 3, &[1.0; 6]);
        let b = fp8(2, 2, &[1.0; 4]);
        let mut out = Tensor::zeros(2, 2, DType::Bf16);
        let err = k
            .fp8_gemm_nt(Scaled::new(&a, 1.0), Scaled::new(&b, 1.0), &mut out)
            .unwrap_err();
        assert!(matches!(err, GemmError::Shape { .. }));

        let f32_a = Tensor::zeros(2, 2, DType::F32);
        let err = k
            .fp8_gemm_nt(Scaled::new(&f32_a, 1.0), Scaled::new(&b, 1.0), &mut out)
            .unwrap_err();
        assert!(matches!(err, GemmError::DType { dtype: DType::F32, .. }));
    }

    #[test]
    fn test_grouped_uses_group_index_per_row() {
        let a = fp8(3, 2, &[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        let b0 = fp8(1, 2, &[1.0, 0.0]);
        let b1 = fp8(1, 2, &[0.0, 4.0]);
        let bs = [Scaled::new(&b0, 1.0), Scaled::new(&b1, 1.0)];
        let mut out = Tensor::zeros(3, 1, DType::Bf16);
        HostKernels::new()
            .m_grouped_fp8_gemm_nt_contiguous(Scaled::new(&a, 1.0), &bs, &mut out, &[0, 1, -1])
            .unwrap();
        assert_eq!(out.data(), &[1.0, 8.0, 0.0]);
    }

    #[test]
    fn test_grouped_rejects_out_of_range_index() {
        let a = fp8(2, 2, &[1.0; 4]);
        let b0 = fp8(2, 2, &[1.0; 4]);
        let mut out = Tensor::zeros(2, 2, DType::Bf16);
        let err = HostKernels::new()
            .m_grouped_fp8_gemm_nt_contiguous(
                Scaled::new(&a, 1.0),
                &[Scaled::new(&b0, 1.0)],
                &mut out,
                &[0, 1],
            )
            .unwrap_err();
        assert!(matches!(err, GemmError::GroupIndex { row: 1, index: 1, groups: 1 }));
    }

    #[test]
    fn test_fp8_gemm_close_to_bf16_reference() {
        let mut rng = StdRng::seed_from_u64(3);
        let a = Tensor::randn(32, 64, &mut rng);
        let b = Tensor::randn(16, 64, &mut rng);
        let mut out = Tensor::zeros(32, 16, DType::Bf16);
        let k = HostKernels::new();
        k.fp8_gemm_nt(
            Scaled::new(&a.to_dtype(DType::Fp8E4m3), 1.0),
            Scaled::new(&b.to_dtype(DType::Fp8E4m3), 1.0),
            &mut out,
        )
        .unwrap();
        let reference = a
            .to_dtype(DType::Bf16)
            .matmul_nt(&b.to_dtype(DType::Bf16))
            .unwrap();
        let diff = k.calc_diff(&out, &reference).unwrap();
        assert!(diff > 0.0 && diff < 0.01, "diff {diff}");
    }

    #[test]
    fn test_host_runtime_device_selection() {
        let mut rt = HostRuntime::new();
        assert!(rt.is_available());
        assert_eq!(rt.device_count(), 1);
        rt.set_device(0).unwrap();
        assert_eq!(rt.current_device(), 0);
        assert!(rt.device_name(0).unwrap().starts_with("Host CPU"));
        assert!(matches!(
            rt.set_device(3),
            Err(GemmError::InvalidDevice { ordinal: 3, count: 1 })
        ));
    }
}
