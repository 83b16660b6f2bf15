//! The individual smoke checks and the suites that order them.

use crate::backend::{
    DeviceRuntime, GemmKernels, Scaled, REQUIRED_SYMBOLS, REQUIRED_TESTING_SYMBOLS,
};
use crate::error::GemmError;
use crate::tensor::{DType, Tensor};
use crate::testing;
use fabcheck_types::{GemmConfig, GroupedShape, MatmulShape, Seed};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Severity of a line in a check report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteLevel {
    Ok,
    Info,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Note {
    pub level: NoteLevel,
    pub text: String,
}

/// Outcome of one check: pass/fail plus what it observed, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub passed: bool,
    pub notes: Vec<Note>,
}

impl Default for CheckReport {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckReport {
    pub fn new() -> Self {
        Self {
            passed: true,
            notes: Vec::new(),
        }
    }

    pub fn ok(&mut self, text: impl Into<String>) {
        self.push(NoteLevel::Ok, text);
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.push(NoteLevel::Info, text);
    }

    /// Record a failure. The check fails regardless of later notes.
    pub fn fail(&mut self, text: impl Into<String>) {
        self.passed = false;
        self.push(NoteLevel::Fail, text);
    }

    fn push(&mut self, level: NoteLevel, text: impl Into<String>) {
        self.notes.push(Note {
            level,
            text: text.into(),
        });
    }
}

/// Everything a check may touch.
pub struct CheckContext<'a> {
    pub kernels: &'a dyn GemmKernels,
    pub runtime: &'a dyn DeviceRuntime,
    pub config: &'a GemmConfig,
    pub rng: StdRng,
}

impl<'a> CheckContext<'a> {
    /// Seeds the generator from `config.seed`.
    pub fn new(
        kernels: &'a dyn GemmKernels,
        runtime: &'a dyn DeviceRuntime,
        config: &'a GemmConfig,
    ) -> Self {
        let rng = match config.seed {
            Seed::Fixed(seed) => StdRng::seed_from_u64(seed),
            Seed::Entropy => StdRng::from_entropy(),
        };
        Self {
            kernels,
            runtime,
            config,
            rng,
        }
    }
}

pub type CheckFn = fn(&mut CheckContext<'_>) -> Result<CheckReport, GemmError>;

/// A named check.
#[derive(Clone, Copy)]
pub struct Check {
    pub name: &'static str,
    pub run: CheckFn,
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check").field("name", &self.name).finish()
    }
}

/// Which ordered list of checks to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Suite {
    /// Library import plus numerical FP8 GEMMs.
    Simple,
    /// Availability only; no numerical GEMM against the library.
    Minimal,
}

impl Suite {
    pub fn title(self) -> &'static str {
        match self {
            Suite::Simple => "GEMM Simple Self Test",
            Suite::Minimal => "GEMM Minimal Availability Test",
        }
    }

    pub fn checks(self) -> Vec<Check> {
        match self {
            Suite::Simple => vec![
                Check {
                    name: "Library Import",
                    run: library_import,
                },
                Check {
                    name: "Basic FP8 GEMM",
                    run: basic_fp8_gemm,
                },
                Check {
                    name: "M-grouped FP8 GEMM",
                    run: m_grouped_fp8_gemm,
                },
            ],
            Suite::Minimal => vec![
                Check {
                    name: "GPU Info",
                    run: gpu_info,
                },
                Check {
                    name: "Library Import",
                    run: library_availability,
                },
                Check {
                    name: "Testing Module",
                    run: testing_module,
                },
                Check {
                    name: "Basic Tensor Ops",
                    run: basic_tensor_ops,
                },
            ],
        }
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suite::Simple => f.write_str("simple"),
            Suite::Minimal => f.write_str("minimal"),
        }
    }
}

fn missing<'a>(present: &[&str], required: &[&'a str]) -> Vec<&'a str> {
    required
        .iter()
        .filter(|name| !present.contains(name))
        .copied()
        .collect()
}

/// Pass iff `diff < tolerance`; NaN never passes.
fn judge(report: &mut CheckReport, label: &str, diff: f64, tolerance: f64) {
    report.info(format!("{label} diff: {diff:.6}"));
    if diff < tolerance {
        report.ok(format!("{label} test PASSED"));
    } else {
        report.fail(format!("{label} test FAILED (diff={diff})"));
    }
}

// ---------------------------------------------------------------------------
// Simple suite
// ---------------------------------------------------------------------------

/// Required entry points and testing utilities are all exported.
pub fn library_import(ctx: &mut CheckContext<'_>) -> Result<CheckReport, GemmError> {
    let mut report = CheckReport::new();

    let absent = missing(ctx.kernels.symbols(), REQUIRED_SYMBOLS);
    if !absent.is_empty() {
        report.fail(format!("Missing functions: {absent:?}"));
        return Ok(report);
    }

    match ctx.kernels.testing_symbols() {
        None => report.fail(format!(
            "Testing module not available in {}",
            ctx.kernels.library_name()
        )),
        Some(exports) => {
            let absent = missing(exports, REQUIRED_TESTING_SYMBOLS);
            if !absent.is_empty() {
                report.fail(format!("Missing testing functions: {absent:?}"));
            }
        }
    }
    if report.passed {
        report.ok("Library import test PASSED");
    }
    Ok(report)
}

/// One FP8 GEMM with unit scales against a BF16 reference.
pub fn basic_fp8_gemm(ctx: &mut CheckContext<'_>) -> Result<CheckReport, GemmError> {
    let MatmulShape { m, n, k } = ctx.config.basic;
    let mut report = CheckReport::new();

    let a = Tensor::randn(m, k, &mut ctx.rng);
    let b = Tensor::randn(n, k, &mut ctx.rng);
    let a_fp8 = a.to_dtype(DType::Fp8E4m3);
    let b_fp8 = b.to_dtype(DType::Fp8E4m3);

    let mut c = Tensor::zeros(m, n, DType::Bf16);
    ctx.kernels
        .fp8_gemm_nt(Scaled::new(&a_fp8, 1.0), Scaled::new(&b_fp8, 1.0), &mut c)?;

    let reference = a
        .to_dtype(DType::Bf16)
        .matmul_nt(&b.to_dtype(DType::Bf16))?;
    let diff = ctx.kernels.calc_diff(&c, &reference)?;
    debug!(m, n, k, diff, "basic fp8 gemm");
    judge(&mut report, "FP8 GEMM", diff, ctx.config.tolerance);
    Ok(report)
}

/// Group index of every row when `num_groups` segments of `m_per_group`
/// rows are laid out contiguously.
pub fn contiguous_m_indices(num_groups: usize, m_per_group: usize) -> Vec<i32> {
    (0..num_groups)
        .flat_map(|g| std::iter::repeat(g as i32).take(m_per_group))
        .collect()
}

/// BF16 reference for a contiguous grouped GEMM: each segment of `a` times
/// its own `bs[g]ᵀ`, concatenated in segment order.
pub fn grouped_reference(
    a: &Tensor,
    bs: &[Tensor],
    m_per_group: usize,
) -> Result<Tensor, GemmError> {
    let segments = bs
        .iter()
        .enumerate()
        .map(|(g, b)| {
            a.slice_rows(g * m_per_group..(g + 1) * m_per_group)?
                .to_dtype(DType::Bf16)
                .matmul_nt(&b.to_dtype(DType::Bf16))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Tensor::concat_rows(&segments)
}

/// Contiguous M-grouped FP8 GEMM against per-segment BF16 references.
pub fn m_grouped_fp8_gemm(ctx: &mut CheckContext<'_>) -> Result<CheckReport, GemmError> {
    let shape @ GroupedShape {
        num_groups,
        m_per_group,
        n,
        k,
    } = ctx.config.grouped;
    let total_m = shape.total_m();
    let mut report = CheckReport::new();

    let a = Tensor::randn(total_m, k, &mut ctx.rng);
    let bs: Vec<Tensor> = (0..num_groups)
        .map(|_| Tensor::randn(n, k, &mut ctx.rng))
        .collect();

    let a_fp8 = a.to_dtype(DType::Fp8E4m3);
    let bs_fp8: Vec<Tensor> = bs.iter().map(|b| b.to_dtype(DType::Fp8E4m3)).collect();
    let scaled: Vec<Scaled<'_>> = bs_fp8.iter().map(|b| Scaled::new(b, 1.0)).collect();
    let m_indices = contiguous_m_indices(num_groups, m_per_group);

    let mut c = Tensor::zeros(total_m, n, DType::Bf16);
    ctx.kernels.m_grouped_fp8_gemm_nt_contiguous(
        Scaled::new(&a_fp8, 1.0),
        &scaled,
        &mut c,
        &m_indices,
    )?;

    let reference = grouped_reference(&a, &bs, m_per_group)?;
    let diff = ctx.kernels.calc_diff(&c, &reference)?;
    debug!(num_groups, m_per_group, n, k, diff, "m-grouped fp8 gemm");
    judge(&mut report, "M-grouped FP8 GEMM", diff, ctx.config.tolerance);
    Ok(report)
}

// ---------------------------------------------------------------------------
// Minimal suite
// ---------------------------------------------------------------------------

pub fn gpu_info(ctx: &mut CheckContext<'_>) -> Result<CheckReport, GemmError> {
    let mut report = CheckReport::new();
    let rt = ctx.runtime;
    if !rt.is_available() {
        report.fail("Device runtime not available");
        return Ok(report);
    }
    report.ok("Device runtime available");
    let count = rt.device_count();
    let requested = ctx.config.device;
    report.info(format!("Device count: {count}"));
    if requested >= count {
        let err = GemmError::InvalidDevice {
            ordinal: requested,
            count,
        };
        report.fail(err.to_string());
        return Ok(report);
    }
    let current = rt.current_device();
    report.info(format!("Current device: {current}"));
    if current != requested {
        report.fail(format!("Requested device {requested}, but device {current} is selected"));
    }
    report.info(format!("Device name: {}", rt.device_name(current)?));
    report.info(format!("Runtime version: {}", rt.runtime_version()));
    report.info(format!("fabcheck version: {}", env!("CARGO_PKG_VERSION")));
    Ok(report)
}

/// Library loads; reports where from and what it exports.
pub fn library_availability(ctx: &mut CheckContext<'_>) -> Result<CheckReport, GemmError> {
    let mut report = CheckReport::new();
    let kernels = ctx.kernels;
    let symbols = kernels.symbols();
    let gemm: Vec<&str> = symbols
        .iter()
        .filter(|s| s.to_lowercase().contains("gemm"))
        .take(5)
        .copied()
        .collect();

    report.ok(format!("{} library loaded", kernels.library_name()));
    report.info(format!("Library path: {}", kernels.location()));
    report.info(format!("Available functions: {}", symbols.len()));
    report.info(format!("Key functions: {gemm:?}"));
    report.info(format!(
        "SMs: {}, TC util: {}%",
        kernels.num_sms(),
        kernels.tc_util()
    ));
    Ok(report)
}

pub fn testing_module(ctx: &mut CheckContext<'_>) -> Result<CheckReport, GemmError> {
    let mut report = CheckReport::new();
    let Some(exports) = ctx.kernels.testing_symbols() else {
        report.fail(format!(
            "Testing module not available in {}",
            ctx.kernels.library_name()
        ));
        return Ok(report);
    };
    report.ok("Testing module loaded");
    report.info(format!("Available testing functions: {}", exports.len()));
    report.info(format!("Testing utilities: {exports:?}"));
    Ok(report)
}

/// FP8 tensor creation and a small BF16 multiply; no library GEMM.
pub fn basic_tensor_ops(ctx: &mut CheckContext<'_>) -> Result<CheckReport, GemmError> {
    let mut report = CheckReport::new();
    if !ctx.runtime.supports(DType::Fp8E4m3) {
        report.fail(format!("Device does not support {}", DType::Fp8E4m3));
        return Ok(report);
    }

    let a = Tensor::randn(16, 16, &mut ctx.rng);
    let a_fp8 = a.to_dtype(DType::Fp8E4m3);
    report.ok(format!("FP8 tensor creation successful: {}", a_fp8.dtype()));

    let b = Tensor::randn(16, 16, &mut ctx.rng).to_dtype(DType::Bf16);
    let c = a.to_dtype(DType::Bf16).matmul(&b)?;
    if c.shape() == (16, 16) {
        report.ok(format!("Basic GEMM successful: {:?}", c.shape()));
    } else {
        report.fail(format!("Basic GEMM produced shape {:?}", c.shape()));
    }
    report.info(format!(
        "Operand bytes: {}",
        testing::count_bytes(&[&a_fp8, &b, &c])
    ));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HostKernels, HostRuntime};

    /// Host kernels with some exports hidden.
    struct PartialKernels {
        inner: HostKernels,
        symbols: &'static [&'static str],
        testing: Option<&'static [&'static str]>,
    }

    impl GemmKernels for PartialKernels {
        fn library_name(&self) -> &str {
            "partial"
        }
        fn location(&self) -> String {
            "nowhere".to_string()
        }
        fn symbols(&self) -> &[&'static str] {
            self.symbols
        }
        fn testing_symbols(&self) -> Option<&[&'static str]> {
            self.testing
        }
        fn num_sms(&self) -> usize {
            1
        }
        fn tc_util(&self) -> u32 {
            0
        }
        fn fp8_gemm_nt(
            &self,
            a: Scaled<'_>,
            b: Scaled<'_>,
            out: &mut Tensor,
        ) -> Result<(), GemmError> {
            self.inner.fp8_gemm_nt(a, b, out)
        }
        fn m_grouped_fp8_gemm_nt_contiguous(
            &self,
            a: Scaled<'_>,
            bs: &[Scaled<'_>],
            out: &mut Tensor,
            m_indices: &[i32],
        ) -> Result<(), GemmError> {
            self.inner
                .m_grouped_fp8_gemm_nt_contiguous(a, bs, out, m_indices)
        }
        fn calc_diff(&self, x: &Tensor, y: &Tensor) -> Result<f64, GemmError> {
            self.inner.calc_diff(x, y)
        }
    }

    fn run(check: CheckFn, kernels: &dyn GemmKernels) -> CheckReport {
        let runtime = HostRuntime::new();
        let config = GemmConfig::default();
        let mut ctx = CheckContext::new(kernels, &runtime, &config);
        check(&mut ctx).unwrap()
    }

    #[test]
    fn test_suite_order() {
        let names: Vec<&str> = Suite::Simple.checks().iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            ["Library Import", "Basic FP8 GEMM", "M-grouped FP8 GEMM"]
        );
        let names: Vec<&str> = Suite::Minimal.checks().iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            ["GPU Info", "Library Import", "Testing Module", "Basic Tensor Ops"]
        );
    }

    #[test]
    fn test_library_import_passes_on_host() {
        let report = run(library_import, &HostKernels::new());
        assert!(report.passed);
    }

    #[test]
    fn test_library_import_lists_missing_functions() {
        let kernels = PartialKernels {
            inner: HostKernels::new(),
            symbols: &["fp8_gemm_nt", "get_num_sms"],
            testing: Some(&["calc_diff"]),
        };
        let report = run(library_import, &kernels);
        assert!(!report.passed);
        let text = &report.notes[0].text;
        assert!(text.contains("m_grouped_fp8_gemm_nt_contiguous"), "{text}");
        assert!(text.contains("get_tc_util"), "{text}");
        assert!(!text.contains("get_num_sms"), "{text}");
    }

    #[test]
    fn test_library_import_lists_missing_testing_functions() {
        let kernels = PartialKernels {
            inner: HostKernels::new(),
            symbols: REQUIRED_SYMBOLS,
            testing: Some(&["calc_diff"]),
        };
        let report = run(library_import, &kernels);
        assert!(!report.passed);
        assert_eq!(report.notes.len(), 1);
        assert!(report.notes[0].text.contains("count_bytes"));
        assert!(report.notes[0].text.contains("bench_kineto"));
    }

    #[test]
    fn test_basic_fp8_gemm_passes() {
        let report = run(basic_fp8_gemm, &HostKernels::new());
        assert!(report.passed, "{:?}", report.notes);
        assert!(report.notes[0].text.starts_with("FP8 GEMM diff: "));
    }

    #[test]
    fn test_m_grouped_fp8_gemm_passes() {
        let report = run(m_grouped_fp8_gemm, &HostKernels::new());
        assert!(report.passed, "{:?}", report.notes);
    }

    #[test]
    fn test_grouped_reference_matches_per_group_multiplies() {
        let mut rng = StdRng::seed_from_u64(11);
        let a = Tensor::randn(8, 4, &mut rng);
        let bs: Vec<Tensor> = (0..2).map(|_| Tensor::randn(3, 4, &mut rng)).collect();
        let reference = grouped_reference(&a, &bs, 4).unwrap();
        assert_eq!(reference.shape(), (8, 3));
        for (g, b) in bs.iter().enumerate() {
            let part = a
                .slice_rows(g * 4..(g + 1) * 4)
                .unwrap()
                .to_dtype(DType::Bf16)
                .matmul_nt(&b.to_dtype(DType::Bf16))
                .unwrap();
            for r in 0..4 {
                assert_eq!(reference.row(g * 4 + r), part.row(r));
            }
        }
    }

    #[test]
    fn test_contiguous_m_indices() {
        assert_eq!(contiguous_m_indices(3, 2), vec![0, 0, 1, 1, 2, 2]);
        assert!(contiguous_m_indices(0, 4).is_empty());
    }

    #[test]
    fn test_tolerance_applies() {
        let kernels = HostKernels::new();
        let runtime = HostRuntime::new();
        let config = GemmConfig {
            tolerance: 1e-12,
            ..Default::default()
        };
        let mut ctx = CheckContext::new(&kernels, &runtime, &config);
        let report = basic_fp8_gemm(&mut ctx).unwrap();
        assert!(!report.passed);
        assert_eq!(report.notes.last().unwrap().level, NoteLevel::Fail);
    }

    #[test]
    fn test_minimal_suite_passes_on_host() {
        let kernels = HostKernels::new();
        for check in Suite::Minimal.checks() {
            let report = run(check.run, &kernels);
            assert!(report.passed, "{}: {:?}", check.name, report.notes);
        }
    }

    #[test]
    fn test_testing_module_absent() {
        let kernels = PartialKernels {
            inner: HostKernels::new(),
            symbols: REQUIRED_SYMBOLS,
            testing: None,
        };
        let report = run(testing_module, &kernels);
        assert!(!report.passed);
        assert_eq!(report.notes.len(), 1);
    }

    #[test]
    fn test_gpu_info_fails_for_out_of_range_device() {
        let kernels = HostKernels::new();
        let mut runtime = HostRuntime::new();
        let config = GemmConfig {
            device: 5,
            ..Default::default()
        };
        // Selection fails; the command logs it and runs the suite anyway.
        assert!(runtime.set_device(config.device).is_err());
        let mut ctx = CheckContext::new(&kernels, &runtime, &config);
        let report = gpu_info(&mut ctx).unwrap();
        assert!(!report.passed);
        let last = report.notes.last().unwrap();
        assert_eq!(last.level, NoteLevel::Fail);
        assert!(last.text.contains("Invalid device ordinal 5"), "{}", last.text);
    }

    #[test]
    fn test_gpu_info_reports_selected_device() {
        let report = run(gpu_info, &HostKernels::new());
        assert!(report.passed, "{:?}", report.notes);
        assert!(report.notes.iter().any(|n| n.text == "Current device: 0"));
    }

    #[test]
    fn test_testing_module_only_lists_exports() {
        let report = run(testing_module, &HostKernels::new());
        assert!(report.passed);
        assert_eq!(report.notes.len(), 3);
        assert!(report.notes[2].text.contains("bench_kineto"));
    }

    #[test]
    fn test_entropy_seed_builds_context() {
        let kernels = HostKernels::new();
        let runtime = HostRuntime::new();
        let config = GemmConfig {
            seed: Seed::Entropy,
            ..Default::default()
        };
        let mut ctx = CheckContext::new(&kernels, &runtime, &config);
        let report = basic_tensor_ops(&mut ctx).unwrap();
        assert!(report.passed, "{:?}", report.notes);
    }

    #[test]
    fn test_seeded_context_is_reproducible() {
        let kernels = HostKernels::new();
        let runtime = HostRuntime::new();
        let config = GemmConfig::default();
        let a = run(basic_fp8_gemm, &kernels);
        let mut ctx = CheckContext::new(&kernels, &runtime, &config);
        let b = basic_fp8_gemm(&mut ctx).unwrap();
        assert_eq!(a.notes[0], b.notes[0]);
    }
}
