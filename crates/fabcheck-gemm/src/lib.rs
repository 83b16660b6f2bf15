//! FP8 GEMM smoke checks.
//!
//! A fixed, ordered list of independent checks exercises a GEMM kernel library
//! through the [`GemmKernels`] seam and a device through [`DeviceRuntime`].
//! Every check yields pass/fail; errors and panics never cross a check
//! boundary. [`HostKernels`] and [`HostRuntime`] are CPU implementations used
//! when no accelerator library is linked.

pub mod backend;
pub mod checks;
pub mod error;
pub mod fp8;
pub mod runner;
pub mod tensor;
pub mod testing;

pub use backend::{DeviceRuntime, GemmKernels, HostKernels, HostRuntime, Scaled};
pub use checks::{Check, CheckContext, CheckReport, Note, NoteLevel, Suite};
pub use error::GemmError;
pub use runner::{preflight, run_checks, run_suite, CheckResult, SuiteObserver, SuiteSummary};
pub use tensor::{DType, Tensor};
