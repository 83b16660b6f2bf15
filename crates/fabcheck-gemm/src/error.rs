//! Error types for the GEMM checks.

use crate::tensor::DType;
use thiserror::Error;

/// Errors raised by tensors, kernels and the device runtime.
#[derive(Debug, Error)]
pub enum GemmError {
    #[error("Shape mismatch in {op}: expected {expected}, got {found}")]
    Shape {
        op: &'static str,
        expected: String,
        found: String,
    },
    #[error("{op} does not accept {dtype} operands")]
    DType { op: &'static str, dtype: DType },
    #[error("Row {row} has group index {index}, but only {groups} groups were given")]
    GroupIndex { row: usize, index: i32, groups: usize },
    #[error("Device runtime not available")]
    RuntimeUnavailable,
    #[error("Invalid device ordinal {ordinal} ({count} devices present)")]
    InvalidDevice { ordinal: usize, count: usize },
    #[error("Testing module not available in {0}")]
    TestingUnavailable(String),
}
