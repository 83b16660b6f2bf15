//! Command implementations by domain.

pub mod gemm;
pub mod transfer;
