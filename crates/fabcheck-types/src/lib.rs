//! Shared types for the fabcheck workspace.
//!
//! Holds the configuration consumed by both the transfer handshake test and
//! the GEMM smoke test, plus the configuration error type. It contains no
//! test logic of its own.

pub mod config;
pub mod error;

pub use config::{FabcheckConfig, GemmConfig, GroupedShape, MatmulShape, Seed, TransferConfig};
pub use error::ConfigError;
