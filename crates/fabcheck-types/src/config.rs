//! Configuration loading from `~/.fabcheck/config.toml` with defaults.
//!
//! Every field has a default, so a missing file or a partial file is valid.
//! The CLI may further override individual values from flags.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Size of the target's registered buffer (100 MiB).
pub const DEFAULT_BUFFER_SIZE: u64 = 100 * 1024 * 1024;

/// Largest handshake frame accepted from the wire (1 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabcheckConfig {
    /// Settings for the two-node transfer handshake test.
    pub transfer: TransferConfig,
    /// Settings for the GEMM smoke test.
    pub gemm: GemmConfig,
}

/// Transfer handshake settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes the target allocates and advertises.
    pub buffer_size: u64,
    /// Maximum connect attempts made by the initiator (including the first).
    pub connect_attempts: u32,
    /// Fixed delay between connect attempts in milliseconds.
    pub connect_interval_ms: u64,
    /// Duration of the simulated transfer step in milliseconds.
    pub simulated_transfer_ms: u64,
    /// Transport backends requested when constructing an agent.
    pub backends: Vec<String>,
    /// Upper bound on a single newline-delimited frame.
    pub max_frame_bytes: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            connect_attempts: 30,
            connect_interval_ms: 1_000,
            simulated_transfer_ms: 2_000,
            backends: vec!["UCX".to_string()],
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl TransferConfig {
    /// Delay between connect attempts.
    pub fn connect_interval(&self) -> Duration {
        Duration::from_millis(self.connect_interval_ms)
    }

    /// Duration of the simulated transfer.
    pub fn simulated_transfer(&self) -> Duration {
        Duration::from_millis(self.simulated_transfer_ms)
    }
}

/// Shape of a single `m x k` by `n x k` product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatmulShape {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

/// Shape of a grouped product: `num_groups` contiguous segments of
/// `m_per_group` rows, each multiplied by its own `n x k` weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedShape {
    pub num_groups: usize,
    pub m_per_group: usize,
    pub n: usize,
    pub k: usize,
}

impl GroupedShape {
    /// Total number of rows across all groups.
    pub fn total_m(&self) -> usize {
        self.num_groups * self.m_per_group
    }
}

/// Source of randomness for generated check inputs.
///
/// Written as an integer for a fixed seed or as `"entropy"` for a fresh OS
/// seed on every run, both in TOML and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SeedRepr", into = "SeedRepr")]
pub enum Seed {
    Fixed(u64),
    Entropy,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SeedRepr {
    Fixed(u64),
    Named(String),
}

impl TryFrom<SeedRepr> for Seed {
    type Error = String;

    fn try_from(repr: SeedRepr) -> Result<Self, Self::Error> {
        match repr {
            SeedRepr::Fixed(seed) => Ok(Seed::Fixed(seed)),
            SeedRepr::Named(name) => name.parse(),
        }
    }
}

impl From<Seed> for SeedRepr {
    fn from(seed: Seed) -> Self {
        match seed {
            Seed::Fixed(seed) => SeedRepr::Fixed(seed),
            Seed::Entropy => SeedRepr::Named("entropy".to_string()),
        }
    }
}

impl FromStr for Seed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "entropy" | "random" => Ok(Seed::Entropy),
            other => other.parse::<u64>().map(Seed::Fixed).map_err(|_| {
                format!("invalid seed '{other}': expected an integer or \"entropy\"")
            }),
        }
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seed::Fixed(seed) => write!(f, "{seed}"),
            Seed::Entropy => f.write_str("entropy"),
        }
    }
}

/// GEMM smoke test settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GemmConfig {
    /// Device ordinal to select before running checks.
    pub device: usize,
    /// Seed for input generation.
    pub seed: Seed,
    /// A GEMM check passes when its diff is strictly below this value.
    pub tolerance: f64,
    /// Shape used by the basic FP8 GEMM check.
    pub basic: MatmulShape,
    /// Shape used by the M-grouped FP8 GEMM check.
    pub grouped: GroupedShape,
}

impl Default for GemmConfig {
    fn default() -> Self {
        Self {
            device: 0,
            seed: Seed::Fixed(42),
            tolerance: 0.1,
            basic: MatmulShape {
                m: 256,
                n: 256,
                k: 256,
            },
            grouped: GroupedShape {
                num_groups: 4,
                m_per_group: 64,
                n: 128,
                k: 128,
            },
        }
    }
}

impl FabcheckConfig {
    /// Reject values that parse but cannot drive a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.transfer;
        if t.buffer_size == 0 {
            return Err(invalid("transfer.buffer_size", "must be greater than zero"));
        }
        if t.connect_attempts == 0 {
            return Err(invalid("transfer.connect_attempts", "must be at least 1"));
        }
        if t.backends.is_empty() {
            return Err(invalid("transfer.backends", "at least one backend is required"));
        }
        if t.max_frame_bytes == 0 {
            return Err(invalid("transfer.max_frame_bytes", "must be greater than zero"));
        }

        let g = &self.gemm;
        if g.tolerance.is_nan() || g.tolerance <= 0.0 {
            return Err(invalid("gemm.tolerance", "must be a positive number"));
        }
        let b = g.basic;
        if b.m == 0 || b.n == 0 || b.k == 0 {
            return Err(invalid("gemm.basic", "dimensions must be non-zero"));
        }
        let gr = g.grouped;
        if gr.num_groups == 0 || gr.m_per_group == 0 || gr.n == 0 || gr.k == 0 {
            return Err(invalid("gemm.grouped", "dimensions must be non-zero"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Default config location: `~/.fabcheck/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fabcheck")
        .join("config.toml")
}

/// Load configuration from a TOML file, with defaults.
///
/// A missing file yields the defaults. A file that exists but cannot be read,
/// parsed or validated is an error.
pub fn load_config(path: Option<&Path>) -> Result<FabcheckConfig, ConfigError> {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return Ok(FabcheckConfig::default());
    }

    let contents = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;
    let config: FabcheckConfig =
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: config_path.clone(),
            source,
        })?;
    config.validate()?;

    info!(path = %config_path.display(), "Loaded configuration");
    Ok(config)
}
