//! Clap CLI definitions for fabcheck.

use clap::{Args, Parser, Subcommand, ValueEnum};
use fabcheck_gemm::Suite;
use fabcheck_types::Seed;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  fabcheck transfer target 0.0.0.0 5555       Register a buffer and wait for an initiator
  fabcheck transfer initiator 10.0.0.7 5555   Connect, load target metadata, acknowledge
  fabcheck gemm                               FP8 GEMM self test on device 0
  fabcheck gemm --suite minimal --json        Availability checks as JSON

\x1b[1;36mEnvironment:\x1b[0m
  UCX_NET_DEVICES   RDMA device for the transfer agent (auto-detected when unset)
  RUST_LOG          Log filter (default: info)";

/// fabcheck: transfer-fabric and GEMM smoke tests for GPU nodes.
#[derive(Parser)]
#[command(
    name = "fabcheck",
    version,
    about = "Transfer-fabric and FP8 GEMM smoke tests for GPU nodes",
    after_help = AFTER_HELP,
)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Two-node transfer handshake (run a target, then an initiator).
    Transfer(TransferArgs),
    /// FP8 GEMM smoke checks.
    Gemm(GemmArgs),
}

#[derive(Args, Debug)]
pub struct TransferArgs {
    /// Role of this process.
    #[arg(value_enum)]
    pub mode: Mode,
    /// Address to listen on (target) or connect to (initiator).
    pub host: String,
    /// TCP port of the bootstrap socket.
    pub port: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Register a buffer, listen and serve one initiator.
    Target,
    /// Connect to a target and acknowledge its metadata.
    Initiator,
}

#[derive(Args, Debug)]
pub struct GemmArgs {
    /// Device ordinal to run on (overrides config).
    #[arg(long)]
    pub gpu: Option<usize>,
    /// Which suite to run.
    #[arg(long, value_enum, default_value_t = SuiteArg::Simple)]
    pub suite: SuiteArg,
    /// Seed for random inputs, or "entropy" for a fresh one (overrides config).
    #[arg(long)]
    pub seed: Option<Seed>,
    /// Output as JSON for scripting.
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SuiteArg {
    /// Library import plus basic and M-grouped FP8 GEMM.
    Simple,
    /// Device, library and testing-module availability.
    Minimal,
}

impl From<SuiteArg> for Suite {
    fn from(arg: SuiteArg) -> Self {
        match arg {
            SuiteArg::Simple => Suite::Simple,
            SuiteArg::Minimal => Suite::Minimal,
        }
    }
}
