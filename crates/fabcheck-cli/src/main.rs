//! fabcheck CLI: node smoke tests for the transfer fabric and the GEMM kernels.
//!
//! `transfer` runs one side of a two-process bootstrap handshake and exits
//! abruptly once the side is done. `gemm` runs an ordered suite of FP8 GEMM
//! checks and exits 0 iff every check passed.

mod cli;
mod cmd;
mod table;
mod ui;

use crate::cli::{Cli, Commands};
use clap::Parser;
use fabcheck_types::ConfigError;
use fabcheck_wire::WireError;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Suggested remedy for a fatal error.
fn fix_hint(err: &anyhow::Error) -> &'static str {
    if let Some(wire) = err.downcast_ref::<WireError>() {
        return match wire {
            WireError::ConnectExhausted { .. } | WireError::Connect { .. } => {
                "start the target first: fabcheck transfer target <host> <port>"
            }
            WireError::Bind { .. } => "pick a free port or stop the process holding it",
            WireError::IncompleteFrame { .. }
            | WireError::EmptyAdvertisement
            | WireError::Json(_)
            | WireError::Metadata(_) => {
                "make sure both sides run the same fabcheck version"
            }
            _ => "rerun with RUST_LOG=debug for details",
        };
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return "fix or remove the config file (default: ~/.fabcheck/config.toml)";
    }
    "rerun with RUST_LOG=debug for details"
}

fn main() {
    // Usage errors exit 1; --help and --version exit 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_tracing_stderr();

    let result = match cli.command {
        Commands::Transfer(args) => cmd::transfer::cmd_transfer(cli.config, args),
        Commands::Gemm(args) => cmd::gemm::cmd_gemm(cli.config, args),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ui::error_with_fix(&format!("{e:#}"), fix_hint(&e));
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Mode, SuiteArg};
    use clap::error::ErrorKind;
    use fabcheck_types::Seed;

    #[test]
    fn test_transfer_args_parse() {
        let cli = Cli::try_parse_from(["fabcheck", "transfer", "target", "0.0.0.0", "5555"])
            .expect("transfer syntax should parse");
        match cli.command {
            Commands::Transfer(args) => {
                assert_eq!(args.mode, Mode::Target);
                assert_eq!(args.host, "0.0.0.0");
                assert_eq!(args.port, 5555);
            }
            Commands::Gemm(_) => panic!("expected transfer"),
        }
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let err = Cli::try_parse_from(["fabcheck", "transfer", "observer", "host", "1"])
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
        assert!(err.use_stderr());
    }

    #[test]
    fn test_missing_and_bad_port_rejected() {
        assert!(Cli::try_parse_from(["fabcheck", "transfer", "initiator", "host"]).is_err());
        let bad_port = ["fabcheck", "transfer", "initiator", "host", "70000"];
        assert!(Cli::try_parse_from(bad_port).is_err());
    }

    #[test]
    fn test_gemm_defaults() {
        let cli = Cli::try_parse_from(["fabcheck", "gemm"]).unwrap();
        match cli.command {
            Commands::Gemm(args) => {
                assert_eq!(args.gpu, None);
                assert_eq!(args.suite, SuiteArg::Simple);
                assert_eq!(args.seed, None);
                assert!(!args.json);
            }
            Commands::Transfer(_) => panic!("expected gemm"),
        }
    }

    #[test]
    fn test_gemm_flags_and_global_config() {
        let cli = Cli::try_parse_from([
            "fabcheck", "gemm", "--gpu", "1", "--suite", "minimal", "--seed", "7", "--json",
            "--config", "/tmp/fabcheck.toml",
        ])
        .unwrap();
        assert_eq!(
            cli.config.as_deref(),
            Some(std::path::Path::new("/tmp/fabcheck.toml"))
        );
        match cli.command {
            Commands::Gemm(args) => {
                assert_eq!(args.gpu, Some(1));
                assert_eq!(args.suite, SuiteArg::Minimal);
                assert_eq!(args.seed, Some(Seed::Fixed(7)));
                assert!(args.json);
            }
            Commands::Transfer(_) => panic!("expected gemm"),
        }
    }

    #[test]
    fn test_gemm_entropy_seed() {
        let cli = Cli::try_parse_from(["fabcheck", "gemm", "--seed", "entropy"]).unwrap();
        match cli.command {
            Commands::Gemm(args) => assert_eq!(args.seed, Some(Seed::Entropy)),
            Commands::Transfer(_) => panic!("expected gemm"),
        }
        assert!(Cli::try_parse_from(["fabcheck", "gemm", "--seed", "lucky"]).is_err());
    }

    #[test]
    fn test_help_is_not_an_error_exit() {
        let err = Cli::try_parse_from(["fabcheck", "--help"]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert!(!err.use_stderr());
    }

    #[test]
    fn test_fix_hint_for_unreachable_target() {
        let err = anyhow::Error::new(WireError::ConnectExhausted {
            addr: "10.0.0.1:5555".to_string(),
            attempts: 30,
        });
        assert!(fix_hint(&err).contains("start the target first"));
    }
}
