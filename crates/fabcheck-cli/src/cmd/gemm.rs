//! `fabcheck gemm`: FP8 GEMM smoke checks.

use crate::cli::GemmArgs;
use crate::table::{Align, Table};
use crate::ui;
use anyhow::Context;
use fabcheck_gemm::{
    preflight, run_suite, CheckContext, CheckResult, DeviceRuntime, HostKernels, HostRuntime,
    NoteLevel, Suite, SuiteObserver, SuiteSummary,
};
use fabcheck_types::config::load_config;
use std::path::PathBuf;
use tracing::warn;

/// Prints each check's notes as it completes.
struct ConsoleObserver;

impl SuiteObserver for ConsoleObserver {
    fn check_started(&mut self, name: &str) {
        ui::blank();
        ui::section(&format!("{name}:"));
    }

    fn check_finished(&mut self, result: &CheckResult) {
        for note in &result.notes {
            match note.level {
                NoteLevel::Ok => ui::check_ok(&note.text),
                NoteLevel::Info => ui::check_info(&note.text),
                NoteLevel::Fail => ui::check_fail(&note.text),
            }
        }
    }
}

/// Returns the process exit code: 0 iff every check passed.
pub fn cmd_gemm(config: Option<PathBuf>, args: GemmArgs) -> anyhow::Result<i32> {
    let mut config = load_config(config.as_deref())
        .context("Failed to load configuration")?
        .gemm;
    if let Some(gpu) = args.gpu {
        config.device = gpu;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    let suite = Suite::from(args.suite);

    let kernels = HostKernels::new();
    let mut runtime = HostRuntime::new();

    match suite {
        Suite::Simple => {
            let name = preflight(&mut runtime, config.device)
                .with_context(|| format!("Cannot use device {}", config.device))?;
            if !args.json {
                ui::banner(suite.title());
                ui::kv("Device", &format!("{}: {name}", config.device));
                ui::kv("Runtime", &runtime.runtime_version());
            }
        }
        Suite::Minimal => {
            if runtime.is_available() {
                if let Err(e) = runtime.set_device(config.device) {
                    warn!("Could not select device {}: {e}", config.device);
                }
            }
            if !args.json {
                ui::banner(suite.title());
            }
        }
    }
    if !args.json {
        ui::kv("Seed", &config.seed.to_string());
    }

    let mut ctx = CheckContext::new(&kernels, &runtime, &config);
    let summary = if args.json {
        run_suite(suite, &mut ctx, &mut ())
    } else {
        run_suite(suite, &mut ctx, &mut ConsoleObserver)
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
        );
    } else {
        print_summary(&summary);
    }
    Ok(summary.exit_code())
}

fn print_summary(summary: &SuiteSummary) {
    ui::blank();
    ui::section("Summary");

    let mut table = Table::new(&["Check", "Result", "Time"])
        .status_column(1)
        .align(2, Align::Right);
    for r in &summary.results {
        let status = if r.passed { "PASSED" } else { "FAILED" };
        table.add_row(&[&r.name, status, &format!("{:.1} ms", r.elapsed_ms)]);
    }
    table.print();

    ui::kv("Total", &summary.total().to_string());
    ui::kv_ok("Passed", &summary.passed().to_string());
    if summary.failed() > 0 {
        ui::kv_fail("Failed", &summary.failed().to_string());
        ui::blank();
        ui::error(&format!("{} check(s) failed", summary.failed()));
    } else {
        ui::kv("Failed", "0");
        ui::blank();
        ui::success("All checks passed!");
    }
}
