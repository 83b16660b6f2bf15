//! Runs checks in order, isolating each one, and aggregates the results.

use crate::backend::DeviceRuntime;
use crate::checks::{Check, CheckContext, Note, NoteLevel, Suite};
use crate::error::GemmError;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{error, info};

/// Outcome of one check as it appears in the summary.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub notes: Vec<Note>,
    pub elapsed_ms: f64,
}

/// All results of a suite run, in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteSummary {
    pub suite: Suite,
    pub results: Vec<CheckResult>,
}

impl SuiteSummary {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    /// 0 iff every check passed.
    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            0
        } else {
            1
        }
    }
}

/// Hooks for rendering progress while a suite runs.
pub trait SuiteObserver {
    fn check_started(&mut self, _name: &str) {}
    fn check_finished(&mut self, _result: &CheckResult) {}
}

impl SuiteObserver for () {}

/// Select `ordinal` and return its name.
///
/// Fails when no runtime is available or the ordinal is out of range.
pub fn preflight(runtime: &mut dyn DeviceRuntime, ordinal: usize) -> Result<String, GemmError> {
    if !runtime.is_available() {
        return Err(GemmError::RuntimeUnavailable);
    }
    runtime.set_device(ordinal)?;
    let name = runtime.device_name(ordinal)?;
    info!("Using device {ordinal}: {name}");
    Ok(name)
}

/// Run `check`, converting an error or panic into a failed result.
pub fn run_check(check: &Check, ctx: &mut CheckContext<'_>) -> CheckResult {
    let start = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| (check.run)(ctx)));
    let (passed, notes) = match outcome {
        Ok(Ok(report)) => (report.passed, report.notes),
        Ok(Err(e)) => {
            error!(check = check.name, "check failed: {e}");
            (false, vec![fail_note(format!("{} test FAILED: {e}", check.name))])
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!(check = check.name, "check panicked: {msg}");
            (false, vec![fail_note(format!("{} test FAILED: panic: {msg}", check.name))])
        }
    };
    CheckResult {
        name: check.name.to_string(),
        passed,
        notes,
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
    }
}

/// Run `checks` in order. Nothing a check does stops the ones after it.
pub fn run_checks(
    checks: &[Check],
    ctx: &mut CheckContext<'_>,
    observer: &mut dyn SuiteObserver,
) -> Vec<CheckResult> {
    checks
        .iter()
        .map(|check| {
            observer.check_started(check.name);
            let result = run_check(check, ctx);
            observer.check_finished(&result);
            result
        })
        .collect()
}

pub fn run_suite(
    suite: Suite,
    ctx: &mut CheckContext<'_>,
    observer: &mut dyn SuiteObserver,
) -> SuiteSummary {
    let results = run_checks(&suite.checks(), ctx, observer);
    SuiteSummary { suite, results }
}

fn fail_note(text: String) -> Note {
    Note {
        level: NoteLevel::Fail,
        text,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
