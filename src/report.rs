//! Per-check results and run summaries.
//!
//! Every check a scenario runs produces a [`CheckResult`], so one report can
//! say "readiness passed, one credential passed, one failed, event count
//! mismatch" instead of a single pass/fail bit.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{error, info};

use crate::scenario::ScenarioPhase;
use crate::{Error, Result};

/// Longest error text printed per check in the summary
const MAX_SUMMARY_ERROR_LEN: usize = 200;

/// Outcome of one named check
#[derive(Debug)]
pub struct CheckResult {
    /// Check name, e.g. `access[service-name/sambauser]`
    pub name: String,
    /// Whether the check held
    pub passed: bool,
    /// Wall-clock time spent
    pub duration: Duration,
    /// Failure, if any
    pub error: Option<Error>,
}

impl CheckResult {
    /// Build from a check's result
    pub fn from_result(name: impl Into<String>, duration: Duration, result: Result<()>) -> Self {
        let error = result.err();
        Self {
            name: name.into(),
            passed: error.is_none(),
            duration,
            error,
        }
    }
}

/// Run one check, timing it and turning a panic into a failed result
pub async fn run_check<Fut>(name: impl Into<String>, check: Fut) -> CheckResult
where
    Fut: Future<Output = Result<()>>,
{
    let name = name.into();
    let start = Instant::now();
    let result = match AssertUnwindSafe(check).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            Err(Error::verification(&name, format!("PANIC: {msg}")))
        }
    };
    let check = CheckResult::from_result(name, start.elapsed(), result);
    match &check.error {
        None => info!(check = %check.name, "check passed"),
        Some(e) => error!(check = %check.name, error = %e, "check failed"),
    }
    check
}

/// Final status of a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioStatus {
    /// Every check passed, teardown included
    Passed,
    /// At least one check failed
    Failed,
}

/// Everything one scenario run observed
#[derive(Debug)]
pub struct ScenarioReport {
    /// Registry name of the scenario
    pub scenario: String,
    /// Phases entered, in order
    pub phases: Vec<ScenarioPhase>,
    /// Checks in execution order
    pub checks: Vec<CheckResult>,
}

impl ScenarioReport {
    /// Empty report for a scenario
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            phases: vec![ScenarioPhase::Uninitialized],
            checks: Vec::new(),
        }
    }

    /// Passed when every recorded check passed
    pub fn status(&self) -> ScenarioStatus {
        if self.checks.iter().all(|c| c.passed) {
            ScenarioStatus::Passed
        } else {
            ScenarioStatus::Failed
        }
    }

    /// Look up a check by name
    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// Failed checks
    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    /// Last phase entered
    pub fn final_phase(&self) -> ScenarioPhase {
        self.phases
            .last()
            .copied()
            .unwrap_or(ScenarioPhase::Uninitialized)
    }

    /// Whether the scenario ever entered `phase`
    pub fn reached(&self, phase: ScenarioPhase) -> bool {
        self.phases.contains(&phase)
    }

    /// Log a per-check summary of this scenario
    pub fn log_summary(&self) {
        let passed = self.checks.iter().filter(|c| c.passed).count();
        let failed = self.checks.len() - passed;
        let total: Duration = self.checks.iter().map(|c| c.duration).sum();

        info!("========================================");
        info!("  {}", self.scenario.to_uppercase());
        info!("========================================");
        for c in &self.checks {
            let tag = if c.passed { "PASS" } else { "FAIL" };
            info!("  {tag}  {:40} {:.1}s", c.name, c.duration.as_secs_f64());
            if let Some(e) = &c.error {
                let text = e.to_string();
                info!("        -> {}", truncate(&text, MAX_SUMMARY_ERROR_LEN));
            }
        }
        info!("----------------------------------------");
        info!(
            "  {} passed, {} failed ({:.1}s total), final phase {:?}",
            passed,
            failed,
            total.as_secs_f64(),
            self.final_phase()
        );
    }
}

/// Reports for every scenario in a registry run
#[derive(Debug, Default)]
pub struct RunReport {
    /// One report per scenario, in run order
    pub scenarios: Vec<ScenarioReport>,
}

impl RunReport {
    /// Names of scenarios that failed
    pub fn failed_scenarios(&self) -> Vec<&str> {
        self.scenarios
            .iter()
            .filter(|r| r.status() == ScenarioStatus::Failed)
            .map(|r| r.scenario.as_str())
            .collect()
    }

    /// Log every scenario summary, then `Err` listing failures if any
    pub fn finish(&self) -> std::result::Result<(), String> {
        for report in &self.scenarios {
            report.log_summary();
        }
        let failed = self.failed_scenarios();
        info!(
            "{} scenario(s) passed, {} failed",
            self.scenarios.len() - failed.len(),
            failed.len()
        );
        if failed.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "{} scenario(s) failed: {}",
                failed.len(),
                failed.join(", ")
            ))
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
