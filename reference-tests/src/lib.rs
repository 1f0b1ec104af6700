//! Reference test framework for coupled immersed-boundary runs
//!
//! This crate runs complete scenarios through the distributed engine and
//! checks physical and protocol properties of the result: slip
//! convergence, momentum balance between markers and grid, marker
//! ownership, migration, and agreement with a single-rank reference run.

#[cfg(test)]
mod tests;

use orchestrator::config::CouplingConfig;
use orchestrator::distributed::{run_distributed, run_single_instance, DistributedResult};
use orchestrator::RunControl;
use std::path::Path;
use std::sync::Arc;

/// Expected result criteria for a reference test
#[derive(Debug, Clone, Default)]
pub struct ExpectedResult {
    /// Slip decay between the first and the last step
    pub slip_convergence: Option<SlipConvergenceCheck>,
    /// Spread force equals force applied on the grid every step
    pub momentum: Option<MomentumCheck>,
    /// Every marker owned by exactly one rank every step
    pub ownership: Option<OwnershipCheck>,
    /// Markers actually changed owner during the run
    pub migration: Option<MigrationCheck>,
    /// Same trajectory as a single-rank run
    pub rank_invariance: Option<RankInvarianceCheck>,
    /// Fluid speed stays bounded
    pub speed_bound: Option<SpeedBoundCheck>,
}

/// Check that the RMS slip decays
#[derive(Debug, Clone)]
pub struct SlipConvergenceCheck {
    /// Largest allowed ratio of final to initial RMS slip
    pub max_ratio: f64,
}

/// Check the marker/grid force balance
#[derive(Debug, Clone)]
pub struct MomentumCheck {
    /// Relative tolerance on the force mismatch
    pub tolerance: f64,
}

/// Check the global owned-marker count
#[derive(Debug, Clone)]
pub struct OwnershipCheck {
    /// Total number of markers in the run
    pub expected_markers: u64,
}

/// Check that markers migrated
#[derive(Debug, Clone)]
pub struct MigrationCheck {
    /// Minimum number of marker hand-offs over the run
    pub min_migrations: u64,
}

/// Check against a single-rank run of the same configuration
#[derive(Debug, Clone)]
pub struct RankInvarianceCheck {
    /// Largest allowed absolute velocity difference
    pub velocity_tolerance: f64,
    /// Largest allowed absolute marker position difference
    pub position_tolerance: f64,
}

/// Check the maximum fluid speed
#[derive(Debug, Clone)]
pub struct SpeedBoundCheck {
    /// Largest allowed speed at any step
    pub max_speed: f64,
}

/// Result of running a reference test
#[derive(Debug)]
pub struct TestResult {
    /// Test name
    pub name: String,
    /// Whether test passed
    pub passed: bool,
    /// Individual check results
    pub checks: Vec<CheckResult>,
    /// Ranks used
    pub ranks: usize,
    /// Number of steps executed
    pub steps: u64,
    /// Simulated time
    pub sim_time: f64,
    /// RMS slip after the last step
    pub final_slip_rms: f64,
}

/// Result of an individual validation check
#[derive(Debug)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Whether check passed
    pub passed: bool,
    /// Detail, or the reason for failure
    pub message: Option<String>,
}

impl CheckResult {
    fn new(name: &str, passed: bool, message: String) -> Self {
        Self {
            name: name.to_string(),
            passed,
            message: Some(message),
        }
    }
}

/// A reference test case
pub struct ReferenceTest {
    /// Test name
    pub name: String,
    /// Path to configuration file
    pub config_path: String,
    /// Rank count override
    pub ranks: Option<usize>,
    /// Expected results to validate
    pub expected: ExpectedResult,
}

impl ReferenceTest {
    /// Run the reference test and return results
    pub fn run(&self) -> Result<TestResult, String> {
        tracing::info!("Running reference test: {}", self.name);

        let mut config = CouplingConfig::load(&self.config_path).map_err(|e| e.to_string())?;
        if let Some(ranks) = self.ranks {
            config.ranks = ranks;
            config.rank_layout = None;
        }
        let config_dir = Path::new(&self.config_path)
            .parent()
            .ok_or("Invalid config path")?;

        let result = run_distributed(&config, Arc::new(RunControl::new()), config_dir)
            .map_err(|e| e.to_string())?;
        tracing::info!(
            "Simulation complete: {} steps, {:.6} simulated, layout {:?}",
            result.steps,
            result.sim_time,
            result.layout
        );

        let mut checks = Vec::new();

        if let Some(ref check) = self.expected.slip_convergence {
            checks.push(validate_slip_convergence(&result, check));
        }
        if let Some(ref check) = self.expected.momentum {
            checks.push(validate_momentum(&result, check));
        }
        if let Some(ref check) = self.expected.ownership {
            checks.push(validate_ownership(&result, check));
        }
        if let Some(ref check) = self.expected.migration {
            checks.push(validate_migration(&result, check));
        }
        if let Some(ref check) = self.expected.speed_bound {
            checks.push(validate_speed_bound(&result, check));
        }
        if let Some(ref check) = self.expected.rank_invariance {
            let reference = run_single_instance(&config, Arc::new(RunControl::new()), config_dir)
                .map_err(|e| e.to_string())?;
            checks.push(validate_rank_invariance(&result, &reference, check));
        }

        Ok(TestResult {
            name: self.name.clone(),
            passed: checks.iter().all(|c| c.passed),
            checks,
            ranks: config.ranks,
            steps: result.steps,
            sim_time: result.sim_time,
            final_slip_rms: result.reports.last().map(|r| r.slip_rms).unwrap_or(0.0),
        })
    }
}

/// Validate that the RMS slip decayed enough
fn validate_slip_convergence(result: &DistributedResult, check: &SlipConvergenceCheck) -> CheckResult {
    let (Some(first), Some(last)) = (result.reports.first(), result.reports.last()) else {
        return CheckResult::new("Slip Convergence", false, "no steps were run".to_string());
    };
    if first.slip_rms <= 0.0 {
        return CheckResult::new("Slip Convergence", true, "no initial slip".to_string());
    }
    let ratio = last.slip_rms / first.slip_rms;
    CheckResult::new(
        "Slip Convergence",
        ratio <= check.max_ratio,
        format!(
            "slip_rms {:.4e} -> {:.4e} (ratio {:.3}, limit {:.3})",
            first.slip_rms, last.slip_rms, ratio, check.max_ratio
        ),
    )
}

/// Validate that every step put the same force on the grid as on the markers
fn validate_momentum(result: &DistributedResult, check: &MomentumCheck) -> CheckResult {
    let mut worst = 0.0_f64;
    let mut worst_step = 0;
    for report in &result.reports {
        let scale = report
            .marker_force
            .iter()
            .fold(0.0_f64, |m, f| m.max(f.abs()))
            .max(1e-12);
        for a in 0..3 {
            let rel = (report.marker_force[a] - report.grid_force[a]).abs() / scale;
            if rel > worst {
                worst = rel;
                worst_step = report.step;
            }
        }
    }
    CheckResult::new(
        "Momentum Balance",
        worst <= check.tolerance,
        format!(
            "worst relative mismatch {:.3e} at step {} (limit {:.1e})",
            worst, worst_step, check.tolerance
        ),
    )
}

/// Validate that the owned-marker count never changed
fn validate_ownership(result: &DistributedResult, check: &OwnershipCheck) -> CheckResult {
    let bad: Vec<u64> = result
        .reports
        .iter()
        .filter(|r| r.owned_markers != check.expected_markers)
        .map(|r| r.step)
        .collect();
    let final_ok = result.markers.len() as u64 == check.expected_markers;
    CheckResult::new(
        "Ownership",
        bad.is_empty() && final_ok,
        if bad.is_empty() && final_ok {
            format!("{} markers owned exactly once every step", check.expected_markers)
        } else {
            format!(
                "owned count differs from {} at steps {:?}; {} markers at the end",
                check.expected_markers,
                bad,
                result.markers.len()
            )
        },
    )
}

/// Validate that markers changed owner
fn validate_migration(result: &DistributedResult, check: &MigrationCheck) -> CheckResult {
    let total: u64 = result.reports.iter().map(|r| r.migrations).sum();
    CheckResult::new(
        "Migration",
        total >= check.min_migrations,
        format!("{} marker hand-offs (minimum {})", total, check.min_migrations),
    )
}

/// Validate the fluid speed bound
fn validate_speed_bound(result: &DistributedResult, check: &SpeedBoundCheck) -> CheckResult {
    let max_speed = result
        .reports
        .iter()
        .fold(0.0_f64, |m, r| m.max(r.max_speed));
    CheckResult::new(
        "Speed Bound",
        max_speed.is_finite() && max_speed <= check.max_speed,
        format!("max speed {:.4e} (limit {:.4e})", max_speed, check.max_speed),
    )
}

/// Validate agreement with the single-rank reference run
fn validate_rank_invariance(
    result: &DistributedResult,
    reference: &DistributedResult,
    check: &RankInvarianceCheck,
) -> CheckResult {
    if result.velocity.len() != reference.velocity.len() || result.markers.len() != reference.markers.len() {
        return CheckResult::new(
            "Rank Invariance",
            false,
            "field or marker count differs from the single-rank run".to_string(),
        );
    }
    let velocity_diff = result
        .velocity
        .iter()
        .zip(&reference.velocity)
        .fold(0.0_f64, |m, (a, b)| m.max((a - b).abs()));
    let mut position_diff = 0.0_f64;
    for (a, b) in result.markers.iter().zip(&reference.markers) {
        if a.id != b.id {
            return CheckResult::new(
                "Rank Invariance",
                false,
                format!("marker order differs: {:#x} vs {:#x}", a.id, b.id),
            );
        }
        for k in 0..3 {
            position_diff = position_diff.max((a.position[k] - b.position[k]).abs());
        }
    }
    CheckResult::new(
        "Rank Invariance",
        velocity_diff <= check.velocity_tolerance && position_diff <= check.position_tolerance,
        format!(
            "max |du| = {:.3e} (limit {:.1e}), max |dx| = {:.3e} (limit {:.1e})",
            velocity_diff, check.velocity_tolerance, position_diff, check.position_tolerance
        ),
    )
}

impl TestResult {
    /// Print a summary of the test result
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(80));
        println!("Test: {}", self.name);
        println!("{}", "=".repeat(80));
        println!("Status: {}", if self.passed { "PASSED" } else { "FAILED" });
        println!("Ranks: {}", self.ranks);
        println!("Steps: {}", self.steps);
        println!("Simulated time: {:.6}", self.sim_time);
        println!("Final slip RMS: {:.4e}", self.final_slip_rms);
        println!("\nValidation Checks:");
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            print!("  [{}] {}", status, check.name);
            if let Some(ref msg) = check.message {
                print!(" - {}", msg);
            }
            println!();
        }
        println!("{}", "=".repeat(80));
    }
}
