//! Reference test binary entry point
//!
//! Runs every reference scenario and exits non-zero if any check fails.

use reference_tests::{
    ExpectedResult, MigrationCheck, MomentumCheck, OwnershipCheck, RankInvarianceCheck,
    ReferenceTest, SlipConvergenceCheck, SpeedBoundCheck, TestResult,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Fixed sphere in uniform flow: the surface velocity converges to the
/// body velocity and every step balances marker and grid forces.
fn sphere_slip_test() -> ReferenceTest {
    ReferenceTest {
        name: "Sphere Slip Convergence".to_string(),
        config_path: "configs/sphere-in-uniform-flow.json".to_string(),
        ranks: None,
        expected: ExpectedResult {
            slip_convergence: Some(SlipConvergenceCheck { max_ratio: 0.5 }),
            momentum: Some(MomentumCheck { tolerance: 1e-9 }),
            ownership: Some(OwnershipCheck { expected_markers: 281 }),
            speed_bound: Some(SpeedBoundCheck { max_speed: 0.5 }),
            ..ExpectedResult::default()
        },
    }
}

/// Sphere carried across the x = 0.5 subdomain boundary: markers migrate,
/// ownership stays unique, and the run matches a single-rank run.
fn sphere_crossing_test() -> ReferenceTest {
    ReferenceTest {
        name: "Sphere Crossing".to_string(),
        config_path: "configs/sphere-crossing.json".to_string(),
        ranks: None,
        expected: ExpectedResult {
            ownership: Some(OwnershipCheck { expected_markers: 80 }),
            migration: Some(MigrationCheck { min_migrations: 1 }),
            rank_invariance: Some(RankInvarianceCheck {
                velocity_tolerance: 1e-10,
                position_tolerance: 1e-12,
            }),
            momentum: Some(MomentumCheck { tolerance: 1e-9 }),
            ..ExpectedResult::default()
        },
    }
}

/// Clamped rod in a channel with walls in z
fn rod_channel_test() -> ReferenceTest {
    ReferenceTest {
        name: "Rod in Channel".to_string(),
        config_path: "configs/rod-in-channel.json".to_string(),
        ranks: None,
        expected: ExpectedResult {
            ownership: Some(OwnershipCheck { expected_markers: 10 }),
            momentum: Some(MomentumCheck { tolerance: 1e-9 }),
            speed_bound: Some(SpeedBoundCheck { max_speed: 1.0 }),
            ..ExpectedResult::default()
        },
    }
}

/// Get all reference tests
fn all_tests() -> Vec<ReferenceTest> {
    vec![sphere_slip_test(), sphere_crossing_test(), rod_channel_test()]
}

fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reference_tests=info,orchestrator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    tracing::info!("Coupling Reference Test Suite");
    tracing::info!("=============================");

    let tests = all_tests();
    tracing::info!("Found {} reference tests", tests.len());

    let mut results: Vec<TestResult> = Vec::new();
    let mut passed_count = 0;
    let mut failed_count = 0;

    for test in tests {
        match test.run() {
            Ok(result) => {
                if result.passed {
                    passed_count += 1;
                } else {
                    failed_count += 1;
                }
                result.print_summary();
                results.push(result);
            }
            Err(e) => {
                eprintln!("\nERROR running test {}: {}", test.name, e);
                failed_count += 1;
            }
        }
    }

    // Print overall summary
    println!("\n{}", "=".repeat(80));
    println!("OVERALL SUMMARY");
    println!("{}", "=".repeat(80));
    println!("Total tests: {}", results.len());
    println!("Passed: {}", passed_count);
    println!("Failed: {}", failed_count);
    println!("{}", "=".repeat(80));

    if failed_count > 0 {
        std::process::exit(1);
    }
}
