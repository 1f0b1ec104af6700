//! Reference scenarios run through `cargo test`.

use crate::{
    ExpectedResult, MigrationCheck, MomentumCheck, OwnershipCheck, RankInvarianceCheck,
    ReferenceTest, SlipConvergenceCheck, SpeedBoundCheck,
};

/// Resolve a path relative to the workspace root (one level up from this crate)
fn project_path(relative: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let project_root = std::path::Path::new(manifest_dir)
        .parent()
        .expect("Could not find project root");
    project_root.join(relative).to_string_lossy().to_string()
}

fn run(test: ReferenceTest) {
    let result = test.run().expect("Test execution failed");
    result.print_summary();
    assert!(result.passed, "{} failed", result.name);
}

#[test]
fn test_sphere_slip_convergence() {
    run(ReferenceTest {
        name: "Sphere Slip Convergence".to_string(),
        config_path: project_path("configs/sphere-in-uniform-flow.json"),
        ranks: None,
        expected: ExpectedResult {
            slip_convergence: Some(SlipConvergenceCheck { max_ratio: 0.5 }),
            momentum: Some(MomentumCheck { tolerance: 1e-9 }),
            ownership: Some(OwnershipCheck { expected_markers: 281 }),
            speed_bound: Some(SpeedBoundCheck { max_speed: 0.5 }),
            ..ExpectedResult::default()
        },
    });
}

#[test]
fn test_sphere_crossing_migrates_and_matches_single_rank() {
    run(ReferenceTest {
        name: "Sphere Crossing".to_string(),
        config_path: project_path("configs/sphere-crossing.json"),
        ranks: None,
        expected: ExpectedResult {
            ownership: Some(OwnershipCheck { expected_markers: 80 }),
            migration: Some(MigrationCheck { min_migrations: 1 }),
            rank_invariance: Some(RankInvarianceCheck {
                velocity_tolerance: 1e-10,
                position_tolerance: 1e-12,
            }),
            ..ExpectedResult::default()
        },
    });
}

#[test]
fn test_sphere_slip_on_eight_ranks() {
    run(ReferenceTest {
        name: "Sphere Slip, 8 ranks".to_string(),
        config_path: project_path("configs/sphere-in-uniform-flow.json"),
        ranks: Some(8),
        expected: ExpectedResult {
            ownership: Some(OwnershipCheck { expected_markers: 281 }),
            rank_invariance: Some(RankInvarianceCheck {
                velocity_tolerance: 1e-10,
                position_tolerance: 1e-12,
            }),
            ..ExpectedResult::default()
        },
    });
}

#[test]
fn test_rod_in_channel() {
    run(ReferenceTest {
        name: "Rod in Channel".to_string(),
        config_path: project_path("configs/rod-in-channel.json"),
        ranks: None,
        expected: ExpectedResult {
            ownership: Some(OwnershipCheck { expected_markers: 10 }),
            momentum: Some(MomentumCheck { tolerance: 1e-9 }),
            speed_bound: Some(SpeedBoundCheck { max_speed: 1.0 }),
            ..ExpectedResult::default()
        },
    });
}
