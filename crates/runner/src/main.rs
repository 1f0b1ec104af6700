//! Command-line runner
//!
//! Runs a coupled simulation from a JSON configuration and optionally writes
//! a summary (step reports and body loads) as JSON.
//!
//! ```text
//! ib-runner <config.json> [summary.json]
//! ```
//!
//! `RANKS` overrides the configured rank count.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use orchestrator::distributed::DistributedResult;
use orchestrator::{create_simulation, CouplingConfig, SimulationRunner};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Serialize)]
struct Summary<'a> {
    name: &'a str,
    steps: u64,
    sim_time: f64,
    layout: [usize; 3],
    reports: &'a [orchestrator::StepReport],
    body_forces: &'a std::collections::BTreeMap<kernel::BodyId, orchestrator::force::SurfaceForce>,
}

fn write_summary(path: &PathBuf, name: &str, result: &DistributedResult) -> Result<(), String> {
    let summary = Summary {
        name,
        steps: result.steps,
        sim_time: result.sim_time,
        layout: result.layout,
        reports: &result.reports,
        body_forces: &result.body_forces,
    };
    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    std::fs::write(path, json).map_err(|e| format!("{}: {}", path.display(), e))
}

fn run(config_path: &str, summary_path: Option<PathBuf>) -> Result<(), String> {
    let runner = match std::env::var("RANKS").ok().and_then(|r| r.parse::<usize>().ok()) {
        Some(ranks) => {
            let mut config = CouplingConfig::load(config_path).map_err(|e| e.to_string())?;
            tracing::info!("Overriding rank count: {} -> {}", config.ranks, ranks);
            config.ranks = ranks;
            config.rank_layout = None;
            let config_dir = Path::new(config_path)
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf();
            SimulationRunner::new(config, config_dir)
        }
        None => create_simulation(config_path).map_err(|e| e.to_string())?,
    };
    runner.start();
    let result = runner
        .join()?
        .ok_or_else(|| "simulation stopped before it started".to_string())?;

    for (id, force) in &result.body_forces {
        tracing::info!(
            "Body {}: force [{:.4e}, {:.4e}, {:.4e}], moment [{:.4e}, {:.4e}, {:.4e}]",
            id,
            force.net_force[0],
            force.net_force[1],
            force.net_force[2],
            force.net_moment[0],
            force.net_moment[1],
            force.net_moment[2]
        );
    }
    if let Some(last) = result.reports.last() {
        tracing::info!(
            "Final step {}: slip_rms={:.4e}, max_speed={:.4e}",
            last.step,
            last.slip_rms,
            last.max_speed
        );
    }

    if let Some(path) = summary_path {
        let name = CouplingConfig::load(config_path)
            .map(|c| c.name)
            .unwrap_or_default();
        write_summary(&path, &name, &result)?;
        tracing::info!("Summary written to {}", path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runner=info,orchestrator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(config_path) = args.get(1) else {
        eprintln!("usage: ib-runner <config.json> [summary.json]");
        return ExitCode::from(2);
    };
    let summary_path = args.get(2).map(PathBuf::from);

    match run(config_path, summary_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Run failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
