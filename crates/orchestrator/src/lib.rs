//! Orchestration Layer
//!
//! This crate turns the single-rank pieces of `kernel` into a distributed
//! immersed-boundary coupling engine:
//! - Configuration loading and validation
//! - Domain decomposition into rank subdomains
//! - Message transport, collectives and staged halo exchange
//! - Marker ownership, force gathering and migration between ranks
//! - The per-rank coupling step state machine and checkpoint/restart
//! - Thread-per-rank launcher and a simulation runner with lifecycle management

#![warn(missing_docs)]

pub mod adapters;
pub mod checkpoint;
pub mod collective;
pub mod comm;
pub mod config;
pub mod coupling;
pub mod distributed;
pub mod domain;
pub mod error;
pub mod force;
pub mod geometry;
pub mod halo;
pub mod markers;
pub mod runner;
pub mod stepper;

pub use config::CouplingConfig;
pub use error::{CouplingError, CouplingResult};
pub use runner::SimulationRunner;
pub use stepper::{CouplingStepper, RunControl, StepReport};

use std::path::Path;

/// Create a simulation from a configuration file
///
/// Loads and validates the configuration, checks that the body geometry can
/// be built, and wraps the run in a [`SimulationRunner`]. Mesh files and
/// restart directories are resolved relative to the configuration file.
///
/// # Example
/// ```no_run
/// use orchestrator::create_simulation;
///
/// let runner = create_simulation("configs/sphere-in-uniform-flow.json")?;
/// runner.start();
/// let result = runner.join()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn create_simulation(config_path: &str) -> CouplingResult<SimulationRunner> {
    tracing::info!("Creating simulation from config: {}", config_path);

    let config = CouplingConfig::load(config_path)?;
    tracing::info!("Configuration loaded: {}", config.name);

    let config_dir = Path::new(config_path)
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    if config.restart_from.is_none() {
        let bodies = geometry::build_bodies(&config, &config_dir)?;
        let markers: usize = bodies.iter().map(|b| b.marker_count()).sum();
        tracing::info!("Geometry ready: {} bodies, {} markers", bodies.len(), markers);
    }

    tracing::info!("Simulation ready to start");
    Ok(SimulationRunner::new(config, config_dir))
}
