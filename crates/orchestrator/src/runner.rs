//! Simulation runner with lifecycle management
//!
//! This module provides the `SimulationRunner` which launches a distributed
//! coupling run in a background thread and tracks its state. Progress is
//! read from the shared [`RunControl`], which rank 0 updates after every
//! step.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::CouplingConfig;
use crate::distributed::{run_distributed, DistributedResult};
use crate::stepper::RunControl;

/// Runner state enum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerState {
    /// Simulation created but not yet started
    Created,
    /// Simulation actively running
    Running,
    /// Simulation finished (step count reached or stop requested)
    Finished,
    /// Simulation encountered an error
    Error,
}

/// Shared state between the runner thread and control interface
struct SharedState {
    state: RunnerState,
    error_message: Option<String>,
    result: Option<DistributedResult>,
}

/// Handle for controlling and querying a running simulation
pub struct SimulationRunner {
    shared: Arc<Mutex<SharedState>>,
    control: Arc<RunControl>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl SimulationRunner {
    /// Create a runner for `config`. Relative paths in the configuration are
    /// resolved against `config_dir`. Nothing runs until [`start`](Self::start).
    pub fn new(config: CouplingConfig, config_dir: PathBuf) -> Self {
        let shared = Arc::new(Mutex::new(SharedState {
            state: RunnerState::Created,
            error_message: None,
            result: None,
        }));
        let control = Arc::new(RunControl::new());

        let shared_clone = Arc::clone(&shared);
        let control_clone = Arc::clone(&control);
        let thread_handle = thread::spawn(move || {
            run_simulation(config, config_dir, shared_clone, control_clone);
        });

        Self {
            shared,
            control,
            thread_handle: Some(thread_handle),
        }
    }

    /// Get current runner state
    pub fn state(&self) -> RunnerState {
        self.shared.lock().unwrap().state.clone()
    }

    /// Simulated time after the last completed step
    pub fn sim_time(&self) -> f64 {
        self.control.sim_time()
    }

    /// Last completed step
    pub fn timestep_count(&self) -> u64 {
        self.control.step()
    }

    /// Get error message if state is Error
    pub fn error_message(&self) -> Option<String> {
        self.shared.lock().unwrap().error_message.clone()
    }

    /// Start the simulation (transition from Created to Running)
    pub fn start(&self) {
        let mut state = self.shared.lock().unwrap();
        if state.state == RunnerState::Created {
            state.state = RunnerState::Running;
        }
    }

    /// Ask every rank to stop after the step in progress. A runner that was
    /// never started finishes without running.
    pub fn stop(&self) {
        self.control.request_stop();
        let mut state = self.shared.lock().unwrap();
        if state.state == RunnerState::Created {
            state.state = RunnerState::Finished;
        }
    }

    /// Wait for the simulation thread and return the final result, if the
    /// run got that far.
    pub fn join(mut self) -> Result<Option<DistributedResult>, String> {
        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| "Thread panicked".to_string())?;
        }
        let mut state = self.shared.lock().unwrap();
        if let Some(message) = state.error_message.clone() {
            return Err(message);
        }
        Ok(state.result.take())
    }
}

impl Drop for SimulationRunner {
    fn drop(&mut self) {
        self.control.request_stop();
        if let Ok(mut state) = self.shared.lock() {
            if state.state == RunnerState::Created {
                state.state = RunnerState::Finished;
            }
        }
    }
}

/// Body of the background thread
fn run_simulation(
    config: CouplingConfig,
    config_dir: PathBuf,
    shared: Arc<Mutex<SharedState>>,
    control: Arc<RunControl>,
) {
    // Wait for start signal
    loop {
        let state = shared.lock().unwrap().state.clone();
        match state {
            RunnerState::Created => thread::sleep(Duration::from_millis(10)),
            RunnerState::Running => break,
            _ => return,
        }
    }

    let start_wall_time = Instant::now();
    let outcome = run_distributed(&config, Arc::clone(&control), &config_dir);
    let wall_time = start_wall_time.elapsed().as_secs_f64();

    let mut guard = shared.lock().unwrap();
    match outcome {
        Ok(result) => {
            tracing::info!(
                "Simulation thread exiting: {} timesteps, {:.4} simulated, wall_time={:.2}s",
                result.steps,
                result.sim_time,
                wall_time
            );
            guard.result = Some(result);
            guard.state = RunnerState::Finished;
        }
        Err(e) => {
            tracing::error!("Simulation failed after {:.2}s: {}", wall_time, e);
            guard.error_message = Some(e.to_string());
            guard.state = RunnerState::Error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CouplingParams, FlowConfig, StabilityPolicy};
    use kernel::{DeltaKernel, GlobalGrid};

    fn test_config(steps: u64) -> CouplingConfig {
        CouplingConfig {
            name: "runner-test".to_string(),
            grid: GlobalGrid {
                dims: [8, 8, 8],
                spacing: 0.125,
                origin: [0.0; 3],
                periodic: [true; 3],
            },
            ranks: 2,
            rank_layout: None,
            halo_width: 2,
            dt: 0.01,
            steps,
            kernel: DeltaKernel::Peskin4,
            coupling: CouplingParams::default(),
            flow: FlowConfig::default(),
            bodies: Vec::new(),
            stability: StabilityPolicy::default(),
            checkpoint: None,
            comm_timeout_ms: 10_000,
            restart_from: None,
            log_interval: 100,
        }
    }

    #[test]
    fn test_runner_lifecycle() {
        let runner = SimulationRunner::new(test_config(10), PathBuf::from("."));

        // Initially Created
        assert_eq!(runner.state(), RunnerState::Created);

        runner.start();
        let deadline = Instant::now() + Duration::from_secs(30);
        while runner.state() == RunnerState::Running && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(runner.state(), RunnerState::Finished);
        assert_eq!(runner.timestep_count(), 10);
        assert!((runner.sim_time() - 0.1).abs() < 1e-12);

        let result = runner.join().unwrap().unwrap();
        assert_eq!(result.steps, 10);
    }

    #[test]
    fn test_stop_before_start() {
        let runner = SimulationRunner::new(test_config(10), PathBuf::from("."));
        runner.stop();
        assert_eq!(runner.state(), RunnerState::Finished);
        assert!(runner.join().unwrap().is_none());
    }

    #[test]
    fn test_invalid_config_reports_error() {
        let mut config = test_config(10);
        config.dt = -1.0;
        let runner = SimulationRunner::new(config, PathBuf::from("."));
        runner.start();
        let message = runner.join().unwrap_err();
        eprintln!("error: {}", message);
        assert!(message.contains("dt"));
    }
}
