//! Distributed run launcher
//!
//! Runs one [`CouplingStepper`] per rank, each on its own thread, connected
//! by an in-process channel world. Ranks only talk through the
//! [`Transport`](crate::comm::Transport) they are handed, so the layout of
//! the run is the same as a multi-process one with a different transport.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kernel::{Body, BodyId, GlobalGrid, ViscousFlowKernel};

use crate::adapters::StructureKernelAdapter;
use crate::checkpoint::{self, RankCheckpoint};
use crate::comm::{channel_world, Transport};
use crate::config::CouplingConfig;
use crate::domain::DomainDecomposer;
use crate::error::{CouplingError, CouplingResult};
use crate::force::{body_forces, SurfaceForce};
use crate::geometry::build_bodies;
use crate::markers::LagrangianMarker;
use crate::stepper::{CouplingStepper, RankContext, RunControl, StepReport};

/// Result of a distributed run, assembled on rank 0.
#[derive(Debug, Clone)]
pub struct DistributedResult {
    /// Global grid
    pub grid: GlobalGrid,
    /// Rank layout used
    pub layout: [usize; 3],
    /// Global velocity field, `3 * flat_index + component`
    pub velocity: Vec<f64>,
    /// All markers in id order
    pub markers: Vec<LagrangianMarker>,
    /// All bodies in id order
    pub bodies: Vec<Body>,
    /// Hydrodynamic load on each body
    pub body_forces: BTreeMap<BodyId, SurfaceForce>,
    /// Reports of the steps run by this launch
    pub reports: Vec<StepReport>,
    /// Last completed step
    pub steps: u64,
    /// Simulated time at the end
    pub sim_time: f64,
}

impl DistributedResult {
    /// Velocity of global cell `idx`.
    pub fn velocity_at(&self, idx: [usize; 3]) -> [f64; 3] {
        let base = 3 * self.grid.flat_index(idx);
        [self.velocity[base], self.velocity[base + 1], self.velocity[base + 2]]
    }
}

/// What one rank thread hands back.
struct RankOutput {
    reports: Vec<StepReport>,
    velocity: Option<Vec<f64>>,
    markers: Option<Vec<LagrangianMarker>>,
    bodies: Option<Vec<Body>>,
    steps: u64,
    sim_time: f64,
}

fn run_rank(mut stepper: CouplingStepper) -> CouplingResult<RankOutput> {
    let reports = stepper.run()?;
    let collect = |stepper: &mut CouplingStepper| -> CouplingResult<RankOutput> {
        let velocity = stepper.gather_velocity()?;
        let markers = stepper.gather_markers()?;
        let bodies = stepper.gather_bodies()?;
        Ok(RankOutput {
            reports: Vec::new(),
            velocity,
            markers,
            bodies,
            steps: stepper.step_index(),
            sim_time: stepper.time(),
        })
    };
    match collect(&mut stepper) {
        Ok(output) => Ok(RankOutput { reports, ..output }),
        Err(e) => {
            stepper.abort(&e);
            Err(e)
        }
    }
}

/// Run a coupled simulation on `config.ranks` threads.
///
/// Mesh files and a relative `restart_from` path are resolved against
/// `config_dir`. The first primary failure of any rank is returned; failures
/// a rank only saw because a peer aborted are reported only when nothing
/// better is known.
pub fn run_distributed(
    config: &CouplingConfig,
    control: Arc<RunControl>,
    config_dir: &Path,
) -> CouplingResult<DistributedResult> {
    config.validate()?;
    let decomposition = Arc::new(DomainDecomposer::new(
        &config.grid,
        config.ranks,
        config.rank_layout,
        config.halo_width,
        config.required_halo(),
    )?);
    let n = decomposition.size();
    let config = Arc::new(config.clone());

    let restart = match &config.restart_from {
        Some(dir) => {
            let dir = config_dir.join(dir);
            let table = checkpoint::read_table(&dir)?;
            Some((dir, Arc::new(table)))
        }
        None => None,
    };
    let bodies = if restart.is_some() {
        Vec::new()
    } else {
        build_bodies(&config, config_dir)?
    };

    tracing::info!(
        "Distributed run '{}': {} ranks, layout {:?}, grid {:?}, {} bodies, {} steps",
        config.name,
        n,
        decomposition.layout(),
        config.grid.dims,
        if restart.is_some() { "restored".to_string() } else { bodies.len().to_string() },
        config.steps
    );

    let transports = channel_world(n, Duration::from_millis(config.comm_timeout_ms));
    let mut handles = Vec::with_capacity(n);
    for (rank, transport) in transports.into_iter().enumerate() {
        let ctx = RankContext::new(rank, Arc::clone(&decomposition), Arc::clone(&config));
        let control = Arc::clone(&control);
        let bodies = bodies.clone();
        let restart = restart.clone();
        let handle = thread::Builder::new()
            .name(format!("rank-{}", rank))
            .spawn(move || -> CouplingResult<RankOutput> {
                let flow = Box::new(ViscousFlowKernel::new(ctx.config.flow.viscous_params()));
                let structure = StructureKernelAdapter::default();
                let transport = Box::new(transport);
                let stepper = match restart {
                    Some((dir, table)) => {
                        let saved: RankCheckpoint = match checkpoint::read_rank(&dir, rank) {
                            Ok(saved) => saved,
                            Err(e) => {
                                transport.abort(&e.to_string());
                                return Err(e);
                            }
                        };
                        CouplingStepper::restore(ctx, transport, saved, &table, flow, structure, control)?
                    }
                    None => CouplingStepper::new(ctx, transport, bodies, flow, structure, control)?,
                };
                run_rank(stepper)
            })?;
        handles.push(handle);
    }

    let mut outputs = Vec::with_capacity(n);
    let mut primary: Option<CouplingError> = None;
    let mut secondary: Option<CouplingError> = None;
    for (rank, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(output)) => outputs.push(output),
            Ok(Err(e)) => {
                tracing::debug!("Rank {} failed: {}", rank, e);
                let slot = if e.is_secondary() { &mut secondary } else { &mut primary };
                slot.get_or_insert(e);
            }
            Err(_) => {
                primary.get_or_insert(CouplingError::comm("rank thread panicked", vec![rank]));
            }
        }
    }
    if let Some(e) = primary.or(secondary) {
        tracing::error!("Distributed run failed: {}", e);
        return Err(e);
    }

    let root = outputs.swap_remove(0);
    let missing = |what: &str| CouplingError::comm(format!("gather {}", what), vec![0]);
    let velocity = root.velocity.ok_or_else(|| missing("velocity"))?;
    let markers = root.markers.ok_or_else(|| missing("markers"))?;
    let bodies = root.bodies.ok_or_else(|| missing("bodies"))?;
    let forces = body_forces(&bodies, &markers);

    tracing::info!(
        "Distributed run complete: {} steps, {:.6} simulated, {} markers",
        root.steps,
        root.sim_time,
        markers.len()
    );

    Ok(DistributedResult {
        grid: config.grid.clone(),
        layout: decomposition.layout(),
        velocity,
        markers,
        bodies,
        body_forces: forces,
        reports: root.reports,
        steps: root.steps,
        sim_time: root.sim_time,
    })
}

/// Run the same configuration on a single rank, as a reference for
/// distributed runs.
pub fn run_single_instance(
    config: &CouplingConfig,
    control: Arc<RunControl>,
    config_dir: &Path,
) -> CouplingResult<DistributedResult> {
    let mut single = config.clone();
    single.ranks = 1;
    single.rank_layout = None;
    run_distributed(&single, control, config_dir)
}
