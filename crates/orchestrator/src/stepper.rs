//! Per-rank coupling step state machine
//!
//! One [`CouplingStepper`] runs on every rank. A step walks the phases
//!
//! ```text
//! Idle -> FlowPreStep -> Sync1 -> Interpolate -> ComputeForce -> Spread
//!      -> Sync2 -> FlowFinalize -> StructureStep -> MarkerMigration -> Idle
//! ```
//!
//! Sync1, Sync2 and MarkerMigration exchange messages with neighbors and
//! body home ranks; every other phase is local. The step ends with one
//! all-rank reduction of diagnostics, which also carries the stop flag so
//! that every rank stops after the same step.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use kernel::transfer::check_in_domain;
use kernel::vec3::{self, Vec3};
use kernel::{
    Body, BodyId, FieldSlice, FlowKernel, GlobalGrid, Interpolator, Spreader, Subdomain,
};
use serde::Serialize;

use crate::adapters::{FlowKernelAdapter, StructureKernelAdapter};
use crate::checkpoint::{self, MarkerTable, RankCheckpoint};
use crate::collective::{self, ReduceOp};
use crate::comm::{Payload, Transport};
use crate::config::{CouplingConfig, StabilityPolicy};
use crate::coupling::FeedbackLaw;
use crate::domain::DomainDecomposer;
use crate::error::{CouplingError, CouplingResult};
use crate::halo::HaloExchanger;
use crate::markers::{BodyRankMapper, LagrangianMarker};

/// Phase of the coupling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    /// Between steps
    Idle,
    /// Local flow update before coupling
    FlowPreStep,
    /// Velocity ghost exchange
    Sync1,
    /// Fluid velocity at markers
    Interpolate,
    /// Coupling law
    ComputeForce,
    /// Marker forces onto the grid
    Spread,
    /// Forcing fold-back and body force gather
    Sync2,
    /// Local flow update with forcing
    FlowFinalize,
    /// Body advance on home ranks
    StructureStep,
    /// Kinematics scatter, migration, audit, diagnostics
    MarkerMigration,
}

impl StepPhase {
    /// Phase that follows this one.
    pub fn next(self) -> Self {
        match self {
            StepPhase::Idle => StepPhase::FlowPreStep,
            StepPhase::FlowPreStep => StepPhase::Sync1,
            StepPhase::Sync1 => StepPhase::Interpolate,
            StepPhase::Interpolate => StepPhase::ComputeForce,
            StepPhase::ComputeForce => StepPhase::Spread,
            StepPhase::Spread => StepPhase::Sync2,
            StepPhase::Sync2 => StepPhase::FlowFinalize,
            StepPhase::FlowFinalize => StepPhase::StructureStep,
            StepPhase::StructureStep => StepPhase::MarkerMigration,
            StepPhase::MarkerMigration => StepPhase::Idle,
        }
    }
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What a rank knows about itself and the run.
#[derive(Debug, Clone)]
pub struct RankContext {
    /// This rank
    pub rank: usize,
    /// Number of ranks
    pub size: usize,
    /// Shared, immutable topology
    pub decomposition: Arc<DomainDecomposer>,
    /// Shared, immutable configuration
    pub config: Arc<CouplingConfig>,
}

impl RankContext {
    /// Context for `rank`.
    pub fn new(rank: usize, decomposition: Arc<DomainDecomposer>, config: Arc<CouplingConfig>) -> Self {
        Self {
            rank,
            size: decomposition.size(),
            decomposition,
            config,
        }
    }

    /// This rank's subdomain.
    pub fn subdomain(&self) -> &Subdomain {
        self.decomposition.subdomain(self.rank)
    }

    /// Global grid.
    pub fn grid(&self) -> &GlobalGrid {
        self.decomposition.grid()
    }
}

/// External control and progress of a run, shared with the launcher.
#[derive(Debug, Default)]
pub struct RunControl {
    stop: AtomicBool,
    step: AtomicU64,
    time_bits: AtomicU64,
}

impl RunControl {
    /// Fresh control block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask all ranks to stop after the current step.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// True once a stop was requested.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Last completed step.
    pub fn step(&self) -> u64 {
        self.step.load(Ordering::SeqCst)
    }

    /// Simulated time after the last completed step.
    pub fn sim_time(&self) -> f64 {
        f64::from_bits(self.time_bits.load(Ordering::SeqCst))
    }

    fn record(&self, step: u64, time: f64) {
        self.time_bits.store(time.to_bits(), Ordering::SeqCst);
        self.step.store(step, Ordering::SeqCst);
    }
}

/// Globally reduced diagnostics of one step; identical on every rank.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    /// Step index (1-based)
    pub step: u64,
    /// Simulated time after the step
    pub time: f64,
    /// Timestep used
    pub dt: f64,
    /// Sum of marker coupling forces
    pub marker_force: Vec3,
    /// Sum of forcing density times cell volume over all cells
    pub grid_force: Vec3,
    /// RMS of `|U - V|` over markers
    pub slip_rms: f64,
    /// RMS of the accumulated position mismatch
    pub mismatch_rms: f64,
    /// Largest fluid speed
    pub max_speed: f64,
    /// Largest marker force magnitude
    pub max_marker_force: f64,
    /// Markers that changed owner
    pub migrations: u64,
    /// Total owned markers
    pub owned_markers: u64,
    /// A stop was requested on some rank
    pub stop_requested: bool,
}

/// Watches reduced diagnostics for blow-up.
#[derive(Debug, Clone)]
pub struct InstabilityMonitor {
    policy: StabilityPolicy,
    consecutive: u32,
    warnings: u64,
}

impl InstabilityMonitor {
    /// Monitor applying `policy`.
    pub fn new(policy: StabilityPolicy) -> Self {
        Self {
            policy,
            consecutive: 0,
            warnings: 0,
        }
    }

    /// Consecutive flagged steps.
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Flagged steps over the whole run.
    pub fn warnings(&self) -> u64 {
        self.warnings
    }

    /// Check one step. May shrink `dt` for the next step; fails once the
    /// configured number of consecutive flagged steps is reached.
    pub fn check(&mut self, report: &StepReport, non_finite: bool, dt: &mut f64) -> CouplingResult<()> {
        let detail = if non_finite {
            Some("non-finite velocity or force".to_string())
        } else if report.max_speed > self.policy.max_velocity {
            Some(format!(
                "fluid speed {:.4e} exceeds {:.4e}",
                report.max_speed, self.policy.max_velocity
            ))
        } else if report.max_marker_force > self.policy.max_force {
            Some(format!(
                "marker force {:.4e} exceeds {:.4e}",
                report.max_marker_force, self.policy.max_force
            ))
        } else {
            None
        };

        let Some(detail) = detail else {
            self.consecutive = 0;
            return Ok(());
        };

        self.consecutive += 1;
        self.warnings += 1;
        if self.consecutive >= self.policy.max_consecutive_warnings {
            return Err(CouplingError::NumericalInstability {
                step: report.step,
                consecutive: self.consecutive,
                detail,
            });
        }
        tracing::warn!(
            "Numerical instability at step {} ({} consecutive): {}",
            report.step,
            self.consecutive,
            detail
        );
        if let Some(factor) = self.policy.timestep_reduction {
            let reduced = (*dt * factor).max(self.policy.min_dt);
            if reduced < *dt {
                tracing::warn!("Reducing timestep {:.6e} -> {:.6e}", *dt, reduced);
                *dt = reduced;
            }
        }
        Ok(())
    }
}

/// Drives the coupled step on one rank.
pub struct CouplingStepper {
    ctx: RankContext,
    transport: Box<dyn Transport>,
    halo: HaloExchanger,
    interpolator: Interpolator,
    spreader: Spreader,
    law: FeedbackLaw,
    flow: FlowKernelAdapter,
    structure: StructureKernelAdapter,
    mapper: BodyRankMapper,
    /// Bodies homed on this rank
    bodies: BTreeMap<BodyId, Body>,
    velocity: FieldSlice,
    forcing: FieldSlice,
    monitor: InstabilityMonitor,
    control: Arc<RunControl>,
    phase: StepPhase,
    step: u64,
    time: f64,
    dt: f64,
}

impl CouplingStepper {
    fn assemble(
        ctx: RankContext,
        transport: Box<dyn Transport>,
        flow: Box<dyn FlowKernel>,
        structure: StructureKernelAdapter,
        control: Arc<RunControl>,
    ) -> CouplingResult<Self> {
        let flow = match FlowKernelAdapter::new(flow, ctx.subdomain().halo) {
            Ok(flow) => flow,
            Err(e) => {
                transport.abort(&e.to_string());
                return Err(e);
            }
        };
        let config = Arc::clone(&ctx.config);
        let sub = ctx.subdomain().clone();
        let mut velocity = FieldSlice::new("velocity", 3, sub.dims, sub.halo);
        velocity.fill(&config.flow.initial_velocity);
        let forcing = FieldSlice::new("forcing", 3, sub.dims, sub.halo);

        Ok(Self {
            halo: HaloExchanger::new(),
            interpolator: Interpolator::new(config.kernel),
            spreader: Spreader::new(config.kernel),
            law: FeedbackLaw::new(&config.coupling, config.flow.density, ctx.grid().cell_volume()),
            flow,
            structure,
            mapper: BodyRankMapper::new(ctx.rank, ctx.size, config.kernel),
            bodies: BTreeMap::new(),
            velocity,
            forcing,
            monitor: InstabilityMonitor::new(config.stability.clone()),
            control,
            phase: StepPhase::Idle,
            step: 0,
            time: 0.0,
            dt: config.dt,
            transport,
            ctx,
        })
    }

    /// Stepper for a fresh run. Every rank passes the same `bodies`; each
    /// keeps the markers it owns and the bodies homed on it.
    pub fn new(
        ctx: RankContext,
        transport: Box<dyn Transport>,
        bodies: Vec<Body>,
        flow: Box<dyn FlowKernel>,
        structure: StructureKernelAdapter,
        control: Arc<RunControl>,
    ) -> CouplingResult<Self> {
        let mut stepper = Self::assemble(ctx, transport, flow, structure, control)?;
        if let Err(e) = stepper.seed(bodies) {
            stepper.abort(&e);
            return Err(e);
        }
        if stepper.ctx.rank == 0 {
            tracing::info!(
                "Coupling stepper ready: {} ranks, layout {:?}, {} bodies, kernel {:?}, flow '{}'",
                stepper.ctx.size,
                stepper.ctx.decomposition.layout(),
                stepper.mapper.homes().len(),
                stepper.ctx.config.kernel,
                stepper.flow.name()
            );
        }
        Ok(stepper)
    }

    fn seed(&mut self, bodies: Vec<Body>) -> CouplingResult<()> {
        let decomposition = Arc::clone(&self.ctx.decomposition);
        let kernel = self.ctx.config.kernel;
        for (i, body) in bodies.into_iter().enumerate() {
            let parameter = format!("bodies[{}]", i);
            if self.mapper.home_of(body.id).is_some() {
                return Err(CouplingError::config(parameter, format!("duplicate body id {}", body.id)));
            }
            let kinematics = body.marker_kinematics();
            if kinematics
                .iter()
                .any(|(p, _)| check_in_domain(kernel, decomposition.grid(), *p).is_err())
            {
                return Err(CouplingError::config(
                    parameter,
                    "marker kernel footprint leaves the domain through a non-periodic face",
                ));
            }
            let home = decomposition
                .owner_of(body.anchor())
                .ok_or_else(|| CouplingError::config(parameter, "body lies outside the domain"))?;
            self.mapper.register_body(body.id, home, kinematics.len());
            self.mapper.adopt_initial(&decomposition, body.id, &kinematics)?;
            if home == self.ctx.rank {
                self.bodies.insert(body.id, body);
            }
        }
        Ok(())
    }

    /// Stepper resuming from a checkpoint. All ranks must call this together.
    pub fn restore(
        ctx: RankContext,
        transport: Box<dyn Transport>,
        saved: RankCheckpoint,
        table: &MarkerTable,
        flow: Box<dyn FlowKernel>,
        structure: StructureKernelAdapter,
        control: Arc<RunControl>,
    ) -> CouplingResult<Self> {
        let mut stepper = Self::assemble(ctx, transport, flow, structure, control)?;
        if let Err(e) = stepper.load(saved, table) {
            stepper.abort(&e);
            return Err(e);
        }
        if stepper.ctx.rank == 0 {
            tracing::info!(
                "Resumed from step {} (t = {:.6}) on {} ranks",
                stepper.step,
                stepper.time,
                stepper.ctx.size
            );
        }
        Ok(stepper)
    }

    fn load(&mut self, saved: RankCheckpoint, table: &MarkerTable) -> CouplingResult<()> {
        if table.ranks != self.ctx.size || saved.rank != self.ctx.rank {
            return Err(CouplingError::Checkpoint(format!(
                "checkpoint written by {} ranks, run has {}",
                table.ranks, self.ctx.size
            )));
        }
        if &saved.subdomain != self.ctx.subdomain() {
            return Err(CouplingError::Checkpoint(format!(
                "rank {} subdomain differs from the checkpoint",
                self.ctx.rank
            )));
        }
        table.verify_rank(&saved)?;
        if saved.velocity.dims() != self.velocity.dims()
            || saved.velocity.halo() != self.velocity.halo()
            || saved.velocity.components() != 3
        {
            return Err(CouplingError::Checkpoint("velocity slice shape differs".to_string()));
        }

        for record in &table.bodies {
            self.mapper.register_body(record.id, record.home, record.markers);
        }
        for marker in saved.markers {
            self.mapper.insert(marker)?;
        }
        self.bodies = saved.bodies.into_iter().map(|b| (b.id, b)).collect();
        self.velocity = saved.velocity;
        self.step = saved.step;
        self.time = saved.time;
        self.dt = saved.dt;
        self.monitor.consecutive = saved.consecutive_warnings;
        self.mapper.audit(self.transport.as_mut(), self.step)
    }

    /// Tell peers this rank failed.
    pub fn abort(&self, error: &CouplingError) {
        if !error.is_secondary() {
            tracing::debug!("Rank {} aborting: {}", self.ctx.rank, error);
            self.transport.abort(&error.to_string());
        }
    }

    fn enter(&mut self, phase: StepPhase) {
        debug_assert_eq!(self.phase.next(), phase, "phase order violated");
        self.phase = phase;
    }

    /// Run one coupled step.
    pub fn step(&mut self) -> CouplingResult<StepReport> {
        let step = self.step + 1;
        let dt = self.dt;
        let decomposition = Arc::clone(&self.ctx.decomposition);
        let grid = decomposition.grid();
        let sub = decomposition.subdomain(self.ctx.rank);

        self.enter(StepPhase::FlowPreStep);
        self.flow.pre_step(grid, sub, dt, &mut self.velocity)?;

        self.enter(StepPhase::Sync1);
        self.halo.exchange(self.transport.as_mut(), step, sub, &mut self.velocity)?;

        self.enter(StepPhase::Interpolate);
        for marker in self.mapper.owned_mut() {
            marker.fluid_velocity =
                self.interpolator
                    .interpolate(grid, sub, &self.velocity, marker.position)?;
        }

        self.enter(StepPhase::ComputeForce);
        let mut marker_force = vec3::ZERO;
        let mut slip_sq = 0.0;
        let mut mismatch_sq = 0.0;
        let mut max_marker_force = 0.0_f64;
        let mut non_finite = false;
        for marker in self.mapper.owned_mut() {
            let slip = self.law.apply(marker, dt);
            slip_sq += vec3::dot(slip, slip);
            mismatch_sq += vec3::dot(marker.mismatch, marker.mismatch);
            vec3::add_assign(&mut marker_force, marker.force);
            let magnitude = vec3::norm(marker.force);
            non_finite |= !magnitude.is_finite();
            max_marker_force = max_marker_force.max(magnitude);
        }

        self.enter(StepPhase::Spread);
        self.forcing.zero();
        for marker in self.mapper.owned() {
            self.spreader
                .spread(grid, sub, &mut self.forcing, marker.position, marker.force)?;
        }

        self.enter(StepPhase::Sync2);
        self.halo
            .exchange_reduce(self.transport.as_mut(), step, sub, &mut self.forcing)?;
        let volume = grid.cell_volume();
        let density_sum = self.forcing.interior_sum();
        let grid_force = [
            density_sum[0] * volume,
            density_sum[1] * volume,
            density_sum[2] * volume,
        ];
        let body_forces = self.mapper.gather_forces(self.transport.as_mut(), step)?;

        self.enter(StepPhase::FlowFinalize);
        self.flow
            .finalize(grid, sub, dt, &self.forcing, &mut self.velocity)?;
        let max_speed = self.velocity.interior_max_norm();
        non_finite |= !max_speed.is_finite();

        self.enter(StepPhase::StructureStep);
        for (id, body) in self.bodies.iter_mut() {
            let forces = body_forces.get(id).ok_or_else(|| kernel::KernelError::InvalidBody {
                body: *id,
                reason: "no marker forces gathered".to_string(),
            })?;
            self.structure.advance(body, forces, dt)?;
        }

        self.enter(StepPhase::MarkerMigration);
        self.mapper
            .scatter_kinematics(self.transport.as_mut(), step, &self.bodies)?;
        let migration = self
            .mapper
            .migrate(self.transport.as_mut(), step, &decomposition)?;
        // every rank hears from every other rank here, so with the all-reduce
        // below this phase is a global barrier each step
        self.mapper.audit(self.transport.as_mut(), step)?;

        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let totals = collective::all_reduce(
            self.transport.as_mut(),
            step,
            &[
                (ReduceOp::Sum, marker_force[0]),
                (ReduceOp::Sum, marker_force[1]),
                (ReduceOp::Sum, marker_force[2]),
                (ReduceOp::Sum, grid_force[0]),
                (ReduceOp::Sum, grid_force[1]),
                (ReduceOp::Sum, grid_force[2]),
                (ReduceOp::Sum, slip_sq),
                (ReduceOp::Sum, mismatch_sq),
                (ReduceOp::Sum, self.mapper.owned_count() as f64),
                (ReduceOp::Sum, migration.sent as f64),
                (ReduceOp::Max, max_speed),
                (ReduceOp::Max, max_marker_force),
                (ReduceOp::Max, flag(non_finite)),
                (ReduceOp::Max, flag(self.control.stop_requested())),
            ],
        )?;

        let owned = totals[8];
        let rms = |sum_sq: f64| if owned > 0.0 { (sum_sq / owned).sqrt() } else { 0.0 };
        self.step = step;
        self.time += dt;
        let report = StepReport {
            step,
            time: self.time,
            dt,
            marker_force: [totals[0], totals[1], totals[2]],
            grid_force: [totals[3], totals[4], totals[5]],
            slip_rms: rms(totals[6]),
            mismatch_rms: rms(totals[7]),
            max_speed: totals[10],
            max_marker_force: totals[11],
            migrations: totals[9] as u64,
            owned_markers: owned as u64,
            stop_requested: totals[13] > 0.0,
        };
        let globally_non_finite = totals[12] > 0.0 || totals[10].is_nan() || totals[11].is_nan();
        self.monitor.check(&report, globally_non_finite, &mut self.dt)?;

        if let Some(policy) = self.ctx.config.checkpoint.clone() {
            if step % policy.interval == 0 {
                self.write_checkpoint(Path::new(&policy.directory))?;
            }
        }

        if self.ctx.rank == 0 {
            self.control.record(step, self.time);
            let interval = self.ctx.config.log_interval.max(1);
            if step % interval == 0 {
                tracing::debug!(
                    "Step {}: t={:.5}, dt={:.3e}, slip_rms={:.4e}, max_speed={:.4e}, migrations={}",
                    step,
                    self.time,
                    dt,
                    report.slip_rms,
                    report.max_speed,
                    report.migrations
                );
            }
        }

        self.enter(StepPhase::Idle);
        Ok(report)
    }

    /// Step until the configured step count or an agreed stop.
    pub fn run(&mut self) -> CouplingResult<Vec<StepReport>> {
        let target = self.ctx.config.steps;
        let mut reports = Vec::new();
        while self.step < target {
            let report = match self.step() {
                Ok(report) => report,
                Err(e) => {
                    self.abort(&e);
                    return Err(e);
                }
            };
            let stop = report.stop_requested;
            reports.push(report);
            if stop {
                if self.ctx.rank == 0 {
                    tracing::info!("Stop requested, halting after step {}", self.step);
                }
                break;
            }
        }
        Ok(reports)
    }

    /// Write a checkpoint of the current state under `root`. Collective;
    /// returns the step directory on rank 0.
    pub fn write_checkpoint(&mut self, root: &Path) -> CouplingResult<Option<PathBuf>> {
        let dir = checkpoint::step_directory(root, self.step);
        let saved = RankCheckpoint {
            rank: self.ctx.rank,
            step: self.step,
            time: self.time,
            dt: self.dt,
            consecutive_warnings: self.monitor.consecutive(),
            subdomain: self.ctx.subdomain().clone(),
            velocity: self.velocity.clone(),
            markers: self.mapper.owned().cloned().collect(),
            bodies: self.bodies.values().cloned().collect(),
        };
        checkpoint::write_rank(&dir, &saved)?;

        let Some(markers) = self.gather_markers()? else {
            return Ok(None);
        };
        let table = MarkerTable::new(
            self.step,
            self.ctx.size,
            &self.mapper.homes(),
            &self.mapper.marker_counts(),
            &markers,
        );
        checkpoint::write_table(&dir, &table)?;
        tracing::info!("Checkpoint written: {}", dir.display());
        Ok(Some(dir))
    }

    /// Global velocity field on rank 0. Collective.
    pub fn gather_velocity(&mut self) -> CouplingResult<Option<Vec<f64>>> {
        let decomposition = Arc::clone(&self.ctx.decomposition);
        collective::gather_field(self.transport.as_mut(), self.step, &decomposition, &self.velocity)
    }

    /// All markers, in id order, on rank 0. Collective.
    pub fn gather_markers(&mut self) -> CouplingResult<Option<Vec<LagrangianMarker>>> {
        let local = Payload::Markers(self.mapper.owned().cloned().collect());
        let Some(parts) = collective::gather(self.transport.as_mut(), self.step, local)? else {
            return Ok(None);
        };
        let mut markers = Vec::new();
        for (rank, part) in parts.into_iter().enumerate() {
            markers.extend(part.into_markers("gather markers", rank)?);
        }
        markers.sort_by_key(|m| m.id);
        Ok(Some(markers))
    }

    /// All bodies, in id order, on rank 0. Collective.
    pub fn gather_bodies(&mut self) -> CouplingResult<Option<Vec<Body>>> {
        let local = Payload::Bodies(self.bodies.values().cloned().collect());
        let Some(parts) = collective::gather(self.transport.as_mut(), self.step, local)? else {
            return Ok(None);
        };
        let mut bodies = Vec::new();
        for (rank, part) in parts.into_iter().enumerate() {
            bodies.extend(part.into_bodies("gather bodies", rank)?);
        }
        bodies.sort_by_key(|b| b.id);
        Ok(Some(bodies))
    }

    /// Rank context.
    pub fn context(&self) -> &RankContext {
        &self.ctx
    }

    /// Completed steps.
    pub fn step_index(&self) -> u64 {
        self.step
    }

    /// Simulated time.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Timestep of the next step.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Current phase.
    pub fn phase(&self) -> StepPhase {
        self.phase
    }

    /// Local velocity slice.
    pub fn velocity(&self) -> &FieldSlice {
        &self.velocity
    }

    /// Local forcing slice of the last step.
    pub fn forcing(&self) -> &FieldSlice {
        &self.forcing
    }

    /// Marker ownership.
    pub fn mapper(&self) -> &BodyRankMapper {
        &self.mapper
    }

    /// Mutable marker ownership, for fault injection in tests.
    pub fn mapper_mut(&mut self) -> &mut BodyRankMapper {
        &mut self.mapper
    }

    /// Bodies homed on this rank.
    pub fn bodies(&self) -> &BTreeMap<BodyId, Body> {
        &self.bodies
    }

    /// Instability monitor.
    pub fn monitor(&self) -> &InstabilityMonitor {
        &self.monitor
    }
}
