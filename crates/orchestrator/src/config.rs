//! Configuration parsing and validation for coupled simulations

use kernel::{DeltaKernel, GlobalGrid, Motion, Vec3, ViscousFlowParams};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::coupling::MAX_STABLE_GAIN;
use crate::domain::DomainDecomposer;
use crate::error::{CouplingError, CouplingResult};

/// Ghost layers the reference flow kernel reads.
pub const FLOW_STENCIL_WIDTH: usize = 1;

/// Main simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplingConfig {
    /// Human-readable simulation name
    pub name: String,
    /// Global fluid grid
    pub grid: GlobalGrid,
    /// Number of ranks (one thread each)
    #[serde(default = "default_ranks")]
    pub ranks: usize,
    /// Explicit rank topology; chosen automatically when absent
    #[serde(default)]
    pub rank_layout: Option<[usize; 3]>,
    /// Ghost layers per subdomain face
    #[serde(default = "default_halo_width")]
    pub halo_width: usize,
    /// Timestep (seconds)
    pub dt: f64,
    /// Number of coupling steps to run
    pub steps: u64,
    /// Delta kernel for interpolation and spreading
    #[serde(default)]
    pub kernel: DeltaKernel,
    /// Virtual-boundary coupling coefficients
    #[serde(default)]
    pub coupling: CouplingParams,
    /// Fluid parameters
    #[serde(default)]
    pub flow: FlowConfig,
    /// Immersed bodies, in id order
    #[serde(default)]
    pub bodies: Vec<BodyConfig>,
    /// Instability detection and recovery
    #[serde(default)]
    pub stability: StabilityPolicy,
    /// Periodic checkpointing
    #[serde(default)]
    pub checkpoint: Option<CheckpointPolicy>,
    /// How long a rank waits for a peer before giving up (milliseconds)
    #[serde(default = "default_comm_timeout_ms")]
    pub comm_timeout_ms: u64,
    /// Checkpoint directory to resume from
    #[serde(default)]
    pub restart_from: Option<String>,
    /// Steps between progress log lines
    #[serde(default = "default_log_interval")]
    pub log_interval: u64,
}

/// Feedback and stiffness of the virtual-boundary force law
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouplingParams {
    /// Fraction of the slip removed per step (beta)
    #[serde(default = "default_feedback")]
    pub feedback: f64,
    /// Weight of the accumulated position mismatch (gamma)
    #[serde(default)]
    pub stiffness: f64,
}

/// Fluid parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Kinematic viscosity (m^2/s)
    #[serde(default = "default_viscosity")]
    pub viscosity: f64,
    /// Fluid density (kg/m^3)
    #[serde(default = "default_density")]
    pub density: f64,
    /// Uniform initial velocity
    #[serde(default)]
    pub initial_velocity: Vec3,
    /// Velocity held beyond non-periodic faces
    #[serde(default)]
    pub boundary_velocity: Vec3,
    /// Uniform body acceleration
    #[serde(default)]
    pub body_acceleration: Vec3,
}

/// Sanity bounds and the response to violating them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityPolicy {
    /// Largest acceptable fluid speed
    #[serde(default = "default_max_velocity")]
    pub max_velocity: f64,
    /// Largest acceptable marker force magnitude
    #[serde(default = "default_max_force")]
    pub max_force: f64,
    /// Consecutive flagged steps before the run is aborted
    #[serde(default = "default_max_consecutive_warnings")]
    pub max_consecutive_warnings: u32,
    /// Factor applied to dt after a flagged step, if any
    #[serde(default)]
    pub timestep_reduction: Option<f64>,
    /// Floor for reduced timesteps
    #[serde(default)]
    pub min_dt: f64,
}

/// Where and how often to write checkpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPolicy {
    /// Steps between checkpoints
    pub interval: u64,
    /// Output directory; one subdirectory per checkpoint
    pub directory: String,
}

/// Immersed body description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyConfig {
    /// Rigid sphere sampled on latitude rings
    Sphere {
        /// Center
        center: Vec3,
        /// Radius
        radius: f64,
        /// Markers along the equator
        n_equator: usize,
        /// Solid density
        #[serde(default = "default_body_density")]
        density: f64,
        /// Initial velocity
        #[serde(default)]
        velocity: Vec3,
        /// Initial angular velocity
        #[serde(default)]
        angular_velocity: Vec3,
        /// Free or prescribed motion
        #[serde(default)]
        motion: Motion,
    },
    /// Rigid circular cylinder of finite length
    Cylinder {
        /// Center
        center: Vec3,
        /// Axis direction
        axis: Vec3,
        /// Radius
        radius: f64,
        /// Length along the axis
        length: f64,
        /// Markers per ring
        n_ring: usize,
        /// Number of rings
        n_axial: usize,
        /// Solid density
        #[serde(default = "default_body_density")]
        density: f64,
        /// Initial velocity
        #[serde(default)]
        velocity: Vec3,
        /// Initial angular velocity
        #[serde(default)]
        angular_velocity: Vec3,
        /// Free or prescribed motion
        #[serde(default)]
        motion: Motion,
    },
    /// Rigid body whose markers are the vertices of an STL surface
    Mesh {
        /// STL file, relative to the configuration file
        stl_file: String,
        /// Center of mass; vertices are taken relative to it
        center: Vec3,
        /// Uniform scale applied to the vertices
        #[serde(default = "default_scale")]
        scale: f64,
        /// Total mass
        mass: f64,
        /// Principal moments of inertia; estimated when absent
        #[serde(default)]
        inertia: Option<Vec3>,
        /// Initial velocity
        #[serde(default)]
        velocity: Vec3,
        /// Initial angular velocity
        #[serde(default)]
        angular_velocity: Vec3,
        /// Free or prescribed motion
        #[serde(default)]
        motion: Motion,
    },
    /// Flexible filament with markers at element centers or on its surface
    Rod {
        /// First node
        base: Vec3,
        /// Direction from base to tip
        direction: Vec3,
        /// Rest length
        length: f64,
        /// Number of elements
        n_elements: usize,
        /// Cross-section radius
        radius: f64,
        /// Solid density
        #[serde(default = "default_body_density")]
        density: f64,
        /// Axial stiffness `E*A`
        stretch_stiffness: f64,
        /// Velocity damping (1/s)
        #[serde(default)]
        damping: f64,
        /// Hold the base node fixed
        #[serde(default = "default_true")]
        clamped_base: bool,
        /// Surface markers per element ring; element centers when absent
        #[serde(default)]
        ring_markers: Option<usize>,
    },
}

// Default values
fn default_ranks() -> usize {
    1
}

fn default_halo_width() -> usize {
    2
}

fn default_comm_timeout_ms() -> u64 {
    30_000
}

fn default_log_interval() -> u64 {
    100
}

fn default_feedback() -> f64 {
    0.5
}

fn default_viscosity() -> f64 {
    1.0e-3
}

fn default_density() -> f64 {
    1.0
}

fn default_max_velocity() -> f64 {
    1.0e3
}

fn default_max_force() -> f64 {
    1.0e12
}

fn default_max_consecutive_warnings() -> u32 {
    5
}

fn default_body_density() -> f64 {
    1.0
}

fn default_scale() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl Default for CouplingParams {
    fn default() -> Self {
        Self {
            feedback: default_feedback(),
            stiffness: 0.0,
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            viscosity: default_viscosity(),
            density: default_density(),
            initial_velocity: [0.0; 3],
            boundary_velocity: [0.0; 3],
            body_acceleration: [0.0; 3],
        }
    }
}

impl Default for StabilityPolicy {
    fn default() -> Self {
        Self {
            max_velocity: default_max_velocity(),
            max_force: default_max_force(),
            max_consecutive_warnings: default_max_consecutive_warnings(),
            timestep_reduction: None,
            min_dt: 0.0,
        }
    }
}

impl FlowConfig {
    /// Parameters for the reference viscous kernel.
    pub fn viscous_params(&self) -> ViscousFlowParams {
        ViscousFlowParams {
            viscosity: self.viscosity,
            density: self.density,
            body_acceleration: self.body_acceleration,
            boundary_velocity: self.boundary_velocity,
        }
    }
}

fn positive(parameter: &str, value: f64) -> CouplingResult<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(CouplingError::config(parameter, format!("must be positive, got {}", value)));
    }
    Ok(())
}

fn non_negative(parameter: &str, value: f64) -> CouplingResult<()> {
    if !(value.is_finite() && value >= 0.0) {
        return Err(CouplingError::config(parameter, format!("must be non-negative, got {}", value)));
    }
    Ok(())
}

impl CouplingConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &str) -> CouplingResult<Self> {
        let contents = fs::read_to_string(path)?;
        let config: CouplingConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Halo width needed by the delta kernel and the flow stencil.
    pub fn required_halo(&self) -> usize {
        self.kernel.required_halo().max(FLOW_STENCIL_WIDTH)
    }

    /// Validate the configuration, naming the first offending parameter
    pub fn validate(&self) -> CouplingResult<()> {
        // Grid
        if self.grid.dims.iter().any(|&n| n == 0) {
            return Err(CouplingError::config("grid.dims", "every dimension must be at least 1"));
        }
        positive("grid.spacing", self.grid.spacing)?;

        // Time stepping
        positive("dt", self.dt)?;
        if self.steps == 0 {
            return Err(CouplingError::config("steps", "must be at least 1"));
        }
        if self.comm_timeout_ms == 0 {
            return Err(CouplingError::config("comm_timeout_ms", "must be at least 1"));
        }

        // Coupling law stability
        positive("coupling.feedback", self.coupling.feedback)?;
        non_negative("coupling.stiffness", self.coupling.stiffness)?;
        let gain = self.coupling.feedback + self.coupling.stiffness;
        if gain > MAX_STABLE_GAIN {
            return Err(CouplingError::config(
                "coupling.feedback",
                format!(
                    "feedback + stiffness = {} exceeds the stability bound {}",
                    gain, MAX_STABLE_GAIN
                ),
            ));
        }

        // Fluid
        positive("flow.density", self.flow.density)?;
        non_negative("flow.viscosity", self.flow.viscosity)?;
        let diffusion = self.flow.viscosity * self.dt / (self.grid.spacing * self.grid.spacing);
        if diffusion > 1.0 / 6.0 {
            return Err(CouplingError::config(
                "dt",
                format!(
                    "diffusion number nu*dt/h^2 = {:.4} exceeds the explicit limit 1/6",
                    diffusion
                ),
            ));
        }

        // Stability policy
        positive("stability.max_velocity", self.stability.max_velocity)?;
        positive("stability.max_force", self.stability.max_force)?;
        if self.stability.max_consecutive_warnings == 0 {
            return Err(CouplingError::config(
                "stability.max_consecutive_warnings",
                "must be at least 1",
            ));
        }
        if let Some(factor) = self.stability.timestep_reduction {
            if !(factor > 0.0 && factor < 1.0) {
                return Err(CouplingError::config(
                    "stability.timestep_reduction",
                    "must lie in (0, 1)",
                ));
            }
        }
        non_negative("stability.min_dt", self.stability.min_dt)?;
        if self.stability.min_dt > self.dt {
            return Err(CouplingError::config("stability.min_dt", "must not exceed dt"));
        }

        // Checkpointing
        if let Some(checkpoint) = &self.checkpoint {
            if checkpoint.interval == 0 {
                return Err(CouplingError::config("checkpoint.interval", "must be at least 1"));
            }
            if checkpoint.directory.is_empty() {
                return Err(CouplingError::config("checkpoint.directory", "must not be empty"));
            }
        }

        // Bodies
        for (i, body) in self.bodies.iter().enumerate() {
            body.validate(i)?;
        }

        // Halo adequacy and topology
        if self.halo_width < self.required_halo() {
            return Err(CouplingError::config(
                "halo_width",
                format!(
                    "halo width {} is narrower than the {:?} kernel support (needs {})",
                    self.halo_width,
                    self.kernel,
                    self.required_halo()
                ),
            ));
        }
        DomainDecomposer::new(
            &self.grid,
            self.ranks,
            self.rank_layout,
            self.halo_width,
            self.required_halo(),
        )?;

        Ok(())
    }
}

impl BodyConfig {
    /// Parameter controlling how densely the body is sampled.
    pub fn resolution_parameter(&self) -> &'static str {
        match self {
            BodyConfig::Sphere { .. } => "n_equator",
            BodyConfig::Cylinder { .. } => "n_ring",
            BodyConfig::Mesh { .. } => "scale",
            BodyConfig::Rod { ring_markers: Some(_), .. } => "ring_markers",
            BodyConfig::Rod { .. } => "n_elements",
        }
    }

    /// Check the body's own parameters; `index` names it in errors.
    pub fn validate(&self, index: usize) -> CouplingResult<()> {
        let name = |field: &str| format!("bodies[{}].{}", index, field);
        match self {
            BodyConfig::Sphere { radius, n_equator, density, .. } => {
                positive(&name("radius"), *radius)?;
                positive(&name("density"), *density)?;
                if *n_equator < 4 {
                    return Err(CouplingError::config(name("n_equator"), "must be at least 4"));
                }
            }
            BodyConfig::Cylinder { axis, radius, length, n_ring, n_axial, density, .. } => {
                positive(&name("radius"), *radius)?;
                positive(&name("length"), *length)?;
                positive(&name("density"), *density)?;
                if kernel::vec3::normalize(*axis).is_none() {
                    return Err(CouplingError::config(name("axis"), "must be non-zero"));
                }
                if *n_ring < 3 || *n_axial < 1 {
                    return Err(CouplingError::config(name("n_ring"), "need at least 3 markers per ring and 1 ring"));
                }
            }
            BodyConfig::Mesh { stl_file, scale, mass, .. } => {
                if stl_file.is_empty() {
                    return Err(CouplingError::config(name("stl_file"), "must not be empty"));
                }
                positive(&name("scale"), *scale)?;
                positive(&name("mass"), *mass)?;
            }
            BodyConfig::Rod {
                direction,
                length,
                n_elements,
                radius,
                density,
                stretch_stiffness,
                damping,
                ring_markers,
                ..
            } => {
                positive(&name("length"), *length)?;
                positive(&name("radius"), *radius)?;
                positive(&name("density"), *density)?;
                positive(&name("stretch_stiffness"), *stretch_stiffness)?;
                non_negative(&name("damping"), *damping)?;
                if *n_elements == 0 {
                    return Err(CouplingError::config(name("n_elements"), "must be at least 1"));
                }
                if kernel::vec3::normalize(*direction).is_none() {
                    return Err(CouplingError::config(name("direction"), "must be non-zero"));
                }
                if matches!(ring_markers, Some(n) if *n < 3) {
                    return Err(CouplingError::config(name("ring_markers"), "need at least 3 markers per ring"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupling::{body_transfer_gains, check_marker_density};
    use crate::geometry::{build_bodies, build_body};
    use std::path::Path;

    fn test_config() -> CouplingConfig {
        CouplingConfig {
            name: "test".to_string(),
            grid: GlobalGrid {
                dims: [16, 8, 8],
                spacing: 0.125,
                origin: [0.0; 3],
                periodic: [true, true, true],
            },
            ranks: 2,
            rank_layout: None,
            halo_width: 2,
            dt: 0.01,
            steps: 10,
            kernel: DeltaKernel::Peskin4,
            coupling: CouplingParams::default(),
            flow: FlowConfig::default(),
            bodies: vec![BodyConfig::Sphere {
                center: [1.0, 0.5, 0.5],
                radius: 0.25,
                n_equator: 12,
                density: default_body_density(),
                velocity: [0.0; 3],
                angular_velocity: [0.0; 3],
                motion: Motion::Prescribed,
            }],
            stability: StabilityPolicy::default(),
            checkpoint: None,
            comm_timeout_ms: default_comm_timeout_ms(),
            restart_from: None,
            log_interval: default_log_interval(),
        }
    }

    fn parameter_of(result: CouplingResult<()>) -> String {
        match result {
            Err(CouplingError::Configuration { parameter, .. }) => parameter,
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_validation_feedback_bound() {
        let mut config = test_config();
        config.coupling.feedback = 0.8;
        config.coupling.stiffness = 0.3;
        assert_eq!(parameter_of(config.validate()), "coupling.feedback");

        config.coupling.stiffness = 0.1;
        assert!(config.validate().is_ok());

        config.coupling.feedback = 0.0;
        assert_eq!(parameter_of(config.validate()), "coupling.feedback");
    }

    fn sphere(n_equator: usize) -> BodyConfig {
        BodyConfig::Sphere {
            center: [1.0, 0.5, 0.5],
            radius: 0.25,
            n_equator,
            density: default_body_density(),
            velocity: [0.0; 3],
            angular_velocity: [0.0; 3],
            motion: Motion::Prescribed,
        }
    }

    #[test]
    fn test_marker_density_bounds_coupling_gain() {
        let mut config = test_config();
        config.coupling.stiffness = 0.0;

        // a quarter of a cell between equator markers
        config.bodies = vec![sphere(48)];
        let bodies = vec![build_body(&config.bodies[0], 0, Path::new(".")).unwrap()];
        let lambda = body_transfer_gains(&config, &bodies)[0];
        eprintln!("dense sphere: lambda = {:.3}, spacing {:.4}", lambda, bodies[0].max_marker_spacing());
        assert!(lambda > 2.0);

        config.coupling.feedback = 0.99 / lambda;
        assert!(check_marker_density(&config, &bodies).is_ok());
        assert!(config.validate().is_ok());

        // past the bound the config still validates on its own, but the bodies do not
        config.coupling.feedback = 1.01 / lambda;
        assert!(config.validate().is_ok());
        assert_eq!(parameter_of(check_marker_density(&config, &bodies)), "bodies[0].n_equator");
        assert_eq!(
            parameter_of(build_bodies(&config, Path::new(".")).map(|_| ())),
            "bodies[0].n_equator"
        );

        // the stiffness counts toward the same bound
        config.coupling.feedback = 0.5 / lambda;
        config.coupling.stiffness = 0.6 / lambda;
        assert!(check_marker_density(&config, &bodies).is_err());
    }

    #[test]
    fn test_resolved_sphere_passes_at_full_gain() {
        let mut config = test_config();
        config.coupling.feedback = 1.0;
        config.coupling.stiffness = 0.0;
        config.bodies = vec![sphere(12)];
        let bodies = build_bodies(&config, Path::new(".")).unwrap();
        let lambda = body_transfer_gains(&config, &bodies)[0];
        eprintln!("resolved sphere: lambda = {:.3}", lambda);
        assert!(lambda < 1.0);
    }

    #[test]
    fn test_resolution_parameter_names() {
        assert_eq!(sphere(12).resolution_parameter(), "n_equator");
        let rod = |ring_markers| BodyConfig::Rod {
            base: [0.5; 3],
            direction: [0.0, 0.0, 1.0],
            length: 0.5,
            n_elements: 4,
            radius: 0.01,
            density: 1.0,
            stretch_stiffness: 10.0,
            damping: 0.0,
            clamped_base: true,
            ring_markers,
        };
        assert_eq!(rod(None).resolution_parameter(), "n_elements");
        assert_eq!(rod(Some(6)).resolution_parameter(), "ring_markers");
    }

    #[test]
    fn test_validation_halo_narrower_than_kernel() {
        let mut config = test_config();
        config.halo_width = 1;
        assert_eq!(parameter_of(config.validate()), "halo_width");

        config.kernel = DeltaKernel::Linear;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_diffusion_limit() {
        let mut config = test_config();
        config.flow.viscosity = 1.0;
        assert_eq!(parameter_of(config.validate()), "dt");
    }

    #[test]
    fn test_validation_names_body_parameter() {
        let mut config = test_config();
        config.bodies.push(BodyConfig::Rod {
            base: [0.5; 3],
            direction: [0.0, 0.0, 0.0],
            length: 0.5,
            n_elements: 4,
            radius: 0.01,
            density: 1.0,
            stretch_stiffness: 10.0,
            damping: 0.0,
            clamped_base: true,
            ring_markers: None,
        });
        assert_eq!(parameter_of(config.validate()), "bodies[1].direction");

        if let BodyConfig::Rod { direction, ring_markers, .. } = &mut config.bodies[1] {
            *direction = [0.0, 0.0, 1.0];
            *ring_markers = Some(2);
        }
        assert_eq!(parameter_of(config.validate()), "bodies[1].ring_markers");
    }

    #[test]
    fn test_validation_non_divisible_ranks() {
        let mut config = test_config();
        config.ranks = 3;
        assert_eq!(parameter_of(config.validate()), "ranks");
    }

    #[test]
    fn test_parse_minimal_json_uses_defaults() {
        let json = r#"{
            "name": "minimal",
            "grid": { "dims": [8, 8, 8], "spacing": 0.125 },
            "dt": 0.001,
            "steps": 5,
            "bodies": [
                { "type": "sphere", "center": [0.5, 0.5, 0.5], "radius": 0.2, "n_equator": 10 }
            ]
        }"#;
        let config: CouplingConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.ranks, 1);
        assert_eq!(config.halo_width, 2);
        assert_eq!(config.kernel, DeltaKernel::Peskin4);
        assert!((config.coupling.feedback - 0.5).abs() < 1e-12);
        assert_eq!(config.grid.periodic, [false; 3]);
        assert!(matches!(config.bodies[0], BodyConfig::Sphere { motion: Motion::Free, .. }));
        assert!(config.validate().is_ok());
    }
}
