//! Immersed bodies: structural state plus the forcing grid that samples it.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::forcing_grid::ForcingGrid;
use crate::vec3::{Mat3, Vec3, IDENTITY};

/// Body identifier, unique within a simulation.
pub type BodyId = u32;

/// Globally unique marker identifier: body id in the high 32 bits, marker
/// index in the low 32 bits.
pub type MarkerId = u64;

/// Compose a marker id.
pub fn marker_id(body: BodyId, index: usize) -> MarkerId {
    ((body as u64) << 32) | (index as u64 & 0xffff_ffff)
}

/// Split a marker id into `(body, index)`.
pub fn split_marker_id(id: MarkerId) -> (BodyId, usize) {
    ((id >> 32) as BodyId, (id & 0xffff_ffff) as usize)
}

/// Structural model family; selects the structure kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyKind {
    /// Rigid body (six degrees of freedom)
    Rigid,
    /// Deformable filament
    Soft,
}

/// How a rigid body responds to fluid loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Motion {
    /// Newton-Euler dynamics driven by the fluid loads
    #[default]
    Free,
    /// Kinematics held at the initial velocities; loads are only recorded
    Prescribed,
}

/// State of a rigid body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyState {
    /// Center of mass
    pub position: Vec3,
    /// Translational velocity
    pub velocity: Vec3,
    /// Director matrix: rows are the body axes in world coordinates
    pub director: Mat3,
    /// Angular velocity in world coordinates
    pub angular_velocity: Vec3,
    /// Total mass
    pub mass: f64,
    /// Principal moments of inertia, body frame
    pub inertia: Vec3,
    /// Response to loads
    pub motion: Motion,
}

impl RigidBodyState {
    /// Body at rest with identity orientation.
    pub fn at_rest(position: Vec3, mass: f64, inertia: Vec3) -> Self {
        Self {
            position,
            velocity: [0.0; 3],
            director: IDENTITY,
            angular_velocity: [0.0; 3],
            mass,
            inertia,
            motion: Motion::Free,
        }
    }
}

/// State of a filament discretized as a chain of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RodState {
    /// Node positions, base first
    pub positions: Vec<Vec3>,
    /// Node velocities
    pub velocities: Vec<Vec3>,
    /// Node masses
    pub masses: Vec<f64>,
    /// Rest length of each element (one fewer than nodes)
    pub rest_lengths: Vec<f64>,
    /// Cross-section radius
    pub radius: f64,
    /// Axial stiffness `E*A`
    pub stretch_stiffness: f64,
    /// Velocity damping coefficient (1/s)
    pub damping: f64,
    /// Hold the first node fixed
    pub clamped_base: bool,
}

impl RodState {
    /// Number of elements.
    pub fn element_count(&self) -> usize {
        self.positions.len().saturating_sub(1)
    }
}

/// Structural state, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BodyState {
    /// Rigid body
    Rigid(RigidBodyState),
    /// Soft filament
    Soft(RodState),
}

impl BodyState {
    /// Kind tag used for kernel dispatch.
    pub fn kind(&self) -> BodyKind {
        match self {
            BodyState::Rigid(_) => BodyKind::Rigid,
            BodyState::Soft(_) => BodyKind::Soft,
        }
    }
}

/// Fluid loads acting on a body, after Newton's third law.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyLoads {
    /// Net force and torque (world frame, about the center of mass)
    Rigid {
        /// Net force
        force: Vec3,
        /// Net torque
        torque: Vec3,
    },
    /// Force per node and torque per element
    Soft {
        /// Node forces
        node_forces: Vec<Vec3>,
        /// Torque on each element about its center (world frame)
        element_torques: Vec<Vec3>,
    },
}

/// An immersed body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// Identifier
    pub id: BodyId,
    /// Structural state
    pub state: BodyState,
    /// Marker layout
    pub grid: ForcingGrid,
}

impl Body {
    /// Pair a state with a forcing grid, checking they are compatible.
    pub fn new(id: BodyId, state: BodyState, grid: ForcingGrid) -> KernelResult<Self> {
        let compatible = matches!(
            (&state, &grid),
            (BodyState::Rigid(_), ForcingGrid::RigidSurface { .. })
                | (BodyState::Soft(_), ForcingGrid::RodElements)
                | (BodyState::Soft(_), ForcingGrid::RodSurface { .. })
        );
        if !compatible {
            return Err(KernelError::InvalidBody {
                body: id,
                reason: "forcing grid does not match body kind".to_string(),
            });
        }
        if let BodyState::Soft(rod) = &state {
            let n = rod.positions.len();
            if n < 2 || rod.velocities.len() != n || rod.masses.len() != n || rod.rest_lengths.len() != n - 1 {
                return Err(KernelError::InvalidBody {
                    body: id,
                    reason: format!("inconsistent rod arrays for {} nodes", n),
                });
            }
        }
        Ok(Self { id, state, grid })
    }

    /// Kind tag.
    pub fn kind(&self) -> BodyKind {
        self.state.kind()
    }

    /// Number of markers.
    pub fn marker_count(&self) -> usize {
        self.grid.marker_count(&self.state)
    }

    /// Marker positions and prescribed velocities, in marker order.
    pub fn marker_kinematics(&self) -> Vec<(Vec3, Vec3)> {
        self.grid.marker_kinematics(&self.state)
    }

    /// Largest distance between neighboring markers.
    pub fn max_marker_spacing(&self) -> f64 {
        self.grid.max_marker_spacing(&self.state)
    }

    /// Loads on the body from the coupling forces its markers exert on the fluid.
    pub fn loads_from_marker_forces(&self, forces: &[Vec3]) -> KernelResult<BodyLoads> {
        if forces.len() != self.marker_count() {
            return Err(KernelError::InvalidBody {
                body: self.id,
                reason: format!(
                    "{} marker forces for {} markers",
                    forces.len(),
                    self.marker_count()
                ),
            });
        }
        Ok(self.grid.body_loads(&self.state, forces))
    }

    /// Reference point used to pick the body's home rank.
    pub fn anchor(&self) -> Vec3 {
        match &self.state {
            BodyState::Rigid(rb) => rb.position,
            BodyState::Soft(rod) => rod.positions[0],
        }
    }
}
