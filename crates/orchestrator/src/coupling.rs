//! Virtual-boundary coupling law
//!
//! The force a marker exerts on the fluid is a damped spring on the slip
//! between the interpolated fluid velocity `U` and the structure velocity
//! `V`, plus an optional integral term on the accumulated mismatch `E`:
//!
//! ```text
//! E += dt (U - V)
//! F  = -(rho h^3 / dt) (beta (U - V) + gamma E / dt)
//! ```
//!
//! Spreading `F` and applying it for one step changes the fluid velocity at
//! an isolated marker by `-beta lambda (U - V)`, where `lambda = sum w^2 <= 1`
//! for a partition-of-unity kernel. Neighboring markers add their own
//! footprints, so densely sampled bodies raise `lambda` well past one.
//! [`check_marker_density`] rejects any layout where `(beta + gamma) lambda`
//! exceeds [`MAX_STABLE_GAIN`].

use kernel::vec3::{self, Vec3};
use kernel::{transfer_gains, Body};

use crate::config::{CouplingConfig, CouplingParams};
use crate::error::{CouplingError, CouplingResult};
use crate::markers::LagrangianMarker;

/// Upper bound on `feedback + stiffness` accepted by configuration validation.
pub const MAX_STABLE_GAIN: f64 = 1.0;

/// Coefficients of the coupling law for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackLaw {
    feedback: f64,
    stiffness: f64,
    /// `rho h^3`
    cell_mass: f64,
}

impl FeedbackLaw {
    /// Law for fluid density `density` on cells of volume `cell_volume`.
    pub fn new(params: &CouplingParams, density: f64, cell_volume: f64) -> Self {
        Self {
            feedback: params.feedback,
            stiffness: params.stiffness,
            cell_mass: density * cell_volume,
        }
    }

    /// Update the marker's mismatch and force from its current slip. Returns the slip.
    pub fn apply(&self, marker: &mut LagrangianMarker, dt: f64) -> Vec3 {
        let slip = marker.slip();
        vec3::add_assign(&mut marker.mismatch, vec3::scale(slip, dt));
        let drive = vec3::add(
            vec3::scale(slip, self.feedback),
            vec3::scale(marker.mismatch, self.stiffness / dt),
        );
        marker.force = vec3::scale(drive, -self.cell_mass / dt);
        slip
    }
}

/// Largest transfer gain `lambda` among the markers of each body, in body order.
pub fn body_transfer_gains(config: &CouplingConfig, bodies: &[Body]) -> Vec<f64> {
    let mut positions = Vec::new();
    let mut owners = Vec::new();
    for (b, body) in bodies.iter().enumerate() {
        for (position, _) in body.marker_kinematics() {
            positions.push(position);
            owners.push(b);
        }
    }
    let mut worst = vec![0.0_f64; bodies.len()];
    for (b, g) in owners.into_iter().zip(transfer_gains(config.kernel, &config.grid, &positions)) {
        worst[b] = worst[b].max(g);
    }
    worst
}

/// Reject bodies whose markers sit so close together, relative to the grid,
/// that the coupling law would amplify slip instead of removing it.
pub fn check_marker_density(config: &CouplingConfig, bodies: &[Body]) -> CouplingResult<()> {
    let gain = config.coupling.feedback + config.coupling.stiffness;
    for (body, lambda) in bodies.iter().zip(body_transfer_gains(config, bodies)) {
        if gain * lambda > MAX_STABLE_GAIN {
            let index = body.id as usize;
            let parameter = config
                .bodies
                .get(index)
                .map(|b| format!("bodies[{}].{}", index, b.resolution_parameter()))
                .unwrap_or_else(|| format!("bodies[{}]", index));
            return Err(CouplingError::config(
                parameter,
                format!(
                    "markers up to {:.4} apart on a grid of spacing {:.4} give an effective gain \
                     (feedback + stiffness) * lambda = {} * {:.3} = {:.3} above the stability bound {}",
                    body.max_marker_spacing(),
                    config.grid.spacing,
                    gain,
                    lambda,
                    gain * lambda,
                    MAX_STABLE_GAIN
                ),
            ));
        }
    }
    Ok(())
}
