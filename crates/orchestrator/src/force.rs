//! Hydrodynamic loads on bodies from their coupling forces
//!
//! The force a marker exerts on the fluid comes back on the body as its
//! reaction, so the net load of a body is `-sum F` with moment
//! `sum (x - c) x (-F)` about the body anchor `c`.

use std::collections::BTreeMap;

use kernel::vec3::{self, Vec3};
use kernel::{Body, BodyId};
use serde::Serialize;

use crate::markers::LagrangianMarker;

/// Force and moment on one body
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SurfaceForce {
    /// Net force vector [Fx, Fy, Fz]
    pub net_force: Vec3,
    /// Net moment [Tx, Ty, Tz] about the body anchor
    pub net_moment: Vec3,
}

impl SurfaceForce {
    /// Drag coefficient `2 F_d / (rho U^2 A)` along `direction`.
    pub fn drag_coefficient(&self, direction: Vec3, density: f64, speed: f64, area: f64) -> f64 {
        let Some(d) = vec3::normalize(direction) else {
            return 0.0;
        };
        let q = 0.5 * density * speed * speed * area;
        if q == 0.0 {
            return 0.0;
        }
        vec3::dot(self.net_force, d) / q
    }
}

/// Load on every body from a complete marker list.
pub fn body_forces(bodies: &[Body], markers: &[LagrangianMarker]) -> BTreeMap<BodyId, SurfaceForce> {
    let anchors: BTreeMap<BodyId, Vec3> = bodies.iter().map(|b| (b.id, b.anchor())).collect();
    let mut forces: BTreeMap<BodyId, SurfaceForce> =
        bodies.iter().map(|b| (b.id, SurfaceForce::default())).collect();

    for m in markers {
        let (Some(center), Some(total)) = (anchors.get(&m.body), forces.get_mut(&m.body)) else {
            continue;
        };
        let reaction = vec3::scale(m.force, -1.0);
        vec3::add_assign(&mut total.net_force, reaction);
        let arm = vec3::sub(m.position, *center);
        vec3::add_assign(&mut total.net_moment, vec3::cross(arm, reaction));
    }
    forces
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel::{BodyState, ForcingGrid, RigidBodyState};

    #[test]
    fn test_body_force_is_reaction() {
        let state = BodyState::Rigid(RigidBodyState::at_rest([0.5; 3], 1.0, [1.0; 3]));
        let body = Body::new(0, state, ForcingGrid::surface(vec![[0.1, 0.0, 0.0], [-0.1, 0.0, 0.0]]))
            .unwrap();

        let mut a = LagrangianMarker::new(0, 0, [0.6, 0.5, 0.5], [0.0; 3], 0);
        a.force = [0.0, 1.0, 0.0];
        let mut b = LagrangianMarker::new(0, 1, [0.4, 0.5, 0.5], [0.0; 3], 1);
        b.force = [0.0, 1.0, 0.0];

        let forces = body_forces(&[body], &[a, b]);
        let f = &forces[&0];
        assert!((f.net_force[1] + 2.0).abs() < 1e-12);
        assert!(f.net_moment.iter().all(|t| t.abs() < 1e-12), "moment {:?}", f.net_moment);
    }

    #[test]
    fn test_drag_coefficient() {
        let f = SurfaceForce {
            net_force: [-0.5, 0.0, 0.0],
            net_moment: [0.0; 3],
        };
        let cd = f.drag_coefficient([-1.0, 0.0, 0.0], 1.0, 1.0, 1.0);
        assert!((cd - 1.0).abs() < 1e-12);
        assert_eq!(f.drag_coefficient([0.0; 3], 1.0, 1.0, 1.0), 0.0);
    }
}
