//! Structural kernels advancing body state under fluid loads.

use crate::body::{BodyLoads, BodyState, Motion};
use crate::error::{KernelError, KernelResult};
use crate::vec3;

/// Advances one kind of body by one timestep.
pub trait StructureKernel: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Advance `state` by `dt` under `loads`. `body` is only used in errors.
    fn advance(&mut self, body: u32, state: &mut BodyState, loads: &BodyLoads, dt: f64) -> KernelResult<()>;
}

fn wrong_kind(body: u32, kernel: &str) -> KernelError {
    KernelError::InvalidBody {
        body,
        reason: format!("{} kernel cannot advance this body kind", kernel),
    }
}

/// Newton-Euler integration of rigid bodies (semi-implicit Euler, exact
/// rotation update via Rodrigues' formula).
#[derive(Debug, Default, Clone)]
pub struct RigidBodyKernel;

impl StructureKernel for RigidBodyKernel {
    fn name(&self) -> &'static str {
        "rigid"
    }

    fn advance(&mut self, body: u32, state: &mut BodyState, loads: &BodyLoads, dt: f64) -> KernelResult<()> {
        let BodyState::Rigid(rb) = state else {
            return Err(wrong_kind(body, self.name()));
        };
        let BodyLoads::Rigid { force, torque } = loads else {
            return Err(wrong_kind(body, self.name()));
        };

        if rb.motion == Motion::Free {
            if rb.mass <= 0.0 {
                return Err(KernelError::InvalidBody {
                    body,
                    reason: "free rigid body needs positive mass".to_string(),
                });
            }
            vec3::add_assign(&mut rb.velocity, vec3::scale(*force, dt / rb.mass));

            // Euler's equations in the body frame
            let w_body = vec3::mat_vec(&rb.director, rb.angular_velocity);
            let t_body = vec3::mat_vec(&rb.director, *torque);
            let l_body = [
                rb.inertia[0] * w_body[0],
                rb.inertia[1] * w_body[1],
                rb.inertia[2] * w_body[2],
            ];
            let gyro = vec3::cross(w_body, l_body);
            let mut w_next = w_body;
            for a in 0..3 {
                if rb.inertia[a] > 0.0 {
                    w_next[a] += dt * (t_body[a] - gyro[a]) / rb.inertia[a];
                }
            }
            rb.angular_velocity = vec3::mat_t_vec(&rb.director, w_next);
        }

        rb.position = vec3::add(rb.position, vec3::scale(rb.velocity, dt));
        // world vectors rotate as r' = R r, so Q' = Q R^T
        let rot = vec3::rotation(vec3::scale(rb.angular_velocity, dt));
        let rot_t = [
            [rot[0][0], rot[1][0], rot[2][0]],
            [rot[0][1], rot[1][1], rot[2][1]],
            [rot[0][2], rot[1][2], rot[2][2]],
        ];
        rb.director = vec3::mat_mul(&rb.director, &rot_t);
        Ok(())
    }
}

/// Damped mass-spring chain: axial springs between consecutive nodes with
/// stiffness `EA / L0`, linear velocity damping, optional clamped base.
#[derive(Debug, Default, Clone)]
pub struct RodKernel;

impl StructureKernel for RodKernel {
    fn name(&self) -> &'static str {
        "rod"
    }

    fn advance(&mut self, body: u32, state: &mut BodyState, loads: &BodyLoads, dt: f64) -> KernelResult<()> {
        let BodyState::Soft(rod) = state else {
            return Err(wrong_kind(body, self.name()));
        };
        let BodyLoads::Soft { node_forces, element_torques } = loads else {
            return Err(wrong_kind(body, self.name()));
        };
        let n = rod.positions.len();
        if node_forces.len() != n || element_torques.len() != rod.element_count() {
            return Err(KernelError::InvalidBody {
                body,
                reason: format!(
                    "{} node forces and {} element torques for {} nodes",
                    node_forces.len(),
                    element_torques.len(),
                    n
                ),
            });
        }

        let mut total = node_forces.clone();
        for e in 0..rod.element_count() {
            let d = vec3::sub(rod.positions[e + 1], rod.positions[e]);
            let length = vec3::norm(d);
            if length <= 0.0 {
                return Err(KernelError::InvalidBody {
                    body,
                    reason: format!("element {} collapsed", e),
                });
            }
            let strain = (length - rod.rest_lengths[e]) / rod.rest_lengths[e];
            let tension = vec3::scale(d, rod.stretch_stiffness * strain / length);
            vec3::add_assign(&mut total[e], tension);
            vec3::add_assign(&mut total[e + 1], vec3::scale(tension, -1.0));

            // bending part of the torque as a force couple on the end nodes;
            // the chain carries no twist
            let couple = vec3::scale(vec3::cross(element_torques[e], d), 1.0 / (length * length));
            vec3::add_assign(&mut total[e + 1], couple);
            vec3::add_assign(&mut total[e], vec3::scale(couple, -1.0));
        }

        for i in 0..n {
            if rod.clamped_base && i == 0 {
                rod.velocities[0] = [0.0; 3];
                continue;
            }
            let damping = vec3::scale(rod.velocities[i], -rod.damping * rod.masses[i]);
            let accel = vec3::scale(vec3::add(total[i], damping), 1.0 / rod.masses[i]);
            vec3::add_assign(&mut rod.velocities[i], vec3::scale(accel, dt));
            let dx = vec3::scale(rod.velocities[i], dt);
            vec3::add_assign(&mut rod.positions[i], dx);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{RigidBodyState, RodState};

    #[test]
    fn test_free_body_accelerates_under_force() {
        let mut state = BodyState::Rigid(RigidBodyState::at_rest([0.0; 3], 2.0, [1.0; 3]));
        let loads = BodyLoads::Rigid {
            force: [4.0, 0.0, 0.0],
            torque: [0.0; 3],
        };
        let mut kernel = RigidBodyKernel;
        kernel.advance(0, &mut state, &loads, 0.5).unwrap();
        let BodyState::Rigid(rb) = state else { unreachable!() };
        assert!((rb.velocity[0] - 1.0).abs() < 1e-12);
        assert!((rb.position[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_prescribed_body_ignores_loads() {
        let mut rb = RigidBodyState::at_rest([0.0; 3], 1.0, [1.0; 3]);
        rb.motion = Motion::Prescribed;
        rb.velocity = [0.2, 0.0, 0.0];
        rb.angular_velocity = [0.0, 0.0, std::f64::consts::PI];
        let mut state = BodyState::Rigid(rb);
        let loads = BodyLoads::Rigid {
            force: [100.0; 3],
            torque: [100.0; 3],
        };
        RigidBodyKernel.advance(0, &mut state, &loads, 0.5).unwrap();
        let BodyState::Rigid(rb) = state else { unreachable!() };
        assert!((rb.velocity[0] - 0.2).abs() < 1e-12);
        assert!((rb.position[0] - 0.1).abs() < 1e-12);
        // a quarter turn about z maps body x to world y
        let x_axis = vec3::mat_t_vec(&rb.director, [1.0, 0.0, 0.0]);
        assert!(x_axis[0].abs() < 1e-12);
        assert!((x_axis[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_stretched_rod_contracts_and_base_stays() {
        let mut state = BodyState::Soft(RodState {
            positions: vec![[0.0; 3], [1.2, 0.0, 0.0]],
            velocities: vec![[0.0; 3]; 2],
            masses: vec![1.0, 1.0],
            rest_lengths: vec![1.0],
            radius: 0.05,
            stretch_stiffness: 10.0,
            damping: 0.0,
            clamped_base: true,
        });
        let loads = BodyLoads::Soft {
            node_forces: vec![[0.0; 3]; 2],
            element_torques: vec![[0.0; 3]; 1],
        };
        RodKernel.advance(0, &mut state, &loads, 0.01).unwrap();
        let BodyState::Soft(rod) = state else { unreachable!() };
        assert_eq!(rod.positions[0], [0.0; 3]);
        assert!(rod.velocities[1][0] < 0.0);
        assert!(rod.positions[1][0] < 1.2);
    }

    #[test]
    fn test_element_torque_becomes_node_couple() {
        let rod = RodState {
            positions: vec![[0.0; 3], [0.0, 0.0, 2.0]],
            velocities: vec![[0.0; 3]; 2],
            masses: vec![1.0, 1.0],
            rest_lengths: vec![2.0],
            radius: 0.05,
            stretch_stiffness: 10.0,
            damping: 0.0,
            clamped_base: false,
        };
        let mut state = BodyState::Soft(rod);
        // bending about y plus a twist about the axis, which the chain ignores
        let loads = BodyLoads::Soft {
            node_forces: vec![[0.0; 3]; 2],
            element_torques: vec![[0.0, 4.0, 3.0]],
        };
        RodKernel.advance(0, &mut state, &loads, 0.1).unwrap();
        let BodyState::Soft(rod) = state else { unreachable!() };
        // couple (t x d) / |d|^2 = (8, 0, 0) / 4 on the tip, opposite on the base
        assert!((rod.velocities[1][0] - 0.2).abs() < 1e-12);
        assert!((rod.velocities[0][0] + 0.2).abs() < 1e-12);
        assert!(rod.velocities[0][1].abs() < 1e-12);
        assert!(rod.velocities[1][1].abs() < 1e-12);
        assert!(rod.velocities[1][2].abs() < 1e-12);
    }

    #[test]
    fn test_kind_mismatch_is_an_error() {
        let mut state = BodyState::Rigid(RigidBodyState::at_rest([0.0; 3], 1.0, [1.0; 3]));
        let loads = BodyLoads::Soft {
            node_forces: vec![],
            element_torques: vec![],
        };
        assert!(RodKernel.advance(9, &mut state, &loads, 0.1).is_err());
    }
}
