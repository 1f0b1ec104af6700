//! Forcing grids: rules mapping a body's structural state to its ordered
//! Lagrangian markers, and marker forces back to body loads.

use serde::{Deserialize, Serialize};

use crate::body::{BodyLoads, BodyState, RodState};
use crate::vec3::{self, Vec3};

/// Marker layout of a body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForcingGrid {
    /// Markers fixed in the body frame of a rigid body
    RigidSurface {
        /// Marker offsets from the center of mass, body frame
        offsets: Vec<Vec3>,
        /// Largest distance between neighboring markers
        max_spacing: f64,
    },
    /// One marker at the center of each rod element
    RodElements,
    /// A ring of markers on the rod surface around each element center
    RodSurface {
        /// Markers per ring
        ring: usize,
        /// Direction the first marker of each ring points to, projected
        /// onto the element's cross-section
        reference: Vec3,
    },
}

/// Element center, tangent, length and mass-weighted velocity of rod element `e`.
fn element(rod: &RodState, e: usize) -> (Vec3, Vec3, f64, Vec3) {
    let (x0, x1) = (rod.positions[e], rod.positions[e + 1]);
    let d = vec3::sub(x1, x0);
    let length = vec3::norm(d);
    let tangent = if length > 0.0 { vec3::scale(d, 1.0 / length) } else { [0.0; 3] };
    let (m0, m1) = (rod.masses[e], rod.masses[e + 1]);
    let velocity = vec3::scale(
        vec3::add(
            vec3::scale(rod.velocities[e], m0),
            vec3::scale(rod.velocities[e + 1], m1),
        ),
        1.0 / (m0 + m1),
    );
    (vec3::scale(vec3::add(x0, x1), 0.5), tangent, length, velocity)
}

/// Unit cross-section axes `(d1, d2)` of an element with unit `tangent`.
fn cross_section(tangent: Vec3, reference: Vec3) -> (Vec3, Vec3) {
    let projected = vec3::sub(reference, vec3::scale(tangent, vec3::dot(reference, tangent)));
    let d1 = match vec3::normalize(projected) {
        Some(d1) => d1,
        None => match vec3::frame_from_axis(tangent) {
            Some(frame) => frame[0],
            None => [0.0; 3],
        },
    };
    (d1, vec3::cross(tangent, d1))
}

/// Moment arms from the element center to each ring marker.
fn ring_arms(rod: &RodState, e: usize, ring: usize, reference: Vec3) -> Vec<Vec3> {
    let (_, tangent, _, _) = element(rod, e);
    let (d1, d2) = cross_section(tangent, reference);
    (0..ring)
        .map(|a| {
            let theta = 2.0 * std::f64::consts::PI * a as f64 / ring as f64;
            let (sin_t, cos_t) = theta.sin_cos();
            vec3::add(vec3::scale(d1, rod.radius * cos_t), vec3::scale(d2, rod.radius * sin_t))
        })
        .collect()
}

impl ForcingGrid {
    /// Sphere surface sampled on latitude rings.
    ///
    /// `n_equator / 2` polar angles span `[0, pi]`; the ring at polar angle
    /// `theta` carries `round(n_equator * sin(theta)) + 1` equally spaced
    /// azimuths, so the poles hold a single marker each.
    pub fn sphere(radius: f64, n_equator: usize) -> Self {
        let n_polar = (n_equator / 2).max(2);
        let mut offsets = Vec::new();
        for p in 0..n_polar {
            let theta = std::f64::consts::PI * p as f64 / (n_polar - 1) as f64;
            let (sin_t, cos_t) = theta.sin_cos();
            let ring = (n_equator as f64 * sin_t).round() as usize + 1;
            for a in 0..ring {
                let phi = 2.0 * std::f64::consts::PI * a as f64 / ring as f64;
                offsets.push([
                    radius * sin_t * phi.cos(),
                    radius * sin_t * phi.sin(),
                    radius * cos_t,
                ]);
            }
        }
        let max_spacing = radius * 2.0 * std::f64::consts::PI / n_equator.max(1) as f64;
        ForcingGrid::RigidSurface { offsets, max_spacing }
    }

    /// Lateral surface of a circular cylinder whose axis is the body-frame z
    /// axis: `n_axial` rings of `n_ring` markers, rings offset by half a step.
    pub fn cylinder(radius: f64, length: f64, n_ring: usize, n_axial: usize) -> Self {
        let n_ring = n_ring.max(1);
        let n_axial = n_axial.max(1);
        let dtheta = 2.0 * std::f64::consts::PI / n_ring as f64;
        let dz = length / n_axial as f64;
        let mut offsets = Vec::with_capacity(n_ring * n_axial);
        for l in 0..n_axial {
            let z = -0.5 * length + (l as f64 + 0.5) * dz;
            for a in 0..n_ring {
                let theta = (a as f64 + 0.5) * dtheta;
                offsets.push([radius * theta.cos(), radius * theta.sin(), z]);
            }
        }
        let max_spacing = (radius * dtheta).max(dz);
        ForcingGrid::RigidSurface { offsets, max_spacing }
    }

    /// Rings of `ring` markers on the surface of a rod laid out along
    /// `direction`. The first marker of every ring starts off perpendicular
    /// to `direction`.
    pub fn rod_surface(ring: usize, direction: Vec3) -> Self {
        let reference = vec3::frame_from_axis(direction)
            .map(|frame| frame[0])
            .unwrap_or([1.0, 0.0, 0.0]);
        ForcingGrid::RodSurface {
            ring: ring.max(1),
            reference,
        }
    }

    /// Arbitrary surface points (e.g. mesh vertices), body frame.
    pub fn surface(offsets: Vec<Vec3>) -> Self {
        let max_spacing = max_nearest_neighbor_distance(&offsets);
        ForcingGrid::RigidSurface { offsets, max_spacing }
    }

    /// Number of markers for `state`.
    pub fn marker_count(&self, state: &BodyState) -> usize {
        match (self, state) {
            (ForcingGrid::RigidSurface { offsets, .. }, _) => offsets.len(),
            (ForcingGrid::RodElements, BodyState::Soft(rod)) => rod.element_count(),
            (ForcingGrid::RodSurface { ring, .. }, BodyState::Soft(rod)) => ring * rod.element_count(),
            (_, BodyState::Rigid(_)) => 0,
        }
    }

    /// Marker positions and velocities.
    pub fn marker_kinematics(&self, state: &BodyState) -> Vec<(Vec3, Vec3)> {
        match (self, state) {
            (ForcingGrid::RigidSurface { offsets, .. }, BodyState::Rigid(rb)) => offsets
                .iter()
                .map(|&local| {
                    let r = vec3::mat_t_vec(&rb.director, local);
                    let position = vec3::add(rb.position, r);
                    let velocity = vec3::add(rb.velocity, vec3::cross(rb.angular_velocity, r));
                    (position, velocity)
                })
                .collect(),
            (ForcingGrid::RodElements, BodyState::Soft(rod)) => (0..rod.element_count())
                .map(|e| {
                    let (center, _, _, velocity) = element(rod, e);
                    (center, velocity)
                })
                .collect(),
            (ForcingGrid::RodSurface { ring, reference }, BodyState::Soft(rod)) => {
                let mut out = Vec::with_capacity(ring * rod.element_count());
                for e in 0..rod.element_count() {
                    let (center, tangent, length, velocity) = element(rod, e);
                    // the chain has no spin about its axis; the ring turns with the tangent
                    let omega = if length > 0.0 {
                        let dv = vec3::sub(rod.velocities[e + 1], rod.velocities[e]);
                        vec3::scale(vec3::cross(tangent, dv), 1.0 / length)
                    } else {
                        [0.0; 3]
                    };
                    for arm in ring_arms(rod, e, *ring, *reference) {
                        out.push((
                            vec3::add(center, arm),
                            vec3::add(velocity, vec3::cross(omega, arm)),
                        ));
                    }
                }
                out
            }
            _ => Vec::new(),
        }
    }

    /// Loads on the body given the forces its markers exert on the fluid.
    ///
    /// The body receives the reaction: `-sum F` and `-sum r x F` for rigid
    /// bodies. Each rod element passes half of the reaction on its markers to
    /// both of its nodes; surface markers also give the element a torque
    /// `-sum arm x F` about its center (world frame).
    pub fn body_loads(&self, state: &BodyState, forces: &[Vec3]) -> BodyLoads {
        match (self, state) {
            (ForcingGrid::RodElements, BodyState::Soft(rod)) => {
                let mut node_forces = vec![[0.0; 3]; rod.positions.len()];
                for (e, f) in forces.iter().enumerate().take(rod.element_count()) {
                    let half = vec3::scale(*f, -0.5);
                    vec3::add_assign(&mut node_forces[e], half);
                    vec3::add_assign(&mut node_forces[e + 1], half);
                }
                BodyLoads::Soft {
                    node_forces,
                    element_torques: vec![[0.0; 3]; rod.element_count()],
                }
            }
            (ForcingGrid::RodSurface { ring, reference }, BodyState::Soft(rod)) => {
                let mut node_forces = vec![[0.0; 3]; rod.positions.len()];
                let mut element_torques = vec![[0.0; 3]; rod.element_count()];
                for (e, chunk) in forces.chunks((*ring).max(1)).enumerate().take(rod.element_count()) {
                    let arms = ring_arms(rod, e, *ring, *reference);
                    let mut total = [0.0; 3];
                    for (arm, f) in arms.iter().zip(chunk) {
                        vec3::add_assign(&mut total, *f);
                        vec3::add_assign(&mut element_torques[e], vec3::scale(vec3::cross(*arm, *f), -1.0));
                    }
                    let half = vec3::scale(total, -0.5);
                    vec3::add_assign(&mut node_forces[e], half);
                    vec3::add_assign(&mut node_forces[e + 1], half);
                }
                BodyLoads::Soft {
                    node_forces,
                    element_torques,
                }
            }
            (ForcingGrid::RigidSurface { offsets, .. }, BodyState::Rigid(rb)) => {
                let mut force = [0.0; 3];
                let mut torque = [0.0; 3];
                for (local, f) in offsets.iter().zip(forces) {
                    let r = vec3::mat_t_vec(&rb.director, *local);
                    vec3::add_assign(&mut force, vec3::scale(*f, -1.0));
                    vec3::add_assign(&mut torque, vec3::scale(vec3::cross(r, *f), -1.0));
                }
                BodyLoads::Rigid { force, torque }
            }
            _ => BodyLoads::Rigid {
                force: [0.0; 3],
                torque: [0.0; 3],
            },
        }
    }

    /// Largest spacing between neighboring markers.
    pub fn max_marker_spacing(&self, state: &BodyState) -> f64 {
        match (self, state) {
            (ForcingGrid::RigidSurface { max_spacing, .. }, _) => *max_spacing,
            (ForcingGrid::RodElements, BodyState::Soft(rod)) => longest_element(rod),
            (ForcingGrid::RodSurface { ring, .. }, BodyState::Soft(rod)) => {
                let around = 2.0 * std::f64::consts::PI * rod.radius / *ring as f64;
                longest_element(rod).max(around)
            }
            _ => 0.0,
        }
    }
}

fn longest_element(rod: &RodState) -> f64 {
    rod.positions
        .windows(2)
        .map(|w| vec3::norm(vec3::sub(w[1], w[0])))
        .fold(0.0, f64::max)
}

fn max_nearest_neighbor_distance(points: &[Vec3]) -> f64 {
    let mut worst = 0.0_f64;
    for (i, p) in points.iter().enumerate() {
        let nearest = points
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, q)| vec3::norm(vec3::sub(*p, *q)))
            .fold(f64::INFINITY, f64::min);
        if nearest.is_finite() {
            worst = worst.max(nearest);
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::RigidBodyState;

    #[test]
    fn test_sphere_marker_layout() {
        let grid = ForcingGrid::sphere(0.5, 8);
        let ForcingGrid::RigidSurface { offsets, max_spacing } = &grid else {
            panic!("sphere must be a rigid surface grid");
        };
        // 4 polar angles: 0, pi/3, 2pi/3, pi -> rings of 1, 8, 8, 1
        assert_eq!(offsets.len(), 18);
        for o in offsets {
            assert!((vec3::norm(*o) - 0.5).abs() < 1e-12);
        }
        assert!((max_spacing - 0.5 * 2.0 * std::f64::consts::PI / 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_rigid_kinematics_and_reaction_loads() {
        let grid = ForcingGrid::surface(vec![[1.0, 0.0, 0.0], [-1.0, 0.0, 0.0]]);
        let mut rb = RigidBodyState::at_rest([2.0, 2.0, 2.0], 1.0, [1.0; 3]);
        rb.velocity = [0.1, 0.0, 0.0];
        rb.angular_velocity = [0.0, 0.0, 1.0];
        let state = BodyState::Rigid(rb);

        let kin = grid.marker_kinematics(&state);
        assert!((kin[0].0[0] - 3.0).abs() < 1e-12);
        // v + w x r with r = +x: (0.1, 1, 0)
        assert!((kin[0].1[0] - 0.1).abs() < 1e-12);
        assert!((kin[0].1[1] - 1.0).abs() < 1e-12);

        let loads = grid.body_loads(&state, &[[0.0, 1.0, 0.0], [0.0, 1.0, 0.0]]);
        match loads {
            BodyLoads::Rigid { force, torque } => {
                assert!((force[1] + 2.0).abs() < 1e-12);
                // torques of the two markers cancel
                assert!(vec3::norm(torque) < 1e-12);
            }
            _ => panic!("expected rigid loads"),
        }
    }

    #[test]
    fn test_rod_element_centers_and_half_forces() {
        let rod = RodState {
            positions: vec![[0.0; 3], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]],
            velocities: vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0; 3]],
            masses: vec![1.0, 3.0, 1.0],
            rest_lengths: vec![1.0, 1.0],
            radius: 0.1,
            stretch_stiffness: 1.0,
            damping: 0.0,
            clamped_base: true,
        };
        let state = BodyState::Soft(rod);
        let grid = ForcingGrid::RodElements;
        assert_eq!(grid.marker_count(&state), 2);

        let kin = grid.marker_kinematics(&state);
        assert!((kin[0].0[0] - 0.5).abs() < 1e-12);
        assert!((kin[0].1[0] - 0.75).abs() < 1e-12);

        let loads = grid.body_loads(&state, &[[2.0, 0.0, 0.0], [0.0, 4.0, 0.0]]);
        let BodyLoads::Soft { node_forces, element_torques } = loads else {
            panic!("expected soft loads");
        };
        assert!((node_forces[0][0] + 1.0).abs() < 1e-12);
        assert!((node_forces[1][0] + 1.0).abs() < 1e-12);
        assert!((node_forces[1][1] + 2.0).abs() < 1e-12);
        assert!((node_forces[2][1] + 2.0).abs() < 1e-12);
        assert!(element_torques.iter().all(|t| *t == [0.0; 3]));
        assert!((grid.max_marker_spacing(&state) - 1.0).abs() < 1e-12);
    }

    fn bent_rod() -> RodState {
        RodState {
            positions: vec![[0.0; 3], [0.0, 0.0, 1.0], [0.6, 0.0, 1.8]],
            velocities: vec![[0.0; 3], [0.2, 0.0, 0.0], [0.5, -0.1, 0.0]],
            masses: vec![0.5, 1.0, 0.5],
            rest_lengths: vec![1.0, 1.0],
            radius: 0.1,
            stretch_stiffness: 1.0,
            damping: 0.0,
            clamped_base: true,
        }
    }

    #[test]
    fn test_rod_surface_rings_sit_on_the_surface() {
        let rod = bent_rod();
        let state = BodyState::Soft(rod.clone());
        let grid = ForcingGrid::rod_surface(6, [0.0, 0.0, 1.0]);
        assert_eq!(grid.marker_count(&state), 12);

        let kin = grid.marker_kinematics(&state);
        for (e, ring) in kin.chunks(6).enumerate() {
            let (center, tangent, _, velocity) = element(&rod, e);
            let mut mean_position = [0.0; 3];
            let mut mean_velocity = [0.0; 3];
            for (p, v) in ring {
                let arm = vec3::sub(*p, center);
                assert!((vec3::norm(arm) - 0.1).abs() < 1e-12);
                assert!(vec3::dot(arm, tangent).abs() < 1e-12);
                vec3::add_assign(&mut mean_position, vec3::scale(*p, 1.0 / 6.0));
                vec3::add_assign(&mut mean_velocity, vec3::scale(*v, 1.0 / 6.0));
            }
            // a full ring averages back to the element center and its velocity
            for a in 0..3 {
                assert!((mean_position[a] - center[a]).abs() < 1e-12);
                assert!((mean_velocity[a] - velocity[a]).abs() < 1e-12);
            }
        }
        let spacing = grid.max_marker_spacing(&state);
        assert!((spacing - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rod_surface_loads_balance_marker_forces() {
        let rod = bent_rod();
        let state = BodyState::Soft(rod.clone());
        let grid = ForcingGrid::rod_surface(4, [0.0, 0.0, 1.0]);
        let kin = grid.marker_kinematics(&state);
        let forces: Vec<Vec3> = (0..8)
            .map(|m| [0.1 * m as f64, 1.0 - 0.2 * m as f64, 0.05 * (m * m) as f64])
            .collect();

        let BodyLoads::Soft { node_forces, element_torques } = grid.body_loads(&state, &forces) else {
            panic!("expected soft loads");
        };
        assert_eq!(element_torques.len(), 2);

        let mut marker_total = [0.0; 3];
        for f in &forces {
            vec3::add_assign(&mut marker_total, *f);
        }
        let mut node_total = [0.0; 3];
        for f in &node_forces {
            vec3::add_assign(&mut node_total, *f);
        }
        for a in 0..3 {
            assert!((node_total[a] + marker_total[a]).abs() < 1e-12);
        }

        // node forces plus element torques reproduce the moment of the marker forces
        let origin = [0.3, -0.2, 0.4];
        let mut marker_moment = [0.0; 3];
        for ((p, _), f) in kin.iter().zip(&forces) {
            vec3::add_assign(&mut marker_moment, vec3::cross(vec3::sub(*p, origin), *f));
        }
        let mut body_moment = [0.0; 3];
        for e in 0..2 {
            let (center, _, _, _) = element(&rod, e);
            let mut element_force = [0.0; 3];
            for f in &forces[4 * e..4 * e + 4] {
                vec3::add_assign(&mut element_force, vec3::scale(*f, -1.0));
            }
            vec3::add_assign(&mut body_moment, vec3::cross(vec3::sub(center, origin), element_force));
            vec3::add_assign(&mut body_moment, element_torques[e]);
        }
        for a in 0..3 {
            assert!((body_moment[a] + marker_moment[a]).abs() < 1e-12);
        }
    }
}
