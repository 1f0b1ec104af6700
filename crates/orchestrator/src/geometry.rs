//! Body construction from configuration, including STL surface meshes

use std::collections::HashSet;
use std::f64::consts::PI;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use kernel::vec3::{self, Vec3};
use kernel::{Body, BodyId, BodyState, ForcingGrid, KernelError, Motion, RigidBodyState, RodState};

/// Triangle structure from nom_stl
pub use nom_stl::Triangle;

use crate::config::{BodyConfig, CouplingConfig};
use crate::coupling::check_marker_density;
use crate::error::{CouplingError, CouplingResult};

/// Load an STL file and return its triangles
pub fn load_stl(path: &Path) -> CouplingResult<Vec<Triangle>> {
    let file = File::open(path).map_err(|e| {
        CouplingError::config("stl_file", format!("failed to open {}: {}", path.display(), e))
    })?;

    let mut reader = BufReader::new(file);

    let mesh = nom_stl::parse_stl(&mut reader).map_err(|e| {
        CouplingError::config("stl_file", format!("failed to parse {}: {:?}", path.display(), e))
    })?;

    Ok(mesh.triangles().to_vec())
}

/// Distinct triangle vertices in first-seen order.
pub fn unique_vertices(triangles: &[Triangle]) -> Vec<Vec3> {
    let mut seen = HashSet::new();
    let mut vertices = Vec::new();
    for triangle in triangles {
        for v in triangle.vertices() {
            let key = [v[0].to_bits(), v[1].to_bits(), v[2].to_bits()];
            if seen.insert(key) {
                vertices.push([v[0] as f64, v[1] as f64, v[2] as f64]);
            }
        }
    }
    vertices
}

/// Principal moments of a set of equal point masses about the origin.
fn point_cloud_inertia(points: &[Vec3], mass: f64) -> Vec3 {
    if points.is_empty() {
        return [0.0; 3];
    }
    let m = mass / points.len() as f64;
    let mut inertia = [0.0; 3];
    for p in points {
        inertia[0] += m * (p[1] * p[1] + p[2] * p[2]);
        inertia[1] += m * (p[0] * p[0] + p[2] * p[2]);
        inertia[2] += m * (p[0] * p[0] + p[1] * p[1]);
    }
    inertia
}

fn rigid(
    position: Vec3,
    mass: f64,
    inertia: Vec3,
    velocity: Vec3,
    angular_velocity: Vec3,
    motion: Motion,
) -> RigidBodyState {
    RigidBodyState {
        velocity,
        angular_velocity,
        motion,
        ..RigidBodyState::at_rest(position, mass, inertia)
    }
}

/// Build body `id` from its description. Mesh paths are resolved against
/// `config_dir`.
pub fn build_body(config: &BodyConfig, id: BodyId, config_dir: &Path) -> CouplingResult<Body> {
    let body = match config {
        BodyConfig::Sphere {
            center,
            radius,
            n_equator,
            density,
            velocity,
            angular_velocity,
            motion,
        } => {
            let mass = density * 4.0 / 3.0 * PI * radius.powi(3);
            let moment = 0.4 * mass * radius * radius;
            let state = rigid(*center, mass, [moment; 3], *velocity, *angular_velocity, *motion);
            Body::new(id, BodyState::Rigid(state), ForcingGrid::sphere(*radius, *n_equator))?
        }
        BodyConfig::Cylinder {
            center,
            axis,
            radius,
            length,
            n_ring,
            n_axial,
            density,
            velocity,
            angular_velocity,
            motion,
        } => {
            let director = vec3::frame_from_axis(*axis).ok_or_else(|| {
                CouplingError::config(format!("bodies[{}].axis", id), "must be non-zero")
            })?;
            let mass = density * PI * radius * radius * length;
            let across = mass * (3.0 * radius * radius + length * length) / 12.0;
            let along = 0.5 * mass * radius * radius;
            let mut state = rigid(
                *center,
                mass,
                [across, across, along],
                *velocity,
                *angular_velocity,
                *motion,
            );
            state.director = director;
            Body::new(
                id,
                BodyState::Rigid(state),
                ForcingGrid::cylinder(*radius, *length, *n_ring, *n_axial),
            )?
        }
        BodyConfig::Mesh {
            stl_file,
            center,
            scale,
            mass,
            inertia,
            velocity,
            angular_velocity,
            motion,
        } => {
            let path = config_dir.join(stl_file);
            tracing::info!("Loading STL geometry: {}", path.display());
            let triangles = load_stl(&path)?;
            let offsets: Vec<Vec3> = unique_vertices(&triangles)
                .into_iter()
                .map(|v| vec3::scale(v, *scale))
                .collect();
            tracing::info!(
                "Loaded {} triangles, {} surface markers",
                triangles.len(),
                offsets.len()
            );
            if offsets.is_empty() {
                return Err(CouplingError::config(
                    format!("bodies[{}].stl_file", id),
                    "mesh has no vertices",
                ));
            }
            let inertia = inertia.unwrap_or_else(|| point_cloud_inertia(&offsets, *mass));
            let state = rigid(*center, *mass, inertia, *velocity, *angular_velocity, *motion);
            Body::new(id, BodyState::Rigid(state), ForcingGrid::surface(offsets))?
        }
        BodyConfig::Rod {
            base,
            direction,
            length,
            n_elements,
            radius,
            density,
            stretch_stiffness,
            damping,
            clamped_base,
            ring_markers,
        } => {
            let d = vec3::normalize(*direction).ok_or_else(|| {
                CouplingError::config(format!("bodies[{}].direction", id), "must be non-zero")
            })?;
            let n = *n_elements;
            let element_length = length / n as f64;
            let element_mass = density * PI * radius * radius * element_length;
            let positions: Vec<Vec3> = (0..=n)
                .map(|i| vec3::add(*base, vec3::scale(d, element_length * i as f64)))
                .collect();
            let masses: Vec<f64> = (0..=n)
                .map(|i| if i == 0 || i == n { 0.5 * element_mass } else { element_mass })
                .collect();
            let state = RodState {
                velocities: vec![[0.0; 3]; n + 1],
                positions,
                masses,
                rest_lengths: vec![element_length; n],
                radius: *radius,
                stretch_stiffness: *stretch_stiffness,
                damping: *damping,
                clamped_base: *clamped_base,
            };
            let grid = match ring_markers {
                Some(ring) => ForcingGrid::rod_surface(*ring, d),
                None => ForcingGrid::RodElements,
            };
            Body::new(id, BodyState::Soft(state), grid)?
        }
    };
    Ok(body)
}

/// Build every configured body; ids follow configuration order. Fails if
/// any body is sampled too densely for the configured coupling gain.
pub fn build_bodies(config: &CouplingConfig, config_dir: &Path) -> CouplingResult<Vec<Body>> {
    let bodies = config
        .bodies
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let id = BodyId::try_from(i).map_err(|_| {
                CouplingError::config("bodies", format!("too many bodies ({})", i + 1))
            })?;
            build_body(b, id, config_dir).map_err(|e| match e {
                CouplingError::Kernel(KernelError::InvalidBody { reason, .. }) => {
                    CouplingError::config(format!("bodies[{}]", i), reason)
                }
                other => other,
            })
        })
        .collect::<CouplingResult<Vec<_>>>()?;
    check_marker_density(config, &bodies)?;
    Ok(bodies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TETRAHEDRON: &str = "solid tet
facet normal 0 0 -1
  outer loop
    vertex 0 0 0
    vertex 1 0 0
    vertex 0 1 0
  endloop
endfacet
facet normal 0 -1 0
  outer loop
    vertex 0 0 0
    vertex 1 0 0
    vertex 0 0 1
  endloop
endfacet
facet normal -1 0 0
  outer loop
    vertex 0 0 0
    vertex 0 1 0
    vertex 0 0 1
  endloop
endfacet
facet normal 1 1 1
  outer loop
    vertex 1 0 0
    vertex 0 1 0
    vertex 0 0 1
  endloop
endfacet
endsolid tet
";

    #[test]
    fn test_mesh_body_from_stl() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = File::create(dir.path().join("tet.stl")).unwrap();
        file.write_all(TETRAHEDRON.as_bytes()).unwrap();

        let config = BodyConfig::Mesh {
            stl_file: "tet.stl".to_string(),
            center: [0.5, 0.5, 0.5],
            scale: 0.1,
            mass: 1.0,
            inertia: None,
            velocity: [0.0; 3],
            angular_velocity: [0.0; 3],
            motion: Motion::Prescribed,
        };
        let body = build_body(&config, 2, dir.path()).unwrap();
        assert_eq!(body.marker_count(), 4);
        let kin = body.marker_kinematics();
        assert!((kin[1].0[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_missing_stl_names_parameter() {
        let config = BodyConfig::Mesh {
            stl_file: "nope.stl".to_string(),
            center: [0.0; 3],
            scale: 1.0,
            mass: 1.0,
            inertia: None,
            velocity: [0.0; 3],
            angular_velocity: [0.0; 3],
            motion: Motion::Free,
        };
        let err = build_body(&config, 0, Path::new("/nonexistent")).unwrap_err();
        assert!(matches!(err, CouplingError::Configuration { ref parameter, .. } if parameter == "stl_file"));
    }

    #[test]
    fn test_rod_mass_and_layout() {
        let config = BodyConfig::Rod {
            base: [0.0; 3],
            direction: [0.0, 0.0, 2.0],
            length: 1.0,
            n_elements: 4,
            radius: 0.1,
            density: 1.0,
            stretch_stiffness: 10.0,
            damping: 0.0,
            clamped_base: true,
            ring_markers: None,
        };
        let body = build_body(&config, 0, Path::new(".")).unwrap();
        assert_eq!(body.marker_count(), 4);
        match &body.state {
            BodyState::Soft(rod) => {
                let total: f64 = rod.masses.iter().sum();
                assert!((total - PI * 0.01).abs() < 1e-12);
                assert!((rod.positions[4][2] - 1.0).abs() < 1e-12);
            }
            _ => panic!("rod expected"),
        }
    }

    #[test]
    fn test_rod_surface_markers_ring_each_element() {
        let config = BodyConfig::Rod {
            base: [0.2, 0.2, 0.1],
            direction: [0.0, 0.0, 1.0],
            length: 0.8,
            n_elements: 4,
            radius: 0.05,
            density: 1.0,
            stretch_stiffness: 10.0,
            damping: 0.0,
            clamped_base: true,
            ring_markers: Some(6),
        };
        let body = build_body(&config, 1, Path::new(".")).unwrap();
        assert!(matches!(body.grid, ForcingGrid::RodSurface { ring: 6, .. }));
        assert_eq!(body.marker_count(), 24);
        for (p, v) in body.marker_kinematics() {
            let r = ((p[0] - 0.2).powi(2) + (p[1] - 0.2).powi(2)).sqrt();
            assert!((r - 0.05).abs() < 1e-12);
            assert_eq!(v, [0.0; 3]);
        }
        // element length dominates the spacing around the ring
        assert!((body.max_marker_spacing() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_sphere_mass_and_markers() {
        let config = BodyConfig::Sphere {
            center: [0.5; 3],
            radius: 0.2,
            n_equator: 8,
            density: 2.0,
            velocity: [0.1, 0.0, 0.0],
            angular_velocity: [0.0; 3],
            motion: Motion::Prescribed,
        };
        let body = build_body(&config, 0, Path::new(".")).unwrap();
        assert_eq!(body.marker_count(), 18);
        match &body.state {
            BodyState::Rigid(rb) => {
                let mass = 2.0 * 4.0 / 3.0 * PI * 0.008;
                assert!((rb.mass - mass).abs() < 1e-12);
                assert_eq!(rb.velocity, [0.1, 0.0, 0.0]);
            }
            _ => panic!("rigid body expected"),
        }
    }
}
