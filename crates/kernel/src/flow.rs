//! Single-rank flow kernels.
//!
//! A [`FlowKernel`] advances the local velocity slice in two halves around
//! the immersed-boundary coupling: `step_partial` before the forcing is
//! known, `step_finalize` once the spread forcing has been reduced onto the
//! owning ranks. The velocity slice is updated in place.

use serde::{Deserialize, Serialize};

use crate::error::KernelResult;
use crate::field::FieldSlice;
use crate::grid::{Axis, GlobalGrid, Side, Subdomain};
use crate::vec3::Vec3;

/// Per-rank fluid solver.
pub trait FlowKernel: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Ghost layers the kernel reads around each interior cell.
    fn stencil_width(&self) -> usize;

    /// First part of the substep; purely local.
    fn step_partial(
        &mut self,
        grid: &GlobalGrid,
        sub: &Subdomain,
        dt: f64,
        velocity: &mut FieldSlice,
    ) -> KernelResult<()>;

    /// Apply the reduced forcing density and complete the substep. Ghost
    /// cells of `velocity` hold neighbor values as of the last exchange.
    fn step_finalize(
        &mut self,
        grid: &GlobalGrid,
        sub: &Subdomain,
        dt: f64,
        forcing: &FieldSlice,
        velocity: &mut FieldSlice,
    ) -> KernelResult<()>;
}

/// Parameters of the reference viscous flow kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViscousFlowParams {
    /// Kinematic viscosity
    pub viscosity: f64,
    /// Uniform fluid density
    pub density: f64,
    /// Uniform body acceleration (e.g. a driving pressure gradient)
    pub body_acceleration: Vec3,
    /// Velocity imposed in ghost cells beyond non-periodic faces
    pub boundary_velocity: Vec3,
}

/// Explicit viscous update `u += dt (nu lap(u) + f / rho + g)` on a uniform
/// grid, with Dirichlet ghost values at non-periodic faces.
///
/// The body acceleration is applied in `step_partial`, diffusion and the
/// immersed-boundary forcing in `step_finalize`.
pub struct ViscousFlowKernel {
    params: ViscousFlowParams,
    scratch: Vec<Vec3>,
}

impl ViscousFlowKernel {
    /// Kernel with the given parameters.
    pub fn new(params: ViscousFlowParams) -> Self {
        Self {
            params,
            scratch: Vec::new(),
        }
    }

    /// Parameters in use.
    pub fn params(&self) -> &ViscousFlowParams {
        &self.params
    }

    /// Explicit diffusion number `nu dt / h^2`; must stay at or below 1/6.
    pub fn diffusion_number(&self, dt: f64, spacing: f64) -> f64 {
        self.params.viscosity * dt / (spacing * spacing)
    }

    fn fill_external_ghosts(&self, sub: &Subdomain, velocity: &mut FieldSlice) {
        let padded = sub.padded();
        let value = self.params.boundary_velocity;
        for axis in Axis::ALL {
            for side in Side::BOTH {
                if sub.neighbor(axis, side).is_none() {
                    let slab = sub.ghost_slab(axis, side, padded);
                    velocity.fill_region(&slab, &value);
                }
            }
        }
    }
}

impl FlowKernel for ViscousFlowKernel {
    fn name(&self) -> &'static str {
        "viscous"
    }

    fn stencil_width(&self) -> usize {
        1
    }

    fn step_partial(
        &mut self,
        _grid: &GlobalGrid,
        sub: &Subdomain,
        dt: f64,
        velocity: &mut FieldSlice,
    ) -> KernelResult<()> {
        velocity.require_components(3)?;
        let g = self.params.body_acceleration;
        if g == [0.0; 3] {
            return Ok(());
        }
        let dv = [g[0] * dt, g[1] * dt, g[2] * dt];
        sub.interior().for_each(|cell| velocity.add_vector(cell, dv));
        Ok(())
    }

    fn step_finalize(
        &mut self,
        grid: &GlobalGrid,
        sub: &Subdomain,
        dt: f64,
        forcing: &FieldSlice,
        velocity: &mut FieldSlice,
    ) -> KernelResult<()> {
        velocity.require_components(3)?;
        forcing.require_components(3)?;
        self.fill_external_ghosts(sub, velocity);

        let interior = sub.interior();
        let nu_dt = self.params.viscosity * dt / (grid.spacing * grid.spacing);
        let force_dt = dt / self.params.density;

        self.scratch.clear();
        self.scratch.reserve(interior.len());
        interior.for_each(|[i, j, k]| {
            let u = velocity.vector_at([i, j, k]);
            let neighbors = [
                velocity.vector_at([i - 1, j, k]),
                velocity.vector_at([i + 1, j, k]),
                velocity.vector_at([i, j - 1, k]),
                velocity.vector_at([i, j + 1, k]),
                velocity.vector_at([i, j, k - 1]),
                velocity.vector_at([i, j, k + 1]),
            ];
            let f = forcing.vector_at([i, j, k]);
            let mut next = u;
            for c in 0..3 {
                let lap: f64 = neighbors.iter().map(|n| n[c]).sum::<f64>() - 6.0 * u[c];
                next[c] = u[c] + nu_dt * lap + force_dt * f[c];
            }
            self.scratch.push(next);
        });

        let mut n = 0;
        interior.for_each(|cell| {
            velocity.set_vector(cell, self.scratch[n]);
            n += 1;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_rank(periodic: bool) -> (GlobalGrid, Subdomain) {
        let grid = GlobalGrid {
            dims: [4, 4, 4],
            spacing: 0.25,
            origin: [0.0; 3],
            periodic: [periodic; 3],
        };
        let nb = if periodic { Some(0) } else { None };
        let sub = Subdomain {
            rank: 0,
            coords: [0; 3],
            offset: [0; 3],
            dims: [4, 4, 4],
            halo: 2,
            neighbors: [[nb; 2]; 3],
        };
        (grid, sub)
    }

    fn params() -> ViscousFlowParams {
        ViscousFlowParams {
            viscosity: 0.01,
            density: 2.0,
            body_acceleration: [0.0; 3],
            boundary_velocity: [0.0; 3],
        }
    }

    #[test]
    fn test_uniform_flow_unchanged_without_forcing() {
        let (grid, sub) = single_rank(true);
        let mut kernel = ViscousFlowKernel::new(params());
        let mut u = FieldSlice::new("u", 3, sub.dims, sub.halo);
        u.fill(&[1.0, 0.5, 0.0]);
        let f = FieldSlice::new("f", 3, sub.dims, sub.halo);

        kernel.step_partial(&grid, &sub, 0.01, &mut u).unwrap();
        kernel.step_finalize(&grid, &sub, 0.01, &f, &mut u).unwrap();
        let v = u.vector_at([2, 1, 3]);
        assert!((v[0] - 1.0).abs() < 1e-14);
        assert!((v[1] - 0.5).abs() < 1e-14);
    }

    #[test]
    fn test_forcing_changes_momentum_by_impulse() {
        let (grid, sub) = single_rank(true);
        let mut kernel = ViscousFlowKernel::new(params());
        let mut u = FieldSlice::new("u", 3, sub.dims, sub.halo);
        let mut f = FieldSlice::new("f", 3, sub.dims, sub.halo);
        f.set_vector([1, 1, 1], [4.0, 0.0, 0.0]);
        let dt = 0.01;

        kernel.step_finalize(&grid, &sub, dt, &f, &mut u).unwrap();
        let momentum = u.interior_sum()[0] * params().density * grid.cell_volume();
        let impulse = 4.0 * grid.cell_volume() * dt;
        assert!((momentum - impulse).abs() < 1e-15);
    }

    #[test]
    fn test_dirichlet_ghosts_drag_wall_cells() {
        let (grid, sub) = single_rank(false);
        let mut p = params();
        p.boundary_velocity = [0.0; 3];
        let mut kernel = ViscousFlowKernel::new(p);
        let mut u = FieldSlice::new("u", 3, sub.dims, sub.halo);
        u.fill(&[1.0, 0.0, 0.0]);
        let f = FieldSlice::new("f", 3, sub.dims, sub.halo);

        kernel.step_finalize(&grid, &sub, 0.1, &f, &mut u).unwrap();
        let corner = u.vector_at([0, 0, 0])[0];
        let center = u.vector_at([1, 1, 1])[0];
        assert!(corner < 1.0);
        assert!((center - 1.0).abs() < 1e-14);
        assert!(kernel.diffusion_number(0.1, grid.spacing) < 1.0 / 6.0);
    }
}
