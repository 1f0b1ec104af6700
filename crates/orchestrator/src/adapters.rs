//! Adapters between the stepper and the external numerical kernels

use kernel::vec3::Vec3;
use kernel::{
    Body, BodyKind, FieldSlice, FlowKernel, GlobalGrid, RigidBodyKernel, RodKernel,
    StructureKernel, Subdomain,
};

use crate::error::{CouplingError, CouplingResult};

/// Invokes the per-rank flow kernel around the coupling steps.
pub struct FlowKernelAdapter {
    kernel: Box<dyn FlowKernel>,
}

impl FlowKernelAdapter {
    /// Wrap `kernel`, checking that `halo` covers its stencil.
    pub fn new(kernel: Box<dyn FlowKernel>, halo: usize) -> CouplingResult<Self> {
        if kernel.stencil_width() > halo {
            return Err(CouplingError::config(
                "halo_width",
                format!(
                    "flow kernel '{}' reads {} ghost layers but the halo is {}",
                    kernel.name(),
                    kernel.stencil_width(),
                    halo
                ),
            ));
        }
        Ok(Self { kernel })
    }

    /// Kernel name.
    pub fn name(&self) -> &'static str {
        self.kernel.name()
    }

    /// Local part of the flow step, before any coupling.
    pub fn pre_step(
        &mut self,
        grid: &GlobalGrid,
        sub: &Subdomain,
        dt: f64,
        velocity: &mut FieldSlice,
    ) -> CouplingResult<()> {
        Ok(self.kernel.step_partial(grid, sub, dt, velocity)?)
    }

    /// Complete the flow step with the reduced forcing density.
    pub fn finalize(
        &mut self,
        grid: &GlobalGrid,
        sub: &Subdomain,
        dt: f64,
        forcing: &FieldSlice,
        velocity: &mut FieldSlice,
    ) -> CouplingResult<()> {
        Ok(self.kernel.step_finalize(grid, sub, dt, forcing, velocity)?)
    }
}

/// Dispatches body advances on the body kind.
pub struct StructureKernelAdapter {
    rigid: Box<dyn StructureKernel>,
    soft: Box<dyn StructureKernel>,
}

impl Default for StructureKernelAdapter {
    fn default() -> Self {
        Self::new(Box::new(RigidBodyKernel), Box::new(RodKernel))
    }
}

impl StructureKernelAdapter {
    /// Adapter using `rigid` for rigid bodies and `soft` for rods.
    pub fn new(rigid: Box<dyn StructureKernel>, soft: Box<dyn StructureKernel>) -> Self {
        Self { rigid, soft }
    }

    /// Advance `body` by `dt` under the forces its markers exerted on the fluid.
    pub fn advance(&mut self, body: &mut Body, marker_forces: &[Vec3], dt: f64) -> CouplingResult<()> {
        let loads = body.loads_from_marker_forces(marker_forces)?;
        let kernel = match body.kind() {
            BodyKind::Rigid => &mut self.rigid,
            BodyKind::Soft => &mut self.soft,
        };
        kernel.advance(body.id, &mut body.state, &loads, dt)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel::{BodyState, ForcingGrid, RigidBodyState, ViscousFlowKernel, ViscousFlowParams};

    #[test]
    fn test_flow_adapter_checks_halo() {
        let params = ViscousFlowParams {
            viscosity: 0.1,
            density: 1.0,
            body_acceleration: [0.0; 3],
            boundary_velocity: [0.0; 3],
        };
        assert!(FlowKernelAdapter::new(Box::new(ViscousFlowKernel::new(params.clone())), 1).is_ok());
        let err = FlowKernelAdapter::new(Box::new(ViscousFlowKernel::new(params)), 0);
        assert!(matches!(err, Err(CouplingError::Configuration { ref parameter, .. }) if parameter == "halo_width"));
    }

    #[test]
    fn test_structure_adapter_pushes_rigid_body_against_marker_force() {
        let state = BodyState::Rigid(RigidBodyState::at_rest([0.0; 3], 2.0, [1.0; 3]));
        let grid = ForcingGrid::surface(vec![[0.1, 0.0, 0.0], [-0.1, 0.0, 0.0]]);
        let mut body = Body::new(0, state, grid).unwrap();
        let mut adapter = StructureKernelAdapter::default();

        // markers push the fluid in +x, so the body is pushed in -x
        adapter
            .advance(&mut body, &[[1.0, 0.0, 0.0], [1.0, 0.0, 0.0]], 0.5)
            .unwrap();
        match &body.state {
            BodyState::Rigid(rb) => {
                assert!((rb.velocity[0] + 0.5).abs() < 1e-12, "v = {:?}", rb.velocity);
                assert!(rb.angular_velocity.iter().all(|w| w.abs() < 1e-12));
            }
            _ => unreachable!(),
        }
        assert!(adapter.advance(&mut body, &[[0.0; 3]], 0.5).is_err());
    }
}
