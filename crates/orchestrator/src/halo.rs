//! Ghost-layer synchronization between neighboring subdomains
//!
//! Exchanges are staged by axis. While axis `a` is exchanged, axes before
//! it carry their (already filled) ghost rows and axes after it only the
//! interior rows, so edge and corner ghosts arrive via two or three hops
//! without any diagonal messages. Within a stage both faces are sent before
//! either is received.
//!
//! Each `(axis, side)` direction owns one spare buffer. A send moves the
//! spare into the message and the buffer received from that neighbor
//! becomes the next spare, so a steady-state run allocates nothing.

use std::mem;

use kernel::{Axis, FieldSlice, Side, Subdomain, UnpackMode};

use crate::comm::{Payload, Tag, Transport};
use crate::error::CouplingResult;

/// Staged halo exchange for one rank.
#[derive(Debug, Default)]
pub struct HaloExchanger {
    spare: [[Vec<f64>; 2]; 3],
    values_sent: u64,
}

impl HaloExchanger {
    /// Exchanger with empty buffers; they grow to slab size on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of values shipped to neighbors so far.
    pub fn values_sent(&self) -> u64 {
        self.values_sent
    }

    #[allow(clippy::too_many_arguments)]
    fn post(
        &mut self,
        transport: &dyn Transport,
        dest: usize,
        tag: Tag,
        step: u64,
        axis: Axis,
        side: Side,
        field: &FieldSlice,
        region: &kernel::IndexBox,
    ) -> CouplingResult<()> {
        let mut buf = mem::take(&mut self.spare[axis.index()][side.index()]);
        field.pack(region, &mut buf);
        self.values_sent += buf.len() as u64;
        transport.send(dest, tag, step, Payload::Values(buf))
    }

    /// Overwrite every ghost cell of `field` with the owning neighbor's
    /// current interior value. Ghosts beyond non-periodic faces are left
    /// untouched.
    pub fn exchange(
        &mut self,
        transport: &mut dyn Transport,
        step: u64,
        sub: &Subdomain,
        field: &mut FieldSlice,
    ) -> CouplingResult<()> {
        for axis in Axis::ALL {
            let span = sub.stage_span(axis);
            for side in Side::BOTH {
                if let Some(dest) = sub.neighbor(axis, side) {
                    let region = sub.boundary_slab(axis, side, span);
                    let tag = Tag::Halo { axis, toward: side };
                    self.post(&*transport, dest, tag, step, axis, side, field, &region)?;
                }
            }
            for side in Side::BOTH {
                if let Some(source) = sub.neighbor(axis, side) {
                    let tag = Tag::Halo {
                        axis,
                        toward: side.opposite(),
                    };
                    let values = transport
                        .recv(source, tag, step, "halo exchange")?
                        .into_values("halo exchange", source)?;
                    field.unpack(&sub.ghost_slab(axis, side, span), &values, UnpackMode::Overwrite)?;
                    self.spare[axis.index()][side.index()] = values;
                }
            }
        }
        Ok(())
    }

    /// Fold every ghost cell of `field` into the interior cell of the rank
    /// that owns it, then zero all ghosts. The global interior sum grows by
    /// exactly the sum of the ghost values (minus those beyond non-periodic
    /// faces, which are dropped).
    pub fn exchange_reduce(
        &mut self,
        transport: &mut dyn Transport,
        step: u64,
        sub: &Subdomain,
        field: &mut FieldSlice,
    ) -> CouplingResult<()> {
        for axis in Axis::ALL.into_iter().rev() {
            let span = sub.stage_span(axis);
            for side in Side::BOTH {
                let ghost = sub.ghost_slab(axis, side, span);
                if let Some(dest) = sub.neighbor(axis, side) {
                    let tag = Tag::HaloReduce { axis, toward: side };
                    self.post(&*transport, dest, tag, step, axis, side, field, &ghost)?;
                }
                field.zero_region(&ghost);
            }
            for side in Side::BOTH {
                if let Some(source) = sub.neighbor(axis, side) {
                    let tag = Tag::HaloReduce {
                        axis,
                        toward: side.opposite(),
                    };
                    let values = transport
                        .recv(source, tag, step, "halo reduce")?
                        .into_values("halo reduce", source)?;
                    field.unpack(&sub.boundary_slab(axis, side, span), &values, UnpackMode::Accumulate)?;
                    self.spare[axis.index()][side.index()] = values;
                }
            }
        }
        Ok(())
    }
}
