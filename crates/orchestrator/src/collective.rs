//! Collective operations built on point-to-point messages
//!
//! Every collective is rooted at rank 0. Contributions are combined in rank
//! order, so results are bitwise identical on every rank and independent of
//! message arrival order.

use kernel::FieldSlice;

use crate::comm::{Payload, Tag, Transport};
use crate::domain::DomainDecomposer;
use crate::error::{CouplingError, CouplingResult};

/// Root rank of every collective.
pub const ROOT: usize = 0;

/// Combination rule for one reduction entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Sum over ranks
    Sum,
    /// Maximum over ranks; NaN wins
    Max,
}

impl ReduceOp {
    fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Max => {
                if a.is_nan() || b.is_nan() {
                    f64::NAN
                } else {
                    a.max(b)
                }
            }
        }
    }
}

/// Reduce `entries` across all ranks and return the result everywhere.
pub fn all_reduce(
    transport: &mut dyn Transport,
    step: u64,
    entries: &[(ReduceOp, f64)],
) -> CouplingResult<Vec<f64>> {
    let local: Vec<f64> = entries.iter().map(|(_, v)| *v).collect();
    let size = transport.size();

    if transport.rank() == ROOT {
        let mut acc = local;
        for source in 1..size {
            let values = transport
                .recv(source, Tag::Reduce, step, "all-reduce")?
                .into_values("all-reduce", source)?;
            if values.len() != acc.len() {
                return Err(CouplingError::comm("all-reduce: length mismatch", vec![source]));
            }
            for ((a, v), (op, _)) in acc.iter_mut().zip(values).zip(entries) {
                *a = op.combine(*a, v);
            }
        }
        for dest in 1..size {
            transport.send(dest, Tag::Broadcast, step, Payload::Values(acc.clone()))?;
        }
        Ok(acc)
    } else {
        transport.send(ROOT, Tag::Reduce, step, Payload::Values(local))?;
        transport
            .recv(ROOT, Tag::Broadcast, step, "all-reduce")?
            .into_values("all-reduce", ROOT)
    }
}

/// Collect one payload per rank at the root, in rank order. Other ranks get `None`.
pub fn gather(
    transport: &mut dyn Transport,
    step: u64,
    payload: Payload,
) -> CouplingResult<Option<Vec<Payload>>> {
    if transport.rank() == ROOT {
        let mut parts = Vec::with_capacity(transport.size());
        parts.push(payload);
        for source in 1..transport.size() {
            parts.push(transport.recv(source, Tag::Gather, step, "gather")?);
        }
        Ok(Some(parts))
    } else {
        transport.send(ROOT, Tag::Gather, step, payload)?;
        Ok(None)
    }
}

/// Assemble the global interior of a distributed field at the root
/// (i-major, k-fastest, components adjacent).
pub fn gather_field(
    transport: &mut dyn Transport,
    step: u64,
    decomposition: &DomainDecomposer,
    field: &FieldSlice,
) -> CouplingResult<Option<Vec<f64>>> {
    let Some(parts) = gather(transport, step, Payload::Values(field.interior_values()))? else {
        return Ok(None);
    };
    let grid = decomposition.grid();
    let comps = field.components();
    let mut global = vec![0.0; grid.cell_count() * comps];
    for (rank, part) in parts.into_iter().enumerate() {
        let values = part.into_values("gather field", rank)?;
        let sub = decomposition.subdomain(rank);
        let mut cursor = 0;
        sub.global_interior().for_each(|idx| {
            let flat = grid.flat_index([idx[0] as usize, idx[1] as usize, idx[2] as usize]);
            global[flat * comps..(flat + 1) * comps].copy_from_slice(&values[cursor..cursor + comps]);
            cursor += comps;
        });
    }
    Ok(Some(global))
}

/// Distribute a global field from the root into every rank's interior.
/// `global` is only read on the root.
pub fn scatter_field(
    transport: &mut dyn Transport,
    step: u64,
    decomposition: &DomainDecomposer,
    global: Option<&[f64]>,
    field: &mut FieldSlice,
) -> CouplingResult<()> {
    let comps = field.components();
    let grid = decomposition.grid();
    let interior = field.interior();

    if transport.rank() == ROOT {
        let global = global.ok_or_else(|| CouplingError::comm("scatter: root has no data", vec![ROOT]))?;
        let expected = grid.cell_count() * comps;
        if global.len() != expected {
            return Err(kernel::KernelError::BufferSize {
                field: field.name().to_string(),
                expected,
                actual: global.len(),
            }
            .into());
        }
        for rank in (0..transport.size()).rev() {
            let sub = decomposition.subdomain(rank);
            let mut block = Vec::with_capacity(sub.global_interior().len() * comps);
            sub.global_interior().for_each(|idx| {
                let flat = grid.flat_index([idx[0] as usize, idx[1] as usize, idx[2] as usize]);
                block.extend_from_slice(&global[flat * comps..(flat + 1) * comps]);
            });
            if rank == ROOT {
                field.unpack(&interior, &block, kernel::UnpackMode::Overwrite)?;
            } else {
                transport.send(rank, Tag::Scatter, step, Payload::Values(block))?;
            }
        }
        Ok(())
    } else {
        let block = transport
            .recv(ROOT, Tag::Scatter, step, "scatter")?
            .into_values("scatter", ROOT)?;
        field.unpack(&interior, &block, kernel::UnpackMode::Overwrite)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::channel_world;
    use kernel::GlobalGrid;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_all_reduce_sum_and_max() {
        let world = channel_world(4, Duration::from_secs(5));
        let handles: Vec<_> = world
            .into_iter()
            .map(|mut t| {
                thread::spawn(move || {
                    let r = t.rank() as f64;
                    all_reduce(&mut t, 0, &[(ReduceOp::Sum, r), (ReduceOp::Max, -r)]).unwrap()
                })
            })
            .collect();
        for h in handles {
            let v = h.join().unwrap();
            assert_eq!(v, vec![6.0, 0.0]);
        }
    }

    #[test]
    fn test_max_propagates_nan() {
        assert!(ReduceOp::Max.combine(1.0, f64::NAN).is_nan());
        assert!(ReduceOp::Max.combine(f64::NAN, 1.0).is_nan());
    }

    #[test]
    fn test_scatter_then_gather_restores_field() {
        let grid = GlobalGrid {
            dims: [4, 4, 2],
            spacing: 1.0,
            origin: [0.0; 3],
            periodic: [false; 3],
        };
        let decomposition = DomainDecomposer::new(&grid, 4, Some([2, 2, 1]), 1, 1).unwrap();
        let global: Vec<f64> = (0..grid.cell_count() * 2).map(|v| v as f64).collect();

        let world = channel_world(4, Duration::from_secs(5));
        let handles: Vec<_> = world
            .into_iter()
            .map(|mut t| {
                let d = decomposition.clone();
                let g = global.clone();
                thread::spawn(move || {
                    let sub = d.subdomain(t.rank()).clone();
                    let mut f = FieldSlice::new("q", 2, sub.dims, sub.halo);
                    let input = if t.rank() == ROOT { Some(g.as_slice()) } else { None };
                    scatter_field(&mut t, 0, &d, input, &mut f).unwrap();
                    gather_field(&mut t, 1, &d, &f).unwrap()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0].as_ref().unwrap(), &global);
        assert!(results[1..].iter().all(|r| r.is_none()));
    }
}
