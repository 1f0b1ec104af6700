//! Interpolation and spreading on one block of a decomposed grid
//!
//! Rank 1 of a two-block split of a periodic 8^3 grid. Every delta kernel is
//! exercised at markers spread over the block, including markers whose
//! footprint wraps across the periodic face into the ghost layers.

use kernel::{DeltaKernel, FieldSlice, Footprint, GlobalGrid, Interpolator, Spreader, Subdomain};

const KERNELS: [DeltaKernel; 4] = [
    DeltaKernel::Linear,
    DeltaKernel::Roma3,
    DeltaKernel::Peskin4,
    DeltaKernel::Cosine4,
];

fn block() -> (GlobalGrid, Subdomain) {
    let grid = GlobalGrid {
        dims: [8, 8, 8],
        spacing: 0.25,
        origin: [0.0; 3],
        periodic: [true; 3],
    };
    let sub = Subdomain {
        rank: 1,
        coords: [1, 0, 0],
        offset: [4, 0, 0],
        dims: [4, 8, 8],
        halo: 2,
        neighbors: [[Some(0), Some(0)], [Some(1), Some(1)], [Some(1), Some(1)]],
    };
    (grid, sub)
}

/// Marker positions owned by the block, on a staggered lattice that hits
/// cell centers, faces and points in between.
fn owned_positions(grid: &GlobalGrid, sub: &Subdomain) -> Vec<[f64; 3]> {
    let mut out = Vec::new();
    for i in 0..13 {
        for j in 0..5 {
            let p = [
                1.0 + 0.077 * i as f64,
                0.03 + 0.391 * j as f64,
                1.97 - 0.23 * j as f64,
            ];
            let cell = grid.cell_of(p).unwrap();
            if sub.owns_cell(cell) {
                out.push(p);
            }
        }
    }
    // wraps to x = 1.95, right at the block's high face
    out.push([-0.05, 1.0, 1.0]);
    out
}

#[test]
fn test_every_kernel_is_a_partition_of_unity() {
    let (grid, sub) = block();
    for kernel in KERNELS {
        assert!(kernel.required_halo() <= sub.halo);
        for p in owned_positions(&grid, &sub) {
            let footprint = Footprint::build(kernel, &grid, &sub, p).unwrap();
            let total = footprint.total_weight();
            assert!(
                (total - 1.0).abs() < 1e-12,
                "{:?} at {:?}: weights sum to {}",
                kernel,
                p,
                total
            );
        }
    }
}

#[test]
fn test_constant_field_interpolated_exactly() {
    let (grid, sub) = block();
    let value = [1.5, -2.0, 0.25];
    let mut u = FieldSlice::new("u", 3, sub.dims, sub.halo);
    u.fill(&value);

    for kernel in KERNELS {
        let interpolator = Interpolator::new(kernel);
        for p in owned_positions(&grid, &sub) {
            let v = interpolator.interpolate(&grid, &sub, &u, p).unwrap();
            for a in 0..3 {
                assert!((v[a] - value[a]).abs() < 1e-12, "{:?} at {:?}: {:?}", kernel, p, v);
            }
        }
    }
}

#[test]
fn test_spread_force_lands_in_interior_and_halo() {
    let (grid, sub) = block();
    for kernel in KERNELS {
        let spreader = Spreader::new(kernel);
        let mut f = FieldSlice::new("f", 3, sub.dims, sub.halo);
        let positions = owned_positions(&grid, &sub);
        let mut expected = [0.0; 3];
        for (n, p) in positions.iter().enumerate() {
            let force = [1.0, 0.1 * n as f64, -0.5];
            spreader.spread(&grid, &sub, &mut f, *p, force).unwrap();
            for a in 0..3 {
                expected[a] += force[a];
            }
        }

        let mut total = [0.0; 3];
        let mut halo_share = 0.0;
        let interior = sub.interior();
        sub.padded().for_each(|cell| {
            let v = f.vector_at(cell);
            for a in 0..3 {
                total[a] += v[a] * grid.cell_volume();
            }
            if !interior.contains(cell) {
                halo_share += v[0].abs() * grid.cell_volume();
            }
        });
        eprintln!("{:?}: {:.4} of the x force sits in ghost cells", kernel, halo_share);
        for a in 0..3 {
            assert!(
                (total[a] - expected[a]).abs() < 1e-10 * expected[a].abs().max(1.0),
                "{:?}: spread {:?}, expected {:?}",
                kernel,
                total,
                expected
            );
        }
        // the wrapped marker sits half a cell from the face
        assert!(halo_share > 0.0);
    }
}

#[test]
fn test_marker_owned_elsewhere_exceeds_halo() {
    let (grid, sub) = block();
    // owned by rank 0, two cells below this block
    let p = [0.4, 1.0, 1.0];
    assert!(!sub.owns_cell(grid.cell_of(p).unwrap()));
    assert!(Footprint::build(DeltaKernel::Peskin4, &grid, &sub, p).is_err());
}
