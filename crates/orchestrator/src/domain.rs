//! Domain decomposition: global grid to per-rank subdomains with halos
//!
//! The rank topology is a Cartesian `px x py x pz` block layout. Each extent
//! of the topology must divide the grid extent along the same axis, so every
//! rank receives exactly the same number of cells. Among admissible layouts
//! the one with the smallest total halo surface is chosen.

use kernel::{DeltaKernel, GlobalGrid, Subdomain, Vec3};

use crate::error::{CouplingError, CouplingResult};

/// Partition of the global grid across ranks, plus topology queries.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainDecomposer {
    grid: GlobalGrid,
    layout: [usize; 3],
    halo: usize,
    subdomains: Vec<Subdomain>,
}

impl DomainDecomposer {
    /// Decompose `grid` over `ranks` ranks.
    ///
    /// # Arguments
    /// * `grid` - Global grid
    /// * `ranks` - Number of ranks
    /// * `layout` - Explicit topology; chosen automatically when `None`
    /// * `halo` - Ghost layers per face
    /// * `required_halo` - Minimum halo demanded by the kernels
    ///
    /// # Errors
    /// [`CouplingError::Configuration`] naming `ranks`, `rank_layout` or
    /// `halo_width` if the grid cannot be tiled as requested.
    pub fn new(
        grid: &GlobalGrid,
        ranks: usize,
        layout: Option<[usize; 3]>,
        halo: usize,
        required_halo: usize,
    ) -> CouplingResult<Self> {
        if ranks == 0 {
            return Err(CouplingError::config("ranks", "must be at least 1"));
        }
        if halo < required_halo {
            return Err(CouplingError::config(
                "halo_width",
                format!("halo width {} is below the required {}", halo, required_halo),
            ));
        }

        let layout = match layout {
            Some(layout) => {
                check_layout(grid, ranks, layout, halo)?;
                layout
            }
            None => choose_layout(grid, ranks, halo)?,
        };

        let local = [
            grid.dims[0] / layout[0],
            grid.dims[1] / layout[1],
            grid.dims[2] / layout[2],
        ];

        let mut subdomains = Vec::with_capacity(ranks);
        for rank in 0..ranks {
            let coords = coords_of(layout, rank);
            let mut neighbors = [[None; 2]; 3];
            for axis in 0..3 {
                for (side, step) in [(0usize, -1i64), (1, 1)] {
                    neighbors[axis][side] =
                        shifted(layout, grid.periodic, coords, axis, step).map(|c| rank_of(layout, c));
                }
            }
            subdomains.push(Subdomain {
                rank,
                coords,
                offset: [
                    coords[0] * local[0],
                    coords[1] * local[1],
                    coords[2] * local[2],
                ],
                dims: local,
                halo,
                neighbors,
            });
        }

        tracing::debug!(
            "Decomposed {:?} grid over {} ranks: layout {:?}, local {:?}, halo {}",
            grid.dims,
            ranks,
            layout,
            local,
            halo
        );

        Ok(Self {
            grid: grid.clone(),
            layout,
            halo,
            subdomains,
        })
    }

    /// Global grid.
    pub fn grid(&self) -> &GlobalGrid {
        &self.grid
    }

    /// Rank topology `[px, py, pz]`.
    pub fn layout(&self) -> [usize; 3] {
        self.layout
    }

    /// Halo width.
    pub fn halo(&self) -> usize {
        self.halo
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.subdomains.len()
    }

    /// Subdomain of `rank`.
    pub fn subdomain(&self, rank: usize) -> &Subdomain {
        &self.subdomains[rank]
    }

    /// All subdomains in rank order.
    pub fn subdomains(&self) -> &[Subdomain] {
        &self.subdomains
    }

    /// Rank at topology coordinates `coords`.
    pub fn rank_at(&self, coords: [usize; 3]) -> usize {
        rank_of(self.layout, coords)
    }

    /// Rank whose interior contains `position` (after periodic wrap), or
    /// `None` outside a non-periodic face.
    pub fn owner_of(&self, position: Vec3) -> Option<usize> {
        let cell = self.grid.cell_of(position)?;
        let local = self.subdomains[0].dims;
        Some(rank_of(
            self.layout,
            [cell[0] / local[0], cell[1] / local[1], cell[2] / local[2]],
        ))
    }

    /// Ranks other than the owner whose interior plus halo overlaps the
    /// kernel footprint of a marker at `position`, in rank order.
    pub fn ghost_holders(&self, position: Vec3, kernel: DeltaKernel) -> Vec<usize> {
        let Some(owner) = self.owner_of(position) else {
            return Vec::new();
        };
        let g = self.grid.grid_coordinate(self.grid.wrap_position(position));
        let footprint: Vec<(i64, i64)> = (0..3)
            .map(|a| {
                let st = kernel.stencil(g[a]);
                (st.start, st.last())
            })
            .collect();

        let halo = self.halo as i64;
        self.subdomains
            .iter()
            .filter(|sub| sub.rank != owner)
            .filter(|sub| {
                (0..3).all(|a| {
                    let lo = sub.offset[a] as i64 - halo;
                    let hi = (sub.offset[a] + sub.dims[a]) as i64 + halo - 1;
                    let n = self.grid.dims[a] as i64;
                    let shifts: &[i64] = if self.grid.periodic[a] { &[-1, 0, 1] } else { &[0] };
                    shifts.iter().any(|s| {
                        let (f_lo, f_hi) = (footprint[a].0 + s * n, footprint[a].1 + s * n);
                        f_lo <= hi && f_hi >= lo
                    })
                })
            })
            .map(|sub| sub.rank)
            .collect()
    }

    /// Ranks a marker owned by `rank` may migrate to in one step: the
    /// 26-neighborhood in the rank topology, excluding `rank` itself.
    pub fn migration_partners(&self, rank: usize) -> Vec<usize> {
        let coords = coords_of(self.layout, rank);
        let mut partners = Vec::new();
        for dx in -1i64..=1 {
            for dy in -1i64..=1 {
                for dz in -1i64..=1 {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    let mut c = coords;
                    let mut valid = true;
                    for (axis, d) in [dx, dy, dz].into_iter().enumerate() {
                        if d == 0 {
                            continue;
                        }
                        match shifted(self.layout, self.grid.periodic, c, axis, d) {
                            Some(next) => c = next,
                            None => valid = false,
                        }
                    }
                    if valid {
                        let r = rank_of(self.layout, c);
                        if r != rank {
                            partners.push(r);
                        }
                    }
                }
            }
        }
        partners.sort_unstable();
        partners.dedup();
        partners
    }
}

/// Rank of topology coordinates; z varies fastest.
fn rank_of(layout: [usize; 3], c: [usize; 3]) -> usize {
    (c[0] * layout[1] + c[1]) * layout[2] + c[2]
}

fn coords_of(layout: [usize; 3], rank: usize) -> [usize; 3] {
    [
        rank / (layout[1] * layout[2]),
        (rank / layout[2]) % layout[1],
        rank % layout[2],
    ]
}

/// Coordinates one step along `axis`, wrapping on periodic axes.
fn shifted(
    layout: [usize; 3],
    periodic: [bool; 3],
    coords: [usize; 3],
    axis: usize,
    step: i64,
) -> Option<[usize; 3]> {
    let n = layout[axis] as i64;
    let next = coords[axis] as i64 + step;
    let wrapped = if (0..n).contains(&next) {
        next
    } else if periodic[axis] {
        next.rem_euclid(n)
    } else {
        return None;
    };
    let mut out = coords;
    out[axis] = wrapped as usize;
    Some(out)
}

fn check_layout(grid: &GlobalGrid, ranks: usize, layout: [usize; 3], halo: usize) -> CouplingResult<()> {
    if layout.iter().product::<usize>() != ranks {
        return Err(CouplingError::config(
            "rank_layout",
            format!("{:?} does not multiply to {} ranks", layout, ranks),
        ));
    }
    for axis in 0..3 {
        if layout[axis] == 0 || grid.dims[axis] % layout[axis] != 0 {
            return Err(CouplingError::config(
                "rank_layout",
                format!(
                    "{} ranks do not divide {} cells along axis {}",
                    layout[axis], grid.dims[axis], axis
                ),
            ));
        }
        if grid.dims[axis] / layout[axis] < halo {
            return Err(CouplingError::config(
                "halo_width",
                format!(
                    "local extent {} along axis {} is smaller than the halo {}",
                    grid.dims[axis] / layout[axis],
                    axis,
                    halo
                ),
            ));
        }
    }
    Ok(())
}

/// Admissible layout with the least halo surface; ties go to splitting the
/// leading axes first.
fn choose_layout(grid: &GlobalGrid, ranks: usize, halo: usize) -> CouplingResult<[usize; 3]> {
    let mut best: Option<([usize; 3], usize)> = None;
    let mut divisible = false;
    for px in divisors(ranks) {
        for py in divisors(ranks / px) {
            let pz = ranks / (px * py);
            let layout = [px, py, pz];
            if (0..3).any(|a| grid.dims[a] % layout[a] != 0) {
                continue;
            }
            divisible = true;
            let local = [
                grid.dims[0] / px,
                grid.dims[1] / py,
                grid.dims[2] / pz,
            ];
            if local.iter().any(|&n| n < halo) {
                continue;
            }
            let surface = ranks * 2 * (local[0] * local[1] + local[1] * local[2] + local[0] * local[2]);
            if best.map_or(true, |(_, s)| surface < s) {
                best = Some((layout, surface));
            }
        }
    }
    match best {
        Some((layout, _)) => Ok(layout),
        None if divisible => Err(CouplingError::config(
            "halo_width",
            format!(
                "every layout of {} ranks leaves a local extent smaller than the halo {}",
                ranks, halo
            ),
        )),
        None => Err(CouplingError::config(
            "ranks",
            format!("{} ranks cannot tile a {:?} grid evenly", ranks, grid.dims),
        )),
    }
}

fn divisors(n: usize) -> Vec<usize> {
    (1..=n).filter(|d| n % d == 0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(dims: [usize; 3], periodic: bool) -> GlobalGrid {
        GlobalGrid {
            dims,
            spacing: 0.1,
            origin: [0.0; 3],
            periodic: [periodic; 3],
        }
    }

    #[test]
    fn test_layout_minimizes_surface() {
        let d = DomainDecomposer::new(&grid([32, 8, 8], false), 4, None, 2, 2).unwrap();
        assert_eq!(d.layout(), [4, 1, 1]);
        let d = DomainDecomposer::new(&grid([16, 16, 16], false), 8, None, 2, 2).unwrap();
        assert_eq!(d.layout(), [2, 2, 2]);
    }

    #[test]
    fn test_rank_coordinates_roundtrip() {
        let layout = [2, 3, 4];
        for rank in 0..24 {
            assert_eq!(rank_of(layout, coords_of(layout, rank)), rank);
        }
    }

    #[test]
    fn test_neighbors_periodic_and_walls() {
        let d = DomainDecomposer::new(&grid([8, 8, 8], false), 2, Some([2, 1, 1]), 2, 2).unwrap();
        let s0 = d.subdomain(0);
        assert_eq!(s0.neighbors[0], [None, Some(1)]);
        assert_eq!(s0.neighbors[1], [None, None]);

        let p = DomainDecomposer::new(&grid([8, 8, 8], true), 2, Some([2, 1, 1]), 2, 2).unwrap();
        let s0 = p.subdomain(0);
        assert_eq!(s0.neighbors[0], [Some(1), Some(1)]);
        // single rank along a periodic axis is its own neighbor
        assert_eq!(s0.neighbors[2], [Some(0), Some(0)]);
    }

    #[test]
    fn test_owner_of_and_ghost_holders() {
        let d = DomainDecomposer::new(&grid([16, 8, 8], true), 2, Some([2, 1, 1]), 2, 2).unwrap();
        assert_eq!(d.owner_of([0.35, 0.4, 0.4]), Some(0));
        assert_eq!(d.owner_of([0.85, 0.4, 0.4]), Some(1));
        // wraps around the periodic x axis
        assert_eq!(d.owner_of([1.65, 0.4, 0.4]), Some(0));

        // deep inside rank 0: nobody else sees it
        assert!(d.ghost_holders([0.4, 0.4, 0.4], DeltaKernel::Peskin4).is_empty());
        // next to the internal face
        assert_eq!(d.ghost_holders([0.78, 0.4, 0.4], DeltaKernel::Peskin4), vec![1]);
        // next to the periodic seam
        assert_eq!(d.ghost_holders([0.02, 0.4, 0.4], DeltaKernel::Peskin4), vec![1]);
    }

    #[test]
    fn test_migration_partners() {
        let d = DomainDecomposer::new(&grid([12, 12, 12], false), 27, Some([3, 3, 3]), 2, 2).unwrap();
        let center = d.rank_at([1, 1, 1]);
        assert_eq!(d.migration_partners(center).len(), 26);
        assert_eq!(d.migration_partners(0).len(), 7);

        let single = DomainDecomposer::new(&grid([8, 8, 8], true), 1, None, 2, 2).unwrap();
        assert!(single.migration_partners(0).is_empty());
    }

    #[test]
    fn test_configuration_errors_name_parameter() {
        let param = |r: CouplingResult<DomainDecomposer>| match r {
            Err(CouplingError::Configuration { parameter, .. }) => parameter,
            other => panic!("expected configuration error, got {:?}", other.map(|d| d.layout())),
        };
        assert_eq!(param(DomainDecomposer::new(&grid([10, 10, 10], false), 3, None, 2, 2)), "ranks");
        assert_eq!(param(DomainDecomposer::new(&grid([8, 8, 8], false), 2, Some([1, 1, 1]), 2, 2)), "rank_layout");
        assert_eq!(param(DomainDecomposer::new(&grid([8, 8, 8], false), 8, Some([8, 1, 1]), 2, 2)), "halo_width");
        assert_eq!(param(DomainDecomposer::new(&grid([8, 8, 8], false), 2, None, 1, 2)), "halo_width");
    }
}
