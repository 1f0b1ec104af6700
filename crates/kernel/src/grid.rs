//! Global Eulerian grid, index boxes and per-rank subdomains.
//!
//! Cell `(i, j, k)` of the global grid spans
//! `[origin + i*h, origin + (i+1)*h)` along each axis and has its center at
//! `origin + (i + 0.5)*h`. Subdomains hold a contiguous block of global cells
//! plus a halo of ghost cells on every side; local indices run from `-halo`
//! to `dims + halo`.

use serde::{Deserialize, Serialize};

use crate::vec3::Vec3;

/// Coordinate axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    /// x
    X,
    /// y
    Y,
    /// z
    Z,
}

impl Axis {
    /// All axes in exchange order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Array index of this axis.
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Low or high face along an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    /// Face at the low end of the axis
    Low,
    /// Face at the high end of the axis
    High,
}

impl Side {
    /// Both sides, low first.
    pub const BOTH: [Side; 2] = [Side::Low, Side::High];

    /// Array index of this side.
    pub fn index(self) -> usize {
        match self {
            Side::Low => 0,
            Side::High => 1,
        }
    }

    /// The facing side.
    pub fn opposite(self) -> Side {
        match self {
            Side::Low => Side::High,
            Side::High => Side::Low,
        }
    }
}

fn default_origin() -> Vec3 {
    [0.0; 3]
}

/// Uniform Cartesian grid covering the whole fluid domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalGrid {
    /// Number of cells along each axis
    pub dims: [usize; 3],
    /// Cell edge length
    pub spacing: f64,
    /// Lower corner of the domain
    #[serde(default = "default_origin")]
    pub origin: Vec3,
    /// Whether each axis wraps around
    #[serde(default)]
    pub periodic: [bool; 3],
}

impl GlobalGrid {
    /// Total number of cells.
    pub fn cell_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Volume of one cell, `h^3`.
    pub fn cell_volume(&self) -> f64 {
        self.spacing.powi(3)
    }

    /// Physical extent of the domain along each axis.
    pub fn extent(&self) -> Vec3 {
        [
            self.dims[0] as f64 * self.spacing,
            self.dims[1] as f64 * self.spacing,
            self.dims[2] as f64 * self.spacing,
        ]
    }

    /// Center of global cell `idx`.
    pub fn cell_center(&self, idx: [i64; 3]) -> Vec3 {
        [
            self.origin[0] + (idx[0] as f64 + 0.5) * self.spacing,
            self.origin[1] + (idx[1] as f64 + 0.5) * self.spacing,
            self.origin[2] + (idx[2] as f64 + 0.5) * self.spacing,
        ]
    }

    /// Map a position into the primary periodic image `[origin, origin + L)`
    /// along periodic axes. Non-periodic components are returned unchanged.
    pub fn wrap_position(&self, position: Vec3) -> Vec3 {
        let extent = self.extent();
        let mut out = position;
        for axis in 0..3 {
            if self.periodic[axis] {
                let rel = (position[axis] - self.origin[axis]).rem_euclid(extent[axis]);
                // rem_euclid can round up to exactly the extent
                out[axis] = self.origin[axis] + if rel >= extent[axis] { 0.0 } else { rel };
            }
        }
        out
    }

    /// Position in cell-center units: cell `c` has its center at `c`.
    pub fn grid_coordinate(&self, position: Vec3) -> Vec3 {
        [
            (position[0] - self.origin[0]) / self.spacing - 0.5,
            (position[1] - self.origin[1]) / self.spacing - 0.5,
            (position[2] - self.origin[2]) / self.spacing - 0.5,
        ]
    }

    /// Global index of the cell containing `position` (after periodic wrap),
    /// or `None` outside a non-periodic face.
    pub fn cell_of(&self, position: Vec3) -> Option<[usize; 3]> {
        let wrapped = self.wrap_position(position);
        let mut idx = [0usize; 3];
        for axis in 0..3 {
            let c = ((wrapped[axis] - self.origin[axis]) / self.spacing).floor();
            if !c.is_finite() || c < 0.0 || c >= self.dims[axis] as f64 {
                return None;
            }
            idx[axis] = c as usize;
        }
        Some(idx)
    }

    /// Flat index of a global interior cell (z fastest).
    pub fn flat_index(&self, idx: [usize; 3]) -> usize {
        (idx[0] * self.dims[1] + idx[1]) * self.dims[2] + idx[2]
    }
}

/// Half-open box of (local or global) cell indices, `lo <= idx < hi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBox {
    /// Inclusive lower corner
    pub lo: [i64; 3],
    /// Exclusive upper corner
    pub hi: [i64; 3],
}

impl IndexBox {
    /// Create a box from its corners.
    pub fn new(lo: [i64; 3], hi: [i64; 3]) -> Self {
        Self { lo, hi }
    }

    /// Number of cells along `axis`.
    pub fn extent(&self, axis: usize) -> usize {
        (self.hi[axis] - self.lo[axis]).max(0) as usize
    }

    /// Number of cells in the box.
    pub fn len(&self) -> usize {
        self.extent(0) * self.extent(1) * self.extent(2)
    }

    /// True if the box holds no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if `idx` lies inside the box.
    pub fn contains(&self, idx: [i64; 3]) -> bool {
        (0..3).all(|a| idx[a] >= self.lo[a] && idx[a] < self.hi[a])
    }

    /// Visit every cell in i-major, k-fastest order.
    pub fn for_each(&self, mut f: impl FnMut([i64; 3])) {
        for i in self.lo[0]..self.hi[0] {
            for j in self.lo[1]..self.hi[1] {
                for k in self.lo[2]..self.hi[2] {
                    f([i, j, k]);
                }
            }
        }
    }
}

/// One rank's block of the global grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subdomain {
    /// Owning rank
    pub rank: usize,
    /// Position of this block in the rank topology
    pub coords: [usize; 3],
    /// Global index of local cell `(0, 0, 0)`
    pub offset: [usize; 3],
    /// Interior cells along each axis
    pub dims: [usize; 3],
    /// Ghost layers on every side
    pub halo: usize,
    /// Neighbor rank per `[axis][side]`; `None` at a non-periodic domain face
    pub neighbors: [[Option<usize>; 2]; 3],
}

impl Subdomain {
    /// Neighbor across the given face.
    pub fn neighbor(&self, axis: Axis, side: Side) -> Option<usize> {
        self.neighbors[axis.index()][side.index()]
    }

    /// Local interior cells.
    pub fn interior(&self) -> IndexBox {
        IndexBox::new(
            [0, 0, 0],
            [self.dims[0] as i64, self.dims[1] as i64, self.dims[2] as i64],
        )
    }

    /// Local interior plus halo.
    pub fn padded(&self) -> IndexBox {
        let h = self.halo as i64;
        IndexBox::new(
            [-h, -h, -h],
            [
                self.dims[0] as i64 + h,
                self.dims[1] as i64 + h,
                self.dims[2] as i64 + h,
            ],
        )
    }

    /// Global box of interior cells.
    pub fn global_interior(&self) -> IndexBox {
        let lo = [
            self.offset[0] as i64,
            self.offset[1] as i64,
            self.offset[2] as i64,
        ];
        IndexBox::new(
            lo,
            [
                lo[0] + self.dims[0] as i64,
                lo[1] + self.dims[1] as i64,
                lo[2] + self.dims[2] as i64,
            ],
        )
    }

    /// Local index of global cell `idx`.
    pub fn to_local(&self, idx: [i64; 3]) -> [i64; 3] {
        [
            idx[0] - self.offset[0] as i64,
            idx[1] - self.offset[1] as i64,
            idx[2] - self.offset[2] as i64,
        ]
    }

    /// True if global cell `idx` is one of this rank's interior cells.
    pub fn owns_cell(&self, idx: [usize; 3]) -> bool {
        (0..3).all(|a| idx[a] >= self.offset[a] && idx[a] < self.offset[a] + self.dims[a])
    }

    /// The ghost slab beyond `side` of `axis`, restricted along the other axes
    /// to `span` (use [`Subdomain::stage_span`] for staged exchanges).
    pub fn ghost_slab(&self, axis: Axis, side: Side, span: IndexBox) -> IndexBox {
        let a = axis.index();
        let n = self.dims[a] as i64;
        let h = self.halo as i64;
        let mut slab = span;
        let (lo, hi) = match side {
            Side::Low => (-h, 0),
            Side::High => (n, n + h),
        };
        slab.lo[a] = lo;
        slab.hi[a] = hi;
        slab
    }

    /// The interior layers adjacent to `side` of `axis`, as thick as the halo.
    pub fn boundary_slab(&self, axis: Axis, side: Side, span: IndexBox) -> IndexBox {
        let a = axis.index();
        let n = self.dims[a] as i64;
        let h = self.halo as i64;
        let mut slab = span;
        let (lo, hi) = match side {
            Side::Low => (0, h),
            Side::High => (n - h, n),
        };
        slab.lo[a] = lo;
        slab.hi[a] = hi;
        slab
    }

    /// Span of the staged exchange along `axis`: axes handled before it use
    /// the padded range, later axes the interior range.
    pub fn stage_span(&self, axis: Axis) -> IndexBox {
        let interior = self.interior();
        let padded = self.padded();
        let mut span = interior;
        for a in 0..axis.index() {
            span.lo[a] = padded.lo[a];
            span.hi[a] = padded.hi[a];
        }
        span
    }
}
