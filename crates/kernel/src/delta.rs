//! Regularized delta kernels for immersed-boundary transfer.
//!
//! The 3D kernel is a tensor product of 1D weights evaluated at the distance
//! (in cells) between a marker and each cell center. Every 1D stencil is
//! renormalized to unit sum, so the discrete weights are an exact partition of
//! unity wherever the marker sits.

use serde::{Deserialize, Serialize};

/// Maximum number of cells a 1D stencil can touch.
pub const MAX_STENCIL: usize = 4;

/// Regularized delta function used for interpolation and spreading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKernel {
    /// Hat function, support radius 1
    Linear,
    /// Roma et al. 3-point kernel, support radius 1.5
    Roma3,
    /// Peskin 4-point kernel, support radius 2
    #[default]
    Peskin4,
    /// Cosine 4-point kernel, support radius 2
    Cosine4,
}

impl DeltaKernel {
    /// Support radius in cells; weights vanish at and beyond it.
    pub fn support_radius(self) -> f64 {
        match self {
            DeltaKernel::Linear => 1.0,
            DeltaKernel::Roma3 => 1.5,
            DeltaKernel::Peskin4 | DeltaKernel::Cosine4 => 2.0,
        }
    }

    /// Smallest halo width (whole cells) that covers the support radius.
    pub fn required_halo(self) -> usize {
        self.support_radius().ceil() as usize
    }

    /// Unnormalized 1D weight at distance `r` cells.
    pub fn weight(self, r: f64) -> f64 {
        let r = r.abs();
        match self {
            DeltaKernel::Linear => {
                if r < 1.0 {
                    1.0 - r
                } else {
                    0.0
                }
            }
            DeltaKernel::Roma3 => {
                if r <= 0.5 {
                    (1.0 + (1.0 - 3.0 * r * r).sqrt()) / 3.0
                } else if r < 1.5 {
                    let s = 1.0 - r;
                    (5.0 - 3.0 * r - (1.0 - 3.0 * s * s).max(0.0).sqrt()) / 6.0
                } else {
                    0.0
                }
            }
            DeltaKernel::Peskin4 => {
                if r <= 1.0 {
                    (3.0 - 2.0 * r + (1.0 + 4.0 * r - 4.0 * r * r).sqrt()) / 8.0
                } else if r < 2.0 {
                    (5.0 - 2.0 * r - (-7.0 + 12.0 * r - 4.0 * r * r).max(0.0).sqrt()) / 8.0
                } else {
                    0.0
                }
            }
            DeltaKernel::Cosine4 => {
                if r < 2.0 {
                    0.25 * (1.0 + (std::f64::consts::FRAC_PI_2 * r).cos())
                } else {
                    0.0
                }
            }
        }
    }

    /// Normalized 1D stencil for a marker at cell-center coordinate `s`.
    pub fn stencil(self, s: f64) -> Stencil1D {
        let radius = self.support_radius();
        let start = (s - radius).floor() as i64 + 1;
        let end = (s + radius).ceil() as i64 - 1;
        let len = ((end - start + 1).max(0) as usize).min(MAX_STENCIL);

        let mut weights = [0.0; MAX_STENCIL];
        let mut total = 0.0;
        for (n, w) in weights.iter_mut().enumerate().take(len) {
            *w = self.weight((start + n as i64) as f64 - s);
            total += *w;
        }
        if total > 0.0 {
            for w in weights.iter_mut().take(len) {
                *w /= total;
            }
        }
        Stencil1D { start, len, weights }
    }
}

/// Cells and weights touched along one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stencil1D {
    /// First cell index
    pub start: i64,
    /// Number of cells
    pub len: usize,
    /// Weights for `start..start + len`; unused entries are zero
    pub weights: [f64; MAX_STENCIL],
}

impl Stencil1D {
    /// Last cell index touched (inclusive).
    pub fn last(&self) -> i64 {
        self.start + self.len as i64 - 1
    }

    /// Iterate `(cell, weight)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        (0..self.len).map(move |n| (self.start + n as i64, self.weights[n]))
    }
}
