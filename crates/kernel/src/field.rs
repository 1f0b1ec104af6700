//! Per-rank Eulerian field storage with halo overlay.
//!
//! A [`FieldSlice`] stores `components` values per cell for the local interior
//! plus `halo` ghost layers on every side. Layout is cell-major with the
//! components of a cell adjacent, cells ordered i-major and k-fastest over the
//! padded box.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::grid::IndexBox;
use crate::vec3::Vec3;

/// How [`FieldSlice::unpack`] combines incoming values with stored ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackMode {
    /// Replace stored values
    Overwrite,
    /// Add to stored values
    Accumulate,
}

/// Local slice of a global field, interior plus ghost layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSlice {
    name: String,
    components: usize,
    dims: [usize; 3],
    halo: usize,
    data: Vec<f64>,
}

impl FieldSlice {
    /// Zero-initialized field for an interior of `dims` cells.
    pub fn new(name: impl Into<String>, components: usize, dims: [usize; 3], halo: usize) -> Self {
        let padded: usize = dims.iter().map(|n| n + 2 * halo).product();
        Self {
            name: name.into(),
            components,
            dims,
            halo,
            data: vec![0.0; padded * components],
        }
    }

    /// Field name, used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Values per cell.
    pub fn components(&self) -> usize {
        self.components
    }

    /// Interior cells along each axis.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Ghost layers per side.
    pub fn halo(&self) -> usize {
        self.halo
    }

    /// Local interior box.
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

    #[inline]
    fn offset(&self, cell: [i64; 3]) -> usize {
        let h = self.halo as i64;
        let py = (self.dims[1] + 2 * self.halo) as i64;
        let pz = (self.dims[2] + 2 * self.halo) as i64;
        let i = cell[0] + h;
        let j = cell[1] + h;
        let k = cell[2] + h;
        debug_assert!(self.padded().contains(cell), "cell {:?} outside padded box", cell);
        (((i * py + j) * pz + k) as usize) * self.components
    }

    /// Value of component `c` at local cell `cell`.
    #[inline]
    pub fn get(&self, cell: [i64; 3], c: usize) -> f64 {
        self.data[self.offset(cell) + c]
    }

    /// Set component `c` at local cell `cell`.
    #[inline]
    pub fn set(&mut self, cell: [i64; 3], c: usize, value: f64) {
        let o = self.offset(cell);
        self.data[o + c] = value;
    }

    /// Add to component `c` at local cell `cell`.
    #[inline]
    pub fn add(&mut self, cell: [i64; 3], c: usize, value: f64) {
        let o = self.offset(cell);
        self.data[o + c] += value;
    }

    /// First three components at `cell` as a vector.
    #[inline]
    pub fn vector_at(&self, cell: [i64; 3]) -> Vec3 {
        let o = self.offset(cell);
        [self.data[o], self.data[o + 1], self.data[o + 2]]
    }

    /// Set the first three components at `cell`.
    #[inline]
    pub fn set_vector(&mut self, cell: [i64; 3], value: Vec3) {
        let o = self.offset(cell);
        self.data[o..o + 3].copy_from_slice(&value);
    }

    /// Add `value` to the first three components at `cell`.
    #[inline]
    pub fn add_vector(&mut self, cell: [i64; 3], value: Vec3) {
        let o = self.offset(cell);
        self.data[o] += value[0];
        self.data[o + 1] += value[1];
        self.data[o + 2] += value[2];
    }

    /// Fail unless the field carries exactly `expected` components.
    pub fn require_components(&self, expected: usize) -> KernelResult<()> {
        if self.components != expected {
            return Err(KernelError::ComponentMismatch {
                field: self.name.clone(),
                expected,
                actual: self.components,
            });
        }
        Ok(())
    }

    /// Set every value (interior and halo) to zero.
    pub fn zero(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Set every cell, interior and halo, to `value` (one entry per component).
    pub fn fill(&mut self, value: &[f64]) {
        for chunk in self.data.chunks_mut(self.components) {
            chunk.copy_from_slice(&value[..chunk.len()]);
        }
    }

    /// Set every value in `region` to `value` (one entry per component).
    pub fn fill_region(&mut self, region: &IndexBox, value: &[f64]) {
        let comps = self.components;
        region.for_each(|cell| {
            let o = self.offset(cell);
            self.data[o..o + comps].copy_from_slice(&value[..comps]);
        });
    }

    /// Zero every value in `region`.
    pub fn zero_region(&mut self, region: &IndexBox) {
        let comps = self.components;
        region.for_each(|cell| {
            let o = self.offset(cell);
            self.data[o..o + comps].iter_mut().for_each(|v| *v = 0.0);
        });
    }

    /// Zero all ghost cells, leaving the interior untouched.
    pub fn zero_halo(&mut self) {
        let interior = self.interior();
        let comps = self.components;
        let padded = self.padded();
        padded.for_each(|cell| {
            if !interior.contains(cell) {
                let o = self.offset(cell);
                self.data[o..o + comps].iter_mut().for_each(|v| *v = 0.0);
            }
        });
    }

    /// Per-component sum over interior cells.
    pub fn interior_sum(&self) -> Vec<f64> {
        let mut sum = vec![0.0; self.components];
        let comps = self.components;
        self.interior().for_each(|cell| {
            let o = self.offset(cell);
            for c in 0..comps {
                sum[c] += self.data[o + c];
            }
        });
        sum
    }

    /// Largest Euclidean norm of a cell's components over the interior.
    /// Returns NaN if any interior value is not finite.
    pub fn interior_max_norm(&self) -> f64 {
        let mut max = 0.0_f64;
        let mut finite = true;
        let comps = self.components;
        self.interior().for_each(|cell| {
            let o = self.offset(cell);
            let sq: f64 = self.data[o..o + comps].iter().map(|v| v * v).sum();
            if !sq.is_finite() {
                finite = false;
            }
            max = max.max(sq);
        });
        if finite {
            max.sqrt()
        } else {
            f64::NAN
        }
    }

    /// Interior values in global-array order (i-major, k-fastest).
    pub fn interior_values(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.interior().len() * self.components);
        self.pack(&self.interior(), &mut out);
        out
    }

    /// Append the values of `region` to `out` after clearing it.
    pub fn pack(&self, region: &IndexBox, out: &mut Vec<f64>) {
        out.clear();
        out.reserve(region.len() * self.components);
        let comps = self.components;
        region.for_each(|cell| {
            let o = self.offset(cell);
            out.extend_from_slice(&self.data[o..o + comps]);
        });
    }

    /// Write `values` (as produced by [`FieldSlice::pack`] on a same-shaped
    /// region) into `region`.
    pub fn unpack(&mut self, region: &IndexBox, values: &[f64], mode: UnpackMode) -> KernelResult<()> {
        let expected = region.len() * self.components;
        if values.len() != expected {
            return Err(KernelError::BufferSize {
                field: self.name.clone(),
                expected,
                actual: values.len(),
            });
        }
        let comps = self.components;
        let mut cursor = 0;
        region.for_each(|cell| {
            let o = self.offset(cell);
            let src = &values[cursor..cursor + comps];
            match mode {
                UnpackMode::Overwrite => self.data[o..o + comps].copy_from_slice(src),
                UnpackMode::Accumulate => {
                    for c in 0..comps {
                        self.data[o + c] += src[c];
                    }
                }
            }
            cursor += comps;
        });
        Ok(())
    }
}
