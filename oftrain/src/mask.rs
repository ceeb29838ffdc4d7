//! # Single channel per-pixel maps
//!
//! Used for occlusion maps, validity masks and per-pixel loss maps.

use anyhow::{ensure, Result};
use nalgebra::DMatrix;

/// Single channel `height x width` map.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    data: DMatrix<f32>,
}

impl Mask {
    /// Create a zero-filled map.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            data: DMatrix::repeat(height, width, 0f32),
        }
    }

    /// Create a map where every pixel is valid.
    pub fn ones(width: usize, height: usize) -> Self {
        Self {
            data: DMatrix::repeat(height, width, 1f32),
        }
    }

    /// Create a map by evaluating `f(x, y)` at every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        Self {
            data: DMatrix::from_fn(height, width, |y, x| f(x, y)),
        }
    }

    /// Create a map from row-major data.
    pub fn from_row_major(width: usize, height: usize, data: &[f32]) -> Result<Self> {
        ensure!(
            data.len() == width * height,
            "expected {} values for {}x{} map, got {}",
            width * height,
            width,
            height,
            data.len()
        );
        Ok(Self::from_fn(width, height, |x, y| data[y * width + x]))
    }

    /// Get width and height of the map.
    pub fn dim(&self) -> (usize, usize) {
        (self.data.ncols(), self.data.nrows())
    }

    /// Value at column `x`, row `y`.
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[(y, x)]
    }

    /// Set the value at column `x`, row `y`.
    pub fn set(&mut self, x: usize, y: usize, val: f32) {
        self.data[(y, x)] = val;
    }

    /// Underlying `height x width` matrix.
    pub fn as_matrix(&self) -> &DMatrix<f32> {
        &self.data
    }

    /// Sum of all values.
    pub fn sum(&self) -> f32 {
        self.data.sum()
    }

    /// Mean over all pixels. Empty maps have a mean of zero.
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            0.0
        } else {
            self.data.mean()
        }
    }

    /// Number of pixels that are not zero.
    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|v| **v != 0.0).count()
    }

    /// Binarise the map: 1 where `value >= threshold`, 0 elsewhere.
    pub fn threshold(&self, threshold: f32) -> Self {
        Self {
            data: self.data.map(|v| if v >= threshold { 1.0 } else { 0.0 }),
        }
    }

    /// Apply `f` to every pixel.
    pub fn map(&self, f: impl FnMut(f32) -> f32) -> Self {
        Self {
            data: self.data.map(f),
        }
    }

    /// Element-wise product with another map of the same size.
    pub fn component_mul(&self, other: &Mask) -> Result<Self> {
        ensure!(
            self.dim() == other.dim(),
            "map shape mismatch: {:?} vs {:?}",
            self.dim(),
            other.dim()
        );
        Ok(Self {
            data: self.data.component_mul(&other.data),
        })
    }

    /// Row-major copy of the map.
    pub fn to_row_major(&self) -> Vec<f32> {
        self.data.transpose().as_slice().to_vec()
    }

    /// Cut out a `width x height` window starting at `(x0, y0)`.
    pub fn crop(&self, x0: usize, y0: usize, width: usize, height: usize) -> Self {
        Self {
            data: self.data.slice((y0, x0), (height, width)).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_layout() {
        let mask = Mask::from_row_major(3, 2, &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(mask.dim(), (3, 2));
        assert_eq!(mask.get(2, 0), 2.0);
        assert_eq!(mask.get(0, 1), 3.0);
        assert_eq!(mask.to_row_major(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn threshold_and_count() {
        let mask = Mask::from_row_major(2, 2, &[0.2, 0.5, 0.7, 0.0]).unwrap();
        let bin = mask.threshold(0.5);
        assert_eq!(bin.count_nonzero(), 2);
        assert_eq!(bin.sum(), 2.0);
    }

    #[test]
    fn crop_window() {
        let mask = Mask::from_fn(5, 4, |x, y| (y * 10 + x) as f32);
        let c = mask.crop(1, 2, 3, 2);
        assert_eq!(c.dim(), (3, 2));
        assert_eq!(c.get(0, 0), 21.0);
        assert_eq!(c.get(2, 1), 33.0);
    }

    #[test]
    fn empty_mean() {
        assert_eq!(Mask::new(0, 0).mean(), 0.0);
    }
}
