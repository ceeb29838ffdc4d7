//! # Dense optical flow field

use crate::mask::Mask;
use anyhow::{ensure, Result};
use nalgebra::*;

/// Fixed size dense optical flow field.
///
/// Each element holds the `(dx, dy)` displacement of a pixel, in pixel units.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowField {
    vf: Matrix2xX<f32>,
    width: usize,
}

impl FlowField {
    /// Create a new zero-filled flow field.
    ///
    /// # Arguments
    ///
    /// * `width` - width of the field.
    /// * `height` - height of the field.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            vf: Matrix2xX::repeat(width * height, 0f32),
            width,
        }
    }

    /// Create a flow field by evaluating `f(x, y)` at every pixel.
    pub fn from_fn(
        width: usize,
        height: usize,
        mut f: impl FnMut(usize, usize) -> Vector2<f32>,
    ) -> Self {
        let mut vf = Matrix2xX::repeat(width * height, 0f32);
        for y in 0..height {
            for x in 0..width {
                vf.set_column(y * width + x, &f(x, y));
            }
        }
        Self { vf, width }
    }

    /// Create a flow field from interleaved row-major `[dx, dy, dx, dy, ...]` data.
    ///
    /// This is the layout used by `.flo` files and by most training frameworks when storing
    /// `(H, W, 2)` arrays.
    pub fn from_interleaved(width: usize, height: usize, data: &[f32]) -> Result<Self> {
        ensure!(
            data.len() == width * height * 2,
            "expected {} flow values for {}x{} field, got {}",
            width * height * 2,
            width,
            height,
            data.len()
        );

        Ok(Self {
            vf: Matrix2xX::from_fn(width * height, |r, c| data[c * 2 + r]),
            width,
        })
    }

    /// Build a flow field from separate horizontal and vertical channels.
    pub fn from_channels(u: &Mask, v: &Mask) -> Result<Self> {
        ensure!(
            u.dim() == v.dim(),
            "channel dimensions differ: {:?} vs {:?}",
            u.dim(),
            v.dim()
        );
        let (w, h) = u.dim();
        Ok(Self::from_fn(w, h, |x, y| {
            Vector2::new(u.get(x, y), v.get(x, y))
        }))
    }

    /// Get width and height of the flow field.
    pub fn dim(&self) -> (usize, usize) {
        if self.width == 0 {
            (0, 0)
        } else {
            (self.width, self.vf.ncols() / self.width)
        }
    }

    /// Get size of the flow field.
    ///
    /// This is the same as `width * height`
    pub fn size(&self) -> usize {
        self.vf.ncols()
    }

    /// Get the flow field in row-major order.
    ///
    /// The elements returned are in the following order:
    ///
    /// `field[0,0].x, field[0,0].y, field[0,1].x, ... field[0,N].y, field[1,0].x, ... field[N,N].y`
    pub fn as_slice(&self) -> &[f32] {
        self.vf.as_slice()
    }

    /// Underlying `2 x (width * height)` matrix.
    pub fn as_matrix(&self) -> &Matrix2xX<f32> {
        &self.vf
    }

    /// Set motion at given position.
    ///
    /// # Arguments
    ///
    /// * `x` - horizontal coordinate to set at.
    /// * `y` - vertical coordinate to set at.
    /// * `motion` - motion to set.
    pub fn set_motion(&mut self, x: usize, y: usize, motion: Vector2<f32>) {
        self.vf.set_column(self.width * y + x, &motion);
    }

    /// Get motion at coordinates.
    ///
    /// # Arguments
    ///
    /// * `x` - horizontal coordinate.
    /// * `y` - vertical coordinate.
    pub fn get_motion(&self, x: usize, y: usize) -> Vector2<f32> {
        self.vf.column(self.width * y + x).into()
    }

    /// Iterate every element of the flow field.
    ///
    /// The resulting iterator yields `(x, y, motion)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, Vector2<f32>)> + '_ {
        let (width, height) = self.dim();
        (0..height).flat_map(move |y| (0..width).map(move |x| (x, y, self.get_motion(x, y))))
    }

    /// Extract a single channel (0 - horizontal, 1 - vertical).
    pub fn channel(&self, channel: usize) -> Mask {
        assert!(channel < 2, "flow has only 2 channels");
        let (w, h) = self.dim();
        Mask::from_fn(w, h, |x, y| self.vf[(channel, y * self.width + x)])
    }

    /// Multiply every displacement by `factor`.
    pub fn scale(&mut self, factor: f32) {
        self.vf *= factor;
    }

    /// Consuming version of [`FlowField::scale`].
    pub fn scaled(mut self, factor: f32) -> Self {
        self.scale(factor);
        self
    }

    /// Multiply horizontal and vertical components by separate factors.
    pub fn scale_channels(&mut self, sx: f32, sy: f32) {
        self.vf.row_mut(0).scale_mut(sx);
        self.vf.row_mut(1).scale_mut(sy);
    }

    /// Per-pixel euclidean norm of the flow.
    pub fn magnitude(&self) -> Mask {
        let (w, h) = self.dim();
        Mask::from_fn(w, h, |x, y| self.get_motion(x, y).norm())
    }

    /// Element-wise difference `self - other`.
    pub fn diff(&self, other: &FlowField) -> Result<FlowField> {
        ensure!(
            self.dim() == other.dim(),
            "flow shape mismatch: {:?} vs {:?}",
            self.dim(),
            other.dim()
        );
        Ok(Self {
            vf: &self.vf - &other.vf,
            width: self.width,
        })
    }

    /// Cut out a `width x height` window starting at `(x0, y0)`.
    pub fn crop(&self, x0: usize, y0: usize, width: usize, height: usize) -> Self {
        Self::from_fn(width, height, |x, y| self.get_motion(x0 + x, y0 + y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_layout() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let flow = FlowField::from_interleaved(3, 2, &data).unwrap();
        assert_eq!(flow.dim(), (3, 2));
        assert_eq!(flow.get_motion(2, 0), Vector2::new(5.0, 6.0));
        assert_eq!(flow.get_motion(0, 1), Vector2::new(7.0, 8.0));
        assert_eq!(flow.as_slice(), &data);
    }

    #[test]
    fn interleaved_wrong_len() {
        assert!(FlowField::from_interleaved(3, 2, &[0.0; 11]).is_err());
    }

    #[test]
    fn scale_channels_independently() {
        let mut flow = FlowField::from_fn(4, 4, |_, _| Vector2::new(1.0, 1.0));
        flow.scale_channels(2.0, -3.0);
        assert!(flow.iter().all(|(_, _, m)| m == Vector2::new(2.0, -3.0)));
    }

    #[test]
    fn crop_window() {
        let flow = FlowField::from_fn(6, 5, |x, y| Vector2::new(x as f32, y as f32));
        let cropped = flow.crop(2, 1, 3, 2);
        assert_eq!(cropped.dim(), (3, 2));
        assert_eq!(cropped.get_motion(0, 0), Vector2::new(2.0, 1.0));
        assert_eq!(cropped.get_motion(2, 1), Vector2::new(4.0, 2.0));
    }

    #[test]
    fn channels_round_trip() {
        let flow = FlowField::from_fn(5, 3, |x, y| Vector2::new(x as f32, -(y as f32)));
        let rebuilt = FlowField::from_channels(&flow.channel(0), &flow.channel(1)).unwrap();
        assert_eq!(flow, rebuilt);
    }
}
