//! # Bilinear resampling
//!
//! Resizing follows the half-pixel convention (`align_corners = false`): output pixel centres
//! are mapped onto input pixel centres, and sample positions left of the first centre are
//! clamped to it.

use crate::prelude::v1::*;
use nalgebra::Vector2;

/// Source taps for a single output coordinate.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Tap {
    lo: usize,
    hi: usize,
    frac: f32,
}

/// Compute source taps along one axis.
fn axis_taps(in_size: usize, out_size: usize) -> Vec<Tap> {
    let scale = in_size as f32 / out_size as f32;

    (0..out_size)
        .map(|o| {
            let src = ((o as f32 + 0.5) * scale - 0.5).max(0.0);
            let lo = (src as usize).min(in_size - 1);
            let hi = if lo < in_size - 1 { lo + 1 } else { lo };
            Tap {
                lo,
                hi,
                frac: src - lo as f32,
            }
        })
        .collect()
}

fn resize_with<T>(
    (in_w, in_h): (usize, usize),
    (out_w, out_h): (usize, usize),
    sample: impl Fn(usize, usize) -> T,
    mut store: impl FnMut(usize, usize, T),
) -> Result<()>
where
    T: Copy + std::ops::Mul<f32, Output = T> + std::ops::Add<Output = T>,
{
    if out_w == 0 || out_h == 0 {
        return Ok(());
    }

    ensure!(
        in_w > 0 && in_h > 0,
        "cannot resize an empty {in_w}x{in_h} map to {out_w}x{out_h}"
    );

    let xs = axis_taps(in_w, out_w);
    let ys = axis_taps(in_h, out_h);

    for (y, ty) in ys.iter().enumerate() {
        for (x, tx) in xs.iter().enumerate() {
            let top = sample(tx.lo, ty.lo) * (1.0 - tx.frac) + sample(tx.hi, ty.lo) * tx.frac;
            let bottom = sample(tx.lo, ty.hi) * (1.0 - tx.frac) + sample(tx.hi, ty.hi) * tx.frac;
            store(x, y, top * (1.0 - ty.frac) + bottom * ty.frac);
        }
    }

    Ok(())
}

/// Bilinearly resize a flow field to `width x height`.
///
/// Displacement values are interpolated as-is. Callers that change resolution and want the
/// flow to stay in pixel units of the new grid must rescale the vectors themselves.
///
/// Fails when an empty field is resized to a non-empty size.
pub fn resize_flow(flow: &FlowField, width: usize, height: usize) -> Result<FlowField> {
    if flow.dim() == (width, height) {
        return Ok(flow.clone());
    }

    let mut out = FlowField::new(width, height);
    resize_with(
        flow.dim(),
        (width, height),
        |x, y| flow.get_motion(x, y),
        |x, y, v: Vector2<f32>| out.set_motion(x, y, v),
    )?;
    Ok(out)
}

/// Bilinearly resize a single channel map to `width x height`.
pub fn resize_mask(mask: &Mask, width: usize, height: usize) -> Result<Mask> {
    if mask.dim() == (width, height) {
        return Ok(mask.clone());
    }

    let mut out = Mask::new(width, height);
    resize_with(
        mask.dim(),
        (width, height),
        |x, y| mask.get(x, y),
        |x, y, v| out.set(x, y, v),
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn upsample_taps_half_pixel() {
        let taps = axis_taps(2, 4);
        // Output centres map to -0.25, 0.25, 0.75, 1.25
        assert_eq!(taps[0], Tap { lo: 0, hi: 1, frac: 0.0 });
        assert_approx_eq!(taps[1].frac, 0.25);
        assert_approx_eq!(taps[2].frac, 0.75);
        assert_eq!((taps[3].lo, taps[3].hi), (1, 1));
    }

    #[test]
    fn upsample_constant_field() {
        let flow = FlowField::from_fn(3, 2, |_, _| Vector2::new(1.5, -2.0));
        let up = resize_flow(&flow, 12, 8).unwrap();
        assert_eq!(up.dim(), (12, 8));
        for (_, _, m) in up.iter() {
            assert_approx_eq!(m.x, 1.5);
            assert_approx_eq!(m.y, -2.0);
        }
    }

    #[test]
    fn upsample_row_matches_reference() {
        // Values produced by a reference bilinear interpolation with align_corners=False.
        let mask = Mask::from_row_major(2, 1, &[0.0, 1.0]).unwrap();
        let up = resize_mask(&mask, 4, 1).unwrap();
        let expected = [0.0, 0.25, 0.75, 1.0];
        for (x, e) in expected.iter().enumerate() {
            assert_approx_eq!(up.get(x, 0), *e);
        }
    }

    #[test]
    fn downsample_even_factor_averages_pairs() {
        let mask = Mask::from_row_major(4, 1, &[0.0, 2.0, 4.0, 6.0]).unwrap();
        let down = resize_mask(&mask, 2, 1).unwrap();
        assert_approx_eq!(down.get(0, 0), 1.0);
        assert_approx_eq!(down.get(1, 0), 5.0);
    }

    #[test]
    fn same_size_is_identity() {
        let flow = FlowField::from_fn(5, 4, |x, y| Vector2::new(x as f32, y as f32));
        assert_eq!(resize_flow(&flow, 5, 4).unwrap(), flow);
    }

    #[test]
    fn empty_source_is_error() {
        assert!(resize_flow(&FlowField::new(0, 0), 4, 4).is_err());
        assert!(resize_mask(&Mask::new(0, 3), 4, 4).is_err());
        assert_eq!(resize_flow(&FlowField::new(0, 0), 0, 0).unwrap().dim(), (0, 0));
    }
}
