//! # Smoothness regularisers
//!
//! Penalise spatial derivatives of a flow field. When a grayscale image is supplied, the
//! penalty is attenuated across image edges by `exp(-alpha * |grad I|)`.

use crate::prelude::v1::*;

/// Finite difference operator.
#[derive(Clone, Copy)]
enum Order {
    First,
    Second,
}

impl Order {
    /// Number of extra samples the operator needs along its axis.
    fn span(self) -> usize {
        match self {
            Self::First => 1,
            Self::Second => 2,
        }
    }

    fn apply(self, samples: &[nalgebra::Vector2<f32>]) -> nalgebra::Vector2<f32> {
        match self {
            Self::First => samples[1] - samples[0],
            Self::Second => samples[2] - samples[1] * 2.0 + samples[0],
        }
    }
}

fn smooth_loss(flow: &FlowField, image: Option<&Mask>, alpha: f32, order: Order) -> Result<f32> {
    if let Some(image) = image {
        ensure!(
            image.dim() == flow.dim(),
            "image shape {:?} does not match flow {:?}",
            image.dim(),
            flow.dim()
        );
    }

    let (w, h) = flow.dim();
    let span = order.span();

    let edge_weight = |x0: usize, y0: usize, x1: usize, y1: usize| match image {
        Some(img) => (-alpha * (img.get(x1, y1) - img.get(x0, y0)).abs()).exp(),
        None => 1.0,
    };

    // Mean absolute derivative, averaged over both flow channels.
    let mean_along = |dx: usize, dy: usize| -> f32 {
        let (nx, ny) = (w.saturating_sub(dx * span), h.saturating_sub(dy * span));
        if nx == 0 || ny == 0 {
            return 0.0;
        }

        let mut total = 0.0;
        for y in 0..ny {
            for x in 0..nx {
                let samples = (0..=span)
                    .map(|k| flow.get_motion(x + k * dx, y + k * dy))
                    .collect::<Vec<_>>();
                let d = order.apply(&samples);
                let (cx, cy) = (x + (span - 1) * dx, y + (span - 1) * dy);
                let weight = edge_weight(cx, cy, cx + dx, cy + dy);
                total += weight * (d.x.abs() + d.y.abs()) * 0.5;
            }
        }

        total / (nx * ny) as f32
    };

    Ok((mean_along(1, 0) + mean_along(0, 1)) * 0.5)
}

/// First order smoothness penalty.
///
/// # Arguments
///
/// * `flow` - flow field to regularise.
/// * `image` - optional grayscale image for edge-aware weighting.
/// * `alpha` - edge sensitivity. `0` disables edge weighting.
pub fn smooth_1st_loss(flow: &FlowField, image: Option<&Mask>, alpha: f32) -> Result<f32> {
    smooth_loss(flow, image, alpha, Order::First)
}

/// Second order smoothness penalty.
///
/// Unlike [`smooth_1st_loss`], this does not penalise locally affine (for example zooming)
/// flow.
pub fn smooth_2nd_loss(flow: &FlowField, image: Option<&Mask>, alpha: f32) -> Result<f32> {
    smooth_loss(flow, image, alpha, Order::Second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::Vector2;

    #[test]
    fn constant_flow_is_smooth() {
        let flow = FlowField::from_fn(8, 8, |_, _| Vector2::new(3.0, -1.0));
        assert_eq!(smooth_1st_loss(&flow, None, 0.0).unwrap(), 0.0);
        assert_eq!(smooth_2nd_loss(&flow, None, 0.0).unwrap(), 0.0);
    }

    #[test]
    fn linear_ramp() {
        // u = x: first derivative 1 along x, 0 along y, second derivative 0.
        let flow = FlowField::from_fn(6, 5, |x, _| Vector2::new(x as f32, 0.0));
        assert_approx_eq!(smooth_1st_loss(&flow, None, 0.0).unwrap(), 0.25);
        assert_approx_eq!(smooth_2nd_loss(&flow, None, 0.0).unwrap(), 0.0);
    }

    #[test]
    fn quadratic_has_second_order_penalty() {
        // v = y^2: second difference is 2 everywhere along y.
        let flow = FlowField::from_fn(4, 6, |_, y| Vector2::new(0.0, (y * y) as f32));
        assert_approx_eq!(smooth_2nd_loss(&flow, None, 0.0).unwrap(), 0.5);
    }

    #[test]
    fn edges_attenuate_penalty() {
        let flow = FlowField::from_fn(6, 6, |x, _| Vector2::new(if x < 3 { 0.0 } else { 5.0 }, 0.0));
        let image = Mask::from_fn(6, 6, |x, _| if x < 3 { 0.0 } else { 1.0 });

        let plain = smooth_1st_loss(&flow, Some(&image), 0.0).unwrap();
        let aware = smooth_1st_loss(&flow, Some(&image), 10.0).unwrap();
        assert!(aware < plain * 0.01);
    }

    #[test]
    fn tiny_fields_do_not_panic() {
        let flow = FlowField::new(1, 1);
        assert_eq!(smooth_2nd_loss(&flow, None, 0.0).unwrap(), 0.0);
    }

    #[test]
    fn image_shape_checked() {
        let flow = FlowField::new(4, 4);
        assert!(smooth_1st_loss(&flow, Some(&Mask::new(3, 4)), 1.0).is_err());
    }
}
