// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2021,2025 lacklustr@protonmail.com https://github.com/eadf

use super::{Correspondence, ViewerError, utils::MatExt};
use opencv::core::{AlgorithmHint, CV_8UC3, CV_32FC3, Mat, Point2f, Scalar, Size, Vec3d};
use opencv::imgproc;
use std::f64::consts::PI;

/// Radius of the dot drawn for every correspondence in [`render_flow()`]
pub const FLOW_DOT_RADIUS: i32 = 3;

/// Flow magnitude (after the optional log scaling) that maps to full saturation
pub const FLOW_SCALE_DOWN: f64 = 5.0;

/// Maps a flow vector to an HSV colour, hue in degrees and saturation/value in `[0, 1]`.
///
/// The hue encodes the direction, the saturation encodes the (optionally log scaled)
/// magnitude divided by `scale_down`. Zero flow is white.
/// ```
/// # use libcollider::flow::flow_color;
/// # use libcollider::opencv::core::Point2f;
/// let c = flow_color(Point2f::new(0.0, 0.0), true, 5.0);
/// assert_eq!((c[0], c[1], c[2]), (0.0, 0.0, 1.0));
/// ```
pub fn flow_color(flow: Point2f, log_scale: bool, scale_down: f64) -> Vec3d {
    if flow.x == 0.0 && flow.y == 0.0 {
        return Vec3d::new(0.0, 0.0, 1.0);
    }

    let (x, y) = (flow.x as f64, flow.y as f64);
    let mut radius = x.hypot(y);
    if log_scale {
        radius = (radius + 1.0).ln();
    }
    radius = (radius / scale_down).min(1.0);

    let angle = ((-y).atan2(-x) + PI).to_degrees();
    Vec3d::new(angle, radius, 1.0)
}

/// Draws every correspondence as a dot at its position in the first image, coloured by
/// [`flow_color()`] of its displacement. Returns a `CV_8UC3` BGR image of `size`.
pub fn render_flow(size: Size, corr: &[Correspondence]) -> Result<Mat, ViewerError> {
    let mut disp = Mat::new_size_with_default(size, CV_32FC3, Scalar::new(0.0, 0.0, 1.0, 0.0))?;

    for (a, b) in corr {
        let displacement = Point2f::new((b.x - a.x) as f32, (b.y - a.y) as f32);
        let hsv = flow_color(displacement, true, FLOW_SCALE_DOWN);
        imgproc::circle(
            &mut disp,
            *a,
            FLOW_DOT_RADIUS,
            Scalar::new(hsv[0], hsv[1], hsv[2], 0.0),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )?;
    }

    let mut bgr = Mat::default();
    imgproc::cvt_color(
        &disp,
        &mut bgr,
        imgproc::COLOR_HSV2BGR,
        0,
        AlgorithmHint::ALGO_HINT_DEFAULT,
    )?;
    bgr.convert(CV_8UC3, 255.0, 0.0)
}
