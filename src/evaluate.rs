// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2021,2025 lacklustr@protonmail.com https://github.com/eadf

//! Endpoint error of correspondences against a dense ground-truth flow field.

use super::{Correspondence, ViewerError, utils};
use log::debug;
use opencv::core::{CV_32FC2, Mat, Vec2f};
use opencv::prelude::*;
use ordered_float::OrderedFloat;
use rayon::prelude::*;

/// Flow components above this magnitude mark pixels without ground truth (Middlebury convention)
pub const UNKNOWN_FLOW_THRESHOLD: f32 = 1e9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointErrorStats {
    /// Correspondences with known ground truth
    pub evaluated: usize,
    /// Correspondences outside the flow field or on unknown flow
    pub skipped: usize,
    pub mean: f64,
    pub median: f64,
    pub max: f64,
    /// Share of evaluated correspondences with an error below 1, 3 and 5 pixels
    pub within: [f64; 3],
}

/// Reads a Middlebury `.flo` file into a `CV_32FC2` Mat
pub fn read_ground_truth<P: AsRef<std::path::Path>>(path: P) -> Result<Mat, ViewerError> {
    let path = path.as_ref();
    let flow = opencv::video::read_optical_flow(utils::path_to_str(path)?).map_err(|e| {
        debug!("read_optical_flow {:?} failed: {}", path, e);
        ViewerError::GroundTruthLoad(path.to_path_buf())
    })?;
    if flow.empty() {
        return Err(ViewerError::GroundTruthLoad(path.to_path_buf()));
    }
    Ok(flow)
}

/// Returns the endpoint error of every correspondence, `None` where no ground truth exists.
///
/// The error is the distance between the matched displacement `b - a` and the ground truth
/// flow at `a`.
pub fn endpoint_errors(
    corr: &[Correspondence],
    ground_truth: Mat,
) -> Result<Vec<Option<f64>>, ViewerError> {
    if ground_truth.typ() != CV_32FC2 {
        return Err(ViewerError::InvalidParams(format!(
            "ground truth must be CV_32FC2, got type {}",
            ground_truth.typ()
        )));
    }
    let (rows, cols) = (ground_truth.rows(), ground_truth.cols());
    let gt_wr = utils::UnsafeMatSyncWrapper(ground_truth);
    let gt_wrmv = &gt_wr;

    corr.par_iter()
        .map(move |(a, b)| -> Result<Option<f64>, ViewerError> {
            if a.x < 0 || a.y < 0 || a.x >= cols || a.y >= rows {
                return Ok(None);
            }
            let gt = *gt_wrmv.0.at_2d::<Vec2f>(a.y, a.x)?;
            if gt[0].abs() > UNKNOWN_FLOW_THRESHOLD || gt[1].abs() > UNKNOWN_FLOW_THRESHOLD {
                return Ok(None);
            }
            let dx = (b.x - a.x) as f64 - gt[0] as f64;
            let dy = (b.y - a.y) as f64 - gt[1] as f64;
            Ok(Some(dx.hypot(dy)))
        })
        .collect()
}

/// Summarizes [`endpoint_errors()`], `None` when no correspondence could be evaluated.
/// ```
/// # use libcollider::evaluate::summarize;
/// let s = summarize(&[Some(0.5), Some(2.0), None, Some(6.5)]).unwrap();
/// assert_eq!(s.evaluated, 3);
/// assert_eq!(s.skipped, 1);
/// assert_eq!(s.median, 2.0);
/// assert_eq!(s.max, 6.5);
/// ```
pub fn summarize(errors: &[Option<f64>]) -> Option<EndpointErrorStats> {
    let mut known: Vec<f64> = errors.iter().flatten().copied().collect();
    if known.is_empty() {
        return None;
    }
    known.sort_by_key(|e| OrderedFloat(*e));

    let n = known.len();
    let mean = known.iter().sum::<f64>() / n as f64;
    let median = if n % 2 == 1 {
        known[n / 2]
    } else {
        (known[n / 2 - 1] + known[n / 2]) / 2.0
    };
    let share_below = |limit: f64| known.iter().filter(|e| **e < limit).count() as f64 / n as f64;

    Some(EndpointErrorStats {
        evaluated: n,
        skipped: errors.len() - n,
        mean,
        median,
        max: known[n - 1],
        within: [share_below(1.0), share_below(3.0), share_below(5.0)],
    })
}

/// [`endpoint_errors()`] followed by [`summarize()`]
pub fn evaluate(
    corr: &[Correspondence],
    ground_truth: Mat,
) -> Result<Option<EndpointErrorStats>, ViewerError> {
    Ok(summarize(&endpoint_errors(corr, ground_truth)?))
}
