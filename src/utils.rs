// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2021,2025 lacklustr@protonmail.com https://github.com/eadf

use super::ViewerError;
use log::debug;
use opencv::core::{Mat, MatTraitConst, Point, Point2f, Vector};
use opencv::imgcodecs;

/// Extension trait for more ergonomic Mat conversions
pub trait MatExt {
    /// Convert matrix to specified type with scaling
    ///
    /// # Arguments
    /// * `rtype` - OpenCV type constant (e.g., CV_8U, CV_32F)
    fn convert(&self, rtype: i32, alpha: f64, beta: f64) -> Result<Mat, ViewerError>;
}

impl MatExt for Mat {
    fn convert(&self, rtype: i32, alpha: f64, beta: f64) -> Result<Mat, ViewerError> {
        let mut dst = Mat::default();
        self.convert_to(&mut dst, rtype, alpha, beta)?;
        Ok(dst)
    }
}

/// A q&d hack allowing `opencv::Vector<KeyPoints>` objects to be sent between threads.
/// Only use this on immutable `Vector<KeyPoints>` objects.
pub(crate) struct UnsafeVectorKeyPointSyncWrapper(
    pub(crate) Vector<opencv::core::KeyPoint>,
);
unsafe impl Sync for UnsafeVectorKeyPointSyncWrapper {}
unsafe impl Send for UnsafeVectorKeyPointSyncWrapper {}

/// A q&d hack allowing `opencv::Mat` objects to be `Sync`.
/// Only use this on immutable `Mat` objects.
pub(crate) struct UnsafeMatSyncWrapper(pub(crate) Mat);
unsafe impl Sync for UnsafeMatSyncWrapper {}

/// Converts a path to the `&str` OpenCV expects
pub(crate) fn path_to_str(path: &std::path::Path) -> Result<&str, ViewerError> {
    path.to_str()
        .ok_or_else(|| ViewerError::InvalidPathEncoding(path.to_path_buf()))
}

/// Safe wrapper around OpenCV's `imread` with proper error handling
///
/// OpenCV silently returns an empty `Mat` when a file can not be decoded, this
/// wrapper turns that into `ViewerError::ImageLoad`.
///
/// # Errors
/// Returns `ViewerError::InvalidPathEncoding` if the path contains invalid Unicode characters.
///
/// Returns `ViewerError::ImageLoad` if the file is missing, unreadable or in an
/// unsupported format.
///
/// # Example
/// ```no_run
/// # use libcollider::{utils::imread, prelude::*, opencv::imgcodecs };
/// # fn a() -> Result<(),ViewerError> {
/// let img = imread("frame_0001.png", imgcodecs::IMREAD_COLOR)?;
/// # Ok(()) }
/// ```
pub fn imread<P: AsRef<std::path::Path>>(path: P, flags: i32) -> Result<Mat, ViewerError> {
    let path = path.as_ref();
    let img = imgcodecs::imread(path_to_str(path)?, flags)?;
    if img.empty() {
        return Err(ViewerError::ImageLoad(path.to_path_buf()));
    }
    Ok(img)
}

/// Writes `img` to `path`, the format is picked by OpenCV from the file extension.
///
/// # Errors
/// Returns `ViewerError::ImageWrite` if OpenCV could not encode or store the image, for
/// example when the directory does not exist.
pub fn imwrite<P: AsRef<std::path::Path>>(path: P, img: &Mat) -> Result<(), ViewerError> {
    let path = path.as_ref();
    match imgcodecs::imwrite(path_to_str(path)?, img, &Vector::new()) {
        Ok(true) => Ok(()),
        Ok(false) => Err(ViewerError::ImageWrite(path.to_path_buf())),
        Err(e) => {
            debug!("imwrite {:?} failed: {}", path, e);
            Err(ViewerError::ImageWrite(path.to_path_buf()))
        }
    }
}

/// Rounds a sub-pixel keypoint location to the nearest pixel
/// ```
/// # use libcollider::utils::round_point;
/// # use libcollider::opencv::core::{Point, Point2f};
/// assert_eq!(round_point(Point2f::new(1.4, 2.6)), Point::new(1, 3));
/// ```
#[inline]
pub fn round_point(p: Point2f) -> Point {
    Point::new(p.x.round() as i32, p.y.round() as i32)
}
