// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2021,2025 lacklustr@protonmail.com https://github.com/eadf

//! This library finds sparse pixel correspondences between two images and
//! visualizes them, based on OpenCV <https://crates.io/crates/opencv> and Rayon <https://crates.io/crates/rayon>.
//!
//! Copyright (c) 2021, 2025 Eadf <lacklustr@protonmail.com>.
//! License: MIT/Apache 2.0
//!
//! The matching itself is done by an opaque, pre-trained model behind the
//! [`model::CorrespondenceFinder`] trait. This crate loads the model, calls it once and
//! renders the result: a random subsample of the matches drawn as lines across
//! the two images placed side by side.
//!
//! Read more about the Global Patch Collider here:
//! <https://docs.opencv.org/4.x/d9/d2c/group__optflow.html>

pub mod evaluate;
pub mod flow;
pub mod model;
pub mod utils;
pub mod viewer;

pub use opencv;
use opencv::core::Point;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ViewerError {
    #[error(transparent)]
    OpenCvError(#[from] opencv::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Invalid path encoding {0}")]
    InvalidPathEncoding(PathBuf),
    #[error("Could not read image {0}")]
    ImageLoad(PathBuf),
    #[error("Could not write image {0}")]
    ImageWrite(PathBuf),
    #[error("Could not read ground truth flow {0}")]
    GroundTruthLoad(PathBuf),
    #[error("Could not open model {0}")]
    ModelLoad(PathBuf),
    #[error("Invalid parameter(s) {0}")]
    InvalidParams(String),
}

/// A matched pair of pixel locations, `.0` in the first image and `.1` in the second.
///
/// Coordinates are produced by the matcher and always lie inside their source image.
pub type Correspondence = (Point, Point);

/// Parameters handed to [`model::CorrespondenceFinder::find_correspondences()`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchingParams {
    /// Hardware acceleration: enables OpenCV's OpenCL code paths while matching.
    pub use_opencl: bool,

    /// Lowe’s ratio test threshold: how similar the best and second-best matches must be.
    /// Common values range from 0.7 to 0.9.
    pub match_ratio: f32,

    /// Ratio of best matches to keep after sorting by distance, in `(0, 1]`.
    pub match_keep_ratio: f32,
}

impl Default for MatchingParams {
    fn default() -> Self {
        Self {
            use_opencl: false,
            match_ratio: 0.8,
            match_keep_ratio: 1.0,
        }
    }
}

impl MatchingParams {
    /// ```
    /// # use libcollider::prelude::*;
    /// assert!(MatchingParams::default().validate().is_ok());
    /// let p = MatchingParams { match_keep_ratio: 0.0, ..Default::default() };
    /// assert!(p.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ViewerError> {
        if !(self.match_ratio > 0.0 && self.match_ratio <= 1.0) {
            return Err(ViewerError::InvalidParams(format!(
                "match_ratio must be in (0, 1], got {}",
                self.match_ratio
            )));
        }
        if !(self.match_keep_ratio > 0.0 && self.match_keep_ratio <= 1.0) {
            return Err(ViewerError::InvalidParams(format!(
                "match_keep_ratio must be in (0, 1], got {}",
                self.match_keep_ratio
            )));
        }
        Ok(())
    }
}

pub mod prelude {
    pub use super::{
        Correspondence, MatchingParams, ViewerError,
        model::{CorrespondenceFinder, CorrespondenceModel},
        viewer::{Canvas, KeyAction, Renderer, Viewer},
    };
}
