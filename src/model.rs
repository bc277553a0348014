// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2021,2025 lacklustr@protonmail.com https://github.com/eadf

//! The correspondence model and the seam every matching engine plugs into.

use super::{Correspondence, MatchingParams, ViewerError, utils};
use log::{debug, warn};
use opencv::core::{
    self, AccessFlag, AlgorithmHint, FileStorage, FileStorage_Mode, Mat, Ptr, ToInputArray, UMat,
    UMatUsageFlags, Vector,
};
use opencv::features2d::{self, ORB, ORB_ScoreType};
use opencv::imgproc;
use opencv::prelude::*;
use ordered_float::OrderedFloat;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Anything able to find sparse correspondences between two 3-channel BGR images.
pub trait CorrespondenceFinder {
    /// Returns matched `(point in from, point in to)` pairs.
    /// An empty result is not an error.
    fn find_correspondences(
        &self,
        from: &Mat,
        to: &Mat,
        params: &MatchingParams,
    ) -> Result<Vec<Correspondence>, ViewerError>;
}

/// Detector parameters carried by a model file, mirrors `opencv::features2d::ORB`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorSettings {
    /// Maximum number of key-points retained per image.
    pub max_features: i32,

    /// Pyramid decimation ratio, greater than 1.
    pub scale_factor: f64,

    /// Number of pyramid levels.
    pub n_levels: i32,

    /// Border in pixels where no key-points are detected, should roughly match `patch_size`.
    pub edge_threshold: i32,

    /// Pyramid level the source image is placed on.
    pub first_level: i32,

    /// Number of points producing each element of the oriented BRIEF descriptor (2, 3 or 4).
    pub wta_k: i32,

    /// Key-point ranking, Harris or FAST score.
    pub score_type: ORB_ScoreType,

    /// Size of the patch used by the oriented BRIEF descriptor.
    pub patch_size: i32,

    /// FAST corner detector threshold.
    pub fast_threshold: i32,
}

impl Default for DetectorSettings {
    /// Same values as `ORB::create_def()`
    fn default() -> Self {
        Self {
            max_features: 500,
            scale_factor: 1.2,
            n_levels: 8,
            edge_threshold: 31,
            first_level: 0,
            wta_k: 2,
            score_type: ORB_ScoreType::HARRIS_SCORE,
            patch_size: 31,
            fast_threshold: 20,
        }
    }
}

impl DetectorSettings {
    fn from_detector(orb: &Ptr<ORB>) -> Result<Self, ViewerError> {
        Ok(Self {
            max_features: orb.get_max_features()?,
            scale_factor: orb.get_scale_factor()?,
            n_levels: orb.get_n_levels()?,
            edge_threshold: orb.get_edge_threshold()?,
            first_level: orb.get_first_level()?,
            wta_k: orb.get_wta_k()?,
            score_type: orb.get_score_type()?,
            patch_size: orb.get_patch_size()?,
            fast_threshold: orb.get_fast_threshold()?,
        })
    }

    fn create_detector(&self) -> Result<Ptr<ORB>, ViewerError> {
        Ok(ORB::create(
            self.max_features,
            self.scale_factor as f32,
            self.n_levels,
            self.edge_threshold,
            self.first_level,
            self.wta_k,
            self.score_type,
            self.patch_size,
            self.fast_threshold,
        )?)
    }
}

/// An opaque, pre-trained correspondence model.
///
/// The file format is owned by OpenCV (`cv::FileStorage`, YAML, XML or JSON); this type
/// only checks that the file opens and hands it to OpenCV.
#[derive(Debug, Clone)]
pub struct CorrespondenceModel {
    settings: DetectorSettings,
    source: Option<PathBuf>,
}

impl Default for CorrespondenceModel {
    fn default() -> Self {
        Self::new(DetectorSettings::default())
    }
}

impl CorrespondenceModel {
    pub fn new(settings: DetectorSettings) -> Self {
        Self {
            settings,
            source: None,
        }
    }

    /// Loads a model previously written by [`CorrespondenceModel::save()`] (or by any
    /// OpenCV tool writing a `Feature2D`).
    ///
    /// # Errors
    /// Returns `ViewerError::ModelLoad` if the file is missing or not a `FileStorage` document.
    ///
    /// ```no_run
    /// # use libcollider::prelude::*;
    /// # fn f() -> Result<(),ViewerError> {
    /// let model = CorrespondenceModel::load("forest.yml")?;
    /// # Ok(())}
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ViewerError> {
        let path = path.as_ref();
        let path_str = utils::path_to_str(path)?;
        if !path.is_file() {
            return Err(ViewerError::ModelLoad(path.to_path_buf()));
        }

        let fs = FileStorage::new(path_str, FileStorage_Mode::READ as i32, "").map_err(|e| {
            debug!("FileStorage refused {:?}: {}", path, e);
            ViewerError::ModelLoad(path.to_path_buf())
        })?;
        if !fs.is_opened()? {
            return Err(ViewerError::ModelLoad(path.to_path_buf()));
        }
        if fs.get("nfeatures")?.empty()? {
            warn!(
                "{:?} carries no detector parameters, falling back to defaults",
                path
            );
        }
        drop(fs);

        let mut orb = ORB::create_def()?;
        Feature2DTrait::read(&mut orb, path_str).map_err(|e| {
            debug!("detector refused {:?}: {}", path, e);
            ViewerError::ModelLoad(path.to_path_buf())
        })?;
        let settings = DetectorSettings::from_detector(&orb)?;
        debug!("model settings {:?}", settings);
        Ok(Self {
            settings,
            source: Some(path.to_path_buf()),
        })
    }

    /// Writes the model so it can be passed to [`CorrespondenceModel::load()`].
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ViewerError> {
        let path_str = utils::path_to_str(path.as_ref())?;
        let orb = self.settings.create_detector()?;
        Feature2DTraitConst::write(&orb, path_str)?;
        Ok(())
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    /// The file this model was loaded from, `None` for in-memory models.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Returns key-points and descriptors of a BGR image
    fn detect_and_compute(
        &self,
        img: &Mat,
    ) -> Result<(utils::UnsafeVectorKeyPointSyncWrapper, Mat), ViewerError> {
        let mut img_grey = Mat::default();
        imgproc::cvt_color(
            img,
            &mut img_grey,
            imgproc::COLOR_BGR2GRAY,
            0,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )?;

        let mut orb = self.settings.create_detector()?;
        let mut kp = Vector::<core::KeyPoint>::new();
        let mut des = Mat::default();
        orb.detect_and_compute(&img_grey, &Mat::default(), &mut kp, &mut des, false)?;
        Ok((utils::UnsafeVectorKeyPointSyncWrapper(kp), des))
    }

    /// Same as `detect_and_compute()` but on `UMat`s, letting OpenCV dispatch to OpenCL
    fn detect_and_compute_umat(
        &self,
        img: &Mat,
    ) -> Result<(Vector<core::KeyPoint>, UMat), ViewerError> {
        let src = img.get_umat(AccessFlag::ACCESS_READ, UMatUsageFlags::USAGE_DEFAULT)?;
        let mut img_grey = UMat::new_def();
        imgproc::cvt_color(
            &src,
            &mut img_grey,
            imgproc::COLOR_BGR2GRAY,
            0,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )?;

        let mut orb = self.settings.create_detector()?;
        let mut kp = Vector::<core::KeyPoint>::new();
        let mut des = UMat::new_def();
        orb.detect_and_compute(&img_grey, &core::no_array(), &mut kp, &mut des, false)?;
        Ok((kp, des))
    }
}

/// Ratio test, distance sort, one-to-one and keep ratio over a brute force kNN match.
/// Works on `Mat` and `UMat` descriptors alike.
fn match_descriptors<D: ToInputArray>(
    query: &D,
    train: &D,
    params: &MatchingParams,
) -> Result<Vec<core::DMatch>, ViewerError> {
    let mut matcher = features2d::BFMatcher::create(core::NORM_HAMMING, false)?; // false for knn_match
    matcher.add(train)?;
    let mut knn_matches = Vector::<Vector<core::DMatch>>::new();

    matcher.knn_match(
        query,             // query descriptors
        &mut knn_matches,  // output matches
        2,                 // k (2 best matches per descriptor)
        &core::no_array(), // mask (no filtering here)
        false,             // compact_result
    )?;

    let mut filtered_matches = Vec::with_capacity(knn_matches.len());
    for m in knn_matches.iter() {
        if m.len() == 2 {
            let (best, second) = (m.get(0)?, m.get(1)?);
            if best.distance < params.match_ratio * second.distance {
                filtered_matches.push(best);
            }
        }
    }

    filtered_matches.sort_by_key(|m| OrderedFloat(m.distance));

    // a point in `to` may only be claimed once, the closest descriptor wins
    let mut claimed = HashSet::new();
    filtered_matches.retain(|m| claimed.insert(m.train_idx));

    let num_to_keep = (filtered_matches.len() as f32 * params.match_keep_ratio).round() as usize;
    filtered_matches.truncate(num_to_keep);
    Ok(filtered_matches)
}

impl CorrespondenceFinder for CorrespondenceModel {
    fn find_correspondences(
        &self,
        from: &Mat,
        to: &Mat,
        params: &MatchingParams,
    ) -> Result<Vec<Correspondence>, ViewerError> {
        params.validate()?;
        if from.channels() != 3 || to.channels() != 3 {
            return Err(ViewerError::InvalidParams(format!(
                "expected 3-channel images, got {} and {}",
                from.channels(),
                to.channels()
            )));
        }

        // the OpenCL switch is thread local in OpenCV
        core::set_use_opencl(params.use_opencl)?;

        let (from_kp, to_kp, matches) = if params.use_opencl {
            if !core::have_opencl()? {
                warn!("OpenCL requested but not available, matching on the CPU");
            }
            let (from_kp, from_des) = self.detect_and_compute_umat(from)?;
            let (to_kp, to_des) = self.detect_and_compute_umat(to)?;
            debug!("detected {} and {} key-points", from_kp.len(), to_kp.len());
            if from_des.empty() || to_des.empty() {
                return Ok(Vec::new());
            }
            let matches = match_descriptors(&from_des, &to_des, params)?;
            (from_kp, to_kp, matches)
        } else {
            let from_wr = utils::UnsafeMatSyncWrapper(from.try_clone()?);
            let to_wr = utils::UnsafeMatSyncWrapper(to.try_clone()?);
            let (from_res, to_res) = rayon::join(
                || self.detect_and_compute(&from_wr.0),
                || self.detect_and_compute(&to_wr.0),
            );
            let (from_kp, from_des) = from_res?;
            let (to_kp, to_des) = to_res?;
            debug!(
                "detected {} and {} key-points",
                from_kp.0.len(),
                to_kp.0.len()
            );
            if from_des.empty() || to_des.empty() {
                return Ok(Vec::new());
            }
            let matches = match_descriptors(&from_des, &to_des, params)?;
            (from_kp.0, to_kp.0, matches)
        };

        let mut corr = Vec::with_capacity(matches.len());
        for m in matches.iter() {
            let a = from_kp.get(m.query_idx as usize)?.pt();
            let b = to_kp.get(m.train_idx as usize)?.pt();
            corr.push((utils::round_point(a), utils::round_point(b)));
        }
        Ok(corr)
    }
}
