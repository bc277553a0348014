use libcollider::model::DetectorSettings;
use libcollider::opencv::core::{CV_8UC3, Mat, Rect, Scalar};
use libcollider::opencv::{imgproc, prelude::*};
use libcollider::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("libcollider_{}_{}", std::process::id(), name))
}

/// An image of random 8x8 coloured blocks, plenty of corners for any detector
fn blocks(rows: i32, cols: i32, seed: u64) -> Mat {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = Mat::new_rows_cols_with_default(rows, cols, CV_8UC3, Scalar::all(0.0)).unwrap();
    for y in (0..rows).step_by(8) {
        for x in (0..cols).step_by(8) {
            let color = Scalar::new(
                rng.gen_range(0..255) as f64,
                rng.gen_range(0..255) as f64,
                rng.gen_range(0..255) as f64,
                0.0,
            );
            imgproc::rectangle(
                &mut img,
                Rect::new(x, y, 8, 8),
                color,
                imgproc::FILLED,
                imgproc::LINE_8,
                0,
            )
            .unwrap();
        }
    }
    img
}

#[test]
fn saved_model_loads_back() {
    let path = temp_path("model.yml");
    let settings = DetectorSettings {
        max_features: 1000,
        fast_threshold: 10,
        ..Default::default()
    };
    CorrespondenceModel::new(settings).save(&path).unwrap();

    let model = CorrespondenceModel::load(&path).unwrap();
    assert_eq!(model.settings().max_features, 1000);
    assert_eq!(model.settings().fast_threshold, 10);
    assert_eq!(model.source(), Some(path.as_path()));
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn foreign_model_falls_back_to_defaults() {
    let path = temp_path("forest.yml");
    std::fs::write(&path, "%YAML:1.0\n---\nntrees: 5\n").unwrap();
    let model = CorrespondenceModel::load(&path).unwrap();
    assert_eq!(*model.settings(), DetectorSettings::default());
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn shifted_image_matches_with_the_shift() {
    let from = blocks(240, 320, 4904);
    let (dx, dy) = (7, 3);
    let to = Mat::roi(&from, Rect::new(dx, dy, 320 - dx, 240 - dy))
        .unwrap()
        .try_clone()
        .unwrap();

    let model = CorrespondenceModel::new(DetectorSettings {
        max_features: 2000,
        ..Default::default()
    });
    let corr = model
        .find_correspondences(&from, &to, &MatchingParams::default())
        .unwrap();
    assert!(!corr.is_empty());

    for (a, b) in corr.iter() {
        assert!(a.x >= 0 && a.x < from.cols() && a.y >= 0 && a.y < from.rows());
        assert!(b.x >= 0 && b.x < to.cols() && b.y >= 0 && b.y < to.rows());
    }
    let consistent = corr
        .iter()
        .filter(|(a, b)| ((a.x - b.x) - dx).abs() <= 2 && ((a.y - b.y) - dy).abs() <= 2)
        .count();
    assert!(consistent * 2 > corr.len(), "{consistent} of {}", corr.len());

    let canvas = Canvas::compose(&from, &to).unwrap();
    assert_eq!(canvas.image().cols(), from.cols() + to.cols());
    assert_eq!(canvas.image().rows(), from.rows());
    let frame = Renderer::new(StdRng::seed_from_u64(1))
        .render(&canvas, &corr)
        .unwrap();
    assert!(frame.lines > 0 && frame.lines <= corr.len());
}

#[test]
fn opencl_switch_reaches_opencv_and_keeps_results() {
    let from = blocks(160, 200, 7);
    let to = Mat::roi(&from, Rect::new(4, 2, 196, 158))
        .unwrap()
        .try_clone()
        .unwrap();
    let model = CorrespondenceModel::default();

    let cpu = model
        .find_correspondences(&from, &to, &MatchingParams::default())
        .unwrap();
    assert!(!libcollider::opencv::core::use_opencl().unwrap());

    let accelerated = MatchingParams {
        use_opencl: true,
        ..Default::default()
    };
    let gpu = model.find_correspondences(&from, &to, &accelerated).unwrap();
    // only switches on where an OpenCL device exists
    assert_eq!(
        libcollider::opencv::core::use_opencl().unwrap(),
        libcollider::opencv::core::have_opencl().unwrap()
    );

    assert!(!cpu.is_empty());
    assert!(!gpu.is_empty());
    for (a, b) in gpu.iter() {
        assert!(a.x >= 0 && a.x < from.cols() && a.y >= 0 && a.y < from.rows());
        assert!(b.x >= 0 && b.x < to.cols() && b.y >= 0 && b.y < to.rows());
    }
    let consistent = gpu
        .iter()
        .filter(|(a, b)| ((a.x - b.x) - 4).abs() <= 2 && ((a.y - b.y) - 2).abs() <= 2)
        .count();
    assert!(consistent * 2 > gpu.len(), "{consistent} of {}", gpu.len());
}
