// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2021,2025 lacklustr@protonmail.com https://github.com/eadf

//! Interactive side-by-side rendering of correspondences.
//!
//! Only a random subsample (about [`DEFAULT_SHOWN`] lines) is drawn per frame, pressing
//! `n` or `N` draws another subsample, any other key ends the session.

use super::{Correspondence, ViewerError, utils};
use log::{debug, info};
use opencv::core::{self, Mat, Point, Rect, Scalar, Size};
use opencv::prelude::*;
use opencv::{highgui, imgproc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Seed of the line colour generator, colours repeat from run to run.
pub const COLOR_SEED: u64 = 12345;

/// Approximate number of lines drawn per frame.
pub const DEFAULT_SHOWN: usize = 100;

pub const WINDOW_NAME: &str = "Correspondences";

/// Both input images placed side by side.
///
/// The canvas is as wide as both images together and as high as the first image,
/// the second image is cropped or zero padded to that height.
pub struct Canvas {
    image: Mat,
    offset: i32,
}

impl Canvas {
    /// ```
    /// # use libcollider::{prelude::*, opencv::prelude::*};
    /// # use libcollider::opencv::core::{Mat, Scalar, CV_8UC3};
    /// let a = Mat::new_rows_cols_with_default(30, 40, CV_8UC3, Scalar::all(0.0)).unwrap();
    /// let b = Mat::new_rows_cols_with_default(50, 25, CV_8UC3, Scalar::all(0.0)).unwrap();
    /// let canvas = Canvas::compose(&a, &b).unwrap();
    /// assert_eq!(canvas.image().cols(), 65);
    /// assert_eq!(canvas.image().rows(), 30);
    /// ```
    pub fn compose(from: &Mat, to: &Mat) -> Result<Self, ViewerError> {
        if from.empty() || to.empty() {
            return Err(ViewerError::InvalidParams(
                "can not compose a canvas from an empty image".to_string(),
            ));
        }
        if from.typ() != to.typ() {
            return Err(ViewerError::InvalidParams(format!(
                "image types differ: {} vs {}",
                from.typ(),
                to.typ()
            )));
        }

        let height = from.rows();
        let to_fitted = match to.rows().cmp(&height) {
            Ordering::Equal => to.try_clone()?,
            Ordering::Greater => Mat::roi(to, Rect::new(0, 0, to.cols(), height))?.try_clone()?,
            Ordering::Less => {
                let mut padded = Mat::default();
                core::copy_make_border(
                    to,
                    &mut padded,
                    0,
                    height - to.rows(),
                    0,
                    0,
                    core::BORDER_CONSTANT,
                    Scalar::default(),
                )?;
                padded
            }
        };

        let mut image = Mat::default();
        core::hconcat2(from, &to_fitted, &mut image)?;
        Ok(Self {
            image,
            offset: from.cols(),
        })
    }

    pub fn image(&self) -> &Mat {
        &self.image
    }

    /// Horizontal position of the second image
    pub fn offset(&self) -> i32 {
        self.offset
    }

    pub fn size(&self) -> Result<Size, ViewerError> {
        Ok(self.image.size()?)
    }
}

/// One rendered frame and the number of correspondence lines on it.
pub struct Frame {
    pub image: Mat,
    pub lines: usize,
}

/// Draws random subsamples of the correspondences.
///
/// Colours come from a generator seeded with [`COLOR_SEED`] (or a given seed) and continue
/// across redraws. The subsample walk comes from `strides`, which the binary seeds from
/// the wall clock.
pub struct Renderer<R: Rng> {
    colors: StdRng,
    strides: R,
    shown: usize,
}

impl<R: Rng> Renderer<R> {
    pub fn new(strides: R) -> Self {
        Self::with_color_seed(strides, COLOR_SEED)
    }

    pub fn with_color_seed(strides: R, color_seed: u64) -> Self {
        Self {
            colors: StdRng::seed_from_u64(color_seed),
            strides,
            shown: DEFAULT_SHOWN,
        }
    }

    /// Sets the approximate number of lines per frame, zero is treated as one.
    pub fn shown(mut self, shown: usize) -> Self {
        self.shown = shown.max(1);
        self
    }

    /// Largest index step taken while walking `count` correspondences, never zero.
    /// ```
    /// # use libcollider::prelude::*;
    /// let r = Renderer::new(rand::thread_rng());
    /// assert_eq!(r.stride(1000), 20);
    /// assert_eq!(r.stride(150), 2);
    /// assert_eq!(r.stride(42), 1);
    /// ```
    pub fn stride(&self, count: usize) -> usize {
        (count / self.shown * 2).max(1)
    }

    pub fn next_color(&mut self) -> Scalar {
        Scalar::new(
            self.colors.gen_range(0..255) as f64,
            self.colors.gen_range(0..255) as f64,
            self.colors.gen_range(0..255) as f64,
            0.0,
        )
    }

    /// Draws a fresh subsample on a copy of `canvas`.
    ///
    /// The walk starts at index 0 and advances by a random draw in `[1, stride]`, so every
    /// frame shows a different subset of roughly `shown` lines.
    pub fn render(
        &mut self,
        canvas: &Canvas,
        corr: &[Correspondence],
    ) -> Result<Frame, ViewerError> {
        let mut image = canvas.image().try_clone()?;
        let step = self.stride(corr.len());
        let mut lines = 0_usize;
        let mut index = 0_usize;

        while index < corr.len() {
            let (a, b) = corr[index];
            let b = Point::new(b.x + canvas.offset(), b.y);
            let color = self.next_color();
            imgproc::line(&mut image, a, b, color, 1, imgproc::LINE_8, 0)?;
            lines += 1;
            index += self.strides.gen_range(1..=step);
        }
        Ok(Frame { image, lines })
    }
}

/// What a key press does to the viewer loop
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Redraw,
    Exit,
}

impl KeyAction {
    /// ```
    /// # use libcollider::prelude::*;
    /// assert_eq!(KeyAction::from_key('n' as i32), KeyAction::Redraw);
    /// assert_eq!(KeyAction::from_key('N' as i32), KeyAction::Redraw);
    /// assert_eq!(KeyAction::from_key(27), KeyAction::Exit);
    /// ```
    pub fn from_key(code: i32) -> Self {
        if code == 'n' as i32 || code == 'N' as i32 {
            KeyAction::Redraw
        } else {
            KeyAction::Exit
        }
    }
}

/// A display the viewer can show frames on and read keys from.
pub trait Surface {
    fn show(&mut self, frame: &Mat) -> Result<(), ViewerError>;

    /// Blocks until a key is pressed and returns its code
    fn wait_key(&mut self) -> Result<i32, ViewerError>;
}

/// A HighGUI window
pub struct HighGuiWindow {
    name: String,
}

impl HighGuiWindow {
    pub fn open(name: &str) -> Result<Self, ViewerError> {
        highgui::named_window(name, highgui::WINDOW_AUTOSIZE)?;
        Ok(Self {
            name: name.to_string(),
        })
    }
}

impl Surface for HighGuiWindow {
    fn show(&mut self, frame: &Mat) -> Result<(), ViewerError> {
        highgui::imshow(&self.name, frame)?;
        Ok(())
    }

    fn wait_key(&mut self) -> Result<i32, ViewerError> {
        Ok(highgui::wait_key(0)?)
    }
}

impl Drop for HighGuiWindow {
    fn drop(&mut self) {
        let _ = highgui::destroy_window(&self.name);
    }
}

/// Persists the last frame of a session
pub trait FrameWriter {
    fn write(&mut self, path: &Path, frame: &Mat) -> Result<(), ViewerError>;
}

/// Writes frames with `imgcodecs`, the format follows the file extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFileWriter;

impl FrameWriter for ImageFileWriter {
    fn write(&mut self, path: &Path, frame: &Mat) -> Result<(), ViewerError> {
        utils::imwrite(path, frame)
    }
}

/// Summary of a finished viewer session
pub struct Session {
    /// The frame on screen when the session ended
    pub last_frame: Mat,
    /// Frames drawn, the first one included
    pub frames: usize,
    /// Where `last_frame` was written, if anywhere
    pub saved: Option<PathBuf>,
}

/// The redraw/exit loop
pub struct Viewer<R: Rng> {
    renderer: Renderer<R>,
    output: Option<PathBuf>,
}

impl<R: Rng> Viewer<R> {
    pub fn new(renderer: Renderer<R>, output: Option<PathBuf>) -> Self {
        Self { renderer, output }
    }

    /// Shows subsamples until a key other than `n`/`N` is pressed, then writes the last
    /// frame once if an output path was given.
    pub fn run<S, W>(
        &mut self,
        canvas: &Canvas,
        corr: &[Correspondence],
        surface: &mut S,
        writer: &mut W,
    ) -> Result<Session, ViewerError>
    where
        S: Surface,
        W: FrameWriter,
    {
        info!(
            "Only about {} points are shown, press N to show others, press other keys to exit!",
            self.renderer.shown
        );

        let mut frames = 0_usize;
        let last_frame = loop {
            let frame = self.renderer.render(canvas, corr)?;
            frames += 1;
            debug!("frame {} has {} lines", frames, frame.lines);
            surface.show(&frame.image)?;
            match KeyAction::from_key(surface.wait_key()?) {
                KeyAction::Redraw => continue,
                KeyAction::Exit => break frame.image,
            }
        };

        let saved = match &self.output {
            Some(path) => {
                writer.write(path, &last_frame)?;
                info!("Wrote {:?}", path);
                Some(path.clone())
            }
            None => None,
        };

        Ok(Session {
            last_frame,
            frames,
            saved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{CV_8UC3, Vec3b};
    use std::collections::VecDeque;

    fn solid(rows: i32, cols: i32, v: f64) -> Mat {
        Mat::new_rows_cols_with_default(rows, cols, CV_8UC3, Scalar::all(v)).unwrap()
    }

    fn diagonal(count: i32) -> Vec<Correspondence> {
        (0..count)
            .map(|i| (Point::new(i % 40, i % 30), Point::new(i % 25, i % 30)))
            .collect()
    }

    struct ScriptedSurface {
        keys: VecDeque<i32>,
        shown: usize,
    }

    impl ScriptedSurface {
        fn new(keys: &[i32]) -> Self {
            Self {
                keys: keys.iter().copied().collect(),
                shown: 0,
            }
        }
    }

    impl Surface for ScriptedSurface {
        fn show(&mut self, _frame: &Mat) -> Result<(), ViewerError> {
            self.shown += 1;
            Ok(())
        }

        fn wait_key(&mut self) -> Result<i32, ViewerError> {
            self.keys
                .pop_front()
                .ok_or_else(|| ViewerError::InvalidParams("out of keys".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        writes: Vec<(PathBuf, Vec<u8>)>,
    }

    impl FrameWriter for RecordingWriter {
        fn write(&mut self, path: &Path, frame: &Mat) -> Result<(), ViewerError> {
            self.writes
                .push((path.to_path_buf(), frame.data_bytes()?.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn canvas_pads_shorter_second_image() {
        let canvas = Canvas::compose(&solid(30, 40, 10.0), &solid(20, 25, 200.0)).unwrap();
        assert_eq!(canvas.size().unwrap(), Size::new(65, 30));
        assert_eq!(canvas.offset(), 40);
        assert_eq!(*canvas.image().at_2d::<Vec3b>(10, 50).unwrap(), Vec3b::all(200));
        assert_eq!(*canvas.image().at_2d::<Vec3b>(25, 50).unwrap(), Vec3b::all(0));
        assert_eq!(*canvas.image().at_2d::<Vec3b>(25, 5).unwrap(), Vec3b::all(10));
    }

    #[test]
    fn canvas_rejects_mixed_types() {
        let grey =
            Mat::new_rows_cols_with_default(10, 10, core::CV_8UC1, Scalar::all(0.0)).unwrap();
        assert!(Canvas::compose(&solid(10, 10, 0.0), &grey).is_err());
    }

    #[test]
    fn colors_repeat_for_the_same_seed() {
        let mut a = Renderer::new(StdRng::seed_from_u64(1));
        let mut b = Renderer::new(StdRng::seed_from_u64(2));
        for _ in 0..50 {
            assert_eq!(a.next_color(), b.next_color());
        }
        let mut a = Renderer::new(StdRng::seed_from_u64(1));
        let mut c = Renderer::with_color_seed(StdRng::seed_from_u64(1), 7);
        assert!((0..50).any(|_| a.next_color() != c.next_color()));
    }

    #[test]
    fn seeded_renderers_draw_identical_frames() {
        let canvas = Canvas::compose(&solid(30, 40, 0.0), &solid(30, 25, 0.0)).unwrap();
        let corr = diagonal(1000);
        let mut a = Renderer::new(StdRng::seed_from_u64(99));
        let mut b = Renderer::new(StdRng::seed_from_u64(99));
        let fa = a.render(&canvas, &corr).unwrap();
        let fb = b.render(&canvas, &corr).unwrap();
        assert_eq!(fa.lines, fb.lines);
        assert_eq!(
            fa.image.data_bytes().unwrap(),
            fb.image.data_bytes().unwrap()
        );
    }

    #[test]
    fn subsample_size_follows_stride() {
        let canvas = Canvas::compose(&solid(30, 40, 0.0), &solid(30, 25, 0.0)).unwrap();
        let corr = diagonal(1000);
        let mut r = Renderer::new(StdRng::seed_from_u64(3));
        for _ in 0..10 {
            let frame = r.render(&canvas, &corr).unwrap();
            // steps are drawn from [1, 20]
            assert!(frame.lines >= 50 && frame.lines <= 1000, "{}", frame.lines);
        }
        let few = diagonal(5);
        let frame = r.render(&canvas, &few).unwrap();
        assert_eq!(frame.lines, 5);
    }

    #[test]
    fn no_correspondences_leaves_canvas_untouched() {
        let canvas = Canvas::compose(&solid(30, 40, 3.0), &solid(30, 25, 4.0)).unwrap();
        let mut r = Renderer::new(StdRng::seed_from_u64(0));
        let frame = r.render(&canvas, &[]).unwrap();
        assert_eq!(frame.lines, 0);
        assert_eq!(
            frame.image.data_bytes().unwrap(),
            canvas.image().data_bytes().unwrap()
        );
    }

    #[test]
    fn redraw_keys_keep_the_loop_running() {
        let canvas = Canvas::compose(&solid(30, 40, 0.0), &solid(30, 25, 0.0)).unwrap();
        let corr = diagonal(300);
        let mut keys = vec!['n' as i32; 25];
        keys.extend(['N' as i32; 25]);
        keys.push('q' as i32);
        keys.push('q' as i32);
        let mut surface = ScriptedSurface::new(&keys);
        let mut writer = RecordingWriter::default();
        let mut viewer = Viewer::new(Renderer::new(StdRng::seed_from_u64(5)), None);

        let session = viewer
            .run(&canvas, &corr, &mut surface, &mut writer)
            .unwrap();
        assert_eq!(session.frames, 51);
        assert_eq!(surface.shown, 51);
        // the second 'q' is never read
        assert_eq!(surface.keys.len(), 1);
        assert!(session.saved.is_none());
        assert!(writer.writes.is_empty());
    }

    #[test]
    fn output_is_written_once_with_the_last_frame() {
        let canvas = Canvas::compose(&solid(30, 40, 0.0), &solid(30, 25, 0.0)).unwrap();
        let corr = diagonal(300);
        let out = PathBuf::from("last_frame.png");
        let mut surface = ScriptedSurface::new(&['n' as i32, 'n' as i32, 27]);
        let mut writer = RecordingWriter::default();
        let mut viewer = Viewer::new(
            Renderer::new(StdRng::seed_from_u64(11)),
            Some(out.clone()),
        );

        let session = viewer
            .run(&canvas, &corr, &mut surface, &mut writer)
            .unwrap();
        assert_eq!(session.frames, 3);
        assert_eq!(session.saved.as_deref(), Some(out.as_path()));
        assert_eq!(writer.writes.len(), 1);
        assert_eq!(writer.writes[0].0, out);
        assert_eq!(
            writer.writes[0].1.as_slice(),
            session.last_frame.data_bytes().unwrap()
        );
    }

    #[test]
    fn image_file_writer_stores_the_last_frame() {
        let canvas = Canvas::compose(&solid(30, 40, 0.0), &solid(30, 25, 0.0)).unwrap();
        let corr = diagonal(300);
        let out = std::env::temp_dir().join(format!(
            "libcollider_{}_session.png",
            std::process::id()
        ));
        let mut surface = ScriptedSurface::new(&['n' as i32, 'x' as i32]);
        let mut viewer = Viewer::new(
            Renderer::new(StdRng::seed_from_u64(21)),
            Some(out.clone()),
        );

        let session = viewer
            .run(&canvas, &corr, &mut surface, &mut ImageFileWriter)
            .unwrap();
        let written = utils::imread(&out, opencv::imgcodecs::IMREAD_COLOR).unwrap();
        std::fs::remove_file(&out).unwrap();
        assert_eq!(
            written.data_bytes().unwrap(),
            session.last_frame.data_bytes().unwrap()
        );
    }
}
