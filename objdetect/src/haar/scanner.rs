use super::{HaarCascade, WindowSize, WindowStatistics};
use crate::merge::{DetectionMerger, OverlapMerger};
use crate::{ObjdetectError, Rect, Result};
use cv_imgproc::{ensure_capacity, plane_len, resize_into, IntegralImage};
use image::GrayImage;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Size of one pyramid level, before it is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelGeometry {
    /// Source size divided by level size; 1.0 for the first level.
    pub factor: f32,
    pub width: u32,
    pub height: u32,
}

impl LevelGeometry {
    /// Level-to-source scale, at most 1.0.
    pub fn scale(&self) -> f32 {
        1.0 / self.factor
    }

    /// Map a window at level coordinates `(x, y)` back to the source image,
    /// rounding to the nearest pixel.
    pub fn to_source(&self, x: usize, y: usize, window: WindowSize) -> Rect {
        Rect::new(
            (x as f32 * self.factor).round() as i32,
            (y as f32 * self.factor).round() as i32,
            (window.width as f32 * self.factor).round() as i32,
            (window.height as f32 * self.factor).round() as i32,
        )
    }
}

/// The sequence of pyramid levels scanned for a given source and window.
///
/// Levels shrink by `scale_factor` each step; the first level whose width or
/// height is not larger than the window ends the sequence.
#[derive(Debug, Clone)]
pub struct PyramidPlan {
    source_width: u32,
    source_height: u32,
    window: WindowSize,
    scale_factor: f32,
    factor: f32,
    done: bool,
}

impl PyramidPlan {
    pub fn new(source_width: u32, source_height: u32, window: WindowSize, scale_factor: f32) -> Self {
        Self {
            source_width,
            source_height,
            window,
            scale_factor,
            factor: 1.0,
            done: !(scale_factor.is_finite() && scale_factor > 1.0),
        }
    }
}

impl Iterator for PyramidPlan {
    type Item = LevelGeometry;

    fn next(&mut self) -> Option<LevelGeometry> {
        if self.done {
            return None;
        }
        let width = (self.source_width as f32 / self.factor) as u32;
        let height = (self.source_height as f32 / self.factor) as u32;
        if width <= self.window.width || height <= self.window.height {
            self.done = true;
            return None;
        }

        let level = LevelGeometry {
            factor: self.factor,
            width,
            height,
        };
        self.factor *= self.scale_factor;
        Some(level)
    }
}

/// One built pyramid level: the resized image and its integral image,
/// borrowed from a [`ScanScratch`].
#[derive(Debug, Clone, Copy)]
pub struct PyramidLevel<'a> {
    pub geometry: LevelGeometry,
    pub pixels: &'a [u8],
    pub integral: &'a IntegralImage,
}

/// Working memory for one detection call: a level image buffer and an
/// integral image buffer, rebuilt in place for every pyramid level.
#[derive(Debug, Default)]
pub struct ScanScratch {
    level: Vec<u8>,
    integral: IntegralImage,
}

impl ScanScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scratch with capacity for every level of a `width` x `height` source.
    pub fn for_image(width: u32, height: u32) -> Result<Self> {
        let mut level = Vec::new();
        ensure_capacity(&mut level, plane_len(width, height)?)?;
        Ok(Self {
            level,
            integral: IntegralImage::with_capacity(width, height)?,
        })
    }

    /// Resize `source` to `geometry` (nearest neighbour) and rebuild the
    /// integral image. The previous level is overwritten.
    pub fn build_level(&mut self, source: &GrayImage, geometry: LevelGeometry) -> Result<PyramidLevel<'_>> {
        resize_into(source, &mut self.level, geometry.width, geometry.height)?;
        self.integral
            .compute_from(&self.level, geometry.width, geometry.height)?;

        Ok(PyramidLevel {
            geometry,
            pixels: &self.level,
            integral: &self.integral,
        })
    }
}

/// Slides the cascade window over every level of an image pyramid.
pub struct MultiScaleScanner<'c, M = OverlapMerger> {
    cascade: &'c HaarCascade,
    merger: M,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'c> MultiScaleScanner<'c> {
    pub fn new(cascade: &'c HaarCascade) -> Self {
        Self {
            cascade,
            merger: OverlapMerger,
            cancel: None,
        }
    }
}

impl<'c, M: DetectionMerger> MultiScaleScanner<'c, M> {
    pub fn with_merger<N: DetectionMerger>(self, merger: N) -> MultiScaleScanner<'c, N> {
        MultiScaleScanner {
            cascade: self.cascade,
            merger,
            cancel: self.cancel,
        }
    }

    /// Abort with [`ObjdetectError::Cancelled`] once `flag` is raised. The
    /// flag is polled before each pyramid level.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn cascade(&self) -> &HaarCascade {
        self.cascade
    }

    /// Levels that [`detect`](Self::detect) scans for a `width` x `height` image.
    pub fn plan(&self, width: u32, height: u32) -> PyramidPlan {
        PyramidPlan::new(
            width,
            height,
            self.cascade.window(),
            self.cascade.scale_factor(),
        )
    }

    pub fn detect(&self, image: &GrayImage) -> Result<Vec<Rect>> {
        let mut scratch = ScanScratch::for_image(image.width(), image.height())?;
        self.detect_with_scratch(image, &mut scratch)
    }

    /// Detect using caller-provided working memory, merging the raw hits once.
    pub fn detect_with_scratch(&self, image: &GrayImage, scratch: &mut ScanScratch) -> Result<Vec<Rect>> {
        let raw = self.detect_raw(image, scratch)?;
        Ok(self.merger.merge(raw))
    }

    /// Every accepted window, in source coordinates, before merging.
    pub fn detect_raw(&self, image: &GrayImage, scratch: &mut ScanScratch) -> Result<Vec<Rect>> {
        self.cascade.params().validate()?;

        let mut detections = Vec::new();
        let mut levels = self.plan(image.width(), image.height()).peekable();
        if levels.peek().is_none() {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                "Window {}x{} does not fit inside {}x{} image",
                self.cascade.window().width,
                self.cascade.window().height,
                image.width(),
                image.height()
            );
            return Ok(detections);
        }

        for geometry in levels {
            if self.is_cancelled() {
                return Err(ObjdetectError::Cancelled);
            }

            let level = scratch.build_level(image, geometry)?;
            #[cfg(feature = "tracing")]
            let before = detections.len();
            self.scan_level(&level, &mut detections);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                "Scanned level factor {:.3} ({}x{}): {} windows accepted",
                geometry.factor,
                geometry.width,
                geometry.height,
                detections.len() - before
            );
        }

        Ok(detections)
    }

    /// Slide the window over one built level, appending accepted windows in
    /// source coordinates to `out`.
    pub fn scan_level(&self, level: &PyramidLevel<'_>, out: &mut Vec<Rect>) {
        let window = self.cascade.window();
        let step = self.cascade.step().max(1) as usize;
        let (width, height) = (level.geometry.width as usize, level.geometry.height as usize);
        let (win_w, win_h) = (window.width as usize, window.height as usize);
        if width < win_w || height < win_h {
            return;
        }

        for y in (0..=height - win_h).step_by(step) {
            for x in (0..=width - win_w).step_by(step) {
                let stats =
                    WindowStatistics::compute(level.pixels, width, level.integral, x, y, window);
                if self
                    .cascade
                    .run(level.integral, x, y, stats.std_proxy)
                    .is_accept()
                {
                    out.push(level.geometry.to_source(x, y, window));
                }
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

impl<'c, M: DetectionMerger + Sync> MultiScaleScanner<'c, M> {
    /// Run independent detections over several images on the Rayon pool.
    ///
    /// Each image is scanned start to finish on one worker with its own
    /// scratch; the cascade is only read.
    pub fn detect_batch(&self, images: &[GrayImage]) -> Vec<Result<Vec<Rect>>> {
        images.par_iter().map(|image| self.detect(image)).collect()
    }
}
