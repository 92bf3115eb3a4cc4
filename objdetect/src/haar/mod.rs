//! Haar Cascade Object Detection
//!
//! Implementation of the Viola-Jones object detection framework using
//! Haar-like features and boosted cascades, evaluated entirely in integer
//! arithmetic.
//!
//! The cascade is an owned tree: a [`HaarCascade`] holds ordered
//! [`CascadeStage`]s, each stage holds its [`HaarFeature`]s (weak
//! classifiers), and each feature holds its [`WeightedRect`]s. The binary
//! model file stores the same tree as flat arrays plus per-level counts;
//! [`CascadeLoader`] rebuilds the tree and [`HaarCascade::write_to`] flattens
//! it again.

mod classifier;
mod loader;
mod params;
mod scanner;
mod stats;

#[cfg(test)]
mod haar_test;

pub use classifier::*;
pub use loader::*;
pub use params::*;
pub use scanner::*;
pub use stats::*;

use crate::{ObjdetectError, Rect, Result};
use image::GrayImage;

/// Rectangle weights are promoted to fixed point with 12 fractional bits
/// before being multiplied with rectangle sums.
pub const WEIGHT_FIXED_POINT_SHIFT: u32 = 12;

/// Stage sums are compared against this fraction of the stored stage
/// threshold.
pub const STAGE_THRESHOLD_RELAXATION: f32 = 0.4;

/// Size of the fixed detection window, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl WindowSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// One weighted rectangle of a Haar-like feature, in window coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedRect {
    pub x: i16,
    pub y: i16,
    pub width: i16,
    pub height: i16,
    pub weight: i16,
}

impl WeightedRect {
    pub fn new(x: i16, y: i16, width: i16, height: i16, weight: i16) -> Self {
        Self {
            x,
            y,
            width,
            height,
            weight,
        }
    }

    fn fits(&self, window: WindowSize) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.width >= 0
            && self.height >= 0
            && self.x as u32 + self.width as u32 <= window.width
            && self.y as u32 + self.height as u32 <= window.height
    }
}

/// A single weak classifier ("tree"): weighted rectangle sums compared
/// against a threshold scaled by the window's standard-deviation proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaarFeature {
    /// Rectangles and their weights (positive/negative contributions)
    pub rects: Vec<WeightedRect>,
    /// Threshold before scaling by the window statistic
    pub threshold: i16,
    /// Vote if the weighted sum is below the scaled threshold
    pub alpha_low: i16,
    /// Vote if the weighted sum is at or above the scaled threshold
    pub alpha_high: i16,
}

/// A stage of the cascade. The window is rejected if the summed votes of its
/// features fall below the relaxed stage threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeStage {
    pub threshold: i16,
    pub features: Vec<HaarFeature>,
}

/// A loaded Haar cascade classifier.
///
/// Immutable once built: detection only ever borrows it, so one instance can
/// serve concurrent detection calls.
///
/// ```no_run
/// # use cv_objdetect::haar::CascadeLoader;
/// # use image::GrayImage;
/// let cascade = CascadeLoader::new().load_file("frontalface.cascade")?;
/// let image = GrayImage::new(320, 240);
/// let faces = cascade.detect(&image)?;
/// # Ok::<(), cv_objdetect::ObjdetectError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HaarCascade {
    window: WindowSize,
    params: CascadeParams,
    stages: Vec<CascadeStage>,
}

impl HaarCascade {
    /// Build a cascade from an explicit stage tree.
    ///
    /// Applies the same structural checks as the loader, including the limits
    /// imposed by the binary format, so every cascade can be written back out.
    pub fn from_stages(
        window: WindowSize,
        stages: Vec<CascadeStage>,
        params: CascadeParams,
    ) -> Result<Self> {
        params.validate()?;

        if window.width == 0
            || window.height == 0
            || window.width > i32::MAX as u32
            || window.height > i32::MAX as u32
        {
            return Err(ObjdetectError::MalformedModel(format!(
                "window {}x{} must be positive and fit in i32",
                window.width, window.height
            )));
        }
        if stages.len() > i32::MAX as usize {
            return Err(ObjdetectError::MalformedModel(format!(
                "{} stages exceed the format limit",
                stages.len()
            )));
        }

        for (s, stage) in stages.iter().enumerate() {
            if stage.features.len() > u8::MAX as usize {
                return Err(ObjdetectError::MalformedModel(format!(
                    "stage {s} has {} features, at most {} allowed",
                    stage.features.len(),
                    u8::MAX
                )));
            }
            for (f, feature) in stage.features.iter().enumerate() {
                if feature.rects.len() > i16::MAX as usize {
                    return Err(ObjdetectError::MalformedModel(format!(
                        "stage {s} feature {f} has {} rectangles",
                        feature.rects.len()
                    )));
                }
                if let Some(r) = feature.rects.iter().find(|r| !r.fits(window)) {
                    return Err(ObjdetectError::MalformedModel(format!(
                        "stage {s} feature {f} rectangle {:?} lies outside the {}x{} window",
                        r, window.width, window.height
                    )));
                }
            }
        }

        Ok(Self {
            window,
            params,
            stages,
        })
    }

    pub fn window(&self) -> WindowSize {
        self.window
    }

    pub fn params(&self) -> CascadeParams {
        self.params
    }

    pub fn scale_factor(&self) -> f32 {
        self.params.scale_factor
    }

    pub fn step(&self) -> u32 {
        self.params.step
    }

    /// The same cascade with different scan parameters.
    pub fn with_params(self, params: CascadeParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params, ..self })
    }

    pub fn stages(&self) -> &[CascadeStage] {
        &self.stages
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// All features in evaluation order, across stages.
    pub fn features(&self) -> impl Iterator<Item = &HaarFeature> + '_ {
        self.stages.iter().flat_map(|s| s.features.iter())
    }

    /// Feature by its global (cross-stage) index.
    pub fn feature(&self, tree_index: usize) -> Option<&HaarFeature> {
        self.features().nth(tree_index)
    }

    pub fn feature_count(&self) -> usize {
        self.stages.iter().map(|s| s.features.len()).sum()
    }

    pub fn rectangle_count(&self) -> usize {
        self.features().map(|f| f.rects.len()).sum()
    }

    pub fn stage_feature_counts(&self) -> Vec<u8> {
        self.stages.iter().map(|s| s.features.len() as u8).collect()
    }

    pub fn stage_thresholds(&self) -> Vec<i16> {
        self.stages.iter().map(|s| s.threshold).collect()
    }

    pub fn tree_thresholds(&self) -> Vec<i16> {
        self.features().map(|f| f.threshold).collect()
    }

    pub fn tree_alpha_low(&self) -> Vec<i16> {
        self.features().map(|f| f.alpha_low).collect()
    }

    pub fn tree_alpha_high(&self) -> Vec<i16> {
        self.features().map(|f| f.alpha_high).collect()
    }

    pub fn tree_rectangle_counts(&self) -> Vec<i16> {
        self.features().map(|f| f.rects.len() as i16).collect()
    }

    pub fn rectangle_weights(&self) -> Vec<i16> {
        self.features()
            .flat_map(|f| f.rects.iter().map(|r| r.weight))
            .collect()
    }

    /// Rectangle geometry as consecutive `x, y, width, height` quadruples.
    pub fn rectangle_geometry(&self) -> Vec<i16> {
        self.features()
            .flat_map(|f| f.rects.iter().flat_map(|r| [r.x, r.y, r.width, r.height]))
            .collect()
    }

    /// Detect objects with the cascade's own scan parameters, merging
    /// overlapping hits.
    pub fn detect(&self, image: &GrayImage) -> Result<Vec<Rect>> {
        MultiScaleScanner::new(self).detect(image)
    }

    /// [`detect`](Self::detect) over several images in parallel.
    pub fn detect_batch(&self, images: &[GrayImage]) -> Vec<Result<Vec<Rect>>> {
        MultiScaleScanner::new(self).detect_batch(images)
    }
}
