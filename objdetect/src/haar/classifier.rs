use super::{
    CascadeStage, HaarCascade, HaarFeature, STAGE_THRESHOLD_RELAXATION, WEIGHT_FIXED_POINT_SHIFT,
};
use cv_imgproc::IntegralImage;

/// Result of running the cascade on one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeOutcome {
    Accept,
    /// Rejected by the stage at this index; later stages were not evaluated.
    Reject(usize),
}

impl CascadeOutcome {
    pub fn is_accept(&self) -> bool {
        matches!(self, CascadeOutcome::Accept)
    }
}

impl HaarFeature {
    /// Vote of this feature for the window whose top-left corner is at
    /// `(x, y)` in `integral`.
    ///
    /// Rectangle weights carry 12 fractional bits; the stored
    /// threshold is scaled by the window's `std_proxy`. Sums are kept in
    /// `i128`, so no combination of pixel data and model values wraps.
    #[inline]
    pub fn evaluate(&self, integral: &IntegralImage, x: usize, y: usize, std_proxy: u64) -> i16 {
        let threshold = self.threshold as i128 * std_proxy as i128;

        let mut sum = 0i128;
        for r in &self.rects {
            let rect_sum = integral.rect_sum(
                x + r.x as usize,
                y + r.y as usize,
                r.width as usize,
                r.height as usize,
            ) as i128;
            sum += rect_sum * ((r.weight as i128) << WEIGHT_FIXED_POINT_SHIFT);
        }

        if sum >= threshold {
            self.alpha_high
        } else {
            self.alpha_low
        }
    }
}

impl CascadeStage {
    /// Sum of the votes of every feature in the stage.
    pub fn sum(&self, integral: &IntegralImage, x: usize, y: usize, std_proxy: u64) -> i32 {
        self.features
            .iter()
            .map(|f| f.evaluate(integral, x, y, std_proxy) as i32)
            .sum()
    }

    pub fn passes(&self, stage_sum: i32) -> bool {
        stage_sum as f32 >= STAGE_THRESHOLD_RELAXATION * self.threshold as f32
    }
}

impl HaarCascade {
    /// Vote of the feature at global index `tree_index`, or `None` if the
    /// cascade has fewer features.
    pub fn evaluate_feature(
        &self,
        tree_index: usize,
        integral: &IntegralImage,
        x: usize,
        y: usize,
        std_proxy: u64,
    ) -> Option<i16> {
        self.feature(tree_index)
            .map(|f| f.evaluate(integral, x, y, std_proxy))
    }

    /// Run every stage on the window at `(x, y)`.
    pub fn run(&self, integral: &IntegralImage, x: usize, y: usize, std_proxy: u64) -> CascadeOutcome {
        self.run_from(integral, x, y, std_proxy, 0)
    }

    /// Run stages `start_stage..` on the window at `(x, y)`, stopping at the
    /// first stage whose sum falls below its relaxed threshold.
    ///
    /// Starting past the last stage accepts the window.
    pub fn run_from(
        &self,
        integral: &IntegralImage,
        x: usize,
        y: usize,
        std_proxy: u64,
        start_stage: usize,
    ) -> CascadeOutcome {
        for (i, stage) in self.stages().iter().enumerate().skip(start_stage) {
            let stage_sum = stage.sum(integral, x, y, std_proxy);
            if !stage.passes(stage_sum) {
                return CascadeOutcome::Reject(i);
            }
        }
        CascadeOutcome::Accept
    }
}
