use super::WindowSize;
use cv_imgproc::IntegralImage;

/// Normalization statistics of one candidate window.
///
/// `mean` is the raw pixel sum of the window (not divided by its area) and
/// `std_proxy` is `sqrt(sum_sq * area - mean^2)`. Both carry the same
/// un-normalized scale as the feature thresholds they are compared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStatistics {
    pub mean: u64,
    pub sum_sq: u64,
    pub std_proxy: u64,
}

impl WindowStatistics {
    /// Statistics of the window at `(x, y)` in a plane of row stride
    /// `stride`, with `integral` built from the same plane.
    pub fn compute(
        pixels: &[u8],
        stride: usize,
        integral: &IntegralImage,
        x: usize,
        y: usize,
        window: WindowSize,
    ) -> Self {
        let (w, h) = (window.width as usize, window.height as usize);
        let mean = integral.rect_sum(x, y, w, h);
        let sum_sq = sum_of_squares(pixels, stride, x, y, w, h);

        let spread = (sum_sq as u128 * window.area() as u128)
            .saturating_sub(mean as u128 * mean as u128);
        let std_proxy = fast_isqrt(spread);

        Self {
            mean,
            sum_sq,
            std_proxy,
        }
    }
}

/// Sum of squared pixel values over a rectangle, two samples per step.
pub fn sum_of_squares(pixels: &[u8], stride: usize, x: usize, y: usize, w: usize, h: usize) -> u64 {
    let mut sum_sq = 0u64;
    for row in pixels[y * stride..].chunks(stride).take(h) {
        let mut pairs = row[x..x + w].chunks_exact(2);
        for pair in &mut pairs {
            let (a, b) = (pair[0] as u32, pair[1] as u32);
            sum_sq += (a * a + b * b) as u64;
        }
        if let [last] = pairs.remainder() {
            sum_sq += (*last as u64) * (*last as u64);
        }
    }
    sum_sq
}

/// Integer square root: a floating-point estimate corrected to the exact floor.
///
/// Monotonic in its input and exact for every `u128`.
pub fn fast_isqrt(value: u128) -> u64 {
    if value == 0 {
        return 0;
    }
    // `as u64` saturates, and u64::MAX squared still fits in u128.
    let mut root = (value as f64).sqrt() as u64;
    while (root as u128) * (root as u128) > value {
        root -= 1;
    }
    while root < u64::MAX && (root as u128 + 1) * (root as u128 + 1) <= value {
        root += 1;
    }
    root
}
