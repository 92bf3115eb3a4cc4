use crate::{ensure_len, plane_len, validate_image_size, Result};
use image::GrayImage;

/// Summed-area table with a leading row and column of zeros.
///
/// For an image of `width` x `height` the table is `(width + 1)` x
/// `(height + 1)`; entry `(x, y)` holds the sum of all pixels strictly above
/// and to the left of `(x, y)`. Entries are `u64`, so sums are exact for any
/// plane that fits in memory.
#[derive(Debug, Clone, Default)]
pub struct IntegralImage {
    data: Vec<u64>,
    width: u32,
    height: u32,
}

impl IntegralImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty table with storage reserved for a `width` x `height` image.
    pub fn with_capacity(width: u32, height: u32) -> Result<Self> {
        let len = (width as usize + 1)
            .checked_mul(height as usize + 1)
            .ok_or_else(|| {
                crate::ImgprocError::DimensionMismatch(format!(
                    "{width}x{height} table overflows usize"
                ))
            })?;
        let mut integral = Self::new();
        crate::ensure_capacity(&mut integral.data, len)?;
        Ok(integral)
    }

    pub fn compute(src: &GrayImage) -> Result<Self> {
        let mut integral = Self::new();
        integral.compute_from(src.as_raw(), src.width(), src.height())?;
        Ok(integral)
    }

    /// Rebuild the table for a row-major plane, reusing the allocation.
    pub fn compute_from(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<()> {
        validate_image_size(width, height)?;
        let len = plane_len(width, height)?;
        if pixels.len() < len {
            return Err(crate::ImgprocError::DimensionMismatch(format!(
                "{} pixels supplied for a {width}x{height} plane",
                pixels.len()
            )));
        }

        let w = width as usize;
        let stride = w + 1;
        let table_len = stride.checked_mul(height as usize + 1).ok_or_else(|| {
            crate::ImgprocError::DimensionMismatch(format!("{width}x{height} table overflows usize"))
        })?;
        ensure_len(&mut self.data, table_len)?;
        self.data[..stride].fill(0);

        for (y, row) in pixels[..len].chunks_exact(w).enumerate() {
            let base = (y + 1) * stride;
            self.data[base] = 0;
            let mut row_sum = 0u64;
            for (x, &p) in row.iter().enumerate() {
                row_sum += p as u64;
                self.data[base + x + 1] = self.data[base - stride + x + 1] + row_sum;
            }
        }

        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Width of the source image (the table is one wider).
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.width as usize + 1
    }

    pub fn as_slice(&self) -> &[u64] {
        let len = self.stride() * (self.height as usize + 1);
        &self.data[..len.min(self.data.len())]
    }

    /// Table entry at corner `(x, y)`, `0 <= x <= width`, `0 <= y <= height`.
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> u64 {
        self.data[y * self.stride() + x]
    }

    /// Pixel sum over `x..x + w` by `y..y + h` via four-corner inclusion-exclusion.
    ///
    /// The rectangle must lie within the image. Zero-area rectangles sum to zero.
    #[inline]
    pub fn rect_sum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        let stride = self.stride();
        let top = y * stride;
        let bottom = (y + h) * stride;
        // Both column differences are prefix sums over x..x + w, bottom >= top.
        (self.data[bottom + x + w] - self.data[bottom + x])
            - (self.data[top + x + w] - self.data[top + x])
    }
}
