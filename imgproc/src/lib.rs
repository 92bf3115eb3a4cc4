//! Image preprocessing used by the cascade scanner: resampling and
//! summed-area tables.

pub mod integral;
pub mod resize;

pub use integral::*;
pub use resize::*;

pub type Result<T> = std::result::Result<T, ImgprocError>;

#[derive(Debug, thiserror::Error)]
pub enum ImgprocError {
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Allocation failed: {0}")]
    AllocationFailed(String),
}

pub fn validate_image_size(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(ImgprocError::DimensionMismatch(
            "Image dimensions must be non-zero".into(),
        ));
    }
    Ok(())
}

/// Number of pixels in a `width` x `height` plane, rejecting sizes that
/// overflow `usize`.
pub fn plane_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| {
            ImgprocError::DimensionMismatch(format!("{width}x{height} plane overflows usize"))
        })
}

/// Grow `buf` to exactly `len` elements without aborting on allocation failure.
pub(crate) fn ensure_len<T: Copy + Default>(buf: &mut Vec<T>, len: usize) -> Result<()> {
    ensure_capacity(buf, len)?;
    buf.resize(len, T::default());
    Ok(())
}

/// Reserve room for at least `capacity` elements in total, reporting
/// allocation failure instead of aborting.
pub fn ensure_capacity<T>(buf: &mut Vec<T>, capacity: usize) -> Result<()> {
    if buf.capacity() < capacity {
        buf.try_reserve_exact(capacity - buf.len())
            .map_err(|e| ImgprocError::AllocationFailed(format!("{capacity} elements: {e}")))?;
    }
    Ok(())
}
