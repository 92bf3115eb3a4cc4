use crate::{ensure_len, plane_len, validate_image_size, ImgprocError, Result};
use image::GrayImage;

/// Nearest-neighbour resize into a freshly allocated image.
pub fn resize(src: &GrayImage, width: u32, height: u32) -> Result<GrayImage> {
    let mut data = Vec::new();
    resize_into(src, &mut data, width, height)?;
    GrayImage::from_raw(width, height, data).ok_or_else(|| {
        ImgprocError::DimensionMismatch(format!("buffer does not hold {width}x{height} pixels"))
    })
}

/// Nearest-neighbour resize of `src` into `dst`, reusing its allocation.
///
/// Destination pixel `(x, y)` samples source pixel
/// `(floor(x * src_w / width), floor(y * src_h / height))`. On success `dst`
/// holds exactly `width * height` row-major pixels. Runs on the calling
/// thread.
pub fn resize_into(src: &GrayImage, dst: &mut Vec<u8>, width: u32, height: u32) -> Result<()> {
    validate_image_size(src.width(), src.height())?;
    validate_image_size(width, height)?;
    let len = plane_len(width, height)?;
    ensure_len(dst, len)?;

    let src_raw = src.as_raw();
    let src_w = src.width() as usize;
    let x_ratio = src.width() as f32 / width as f32;
    let y_ratio = src.height() as f32 / height as f32;

    // Column lookup is identical for every row.
    let columns: Vec<usize> = (0..width)
        .map(|x| ((x as f32 * x_ratio).floor() as usize).min(src_w - 1))
        .collect();

    for (y, row) in dst.chunks_exact_mut(width as usize).enumerate() {
        let sy = ((y as f32 * y_ratio).floor() as usize).min(src.height() as usize - 1);
        let src_row = &src_raw[sy * src_w..(sy + 1) * src_w];
        for (out, &sx) in row.iter_mut().zip(&columns) {
            *out = src_row[sx];
        }
    }
    Ok(())
}
