//! Binary cascade model format.
//!
//! Fields are stored back to back with no header or padding. All integers
//! are little-endian.
//!
//! | Field                          | Type  | Count              |
//! |--------------------------------|-------|--------------------|
//! | window width, height           | `i32` | 2                  |
//! | stage count                    | `i32` | 1                  |
//! | features per stage             | `u8`  | stages             |
//! | stage thresholds               | `i16` | stages             |
//! | feature thresholds             | `i16` | features           |
//! | feature alpha (low)            | `i16` | features           |
//! | feature alpha (high)           | `i16` | features           |
//! | rectangles per feature         | `i16` | features           |
//! | rectangle weights              | `i16` | rectangles         |
//! | rectangle x, y, width, height  | `i16` | 4 x rectangles     |
//!
//! `features` is the sum of the per-stage counts and `rectangles` the sum of
//! the per-feature counts.

use super::{CascadeParams, CascadeStage, HaarCascade, HaarFeature, WeightedRect, WindowSize};
use crate::{ObjdetectError, Result};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::Path;

/// Elements decoded per read; bounds the allocation made ahead of the bytes
/// actually arriving.
const READ_CHUNK_ELEMS: usize = 4096;

/// Reads a cascade model from a byte stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct CascadeLoader {
    params: CascadeParams,
}

impl CascadeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan parameters attached to every cascade this loader produces.
    pub fn with_params(mut self, params: CascadeParams) -> Self {
        self.params = params;
        self
    }

    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<HaarCascade> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            #[cfg(feature = "tracing")]
            tracing::warn!("Cannot open cascade {}: {}", path.display(), e);
            ObjdetectError::Io(e)
        })?;
        self.load(BufReader::new(file))
    }

    /// Decode a complete cascade. Either the whole model is returned or an
    /// error; nothing read so far outlives a failure.
    pub fn load<R: Read>(&self, reader: R) -> Result<HaarCascade> {
        let result = self.load_inner(&mut FieldReader::new(reader));

        #[cfg(feature = "tracing")]
        match &result {
            Ok(cascade) => tracing::debug!(
                "Loaded cascade: window {}x{}, {} stages, {} features, {} rectangles",
                cascade.window().width,
                cascade.window().height,
                cascade.stage_count(),
                cascade.feature_count(),
                cascade.rectangle_count()
            ),
            Err(e) => tracing::warn!("Rejected cascade model: {}", e),
        }

        result
    }

    fn load_inner<R: Read>(&self, input: &mut FieldReader<R>) -> Result<HaarCascade> {
        self.params.validate()?;

        let window = input.read_i32_array("window size", 2)?;
        let (width, height) = (window[0], window[1]);
        if width <= 0 || height <= 0 {
            return Err(ObjdetectError::MalformedModel(format!(
                "window size {width}x{height} must be positive"
            )));
        }
        let window = WindowSize::new(width as u32, height as u32);

        let n_stages = input.read_i32_array("stage count", 1)?[0];
        let n_stages = usize::try_from(n_stages).map_err(|_| {
            ObjdetectError::MalformedModel(format!("negative stage count {n_stages}"))
        })?;

        let stage_features = input.read_u8_array("stage feature counts", n_stages)?;
        let n_features = stage_features
            .iter()
            .try_fold(0usize, |acc, &n| acc.checked_add(n as usize))
            .ok_or_else(|| ObjdetectError::MalformedModel("feature count overflows".into()))?;

        let stage_thresholds = input.read_i16_array("stage thresholds", n_stages)?;
        let tree_thresholds = input.read_i16_array("feature thresholds", n_features)?;
        let alpha_low = input.read_i16_array("feature alpha low", n_features)?;
        let alpha_high = input.read_i16_array("feature alpha high", n_features)?;
        let rect_counts = input.read_i16_array("feature rectangle counts", n_features)?;

        let mut n_rects = 0usize;
        for (i, &count) in rect_counts.iter().enumerate() {
            let count = usize::try_from(count).map_err(|_| {
                ObjdetectError::MalformedModel(format!("feature {i} has {count} rectangles"))
            })?;
            n_rects = n_rects
                .checked_add(count)
                .ok_or_else(|| ObjdetectError::MalformedModel("rectangle count overflows".into()))?;
        }
        let n_coords = n_rects.checked_mul(4).ok_or_else(|| {
            ObjdetectError::MalformedModel(format!("{n_rects} rectangles overflow geometry size"))
        })?;

        let weights = input.read_i16_array("rectangle weights", n_rects)?;
        let geometry = input.read_i16_array("rectangle geometry", n_coords)?;

        let flat = FlatCascade {
            stage_features: &stage_features,
            stage_thresholds: &stage_thresholds,
            tree_thresholds: &tree_thresholds,
            alpha_low: &alpha_low,
            alpha_high: &alpha_high,
            rect_counts: &rect_counts,
            weights: &weights,
            geometry: &geometry,
        };
        HaarCascade::from_stages(window, flat.into_stages()?, self.params)
    }
}

/// The on-disk parallel arrays, borrowed while the stage tree is built.
struct FlatCascade<'a> {
    stage_features: &'a [u8],
    stage_thresholds: &'a [i16],
    tree_thresholds: &'a [i16],
    alpha_low: &'a [i16],
    alpha_high: &'a [i16],
    rect_counts: &'a [i16],
    weights: &'a [i16],
    geometry: &'a [i16],
}

impl FlatCascade<'_> {
    /// Walk the count arrays with a feature cursor and a rectangle cursor.
    /// Every index is checked so inconsistent counts surface as
    /// `MalformedModel` rather than a panic.
    fn into_stages(self) -> Result<Vec<CascadeStage>> {
        let malformed = |what: &str, index: usize| {
            ObjdetectError::MalformedModel(format!("{what} index {index} out of range"))
        };

        let feature_total = self.rect_counts.len();
        if self.tree_thresholds.len() != feature_total
            || self.alpha_low.len() != feature_total
            || self.alpha_high.len() != feature_total
            || self.geometry.len() != 4 * self.weights.len()
        {
            return Err(ObjdetectError::MalformedModel(
                "per-feature or per-rectangle arrays disagree in length".into(),
            ));
        }

        let mut stages = Vec::new();
        stages
            .try_reserve_exact(self.stage_features.len())
            .map_err(|e| ObjdetectError::OutOfMemory(format!("stage table: {e}")))?;

        let mut tree = 0usize;
        let mut rect = 0usize;
        for (s, &n_features) in self.stage_features.iter().enumerate() {
            let threshold = *self
                .stage_thresholds
                .get(s)
                .ok_or_else(|| malformed("stage threshold", s))?;

            let mut features = Vec::new();
            features
                .try_reserve_exact(n_features as usize)
                .map_err(|e| ObjdetectError::OutOfMemory(format!("stage {s} features: {e}")))?;

            for _ in 0..n_features {
                let count = *self
                    .rect_counts
                    .get(tree)
                    .ok_or_else(|| malformed("feature", tree))?;
                let count = usize::try_from(count)
                    .map_err(|_| malformed("rectangle count", tree))?;

                let weights = self
                    .weights
                    .get(rect..rect + count)
                    .ok_or_else(|| malformed("rectangle weight", rect))?;
                let geometry = self
                    .geometry
                    .get(4 * rect..4 * (rect + count))
                    .ok_or_else(|| malformed("rectangle geometry", rect))?;

                let rects = weights
                    .iter()
                    .zip(geometry.chunks_exact(4))
                    .map(|(&w, g)| WeightedRect::new(g[0], g[1], g[2], g[3], w))
                    .collect();

                features.push(HaarFeature {
                    rects,
                    threshold: self.tree_thresholds[tree],
                    alpha_low: self.alpha_low[tree],
                    alpha_high: self.alpha_high[tree],
                });
                tree += 1;
                rect += count;
            }

            stages.push(CascadeStage {
                threshold,
                features,
            });
        }

        if tree != self.rect_counts.len() || rect != self.weights.len() {
            return Err(ObjdetectError::MalformedModel(format!(
                "counts describe {tree} features and {rect} rectangles, arrays hold {} and {}",
                self.rect_counts.len(),
                self.weights.len()
            )));
        }
        Ok(stages)
    }
}

/// Sequential fixed-size reads with short-read detection.
struct FieldReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: Read> FieldReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Fill `self.buf[..len]` completely. `done` is the number of bytes of the
    /// current field already consumed, used for error reporting.
    fn fill(&mut self, field: &'static str, len: usize, done: usize, total: usize) -> Result<()> {
        if self.buf.len() < len {
            self.buf
                .try_reserve_exact(len - self.buf.len())
                .map_err(|e| ObjdetectError::OutOfMemory(format!("{field}: {e}")))?;
            self.buf.resize(len, 0);
        }

        let mut filled = 0;
        while filled < len {
            match self.inner.read(&mut self.buf[filled..len]) {
                Ok(0) => {
                    return Err(ObjdetectError::TruncatedModel {
                        field,
                        expected: total,
                        actual: done + filled,
                    })
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(ObjdetectError::Io(e)),
            }
        }
        Ok(())
    }

    /// Read `count` values of `size` bytes each, chunk by chunk, decoding
    /// every filled chunk with `decode`.
    fn read_array<T: Copy + Default>(
        &mut self,
        field: &'static str,
        count: usize,
        size: usize,
        decode: fn(&[u8], &mut [T]),
    ) -> Result<Vec<T>> {
        let total = count.checked_mul(size).ok_or_else(|| {
            ObjdetectError::MalformedModel(format!("{field}: {count} elements overflow"))
        })?;

        let mut out = Vec::new();
        let mut remaining = count;
        while remaining > 0 {
            let n = remaining.min(READ_CHUNK_ELEMS);
            out.try_reserve_exact(n)
                .map_err(|e| ObjdetectError::OutOfMemory(format!("{field}: {e}")))?;

            let start = out.len();
            self.fill(field, n * size, start * size, total)?;
            out.resize(start + n, T::default());
            decode(&self.buf[..n * size], &mut out[start..]);
            remaining -= n;
        }
        Ok(out)
    }

    fn read_u8_array(&mut self, field: &'static str, count: usize) -> Result<Vec<u8>> {
        self.read_array(field, count, 1, |src, dst| dst.copy_from_slice(src))
    }

    fn read_i16_array(&mut self, field: &'static str, count: usize) -> Result<Vec<i16>> {
        self.read_array(field, count, 2, LittleEndian::read_i16_into)
    }

    fn read_i32_array(&mut self, field: &'static str, count: usize) -> Result<Vec<i32>> {
        self.read_array(field, count, 4, LittleEndian::read_i32_into)
    }
}

impl HaarCascade {
    /// Serialize in the format read by [`CascadeLoader`]. Scan parameters are
    /// not part of the file.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        let window = self.window();
        writer.write_i32::<LittleEndian>(window.width as i32)?;
        writer.write_i32::<LittleEndian>(window.height as i32)?;
        writer.write_i32::<LittleEndian>(self.stage_count() as i32)?;
        writer.write_all(&self.stage_feature_counts())?;

        let mut bytes = Vec::new();
        for array in [
            self.stage_thresholds(),
            self.tree_thresholds(),
            self.tree_alpha_low(),
            self.tree_alpha_high(),
            self.tree_rectangle_counts(),
            self.rectangle_weights(),
            self.rectangle_geometry(),
        ] {
            bytes.clear();
            bytes.resize(array.len() * 2, 0);
            LittleEndian::write_i16_into(&array, &mut bytes);
            writer.write_all(&bytes)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }
}
