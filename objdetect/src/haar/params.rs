use crate::{ObjdetectError, Result};

/// Scan parameters that are not part of the model file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeParams {
    /// Ratio between successive pyramid levels; must be greater than 1.
    pub scale_factor: f32,
    /// Window stride in level pixels, both axes.
    pub step: u32,
}

impl Default for CascadeParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.25,
            step: 2,
        }
    }
}

impl CascadeParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scale_factor(mut self, scale_factor: f32) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    pub fn with_step(mut self, step: u32) -> Self {
        self.step = step;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.scale_factor.is_finite() || self.scale_factor <= 1.0 {
            return Err(ObjdetectError::InvalidParameter(format!(
                "scale factor must be finite and greater than 1.0, got {}",
                self.scale_factor
            )));
        }
        if self.step == 0 {
            return Err(ObjdetectError::InvalidParameter(
                "step must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
