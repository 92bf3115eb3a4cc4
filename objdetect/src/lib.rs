//! Object detection with fixed-point Haar cascades.
//!
//! A [`haar::HaarCascade`] is loaded once from its binary model file and
//! then shared read-only by any number of detection calls. Detection scans
//! an image pyramid with a fixed-size window, rejecting most windows in the
//! first stages of the cascade, and hands the raw hits to a
//! [`merge::DetectionMerger`].

pub mod haar;
pub mod merge;

pub use haar::*;
pub use merge::*;

pub use cv_core::Rect;

pub type Result<T> = std::result::Result<T, ObjdetectError>;

#[derive(Debug, thiserror::Error)]
pub enum ObjdetectError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Truncated model: {field} needs {expected} bytes, stream ended after {actual}")]
    TruncatedModel {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Malformed model: {0}")]
    MalformedModel(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Image processing error: {0}")]
    Imgproc(cv_imgproc::ImgprocError),

    #[error("Detection cancelled")]
    Cancelled,
}

impl From<cv_imgproc::ImgprocError> for ObjdetectError {
    fn from(err: cv_imgproc::ImgprocError) -> Self {
        match err {
            cv_imgproc::ImgprocError::AllocationFailed(msg) => ObjdetectError::OutOfMemory(msg),
            other => ObjdetectError::Imgproc(other),
        }
    }
}
