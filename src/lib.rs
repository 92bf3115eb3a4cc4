pub use cv_core as core;
pub use cv_imgproc as imgproc;
pub use cv_objdetect as objdetect;

pub use cv_objdetect::{
    CascadeLoader, CascadeParams, HaarCascade, MultiScaleScanner, ObjdetectError, Rect,
};

/// Initialize a single global Rayon thread pool used by batch detection.
///
/// Call this once at application startup. Repeated calls are idempotent and
/// return the first initialization result.
///
/// Priority order:
/// 1. explicit `num_threads`
/// 2. `CASCADE_CPU_THREADS` env var
/// 3. Rayon default
pub fn init_thread_pool(num_threads: Option<usize>) -> Result<(), String> {
    cv_core::init_global_thread_pool(num_threads)
}
