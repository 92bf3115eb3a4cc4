//! Shared types for the cascade detection workspace.

pub mod rect;
pub mod runtime;

pub use rect::*;
pub use runtime::*;
