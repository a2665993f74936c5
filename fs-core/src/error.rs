//! Error types, re-exported from `fs-error`

pub use fs_error::{FanspeedError, Result};
