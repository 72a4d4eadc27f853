//! Error types, re-exported from `zf-error`

pub use zf_error::{Result, ZoneFanError};
