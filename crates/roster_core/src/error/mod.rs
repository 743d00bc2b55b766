//! User-facing error taxonomy.
//!
//! Every public core operation fails with exactly one `UserFacingError`.
//! Provider failures are classified at the call site and never escape raw.

pub mod classifier;

pub use classifier::{category_for_code, classify, ErrorCategory, UserFacingError};

/// Result type for public core operations.
pub type CoreResult<T> = Result<T, UserFacingError>;
