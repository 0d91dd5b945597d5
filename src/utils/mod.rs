//! Utility modules shared across the crate.

pub mod constants;
pub mod timeout;
pub mod url_utils;

pub use timeout::with_op_timeout;
pub use url_utils::{is_valid_url, normalize_url};
