//! Utility functions for string formatting and manipulation.

pub mod format;

// Re-export commonly used functions at module level
pub use format::{
    contains_ignore_case, expires_in_display, format_date, format_phone, is_valid_guid, truncate,
};
