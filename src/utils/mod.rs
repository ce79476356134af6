//! Shared utility functions.

pub mod json_extraction;

pub use json_extraction::{extract_json, find_matching_close, parse_json, JsonExtractionError};
