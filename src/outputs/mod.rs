//! Output writers for the file-based jobs.
//!
//! # Submodules
//!
//! - [`csv`]: canonicalized rows, dedupe keepers and corrected rows
//! - [`json`]: pretty-printed reports (dedupe groups, split fixes, sync plans)

pub mod csv;
pub mod json;
