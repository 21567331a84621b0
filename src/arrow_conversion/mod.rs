//! Arrow data format conversion utilities.
//!
//! This module converts decoded result rows into Apache Arrow columnar
//! format.

mod builders;
mod converter;

pub use builders::build_array;
pub use converter::ArrowConverter;
