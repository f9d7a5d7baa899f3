//! Core definitions relied upon by all kdata-* crates: the error taxonomy shared by
//! shapes, bags and slices, and the argument verification helpers.

pub mod error;
pub mod result;

pub use result::Result;
