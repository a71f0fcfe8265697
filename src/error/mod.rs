//! Typed database errors produced by the filters.

pub mod classification;

pub use classification::{CauseRef, DbError, ErrorKind};
