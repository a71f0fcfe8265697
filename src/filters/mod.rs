//! Driver error filters.
//!
//! A [`Registry`] holds rules keyed by dialect and exception class; dispatch
//! walks them in specificity order and turns the first match into a typed
//! [`DbError`](crate::error::DbError).

pub mod builtin;
pub mod columns;
pub mod dispatch;
pub mod registry;

pub use builtin::register_builtin_rules;
pub use dispatch::{Dispatch, ExceptionContext, FilteredError};
pub use registry::{
    Classifier, MatchContext, Outcome, Registry, RegistryBuilder, RegistryError, Rule,
    ANY_DIALECT,
};
