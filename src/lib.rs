//! sqlfault - database driver error classification
//!
//! Converts raw, dialect-specific driver errors into a small taxonomy of
//! typed errors. Rules are registered per (dialect, exception class) and
//! matched against the driver's message text; the first match in
//! specificity order decides the result.
//!
//! ```
//! use sqlfault::driver::{DriverError, ExceptionClass};
//! use sqlfault::error::ErrorKind;
//! use sqlfault::filters::{ExceptionContext, Registry};
//!
//! let registry = Registry::with_builtin_rules()?;
//! let err = DriverError::new(ExceptionClass::OperationalError, "no such table: widgets");
//! let mut ctx = ExceptionContext::new(&err, "sqlite");
//!
//! let classified = registry.classify(&mut ctx).expect("classified");
//! assert_eq!(
//!     classified.kind(),
//!     &ErrorKind::NonExistentTable { table: "widgets".to_string() }
//! );
//! # Ok::<(), sqlfault::filters::RegistryError>(())
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod filters;
pub mod listener;
pub mod logging;
pub mod rollback;

pub use driver::{DriverError, ExceptionClass};
pub use error::{DbError, ErrorKind};
pub use filters::{Dispatch, ExceptionContext, FilteredError, Registry};
pub use listener::{register_engine, EngineEvents, EngineListener, ErrorFilter};
pub use rollback::{ConnectionState, RollbackTracker};
