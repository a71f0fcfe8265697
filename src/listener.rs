//! Engine listener wiring.
//!
//! The owning engine exposes its error and transaction lifecycle hooks
//! through [`EngineEvents`]. [`register_engine`] installs an [`ErrorFilter`]
//! that classifies driver errors and tracks savepoint rollback causes.

use std::sync::Arc;

use crate::config::{FilterConfig, FilterConfigError};
use crate::driver::DriverError;
use crate::error::{CauseRef, DbError};
use crate::filters::{ExceptionContext, FilteredError, Registry};
use crate::rollback::{ConnectionState, RollbackTracker};

/// Callbacks an engine invokes around statement execution.
///
/// Every hook defaults to doing nothing.
pub trait EngineListener: Send + Sync {
    /// A statement failed. A returned error replaces the one the caller sees.
    fn handle_error(&self, _ctx: &mut ExceptionContext<'_>) -> Option<DbError> {
        None
    }

    /// The connection rolled back to savepoint `name`. `in_flight` is the
    /// error being propagated at that moment, if any.
    fn rollback_savepoint(
        &self,
        _connection: &mut ConnectionState,
        _name: &str,
        _in_flight: Option<CauseRef>,
    ) {
    }

    /// A top-level rollback finished.
    fn rollback(&self, _connection: &mut ConnectionState) {}

    /// A commit finished.
    fn commit(&self, _connection: &mut ConnectionState) {}

    /// The connection was returned to the pool.
    fn checkin(&self, _connection: &mut ConnectionState) {}
}

/// An engine that accepts listeners.
pub trait EngineEvents {
    /// The engine's dialect name, e.g. `"mysql"`.
    fn dialect_name(&self) -> &str;

    /// Adds a listener for all hooks.
    fn listen(&mut self, listener: Arc<dyn EngineListener>);
}

/// The listener this crate installs on an engine.
#[derive(Debug, Clone)]
pub struct ErrorFilter {
    registry: Arc<Registry>,
    tracker: RollbackTracker,
}

impl ErrorFilter {
    /// Creates a filter with rollback cause tracking enabled.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            tracker: RollbackTracker::new(),
        }
    }

    /// Replaces the rollback tracker.
    pub fn with_tracker(mut self, tracker: RollbackTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Builds a filter from configuration.
    pub fn from_config(config: &FilterConfig) -> Result<Self, FilterConfigError> {
        let tracker = if config.track_rollback_cause {
            RollbackTracker::new()
        } else {
            RollbackTracker::disabled()
        };
        Ok(Self::new(Arc::new(config.build_registry()?)).with_tracker(tracker))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn tracker(&self) -> RollbackTracker {
        self.tracker
    }
}

impl EngineListener for ErrorFilter {
    fn handle_error(&self, ctx: &mut ExceptionContext<'_>) -> Option<DbError> {
        self.registry.classify(ctx)
    }

    fn rollback_savepoint(
        &self,
        connection: &mut ConnectionState,
        name: &str,
        in_flight: Option<CauseRef>,
    ) {
        self.tracker.rollback_savepoint(connection, name, in_flight);
    }

    fn rollback(&self, connection: &mut ConnectionState) {
        self.tracker.end_transaction(connection);
    }

    fn commit(&self, connection: &mut ConnectionState) {
        self.tracker.end_transaction(connection);
    }

    fn checkin(&self, connection: &mut ConnectionState) {
        self.tracker.checkin(connection);
    }
}

/// Installs an [`ErrorFilter`] over `registry` on the engine.
pub fn register_engine<E>(engine: &mut E, registry: Arc<Registry>) -> Arc<ErrorFilter>
where
    E: EngineEvents + ?Sized,
{
    register_filter(engine, ErrorFilter::new(registry))
}

/// Installs a preconfigured filter on the engine.
pub fn register_filter<E>(engine: &mut E, filter: ErrorFilter) -> Arc<ErrorFilter>
where
    E: EngineEvents + ?Sized,
{
    let filter = Arc::new(filter);
    tracing::debug!(
        dialect = engine.dialect_name(),
        rules = filter.registry().len(),
        "registering driver error filter"
    );
    engine.listen(filter.clone());
    filter
}

/// Runs a connection attempt, filtering a failure through the registry.
///
/// Connect failures are classified with the disconnect hint set, since the
/// connection never became usable.
pub fn handle_connect_error<T, F>(
    registry: &Registry,
    dialect: &str,
    connect: F,
) -> Result<T, FilteredError>
where
    F: FnOnce() -> Result<T, DriverError>,
{
    connect().map_err(|err| {
        let mut ctx = ExceptionContext::new(&err, dialect).with_disconnect(true);
        registry.filter(&mut ctx)
    })
}
