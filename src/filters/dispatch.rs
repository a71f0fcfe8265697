//! Classifier dispatch.
//!
//! Finds the first rule matching a failed statement and turns its outcome
//! into a typed error. The search order is fixed:
//!
//! 1. the live dialect's table, then the `*` table;
//! 2. within a table, the raw error and then each wrapped original;
//! 3. for each error, its class ancestry from most to least specific;
//! 4. for each class, rules in registration order.
//!
//! The first pattern that matches decides the result and the search stops,
//! even if the classifier asks for the original error to pass through.

use thiserror::Error;
use tracing::{debug, trace};

use super::registry::{MatchContext, Outcome, Registry};
use crate::driver::DriverError;
use crate::error::DbError;
use crate::rollback::ConnectionState;

/// Everything known about one failure event.
#[derive(Debug)]
pub struct ExceptionContext<'a> {
    /// The error raised by the driver layer.
    pub raw_error: &'a DriverError,
    /// Name of the engine's dialect.
    pub dialect: &'a str,
    /// The connection the statement ran on, if any.
    pub connection: Option<&'a mut ConnectionState>,
    /// Whether the connection is known to be unusable. Dispatch sets this
    /// when it produces a connection error.
    pub is_disconnect: bool,
    /// Whether the failure happened during a pool pre-ping.
    pub is_pre_ping: bool,
}

impl<'a> ExceptionContext<'a> {
    /// Creates a context with no connection and no hints.
    pub fn new(raw_error: &'a DriverError, dialect: &'a str) -> Self {
        Self {
            raw_error,
            dialect,
            connection: None,
            is_disconnect: false,
            is_pre_ping: false,
        }
    }

    /// Attaches the connection the statement ran on.
    pub fn with_connection(mut self, connection: &'a mut ConnectionState) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Sets the engine's disconnect hint.
    pub fn with_disconnect(mut self, is_disconnect: bool) -> Self {
        self.is_disconnect = is_disconnect;
        self
    }

    /// Marks the failure as coming from a pre-ping.
    pub fn with_pre_ping(mut self, is_pre_ping: bool) -> Self {
        self.is_pre_ping = is_pre_ping;
        self
    }
}

/// Result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A rule produced a typed error that replaces the driver error.
    Classified(DbError),
    /// A rule asked for the driver error to propagate untouched.
    PassThrough,
    /// A typed error was produced during a pre-ping; only the disconnect
    /// flag on the context was updated.
    Deferred,
    /// No rule matched.
    Unmatched,
}

/// The error a caller should propagate after filtering.
#[derive(Debug, Error)]
pub enum FilteredError {
    /// The driver error was classified.
    #[error(transparent)]
    Classified(DbError),
    /// The driver error propagates as it was raised.
    #[error(transparent)]
    Driver(DriverError),
}

impl FilteredError {
    /// The typed error, if the driver error was classified.
    pub fn classified(&self) -> Option<&DbError> {
        match self {
            FilteredError::Classified(err) => Some(err),
            FilteredError::Driver(_) => None,
        }
    }
}

impl Registry {
    /// Runs dispatch for one failure event.
    pub fn dispatch(&self, ctx: &mut ExceptionContext<'_>) -> Dispatch {
        let raw_error = ctx.raw_error;
        let dialect = ctx.dialect;

        for (table_name, table) in self.tables_for(dialect) {
            for error in raw_error.chain() {
                for class in error.class.ancestry() {
                    let Some(rules) = table.get(&class) else {
                        continue;
                    };
                    for rule in rules {
                        let Some(captures) = rule.captures(&error.message) else {
                            continue;
                        };

                        debug!(
                            dialect,
                            table = table_name,
                            class = %class,
                            classifier = rule.classifier().name(),
                            "driver error matched filter rule"
                        );

                        let match_ctx = MatchContext {
                            error,
                            dialect,
                            is_disconnect: ctx.is_disconnect,
                        };
                        return match rule.classifier().classify(&captures, &match_ctx) {
                            Outcome::PassThrough => Dispatch::PassThrough,
                            Outcome::Raise(err) => finish(ctx, err),
                        };
                    }
                }
            }
        }

        trace!(dialect, class = %raw_error.class, "no filter rule matched driver error");
        Dispatch::Unmatched
    }

    /// Classifies a failure, returning `None` when the caller should
    /// propagate the original driver error.
    pub fn classify(&self, ctx: &mut ExceptionContext<'_>) -> Option<DbError> {
        match self.dispatch(ctx) {
            Dispatch::Classified(err) => Some(err),
            Dispatch::PassThrough | Dispatch::Deferred | Dispatch::Unmatched => None,
        }
    }

    /// Classifies a failure and folds the result into the error to propagate.
    pub fn filter(&self, ctx: &mut ExceptionContext<'_>) -> FilteredError {
        match self.classify(ctx) {
            Some(err) => FilteredError::Classified(err),
            None => FilteredError::Driver(ctx.raw_error.clone()),
        }
    }
}

fn finish(ctx: &mut ExceptionContext<'_>, mut err: DbError) -> Dispatch {
    if err.is_connection_error() {
        ctx.is_disconnect = true;
    }

    // The armed cause stays on the connection until an error that reports
    // the rollback itself is handed to the caller.
    if ctx.is_pre_ping {
        return Dispatch::Deferred;
    }
    if !(err.is_connection_error() || err.is_deadlock()) {
        return Dispatch::Classified(err);
    }

    if let Some(connection) = ctx.connection.as_deref_mut() {
        if connection.is_usable() {
            if let Some(cause) = connection.take_rollback_cause() {
                debug!(
                    connection = connection.id(),
                    kind = err.kind_name(),
                    "attaching savepoint rollback cause"
                );
                err = err.with_rollback_cause(cause);
            }
        }
    }
    Dispatch::Classified(err)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::driver::ExceptionClass;
    use crate::error::ErrorKind;
    use crate::filters::registry::{Classifier, ANY_DIALECT};

    fn raise(kind: ErrorKind) -> Classifier {
        Classifier::new(kind.name(), move |_, ctx| {
            Outcome::Raise(DbError::new(kind.clone()).with_inner(ctx.error.clone()))
        })
    }

    fn registry(rules: &[(&str, ExceptionClass, &str, ErrorKind)]) -> Registry {
        let mut builder = Registry::builder();
        for (dialect, class, pattern, kind) in rules {
            builder
                .register(dialect, *class, pattern, raise(kind.clone()))
                .unwrap();
        }
        builder.build()
    }

    fn kind_of(registry: &Registry, err: &DriverError, dialect: &str) -> Option<ErrorKind> {
        let mut ctx = ExceptionContext::new(err, dialect);
        registry.classify(&mut ctx).map(|e| e.kind().clone())
    }

    // ==================== Ordering Tests ====================

    #[test]
    fn test_specific_class_beats_base_class() {
        let registry = registry(&[
            ("mysql", ExceptionClass::DbapiError, ".*", ErrorKind::Generic),
            ("mysql", ExceptionClass::OperationalError, ".*", ErrorKind::Deadlock),
        ]);
        let err = DriverError::new(ExceptionClass::OperationalError, "anything");
        assert_eq!(kind_of(&registry, &err, "mysql"), Some(ErrorKind::Deadlock));
    }

    #[test]
    fn test_base_class_rule_used_when_specific_misses() {
        let registry = registry(&[
            ("mysql", ExceptionClass::DbapiError, ".*", ErrorKind::Generic),
            ("mysql", ExceptionClass::OperationalError, "^deadlock", ErrorKind::Deadlock),
        ]);
        let err = DriverError::new(ExceptionClass::OperationalError, "something else");
        assert_eq!(kind_of(&registry, &err, "mysql"), Some(ErrorKind::Generic));
    }

    #[test]
    fn test_first_registered_wins() {
        let registry = registry(&[
            ("sqlite", ExceptionClass::IntegrityError, ".*", ErrorKind::DataError),
            ("sqlite", ExceptionClass::IntegrityError, ".*", ErrorKind::Deadlock),
        ]);
        let err = DriverError::new(ExceptionClass::IntegrityError, "x");
        assert_eq!(kind_of(&registry, &err, "sqlite"), Some(ErrorKind::DataError));
    }

    #[test]
    fn test_dialect_table_before_wildcard_even_for_base_class() {
        let registry = registry(&[
            (ANY_DIALECT, ExceptionClass::OperationalError, ".*", ErrorKind::Generic),
            ("mysql", ExceptionClass::Exception, ".*", ErrorKind::DataError),
        ]);
        let err = DriverError::new(ExceptionClass::OperationalError, "x");
        assert_eq!(kind_of(&registry, &err, "mysql"), Some(ErrorKind::DataError));
        assert_eq!(kind_of(&registry, &err, "sqlite"), Some(ErrorKind::Generic));
    }

    #[test]
    fn test_wrapped_original_consulted_after_raw_error() {
        let registry = registry(&[(
            ANY_DIALECT,
            ExceptionClass::UnicodeEncodeError,
            ".*",
            ErrorKind::InvalidUnicodeParameter,
        )]);
        let err = DriverError::new(ExceptionClass::StatementError, "wrapped").wrapping(
            DriverError::new(ExceptionClass::UnicodeEncodeError, "'ascii' codec can't encode"),
        );

        let mut ctx = ExceptionContext::new(&err, "sqlite");
        let classified = registry.classify(&mut ctx).unwrap();
        assert_eq!(classified.kind(), &ErrorKind::InvalidUnicodeParameter);
        assert_eq!(
            classified.inner().map(|e| e.class),
            Some(ExceptionClass::UnicodeEncodeError)
        );
    }

    #[test]
    fn test_unmatched_returns_none() {
        let registry = registry(&[("mysql", ExceptionClass::IntegrityError, "^1062", ErrorKind::Generic)]);
        let err = DriverError::new(ExceptionClass::OperationalError, "x");
        let mut ctx = ExceptionContext::new(&err, "mysql");
        assert_eq!(registry.dispatch(&mut ctx), Dispatch::Unmatched);
        assert!(matches!(registry.filter(&mut ctx), FilteredError::Driver(e) if e == err));
    }

    // ==================== Outcome Tests ====================

    #[test]
    fn test_pass_through_short_circuits() {
        let mut builder = Registry::builder();
        builder
            .register(
                "mysql",
                ExceptionClass::OperationalError,
                ".*1146",
                Classifier::new("as_is", |_, _| Outcome::PassThrough),
            )
            .unwrap()
            .register(ANY_DIALECT, ExceptionClass::Exception, ".*", raise(ErrorKind::Generic))
            .unwrap();
        let registry = builder.build();

        let err = DriverError::new(ExceptionClass::OperationalError, "(1146, 'no table')");
        let mut ctx = ExceptionContext::new(&err, "mysql");
        assert_eq!(registry.dispatch(&mut ctx), Dispatch::PassThrough);
        assert!(registry.classify(&mut ctx).is_none());
    }

    #[test]
    fn test_connection_error_sets_disconnect() {
        let registry = registry(&[(
            "postgresql",
            ExceptionClass::OperationalError,
            ".*could not connect",
            ErrorKind::ConnectionError,
        )]);
        let err = DriverError::new(ExceptionClass::OperationalError, "could not connect to server");
        let mut ctx = ExceptionContext::new(&err, "postgresql");

        assert!(registry.classify(&mut ctx).is_some());
        assert!(ctx.is_disconnect);
    }

    #[test]
    fn test_other_kinds_leave_disconnect_alone() {
        let registry = registry(&[("sqlite", ExceptionClass::Exception, ".*", ErrorKind::Generic)]);
        let err = DriverError::new(ExceptionClass::Exception, "x");
        let mut ctx = ExceptionContext::new(&err, "sqlite");

        registry.classify(&mut ctx);
        assert!(!ctx.is_disconnect);
    }

    #[test]
    fn test_pre_ping_defers_but_flags_disconnect() {
        let registry = registry(&[(
            "mysql",
            ExceptionClass::OperationalError,
            ".*2006",
            ErrorKind::ConnectionError,
        )]);
        let err = DriverError::new(ExceptionClass::OperationalError, "(2006, 'gone away')");
        let mut ctx = ExceptionContext::new(&err, "mysql").with_pre_ping(true);

        assert_eq!(registry.dispatch(&mut ctx), Dispatch::Deferred);
        assert!(ctx.is_disconnect);
    }

    // ==================== Rollback Cause Tests ====================

    #[test]
    fn test_rollback_cause_consumed_once() {
        let registry = registry(&[("sqlite", ExceptionClass::Exception, ".*", ErrorKind::ConnectionError)]);
        let mut conn = ConnectionState::new(7);
        conn.arm_rollback_cause(Arc::new(DriverError::new(
            ExceptionClass::IntegrityError,
            "original cause",
        )));

        let err = DriverError::new(ExceptionClass::Exception, "rolled back");
        let first = {
            let mut ctx = ExceptionContext::new(&err, "sqlite").with_connection(&mut conn);
            registry.classify(&mut ctx).unwrap()
        };
        assert_eq!(
            first.rollback_cause().map(|c| c.to_string()),
            Some("(IntegrityError) original cause".to_string())
        );
        assert!(!conn.rollback_cause().is_armed());

        let mut ctx = ExceptionContext::new(&err, "sqlite").with_connection(&mut conn);
        let second = registry.classify(&mut ctx).unwrap();
        assert!(second.rollback_cause().is_none());
    }

    #[test]
    fn test_rollback_cause_not_taken_from_invalidated_connection() {
        let registry = registry(&[("sqlite", ExceptionClass::Exception, ".*", ErrorKind::ConnectionError)]);
        let mut conn = ConnectionState::new(1);
        conn.arm_rollback_cause(Arc::new(DriverError::new(ExceptionClass::Exception, "cause")));
        conn.invalidate();

        let err = DriverError::new(ExceptionClass::Exception, "x");
        let mut ctx = ExceptionContext::new(&err, "sqlite").with_connection(&mut conn);
        let classified = registry.classify(&mut ctx).unwrap();

        assert!(classified.rollback_cause().is_none());
        assert!(conn.rollback_cause().is_armed());
    }

    #[test]
    fn test_other_kinds_leave_rollback_cause_armed() {
        let registry = registry(&[
            ("sqlite", ExceptionClass::IntegrityError, ".*", ErrorKind::DataError),
            ("sqlite", ExceptionClass::Exception, ".*", ErrorKind::Deadlock),
        ]);
        let mut conn = ConnectionState::new(2);
        conn.arm_rollback_cause(Arc::new(DriverError::new(ExceptionClass::Exception, "cause")));

        let data = DriverError::new(ExceptionClass::IntegrityError, "bad value");
        let first = {
            let mut ctx = ExceptionContext::new(&data, "sqlite").with_connection(&mut conn);
            registry.classify(&mut ctx).unwrap()
        };
        assert!(first.rollback_cause().is_none());
        assert!(conn.rollback_cause().is_armed());

        let deadlock = DriverError::new(ExceptionClass::Exception, "rolled back");
        let mut ctx = ExceptionContext::new(&deadlock, "sqlite").with_connection(&mut conn);
        let second = registry.classify(&mut ctx).unwrap();
        assert_eq!(second.kind(), &ErrorKind::Deadlock);
        assert!(second.rollback_cause().is_some());
    }

    #[test]
    fn test_pre_ping_keeps_rollback_cause() {
        let registry = registry(&[("mysql", ExceptionClass::OperationalError, ".*2006", ErrorKind::ConnectionError)]);
        let mut conn = ConnectionState::new(3);
        conn.arm_rollback_cause(Arc::new(DriverError::new(ExceptionClass::Exception, "cause")));

        let err = DriverError::new(ExceptionClass::OperationalError, "(2006, 'gone away')");
        let mut ctx = ExceptionContext::new(&err, "mysql")
            .with_connection(&mut conn)
            .with_pre_ping(true);
        assert_eq!(registry.dispatch(&mut ctx), Dispatch::Deferred);
        assert!(ctx.is_disconnect);
        drop(ctx);

        assert!(conn.rollback_cause().is_armed());
    }
}
