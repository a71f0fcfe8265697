//! Savepoint rollback cause tracking.
//!
//! Some drivers report a bare "transaction rolled back" error after the real
//! failure has already been consumed by a rollback to savepoint. The tracker
//! remembers the in-flight error at that moment so dispatch can attach it to
//! the next classified error on the same connection.
//!
//! State per connection is `Clean -> Armed(cause) -> Clean`.

use crate::error::CauseRef;

/// Identity of a pooled connection, assigned by the owning pool.
pub type ConnectionId = u64;

/// Rollback cause slot of one connection.
#[derive(Debug, Clone, Default)]
pub enum RollbackCause {
    /// No cause recorded.
    #[default]
    Clean,
    /// A savepoint rollback happened while this error was in flight.
    Armed(CauseRef),
}

impl RollbackCause {
    /// Returns true if a cause is recorded.
    pub fn is_armed(&self) -> bool {
        matches!(self, RollbackCause::Armed(_))
    }
}

/// Per-connection state the engine keeps alongside each pooled connection.
///
/// The pool owns these and hands out exclusive references; nothing here is
/// synchronised.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    id: ConnectionId,
    closed: bool,
    invalidated: bool,
    rollback_cause: RollbackCause,
}

impl ConnectionState {
    /// Creates state for a freshly opened connection.
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            closed: false,
            invalidated: false,
            rollback_cause: RollbackCause::Clean,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Open and not invalidated.
    pub fn is_usable(&self) -> bool {
        !self.closed && !self.invalidated
    }

    /// Marks the connection closed.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Marks the connection invalidated; it must not be reused.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// The current rollback cause slot.
    pub fn rollback_cause(&self) -> &RollbackCause {
        &self.rollback_cause
    }

    /// Records `cause`, replacing any earlier one.
    pub fn arm_rollback_cause(&mut self, cause: CauseRef) {
        self.rollback_cause = RollbackCause::Armed(cause);
    }

    /// Removes and returns the recorded cause, leaving the slot clean.
    pub fn take_rollback_cause(&mut self) -> Option<CauseRef> {
        match std::mem::take(&mut self.rollback_cause) {
            RollbackCause::Armed(cause) => Some(cause),
            RollbackCause::Clean => None,
        }
    }

    /// Drops any recorded cause.
    pub fn clear_rollback_cause(&mut self) {
        self.rollback_cause = RollbackCause::Clean;
    }
}

/// Applies transaction lifecycle events to connection state.
#[derive(Debug, Clone, Copy)]
pub struct RollbackTracker {
    enabled: bool,
}

impl Default for RollbackTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RollbackTracker {
    /// Creates an enabled tracker.
    pub fn new() -> Self {
        Self { enabled: true }
    }

    /// Creates a tracker that ignores savepoint rollbacks.
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// A rollback to savepoint `name` happened.
    ///
    /// Arms the connection if an error was in flight. Invalidated
    /// connections are left alone.
    pub fn rollback_savepoint(
        &self,
        connection: &mut ConnectionState,
        name: &str,
        in_flight: Option<CauseRef>,
    ) {
        if !self.enabled || connection.is_invalidated() {
            return;
        }
        if let Some(cause) = in_flight {
            tracing::debug!(
                connection = connection.id(),
                savepoint = name,
                "recording savepoint rollback cause"
            );
            connection.arm_rollback_cause(cause);
        }
    }

    /// A commit or top-level rollback finished.
    pub fn end_transaction(&self, connection: &mut ConnectionState) {
        if !connection.is_invalidated() {
            connection.clear_rollback_cause();
        }
    }

    /// The connection went back to the pool.
    pub fn checkin(&self, connection: &mut ConnectionState) {
        connection.clear_rollback_cause();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::driver::{DriverError, ExceptionClass};

    fn cause(text: &str) -> CauseRef {
        Arc::new(DriverError::new(ExceptionClass::IntegrityError, text))
    }

    #[test]
    fn test_new_connection_is_clean() {
        let conn = ConnectionState::new(3);
        assert_eq!(conn.id(), 3);
        assert!(conn.is_usable());
        assert!(!conn.rollback_cause().is_armed());
    }

    #[test]
    fn test_savepoint_rollback_with_error_arms() {
        let tracker = RollbackTracker::new();
        let mut conn = ConnectionState::new(1);

        tracker.rollback_savepoint(&mut conn, "sa_savepoint_1", Some(cause("dup")));
        assert!(conn.rollback_cause().is_armed());
    }

    #[test]
    fn test_savepoint_rollback_without_error_stays_clean() {
        let tracker = RollbackTracker::new();
        let mut conn = ConnectionState::new(1);

        tracker.rollback_savepoint(&mut conn, "sa_savepoint_1", None);
        assert!(!conn.rollback_cause().is_armed());
    }

    #[test]
    fn test_disabled_tracker_never_arms() {
        let tracker = RollbackTracker::disabled();
        let mut conn = ConnectionState::new(1);

        tracker.rollback_savepoint(&mut conn, "sp", Some(cause("dup")));
        assert!(!conn.rollback_cause().is_armed());
    }

    #[test]
    fn test_invalidated_connection_not_armed() {
        let tracker = RollbackTracker::new();
        let mut conn = ConnectionState::new(1);
        conn.invalidate();

        tracker.rollback_savepoint(&mut conn, "sp", Some(cause("dup")));
        assert!(!conn.rollback_cause().is_armed());
        assert!(!conn.is_usable());
    }

    #[test]
    fn test_end_transaction_clears() {
        let tracker = RollbackTracker::new();
        let mut conn = ConnectionState::new(1);
        tracker.rollback_savepoint(&mut conn, "sp", Some(cause("dup")));

        tracker.end_transaction(&mut conn);
        assert!(!conn.rollback_cause().is_armed());
    }

    #[test]
    fn test_checkin_clears_even_when_invalidated() {
        let tracker = RollbackTracker::new();
        let mut conn = ConnectionState::new(1);
        tracker.rollback_savepoint(&mut conn, "sp", Some(cause("dup")));
        conn.invalidate();

        tracker.end_transaction(&mut conn);
        assert!(conn.rollback_cause().is_armed());

        tracker.checkin(&mut conn);
        assert!(!conn.rollback_cause().is_armed());
    }

    #[test]
    fn test_take_returns_latest_cause() {
        let mut conn = ConnectionState::new(1);
        conn.arm_rollback_cause(cause("first"));
        conn.arm_rollback_cause(cause("second"));

        let taken = conn.take_rollback_cause().map(|c| c.to_string());
        assert_eq!(taken, Some("(IntegrityError) second".to_string()));
        assert!(conn.take_rollback_cause().is_none());
    }
}
