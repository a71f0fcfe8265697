//! Low-level driver error model.
//!
//! A [`DriverError`] is what the owning engine hands us when a statement
//! fails: a class from a small closed hierarchy plus the raw message text.
//! The hierarchy replaces runtime type reflection with an explicit parent
//! table so that rules registered against a specific class are consulted
//! before rules registered against one of its ancestors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The class of a low-level driver error.
///
/// The hierarchy mirrors the DB-API exception tree most drivers follow:
///
/// ```text
/// Exception
/// ├── UnicodeEncodeError
/// └── StatementError
///     └── DBAPIError
///         ├── InterfaceError
///         └── DatabaseError
///             ├── DataError
///             ├── OperationalError
///             ├── IntegrityError
///             ├── InternalError
///             ├── ProgrammingError
///             └── NotSupportedError
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExceptionClass {
    /// Root of the hierarchy; every error descends from it.
    Exception,
    /// Parameter text could not be encoded for the driver.
    UnicodeEncodeError,
    /// A statement failed before or while reaching the driver.
    StatementError,
    /// Any error raised by the DB-API driver itself.
    #[serde(rename = "DBAPIError")]
    DbapiError,
    /// Error in the driver interface rather than the database.
    InterfaceError,
    /// Error reported by the database.
    DatabaseError,
    /// Problem with the processed data (bad value, out of range).
    DataError,
    /// Operational failure: lost connection, deadlock, missing objects.
    OperationalError,
    /// Relational integrity violated (unique, foreign key, check).
    IntegrityError,
    /// The database hit an internal error.
    InternalError,
    /// Bad SQL or reference to a missing object.
    ProgrammingError,
    /// The requested operation is not supported by the backend.
    NotSupportedError,
}

impl ExceptionClass {
    /// All classes, roots first.
    pub const ALL: [ExceptionClass; 12] = [
        ExceptionClass::Exception,
        ExceptionClass::UnicodeEncodeError,
        ExceptionClass::StatementError,
        ExceptionClass::DbapiError,
        ExceptionClass::InterfaceError,
        ExceptionClass::DatabaseError,
        ExceptionClass::DataError,
        ExceptionClass::OperationalError,
        ExceptionClass::IntegrityError,
        ExceptionClass::InternalError,
        ExceptionClass::ProgrammingError,
        ExceptionClass::NotSupportedError,
    ];

    /// Returns the direct parent class, or `None` for [`ExceptionClass::Exception`].
    pub fn parent(self) -> Option<ExceptionClass> {
        use ExceptionClass::*;
        match self {
            Exception => None,
            UnicodeEncodeError | StatementError => Some(Exception),
            DbapiError => Some(StatementError),
            InterfaceError | DatabaseError => Some(DbapiError),
            DataError | OperationalError | IntegrityError | InternalError | ProgrammingError
            | NotSupportedError => Some(DatabaseError),
        }
    }

    /// Walks the class and its ancestors, most specific first.
    pub fn ancestry(self) -> Ancestry {
        Ancestry { next: Some(self) }
    }

    /// Returns true if `self` is `other` or descends from it.
    pub fn is_subclass_of(self, other: ExceptionClass) -> bool {
        self.ancestry().any(|class| class == other)
    }

    /// The driver-facing name of the class.
    pub fn name(self) -> &'static str {
        use ExceptionClass::*;
        match self {
            Exception => "Exception",
            UnicodeEncodeError => "UnicodeEncodeError",
            StatementError => "StatementError",
            DbapiError => "DBAPIError",
            InterfaceError => "InterfaceError",
            DatabaseError => "DatabaseError",
            DataError => "DataError",
            OperationalError => "OperationalError",
            IntegrityError => "IntegrityError",
            InternalError => "InternalError",
            ProgrammingError => "ProgrammingError",
            NotSupportedError => "NotSupportedError",
        }
    }
}

impl fmt::Display for ExceptionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown exception class name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown exception class: {0}")]
pub struct UnknownExceptionClass(pub String);

impl FromStr for ExceptionClass {
    type Err = UnknownExceptionClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExceptionClass::ALL
            .into_iter()
            .find(|class| class.name() == s)
            .ok_or_else(|| UnknownExceptionClass(s.to_string()))
    }
}

/// Iterator over a class and its ancestors, most specific first.
#[derive(Debug, Clone)]
pub struct Ancestry {
    next: Option<ExceptionClass>,
}

impl Iterator for Ancestry {
    type Item = ExceptionClass;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}

/// A raised low-level error as reported by the driver layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("({class}) {message}")]
pub struct DriverError {
    /// Concrete class of the error.
    pub class: ExceptionClass,
    /// Raw, dialect-specific message text.
    pub message: String,
    /// The untranslated driver exception this error wraps, if any.
    #[source]
    pub original: Option<Box<DriverError>>,
}

impl DriverError {
    /// Creates a driver error with no wrapped original.
    pub fn new(class: ExceptionClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            original: None,
        }
    }

    /// Attaches the untranslated driver exception this error wraps.
    pub fn wrapping(mut self, original: DriverError) -> Self {
        self.original = Some(Box::new(original));
        self
    }

    /// Iterates over this error and then each wrapped original, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &DriverError> {
        std::iter::successors(Some(self), |err| err.original.as_deref())
    }
}
