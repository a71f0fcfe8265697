//! Rule registry for driver error filters.
//!
//! Rules are keyed by dialect name and exception class. They are collected
//! with a [`RegistryBuilder`] at start-up and frozen into a [`Registry`],
//! which is read-only and safe to share between threads.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::{Captures, Regex, RegexBuilder};
use thiserror::Error;

use crate::driver::{DriverError, ExceptionClass};
use crate::error::DbError;

/// Dialect name that matches every engine. Its table is consulted after the
/// dialect-specific one.
pub const ANY_DIALECT: &str = "*";

/// What a classifier decided for a matched error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Replace the driver error with this typed error.
    Raise(DbError),
    /// Propagate the original driver error unchanged and stop dispatching.
    PassThrough,
}

/// Information handed to a classifier alongside the regex captures.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    /// The error whose message matched (the raw error or a wrapped original).
    pub error: &'a DriverError,
    /// Name of the live dialect.
    pub dialect: &'a str,
    /// Whether the engine already flagged this error as a disconnect.
    pub is_disconnect: bool,
}

type ClassifyFn = dyn Fn(&Captures<'_>, &MatchContext<'_>) -> Outcome + Send + Sync;

/// A named classification function.
#[derive(Clone)]
pub struct Classifier {
    name: String,
    func: Arc<ClassifyFn>,
}

impl Classifier {
    /// Wraps a function or closure as a classifier.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Captures<'_>, &MatchContext<'_>) -> Outcome + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// The classifier's name, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the classifier.
    pub fn classify(&self, captures: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
        (self.func)(captures, ctx)
    }
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier").field("name", &self.name).finish()
    }
}

/// A single registered rule.
#[derive(Debug, Clone)]
pub struct Rule {
    dialect: String,
    class: ExceptionClass,
    pattern: String,
    regex: Regex,
    classifier: Classifier,
}

impl Rule {
    /// Compiles a rule. The pattern is anchored at the start of the message
    /// and `.` matches newlines.
    pub fn new(
        dialect: impl Into<String>,
        class: ExceptionClass,
        pattern: &str,
        classifier: Classifier,
    ) -> Result<Self, RegistryError> {
        let regex = RegexBuilder::new(&format!(r"\A(?:{pattern})"))
            .dot_matches_new_line(true)
            .build()
            .map_err(|source| RegistryError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;

        Ok(Self {
            dialect: dialect.into(),
            class,
            pattern: pattern.to_string(),
            regex,
            classifier,
        })
    }

    /// The dialect this rule applies to.
    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    /// The exception class this rule is registered under.
    pub fn class(&self) -> ExceptionClass {
        self.class
    }

    /// The pattern as registered, before anchoring.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The classifier invoked on a match.
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Matches the rule against a message.
    pub fn captures<'t>(&self, message: &'t str) -> Option<Captures<'t>> {
        self.regex.captures(message)
    }
}

/// Errors raised while building a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The pattern is not a valid regular expression.
    #[error("invalid rule pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

type ClassTable = HashMap<ExceptionClass, Vec<Rule>>;

/// Collects rules before they are frozen into a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    tables: HashMap<String, ClassTable>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a rule.
    ///
    /// Rules under the same dialect and class are tried in the order they
    /// were registered. Use [`ANY_DIALECT`] for rules that apply to every
    /// engine.
    ///
    /// # Errors
    /// Returns [`RegistryError::InvalidPattern`] if `pattern` does not compile.
    pub fn register(
        &mut self,
        dialect: &str,
        class: ExceptionClass,
        pattern: &str,
        classifier: Classifier,
    ) -> Result<&mut Self, RegistryError> {
        let rule = Rule::new(dialect, class, pattern, classifier)?;
        self.tables
            .entry(dialect.to_string())
            .or_default()
            .entry(class)
            .or_default()
            .push(rule);
        Ok(self)
    }

    /// Appends one rule per pattern, all sharing the same classifier.
    pub fn register_all(
        &mut self,
        dialect: &str,
        class: ExceptionClass,
        patterns: &[&str],
        classifier: &Classifier,
    ) -> Result<&mut Self, RegistryError> {
        for pattern in patterns {
            self.register(dialect, class, pattern, classifier.clone())?;
        }
        Ok(self)
    }

    /// Number of rules collected so far.
    pub fn len(&self) -> usize {
        self.tables
            .values()
            .flat_map(|table| table.values())
            .map(Vec::len)
            .sum()
    }

    /// Returns true if no rules were collected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freezes the collected rules.
    pub fn build(self) -> Registry {
        Registry {
            tables: self.tables,
        }
    }
}

/// Read-only table of rules, keyed by dialect and exception class.
#[derive(Debug, Default)]
pub struct Registry {
    tables: HashMap<String, ClassTable>,
}

impl Registry {
    /// Starts an empty builder.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Builds a registry holding the built-in rule table.
    pub fn with_builtin_rules() -> Result<Self, RegistryError> {
        let mut builder = RegistryBuilder::new();
        super::builtin::register_builtin_rules(&mut builder)?;
        Ok(builder.build())
    }

    /// The tables to consult for a dialect: its own, then the wildcard.
    ///
    /// Either may be missing.
    pub(crate) fn tables_for<'a>(
        &'a self,
        dialect: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a ClassTable)> + 'a {
        let specific = (dialect != ANY_DIALECT)
            .then(|| self.tables.get_key_value(dialect))
            .flatten();
        let wildcard = self.tables.get_key_value(ANY_DIALECT);
        specific
            .into_iter()
            .chain(wildcard)
            .map(|(name, table)| (name.as_str(), table))
    }

    /// Rules registered for exactly this dialect and class, in order.
    pub fn rules_for(&self, dialect: &str, class: ExceptionClass) -> &[Rule] {
        self.tables
            .get(dialect)
            .and_then(|table| table.get(&class))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Dialects with at least one rule.
    pub fn dialects(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Total number of rules.
    pub fn len(&self) -> usize {
        self.tables
            .values()
            .flat_map(|table| table.values())
            .map(Vec::len)
            .sum()
    }

    /// Returns true if the registry holds no rules.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
