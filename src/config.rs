//! Filter configuration.
//!
//! Configuration is read from a TOML file with `SQLFAULT__` environment
//! overrides. It controls whether the built-in rule table is loaded, whether
//! savepoint rollback causes are tracked, the log level, and any extra rules:
//!
//! ```toml
//! builtin_rules = true
//! track_rollback_cause = true
//!
//! [logging]
//! level = "debug"
//!
//! [[rules]]
//! dialect = "mysql"
//! exception_class = "OperationalError"
//! pattern = '.*\b3572\b.*'
//! kind = "deadlock"
//! ```

use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat};
use regex::Captures;
use serde::Deserialize;
use thiserror::Error;

use crate::driver::ExceptionClass;
use crate::error::{DbError, ErrorKind};
use crate::filters::columns::{duplicate_key_columns, sqlite_columns};
use crate::filters::{Classifier, MatchContext, Outcome, Registry, RegistryError};
use crate::logging::LoggingConfig;

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "SQLFAULT";

/// Errors that can occur when loading filter configuration.
#[derive(Debug, Error)]
pub enum FilterConfigError {
    /// The configuration file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// The configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] ConfigError),

    /// The configuration file path is invalid.
    #[error("invalid configuration path: {0}")]
    InvalidPath(String),

    /// A configured rule could not be registered.
    #[error("invalid rule: {0}")]
    InvalidRule(#[from] RegistryError),
}

/// What a configured rule produces when its pattern matches.
///
/// Field-bearing kinds read their fields from the pattern's named groups:
/// `columns` and `value`; `table` and `check_name`; `table`, `constraint`,
/// `key` and `key_table`; `database`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    DuplicateEntry,
    ConstraintViolation,
    ReferenceViolation,
    NonExistentConstraint,
    NonExistentTable,
    NonExistentDatabase,
    InvalidUnicodeParameter,
    DataError,
    NotSupported,
    Deadlock,
    ConnectionError,
    Generic,
    /// Leave the driver error untouched.
    PassThrough,
}

impl RuleKind {
    /// Wraps this kind as a classifier.
    pub fn classifier(self, name: impl Into<String>) -> Classifier {
        Classifier::new(name, move |caps, ctx| self.classify(caps, ctx))
    }

    fn classify(self, caps: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
        let group = |name: &str| caps.name(name).map(|m| m.as_str().to_string());

        let kind = match self {
            RuleKind::PassThrough => return Outcome::PassThrough,
            RuleKind::Generic => return Outcome::Raise(DbError::generic(ctx.error.clone())),
            RuleKind::DuplicateEntry => ErrorKind::DuplicateEntry {
                columns: caps
                    .name("columns")
                    .map(|m| match ctx.dialect {
                        "sqlite" => sqlite_columns(m.as_str()),
                        dialect => duplicate_key_columns(dialect, m.as_str()),
                    })
                    .unwrap_or_default(),
                value: group("value"),
            },
            RuleKind::ConstraintViolation => ErrorKind::ConstraintViolation {
                table: group("table").unwrap_or_default(),
                check_name: group("check_name").unwrap_or_default(),
            },
            RuleKind::ReferenceViolation => ErrorKind::ReferenceViolation {
                table: group("table"),
                constraint: group("constraint"),
                key: group("key"),
                key_table: group("key_table"),
            },
            RuleKind::NonExistentConstraint => ErrorKind::NonExistentConstraint {
                table: group("table").or_else(|| group("relation")),
                constraint: group("constraint"),
            },
            RuleKind::NonExistentTable => ErrorKind::NonExistentTable {
                table: group("table").unwrap_or_default(),
            },
            RuleKind::NonExistentDatabase => ErrorKind::NonExistentDatabase {
                database: group("database"),
            },
            RuleKind::InvalidUnicodeParameter => ErrorKind::InvalidUnicodeParameter,
            RuleKind::DataError => ErrorKind::DataError,
            RuleKind::NotSupported => ErrorKind::NotSupported,
            RuleKind::Deadlock => ErrorKind::Deadlock,
            RuleKind::ConnectionError => ErrorKind::ConnectionError,
        };
        Outcome::Raise(DbError::new(kind).with_inner(ctx.error.clone()))
    }
}

/// A rule declared in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    /// Dialect name, or `"*"` for every dialect.
    pub dialect: String,
    /// Exception class the rule is registered under.
    pub exception_class: ExceptionClass,
    /// Regular expression matched against the start of the message.
    pub pattern: String,
    /// What the rule produces.
    pub kind: RuleKind,
    /// Name used in diagnostics; defaults to `config:<kind>`.
    #[serde(default)]
    pub name: Option<String>,
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// Whether to load the built-in rule table.
    #[serde(default = "default_true")]
    pub builtin_rules: bool,
    /// Whether to record savepoint rollback causes.
    #[serde(default = "default_true")]
    pub track_rollback_cause: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Extra rules, consulted before built-in rules of the same dialect and class.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            builtin_rules: true,
            track_rollback_cause: true,
            logging: LoggingConfig::default(),
            rules: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl FilterConfig {
    /// Loads configuration from a TOML file.
    ///
    /// Environment variables override file values using
    /// `SQLFAULT__<KEY>` (e.g. `SQLFAULT__TRACK_ROLLBACK_CAUSE=false`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, the path is not valid
    /// UTF-8, or the contents cannot be parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FilterConfigError> {
        let path = path.as_ref();

        let path_str = path
            .to_str()
            .ok_or_else(|| FilterConfigError::InvalidPath(format!("{:?}", path)))?;

        if !path.exists() {
            return Err(FilterConfigError::FileNotFound(path_str.to_string()));
        }

        let config = Config::builder()
            .add_source(File::new(path_str, FileFormat::Toml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parses configuration from TOML text, without environment overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self, FilterConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Builds the rule registry: configured rules first, then the built-in
    /// table when enabled.
    pub fn build_registry(&self) -> Result<Registry, FilterConfigError> {
        let mut builder = Registry::builder();

        for rule in &self.rules {
            let name = rule
                .name
                .clone()
                .unwrap_or_else(|| format!("config:{:?}", rule.kind));
            builder.register(
                &rule.dialect,
                rule.exception_class,
                &rule.pattern,
                rule.kind.classifier(name),
            )?;
        }

        if self.builtin_rules {
            crate::filters::register_builtin_rules(&mut builder)?;
        }

        Ok(builder.build())
    }
}
