//! Built-in filter rules for the supported dialects.
//!
//! Each classifier below is registered against one or more
//! (dialect, exception class, pattern) triples. Registration order matters
//! within a dialect and class: the first matching pattern wins.

use regex::Captures;

use super::columns::{duplicate_key_columns, sqlite_columns};
use super::registry::{Classifier, MatchContext, Outcome, RegistryBuilder, RegistryError, ANY_DIALECT};
use crate::driver::ExceptionClass::{self, *};
use crate::error::{DbError, ErrorKind};

fn raise(ctx: &MatchContext<'_>, kind: ErrorKind) -> Outcome {
    Outcome::Raise(DbError::new(kind).with_inner(ctx.error.clone()))
}

fn group(caps: &Captures<'_>, name: &str) -> Option<String> {
    caps.name(name).map(|m| m.as_str().to_string())
}

// ---------------------------------------------------------------------------
// Classifiers
// ---------------------------------------------------------------------------

fn deadlock(_: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
    raise(ctx, ErrorKind::Deadlock)
}

fn duplicate_key(caps: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
    let columns = caps
        .name("columns")
        .map(|m| duplicate_key_columns(ctx.dialect, m.as_str()))
        .unwrap_or_default();
    let value = group(caps, "value");
    raise(ctx, ErrorKind::DuplicateEntry { columns, value })
}

fn sqlite_duplicate_key(caps: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
    // The PRIMARY KEY form carries no column group.
    let columns = caps
        .name("columns")
        .map(|m| sqlite_columns(m.as_str()))
        .unwrap_or_default();
    raise(
        ctx,
        ErrorKind::DuplicateEntry {
            columns,
            value: None,
        },
    )
}

fn foreign_key(caps: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
    raise(
        ctx,
        ErrorKind::ReferenceViolation {
            table: group(caps, "table"),
            constraint: group(caps, "constraint"),
            key: group(caps, "key"),
            key_table: group(caps, "key_table"),
        },
    )
}

fn check_constraint(caps: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
    raise(
        ctx,
        ErrorKind::ConstraintViolation {
            table: group(caps, "table").unwrap_or_default(),
            check_name: group(caps, "check_name").unwrap_or_default(),
        },
    )
}

fn non_existent_constraint(caps: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
    raise(
        ctx,
        ErrorKind::NonExistentConstraint {
            table: group(caps, "relation"),
            constraint: group(caps, "constraint"),
        },
    )
}

fn non_existent_table(caps: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
    raise(
        ctx,
        ErrorKind::NonExistentTable {
            table: group(caps, "table").unwrap_or_default(),
        },
    )
}

fn non_existent_database(caps: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
    raise(
        ctx,
        ErrorKind::NonExistentDatabase {
            database: group(caps, "database"),
        },
    )
}

/// MySQL 1146 ("table doesn't exist") is left for the caller to see as-is,
/// so it does not collide with the mysql dialect's own table-existence check.
fn mysql_table_missing_as_is(_: &Captures<'_>, _: &MatchContext<'_>) -> Outcome {
    Outcome::PassThrough
}

fn data_error(_: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
    raise(ctx, ErrorKind::DataError)
}

fn savepoint_missing(_: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
    Outcome::Raise(DbError::generic(ctx.error.clone()))
}

fn connection_error(_: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
    raise(ctx, ErrorKind::ConnectionError)
}

fn not_supported(_: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
    raise(ctx, ErrorKind::NotSupported)
}

fn remaining_dbapi_error(_: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
    if ctx.is_disconnect {
        return raise(ctx, ErrorKind::ConnectionError);
    }
    tracing::warn!(
        dialect = ctx.dialect,
        class = %ctx.error.class,
        "DBAPI error wrapped as generic database error"
    );
    Outcome::Raise(DbError::generic(ctx.error.clone()))
}

fn invalid_unicode(_: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
    raise(ctx, ErrorKind::InvalidUnicodeParameter)
}

fn all_others(_: &Captures<'_>, ctx: &MatchContext<'_>) -> Outcome {
    tracing::warn!(
        dialect = ctx.dialect,
        class = %ctx.error.class,
        "database exception wrapped as generic database error"
    );
    Outcome::Raise(DbError::generic(ctx.error.clone()))
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

const MYSQL: &str = "mysql";
const POSTGRESQL: &str = "postgresql";
const SQLITE: &str = "sqlite";
const DB2: &str = "ibm_db_sa";

type Entry = (&'static str, ExceptionClass, &'static [&'static str]);

/// Registers the built-in rule table.
///
/// # Errors
/// Fails only if one of the patterns below does not compile.
pub fn register_builtin_rules(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
    let groups: Vec<(Classifier, &[Entry])> = vec![
        (Classifier::new("deadlock", deadlock), DEADLOCK),
        (Classifier::new("duplicate_key", duplicate_key), DUPLICATE_KEY),
        (
            Classifier::new("sqlite_duplicate_key", sqlite_duplicate_key),
            SQLITE_DUPLICATE_KEY,
        ),
        (Classifier::new("foreign_key", foreign_key), FOREIGN_KEY),
        (
            Classifier::new("check_constraint", check_constraint),
            CHECK_CONSTRAINT,
        ),
        (
            Classifier::new("non_existent_constraint", non_existent_constraint),
            NON_EXISTENT_CONSTRAINT,
        ),
        (
            Classifier::new("non_existent_table", non_existent_table),
            NON_EXISTENT_TABLE,
        ),
        (
            Classifier::new("non_existent_database", non_existent_database),
            NON_EXISTENT_DATABASE,
        ),
        (
            Classifier::new("mysql_table_missing_as_is", mysql_table_missing_as_is),
            MYSQL_TABLE_MISSING,
        ),
        (Classifier::new("data_error", data_error), DATA_ERROR),
        (
            Classifier::new("savepoint_missing", savepoint_missing),
            SAVEPOINT_MISSING,
        ),
        (
            Classifier::new("connection_error", connection_error),
            CONNECTION_ERROR,
        ),
        (Classifier::new("not_supported", not_supported), NOT_SUPPORTED),
        (
            Classifier::new("remaining_dbapi_error", remaining_dbapi_error),
            REMAINING_DBAPI_ERROR,
        ),
        (
            Classifier::new("invalid_unicode", invalid_unicode),
            INVALID_UNICODE,
        ),
        (Classifier::new("all_others", all_others), ALL_OTHERS),
    ];

    for (classifier, entries) in &groups {
        for (dialect, class, patterns) in entries.iter() {
            builder.register_all(dialect, *class, patterns, classifier)?;
        }
    }
    Ok(())
}

const DEADLOCK: &[Entry] = &[
    (MYSQL, OperationalError, &[r"^.*\b1213\b.*Deadlock found.*"]),
    (MYSQL, DatabaseError, &[r"^.*\b1205\b.*Lock wait timeout exceeded.*"]),
    (
        MYSQL,
        InternalError,
        &[
            r"^.*\b1213\b.*Deadlock found.*",
            r"^.*\b1213\b.*detected deadlock/conflict.*",
            r"^.*\b1213\b.*Deadlock: wsrep aborted.*",
        ],
    ),
    (POSTGRESQL, OperationalError, &[r"^.*deadlock detected.*"]),
    (POSTGRESQL, DbapiError, &[r"^.*deadlock detected.*"]),
    (DB2, DbapiError, &[r"^.*SQL0911N.*"]),
];

const DUPLICATE_KEY: &[Entry] = &[
    (
        MYSQL,
        IntegrityError,
        &[
            r"^.*\b1062\b.*Duplicate entry '(?P<value>.*)' for key '(?P<columns>[^']+)'.*$",
            // binary column values arrive backslash-quoted
            r"^.*\b1062\b.*Duplicate entry \\'(?P<value>.*)\\' for key \\'(?P<columns>.+)\\'.*$",
        ],
    ),
    (
        POSTGRESQL,
        IntegrityError,
        &[
            r#"^.*duplicate\s+key.*"(?P<columns>[^"]+)"\s*\n.*Key\s+\((?P<key>.*)\)=\((?P<value>.*)\)\s+already\s+exists.*$"#,
            r#"^.*duplicate\s+key.*"(?P<columns>[^"]+)"\s*\n.*$"#,
            r#"^.*duplicate\s+key.*"(?P<columns>[^"]+)""#,
        ],
    ),
];

const SQLITE_DUPLICATE_KEY: &[Entry] = &[
    (
        SQLITE,
        IntegrityError,
        &[
            r"^.*columns?(?P<columns>[^)\n]+)(is|are)\s+not\s+unique(?:\n|$)",
            r"^.*UNIQUE\s+constraint\s+failed:\s+(?P<columns>[^\n]+)",
            r"^.*PRIMARY\s+KEY\s+must\s+be\s+unique.*$",
        ],
    ),
    (DB2, IntegrityError, &[r"^.*SQL0803N.*$"]),
];

const FOREIGN_KEY: &[Entry] = &[
    (SQLITE, IntegrityError, &[r"(?i).*foreign key constraint failed"]),
    (
        POSTGRESQL,
        IntegrityError,
        &[concat!(
            r#".*on table "(?P<table>[^"]+)" violates foreign key constraint "(?P<constraint>[^"]+)".*\n"#,
            r#"DETAIL:  Key \((?P<key>.+)\)=\(.+\) is (not present in|still referenced from) table "(?P<key_table>[^"]+)"."#,
        )],
    ),
    (
        MYSQL,
        IntegrityError,
        &[concat!(
            r".*Cannot (add|delete) or update a (child|parent) row: ",
            r#"a foreign key constraint fails \([`"].+[`"]\.[`"](?P<table>.+)[`"], "#,
            r#"CONSTRAINT [`"](?P<constraint>.+)[`"] FOREIGN KEY "#,
            r#"\([`"](?P<key>.+)[`"]\) REFERENCES [`"](?P<key_table>.+)[`"] "#,
        )],
    ),
];

const CHECK_CONSTRAINT: &[Entry] = &[(
    POSTGRESQL,
    IntegrityError,
    &[r#".*new row for relation "(?P<table>.+)" violates check constraint "(?P<check_name>.+)""#],
)];

const NON_EXISTENT_CONSTRAINT: &[Entry] = &[
    (
        POSTGRESQL,
        ProgrammingError,
        &[r#".* constraint "(?P<constraint>.+)" of relation "(?P<relation>.+)" does not exist"#],
    ),
    (
        MYSQL,
        InternalError,
        &[
            r".*1091,.*Can't DROP (?:FOREIGN KEY )?['`](?P<constraint>.+)['`]; check that .* exists",
            r".*1025,.*Error on rename of '.+/(?P<relation>.+)' to ",
        ],
    ),
    (
        MYSQL,
        OperationalError,
        &[r".*1091,.*Can't DROP (?:FOREIGN KEY )?['`](?P<constraint>.+)['`]; check that .* exists"],
    ),
];

const NON_EXISTENT_TABLE: &[Entry] = &[
    (SQLITE, OperationalError, &[r".*\bno such table: (?P<table>\S+)"]),
    (MYSQL, InternalError, &[r#".*1051,.*Unknown table '(.+\.)?(?P<table>.+)'""#]),
    (MYSQL, OperationalError, &[r#".*1051,.*Unknown table '(.+\.)?(?P<table>.+)'""#]),
    (POSTGRESQL, ProgrammingError, &[r#".* table "(?P<table>.+)" does not exist"#]),
];

const NON_EXISTENT_DATABASE: &[Entry] = &[
    (MYSQL, InternalError, &[r#".*1049,.*Unknown database '(?P<database>.+)'""#]),
    (MYSQL, OperationalError, &[r#".*1049,.*Unknown database '(?P<database>.+)'""#]),
    (POSTGRESQL, OperationalError, &[r#".*database "(?P<database>.+)" does not exist"#]),
    (SQLITE, OperationalError, &[r".*unable to open database file.*"]),
];

const MYSQL_TABLE_MISSING: &[Entry] = &[(MYSQL, DbapiError, &[r".*\b1146\b"])];

const DATA_ERROR: &[Entry] = &[
    (MYSQL, OperationalError, &[r".*(1292|1366).*Incorrect \w+ value.*"]),
    (
        MYSQL,
        DataError,
        &[
            r".*1265.*Data truncated for column.*",
            r".*1264.*Out of range value for column.*",
            r".*1406.*Data too long for column.*",
        ],
    ),
    (MYSQL, InternalError, &[r"^.*1366.*Incorrect string value:*"]),
    (SQLITE, ProgrammingError, &[r"(?i).*You must not use 8-bit bytestrings*"]),
];

const SAVEPOINT_MISSING: &[Entry] = &[(
    MYSQL,
    OperationalError,
    &[r".*\(1305,\s+'SAVEPOINT\s+(.+)\s+does not exist'\)"],
)];

const CONNECTION_ERROR: &[Entry] = &[
    (MYSQL, OperationalError, &[r".*\(.*(?:2002|2003|2006|2013|1047)"]),
    (
        MYSQL,
        InternalError,
        &[r".*\(.*(?:1927)", r".*Packet sequence number wrong"],
    ),
    (POSTGRESQL, OperationalError, &[r".*could not connect to server"]),
    (DB2, OperationalError, &[r".*(?:30081)"]),
];

const NOT_SUPPORTED: &[Entry] = &[(ANY_DIALECT, NotSupportedError, &[r".*"])];

const REMAINING_DBAPI_ERROR: &[Entry] = &[(ANY_DIALECT, DbapiError, &[r".*"])];

const INVALID_UNICODE: &[Entry] = &[(ANY_DIALECT, UnicodeEncodeError, &[r".*"])];

const ALL_OTHERS: &[Entry] = &[(ANY_DIALECT, Exception, &[r".*"])];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::registry::Registry;

    fn registry() -> Registry {
        let mut builder = Registry::builder();
        register_builtin_rules(&mut builder).expect("builtin patterns compile");
        builder.build()
    }

    #[test]
    fn test_builtin_patterns_compile() {
        let registry = registry();
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_wildcard_fallbacks_registered() {
        let registry = registry();
        for class in [NotSupportedError, DbapiError, UnicodeEncodeError, Exception] {
            assert_eq!(registry.rules_for(ANY_DIALECT, class).len(), 1, "{class}");
        }
    }

    #[test]
    fn test_mysql_integrity_order() {
        let registry = registry();
        let names: Vec<_> = registry
            .rules_for(MYSQL, IntegrityError)
            .iter()
            .map(|rule| rule.classifier().name())
            .collect();
        assert_eq!(names, vec!["duplicate_key", "duplicate_key", "foreign_key"]);
    }

    #[test]
    fn test_postgres_integrity_order() {
        let registry = registry();
        let names: Vec<_> = registry
            .rules_for(POSTGRESQL, IntegrityError)
            .iter()
            .map(|rule| rule.classifier().name())
            .collect();
        assert_eq!(
            names,
            vec![
                "duplicate_key",
                "duplicate_key",
                "duplicate_key",
                "foreign_key",
                "check_constraint"
            ]
        );
    }

    #[test]
    fn test_mysql_1146_is_pass_through() {
        let registry = registry();
        let rules = registry.rules_for(MYSQL, DbapiError);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].classifier().name(), "mysql_table_missing_as_is");
    }
}
