//! Column extraction for duplicate-key violations.
//!
//! Backends report the violated key differently, so these rules are plain
//! string splitting keyed by dialect:
//!
//! - postgresql names single-column constraints `<table>_<column>_key`.
//! - mysql reports the key as `column` or, since 8.0.19, `table.column`.
//! - `uniq_<table>0<col1>0<col2>` is the naming convention for composite
//!   unique constraints on every backend.
//! - sqlite lists `table.column` pairs separated by `", "`.

/// Prefix of the composite unique-constraint naming convention.
const UNIQUE_PREFIX: &str = "uniq_";

/// Separator between table and column names in the convention.
const UNIQUE_SEPARATOR: char = '0';

/// Extracts column names from the key token of a mysql or postgresql
/// duplicate-key message.
pub fn duplicate_key_columns(dialect: &str, key: &str) -> Vec<String> {
    if let Some(rest) = key.strip_prefix(UNIQUE_PREFIX) {
        return split_unique_convention(rest);
    }

    match dialect {
        "postgresql" => vec![postgres_constraint_column(key).to_string()],
        "mysql" => {
            let head = key.split(UNIQUE_SEPARATOR).next().unwrap_or_default();
            if head.contains(UNIQUE_PREFIX) {
                split_unique_convention(key)
            } else {
                vec![strip_table_prefix(key).to_string()]
            }
        }
        _ => vec![key.to_string()],
    }
}

/// Extracts column names from a sqlite unique-constraint message fragment.
pub fn sqlite_columns(fragment: &str) -> Vec<String> {
    fragment
        .trim()
        .split(", ")
        .map(|column| strip_table_prefix(column).to_string())
        .collect()
}

/// `t0c10c2` -> `["c1", "c2"]`: the leading segment is the table.
fn split_unique_convention(name: &str) -> Vec<String> {
    name.split(UNIQUE_SEPARATOR)
        .skip(1)
        .map(str::to_string)
        .collect()
}

/// `users_email_key` -> `email`. Names without two underscores are kept.
fn postgres_constraint_column(name: &str) -> &str {
    match (name.find('_'), name.rfind('_')) {
        (Some(first), Some(last)) if first < last => &name[first + 1..last],
        _ => name,
    }
}

fn strip_table_prefix(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_single_column_key() {
        assert_eq!(
            duplicate_key_columns("postgresql", "users_email_key"),
            vec!["email"]
        );
    }

    #[test]
    fn test_postgres_column_with_underscores() {
        assert_eq!(
            duplicate_key_columns("postgresql", "users_first_name_key"),
            vec!["first_name"]
        );
    }

    #[test]
    fn test_postgres_name_without_underscores() {
        assert_eq!(duplicate_key_columns("postgresql", "pkey"), vec!["pkey"]);
    }

    #[test]
    fn test_unique_convention_any_dialect() {
        for dialect in ["postgresql", "mysql", "oracle"] {
            assert_eq!(
                duplicate_key_columns(dialect, "uniq_users0email0tenant"),
                vec!["email", "tenant"]
            );
        }
    }

    #[test]
    fn test_mysql_bare_column() {
        assert_eq!(duplicate_key_columns("mysql", "email"), vec!["email"]);
    }

    #[test]
    fn test_mysql_table_qualified_column() {
        assert_eq!(duplicate_key_columns("mysql", "users.email"), vec!["email"]);
    }

    #[test]
    fn test_mysql_table_qualified_unique_convention() {
        assert_eq!(
            duplicate_key_columns("mysql", "users.uniq_users0email0tenant"),
            vec!["email", "tenant"]
        );
    }

    #[test]
    fn test_other_dialect_keeps_key() {
        assert_eq!(duplicate_key_columns("oracle", "users.email"), vec!["users.email"]);
    }

    #[test]
    fn test_sqlite_columns() {
        assert_eq!(
            sqlite_columns(" users.email, users.tenant "),
            vec!["email", "tenant"]
        );
        assert_eq!(sqlite_columns(" email "), vec!["email"]);
    }
}
