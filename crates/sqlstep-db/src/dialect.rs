use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlstep_common::Error;

/// The SQL variants the bookkeeping statements are written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Dialect {
    #[default]
    Postgresql,
    Sqlite,
}

impl Dialect {
    pub const POSTGRESQL: &'static str = "POSTGRESQL";
    pub const SQLITE: &'static str = "SQLITE";

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgresql => Self::POSTGRESQL,
            Dialect::Sqlite => Self::SQLITE,
        }
    }

    /// Bookkeeping statements for this dialect.
    pub fn sql(&self) -> &'static dyn BookkeepingSql {
        match self {
            Dialect::Postgresql => &PostgresSql,
            Dialect::Sqlite => &SqliteSql,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            Self::POSTGRESQL => Ok(Dialect::Postgresql),
            Self::SQLITE => Ok(Dialect::Sqlite),
            other => Err(Error::UnsupportedDialect(other.to_string())),
        }
    }
}

impl TryFrom<String> for Dialect {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Dialect> for String {
    fn from(value: Dialect) -> Self {
        value.as_str().to_string()
    }
}

/// The four statements the migrator needs to keep its position in the
/// bookkeeping table.
///
/// Parameter order is fixed: the existence check binds
/// [`check_table_arg`](BookkeepingSql::check_table_arg), the insert binds
/// `(id, timestamp)`. The table name itself is interpolated, so callers must
/// validate it first.
pub trait BookkeepingSql: Send + Sync {
    /// Yields one row whose first column is `NULL` when the table is missing.
    fn check_table(&self, table: &str) -> String;

    /// The value bound to the existence check for `table`.
    fn check_table_arg<'t>(&self, table: &'t str) -> &'t str {
        table
    }

    /// Yields the `id` of the most recent row, if any.
    fn select_current(&self, table: &str) -> String;

    /// Appends a `(id, timestamp)` row.
    fn insert_current(&self, table: &str) -> String;

    fn create_table(&self, table: &str) -> String;

    /// Whether `select_current` takes a row lock that serializes runners.
    fn locks_current_row(&self) -> bool;
}

pub struct PostgresSql;

impl BookkeepingSql for PostgresSql {
    fn check_table(&self, _table: &str) -> String {
        "SELECT to_regclass($1::text)::text AS ok FOR UPDATE".to_string()
    }

    fn select_current(&self, table: &str) -> String {
        format!(
            "SELECT id
               FROM {table}
              ORDER BY timestamp DESC
              LIMIT 1
                FOR UPDATE"
        )
    }

    fn insert_current(&self, table: &str) -> String {
        format!("INSERT INTO {table} (id, timestamp) VALUES ($1, $2)")
    }

    fn create_table(&self, table: &str) -> String {
        format!(
            "CREATE TABLE {table} (
                id        VARCHAR,
                timestamp TIMESTAMP NOT NULL
            )"
        )
    }

    fn locks_current_row(&self) -> bool {
        true
    }
}

/// SQLite has no row locks; concurrent runners are only kept apart by the
/// database-level write lock of the surrounding transaction.
pub struct SqliteSql;

impl BookkeepingSql for SqliteSql {
    /// A qualified `schema.table` is looked up in that schema's catalog.
    fn check_table(&self, table: &str) -> String {
        let catalog = match split_schema(table) {
            (Some(schema), _) => format!("{schema}.sqlite_master"),
            (None, _) => "sqlite_master".to_string(),
        };
        format!(
            "SELECT CASE WHEN EXISTS(
                SELECT name
                  FROM {catalog}
                 WHERE type = 'table' AND name = ?1
            ) THEN 'ok' ELSE NULL END"
        )
    }

    fn check_table_arg<'t>(&self, table: &'t str) -> &'t str {
        split_schema(table).1
    }

    fn select_current(&self, table: &str) -> String {
        // rowid breaks timestamp ties in insertion order
        format!(
            "SELECT id
               FROM {table}
              ORDER BY timestamp DESC, rowid DESC
              LIMIT 1"
        )
    }

    fn insert_current(&self, table: &str) -> String {
        format!("INSERT INTO {table} (id, timestamp) VALUES (?1, ?2)")
    }

    fn create_table(&self, table: &str) -> String {
        format!(
            "CREATE TABLE {table} (
                id        TEXT,
                timestamp TEXT NOT NULL
            )"
        )
    }

    fn locks_current_row(&self) -> bool {
        false
    }
}

/// Split `schema.table` into its parts; unqualified names have no schema.
fn split_schema(table: &str) -> (Option<&str>, &str) {
    match table.split_once('.') {
        Some((schema, name)) => (Some(schema), name),
        None => (None, table),
    }
}
