use std::path::Path;

use rusqlite::params_from_iter;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use sqlstep_common::{Error, Result};
use tracing::info;

use crate::connection::{Connection, Param, format_timestamp};

/// Open a SQLite database file for migrating.
pub fn open(db_path: &Path) -> Result<rusqlite::Connection> {
    info!("opening sqlite database at {}", db_path.display());
    let conn = rusqlite::Connection::open(db_path)
        .map_err(|e| with_context("failed to open database", e))?;

    conn.execute_batch("PRAGMA foreign_keys=ON;")
        .map_err(|e| with_context("failed to set pragmas", e))?;

    Ok(conn)
}

impl ToSql for Param<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Param::Text(Some(text)) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
            Param::Text(None) => ToSqlOutput::Owned(Value::Null),
            Param::Timestamp(ts) => ToSqlOutput::Owned(Value::Text(format_timestamp(ts))),
        })
    }
}

impl Connection for rusqlite::Connection {
    fn begin(&mut self) -> Result<()> {
        self.execute_batch("BEGIN")
            .map_err(|e| with_context("failed to begin transaction", e))
    }

    fn commit(&mut self) -> Result<()> {
        self.execute_batch("COMMIT")
            .map_err(|e| with_context("failed to commit transaction", e))
    }

    fn rollback(&mut self) -> Result<()> {
        self.execute_batch("ROLLBACK")
            .map_err(|e| with_context("failed to roll back transaction", e))
    }

    fn execute_script(&mut self, sql: &str) -> Result<()> {
        self.execute_batch(sql).map_err(sqlite_error)
    }

    fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
        // Fully qualified: the trait method of the same name would recurse.
        let changed = rusqlite::Connection::execute(self, sql, params_from_iter(params.iter()))
            .map_err(sqlite_error)?;
        Ok(changed as u64)
    }

    fn query_first(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Option<Option<String>>> {
        let mut stmt = self
            .prepare(sql)
            .map_err(|e| with_context("failed to prepare query", e))?;
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(sqlite_error)?;

        let value = match rows.next().map_err(sqlite_error)? {
            Some(row) => Some(row.get::<_, Option<String>>(0).map_err(sqlite_error)?),
            None => None,
        };
        Ok(value)
    }
}

fn sqlite_code(e: &rusqlite::Error) -> Option<i32> {
    match e {
        rusqlite::Error::SqliteFailure(failure, _) => Some(failure.extended_code),
        _ => None,
    }
}

fn sqlite_error(e: rusqlite::Error) -> Error {
    Error::Database {
        code: sqlite_code(&e),
        message: e.to_string(),
    }
}

fn with_context(context: &str, e: rusqlite::Error) -> Error {
    Error::Database {
        code: sqlite_code(&e),
        message: format!("{context}: {e}"),
    }
}
