use chrono::NaiveDateTime;
use sqlstep_common::{Error, Result};
use tracing::debug;

/// Text layout used wherever a timestamp is stored as a string.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A bound statement parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Param<'a> {
    Text(Option<&'a str>),
    Timestamp(NaiveDateTime),
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// The handful of operations the migrator performs on a database handle.
///
/// Transactions are driven explicitly with `begin` / `commit` / `rollback`;
/// every other call runs inside whatever transaction is open.
pub trait Connection {
    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Run a script of one or more statements without parameters.
    fn execute_script(&mut self, sql: &str) -> Result<()>;

    /// Run one statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64>;

    /// First column of the first row: `None` when there are no rows,
    /// `Some(None)` when that column is `NULL`.
    fn query_first(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Option<Option<String>>>;
}

impl<C: Connection + ?Sized> Connection for &mut C {
    fn begin(&mut self) -> Result<()> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<()> {
        (**self).rollback()
    }

    fn execute_script(&mut self, sql: &str) -> Result<()> {
        (**self).execute_script(sql)
    }

    fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
        (**self).execute(sql, params)
    }

    fn query_first(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Option<Option<String>>> {
        (**self).query_first(sql, params)
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn begin(&mut self) -> Result<()> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<()> {
        (**self).rollback()
    }

    fn execute_script(&mut self, sql: &str) -> Result<()> {
        (**self).execute_script(sql)
    }

    fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
        (**self).execute(sql, params)
    }

    fn query_first(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Option<Option<String>>> {
        (**self).query_first(sql, params)
    }
}

pub type ConnectionFactory<C> = Box<dyn FnOnce() -> Result<C>>;

/// Either a live connection or a factory that produces one on first use.
///
/// The factory runs at most once; its connection is kept for every later
/// access.
pub enum ConnectionSource<C> {
    Ready(C),
    /// `None` once the factory has been spent without producing a connection.
    Lazy(Option<ConnectionFactory<C>>),
}

impl<C> ConnectionSource<C> {
    pub fn ready(conn: C) -> Self {
        ConnectionSource::Ready(conn)
    }

    pub fn lazy<F>(factory: F) -> Self
    where
        F: FnOnce() -> Result<C> + 'static,
    {
        ConnectionSource::Lazy(Some(Box::new(factory)))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionSource::Ready(_))
    }

    /// Get the connection, running the factory if this is the first access.
    pub fn get(&mut self) -> Result<&mut C> {
        if let ConnectionSource::Lazy(slot) = self {
            let factory = slot.take().ok_or_else(|| {
                Error::Config("connection factory already failed, cannot retry".into())
            })?;
            debug!("opening database connection from factory");
            *self = ConnectionSource::Ready(factory()?);
        }

        match self {
            ConnectionSource::Ready(conn) => Ok(conn),
            ConnectionSource::Lazy(_) => Err(Error::Config("connection not available".into())),
        }
    }
}

impl<C> From<C> for ConnectionSource<C> {
    fn from(conn: C) -> Self {
        ConnectionSource::Ready(conn)
    }
}
