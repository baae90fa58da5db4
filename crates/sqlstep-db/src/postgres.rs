use sqlstep_common::{Error, Result};
use tokio::runtime::{Builder, Runtime};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{info, warn};

use crate::connection::{Connection, Param};

/// Blocking PostgreSQL connection.
///
/// Drives a `tokio-postgres` client on a private current-thread runtime, so
/// every call blocks the caller until the server answers.
pub struct PgConnection {
    runtime: Runtime,
    client: Client,
}

impl PgConnection {
    /// Connect using a libpq-style connection string or URL.
    pub fn connect(params: &str) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::database(format!("failed to start postgres runtime: {e}")))?;

        let client = runtime
            .block_on(async {
                let (client, connection) = tokio_postgres::connect(params, NoTls).await?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("postgres connection closed with error: {e}");
                    }
                });
                Ok::<_, tokio_postgres::Error>(client)
            })
            .map_err(|e| with_context("failed to connect to postgres", e))?;

        info!("connected to postgres");
        Ok(Self { runtime, client })
    }

    fn batch(&mut self, sql: &str) -> std::result::Result<(), tokio_postgres::Error> {
        self.runtime.block_on(self.client.batch_execute(sql))
    }
}

fn to_sql_params<'a>(params: &'a [Param<'a>]) -> Vec<Box<dyn ToSql + Sync + 'a>> {
    params
        .iter()
        .map(|param| match *param {
            Param::Text(text) => Box::new(text) as Box<dyn ToSql + Sync + 'a>,
            Param::Timestamp(ts) => Box::new(ts) as Box<dyn ToSql + Sync + 'a>,
        })
        .collect()
}

impl Connection for PgConnection {
    fn begin(&mut self) -> Result<()> {
        self.batch("BEGIN")
            .map_err(|e| with_context("failed to begin transaction", e))
    }

    fn commit(&mut self) -> Result<()> {
        self.batch("COMMIT")
            .map_err(|e| with_context("failed to commit transaction", e))
    }

    fn rollback(&mut self) -> Result<()> {
        self.batch("ROLLBACK")
            .map_err(|e| with_context("failed to roll back transaction", e))
    }

    fn execute_script(&mut self, sql: &str) -> Result<()> {
        self.batch(sql).map_err(pg_error)
    }

    fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
        let boxed = to_sql_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|p| p.as_ref()).collect();
        self.runtime
            .block_on(self.client.execute(sql, &refs))
            .map_err(pg_error)
    }

    fn query_first(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Option<Option<String>>> {
        let boxed = to_sql_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|p| p.as_ref()).collect();
        let rows = self
            .runtime
            .block_on(self.client.query(sql, &refs))
            .map_err(pg_error)?;

        match rows.first() {
            Some(row) => row
                .try_get::<_, Option<String>>(0)
                .map(Some)
                .map_err(pg_error),
            None => Ok(None),
        }
    }
}

/// SQLSTATE codes are five characters; only all-digit ones map to a number.
fn pg_code(e: &tokio_postgres::Error) -> Option<i32> {
    e.code().and_then(|state| state.code().parse().ok())
}

fn pg_error(e: tokio_postgres::Error) -> Error {
    let message = match e.as_db_error() {
        Some(db) => db.message().to_string(),
        None => e.to_string(),
    };
    Error::Database {
        code: pg_code(&e),
        message,
    }
}

fn with_context(context: &str, e: tokio_postgres::Error) -> Error {
    Error::Database {
        code: pg_code(&e),
        message: format!("{context}: {e}"),
    }
}
