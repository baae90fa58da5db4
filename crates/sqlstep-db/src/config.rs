use sqlstep_common::{Error, Result};

use crate::connection::ConnectionSource;
use crate::dialect::{BookkeepingSql, Dialect};
use crate::migration::MigrationSequence;

pub const DEFAULT_TABLE_NAME: &str = "migrations";

/// Everything a [`Migrator`](crate::Migrator) needs: where to connect, what
/// to apply, and where to keep its position.
pub struct Config<C> {
    source: ConnectionSource<C>,
    sequence: MigrationSequence,
    table_name: String,
    dialect: Dialect,
}

impl<C> Config<C> {
    pub fn new(source: ConnectionSource<C>, sequence: MigrationSequence) -> Self {
        Self {
            source,
            sequence,
            table_name: DEFAULT_TABLE_NAME.to_string(),
            dialect: Dialect::default(),
        }
    }

    pub fn with_connection(conn: C, sequence: MigrationSequence) -> Self {
        Self::new(ConnectionSource::ready(conn), sequence)
    }

    /// Defer opening the connection until an operation first needs it.
    pub fn with_factory<F>(factory: F, sequence: MigrationSequence) -> Self
    where
        F: FnOnce() -> Result<C> + 'static,
    {
        Self::new(ConnectionSource::lazy(factory), sequence)
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Result<Self> {
        let table_name = table_name.into();
        validate_table_name(&table_name)?;
        self.table_name = table_name;
        Ok(self)
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set the dialect from its tag, failing on anything unsupported.
    pub fn with_dialect_name(self, dialect: &str) -> Result<Self> {
        Ok(self.with_dialect(dialect.parse()?))
    }

    pub fn sequence(&self) -> &MigrationSequence {
        &self.sequence
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The connection, opening it through the factory on first call.
    pub fn connection(&mut self) -> Result<&mut C> {
        self.source.get()
    }

    pub fn is_connected(&self) -> bool {
        self.source.is_ready()
    }

    pub(crate) fn parts(
        &mut self,
    ) -> Result<(&mut C, &MigrationSequence, &'static dyn BookkeepingSql, &str)> {
        let conn = self.source.get()?;
        Ok((conn, &self.sequence, self.dialect.sql(), &self.table_name))
    }
}

/// Table names are spliced into SQL text, so only plain identifiers (with an
/// optional schema qualifier) are accepted.
fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("table name cannot be empty".into()));
    }

    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(Error::Config(format!(
            "table name '{name}' has too many qualifiers"
        )));
    }

    for part in parts {
        let mut chars = part.chars();
        let starts_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !starts_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::Config(format!(
                "table name '{name}' is not a plain identifier"
            )));
        }
    }

    Ok(())
}
