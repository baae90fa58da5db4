pub mod config;
pub mod connection;
pub mod dialect;
pub mod migration;
pub mod migrator;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;

pub use config::{Config, DEFAULT_TABLE_NAME};
pub use connection::{Connection, ConnectionSource, Param};
pub use dialect::{BookkeepingSql, Dialect};
pub use migration::{Migration, MigrationSequence};
pub use migrator::{Command, Migrator, Outcome, status};
#[cfg(feature = "postgres")]
pub use postgres::PgConnection;
