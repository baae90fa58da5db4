use std::fmt;

use chrono::{Duration, NaiveDateTime, SubsecRound, Utc};
use sqlstep_common::{Direction, Error, Result};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::connection::{Connection, Param};
use crate::dialect::BookkeepingSql;
use crate::migration::{Migration, MigrationSequence};

const CHECK_SAVEPOINT: &str = "sqlstep_table_check";

/// The four top-level operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Up,
    Down,
    Latest,
    Current,
}

/// What an operation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The sequence is empty; the database was not touched.
    NoMigrations,
    NothingToApply,
    /// `latest` found every migration already applied.
    NoPendingMigrations,
    NothingToRevert,
    Applied(String),
    /// Every migration applied by one `latest` run, in order.
    AppliedBatch(Vec<String>),
    Reverted {
        id: String,
        current: Option<String>,
    },
    Current(Option<String>),
}

impl Outcome {
    /// Number of migrations applied by the operation.
    pub fn applied_count(&self) -> usize {
        match self {
            Outcome::Applied(_) => 1,
            Outcome::AppliedBatch(ids) => ids.len(),
            _ => 0,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::NoMigrations => write!(f, "No migrations in the set."),
            Outcome::NothingToApply => write!(f, "No migration to apply."),
            Outcome::NoPendingMigrations => write!(f, "No migrations to apply."),
            Outcome::NothingToRevert => {
                write!(f, "No migration currently applied, nothing to do.")
            }
            Outcome::Applied(id) => write!(f, "Successfully applied migration '{id}'."),
            Outcome::AppliedBatch(ids) => write!(f, "Applied {} migrations.", ids.len()),
            Outcome::Reverted { id, .. } => write!(f, "Successfully reverted migration '{id}'."),
            Outcome::Current(Some(id)) => write!(f, "Migration '{id}' is currently applied."),
            Outcome::Current(None) => write!(f, "No migration is currently applied."),
        }
    }
}

/// Integer status of an operation: `0` on success, the error's status code
/// otherwise.
pub fn status(result: &Result<Outcome>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.status_code(),
    }
}

enum Finish {
    Commit(Outcome),
    Rollback(Outcome),
}

/// Applies and reverts migrations one transaction at a time.
///
/// Each operation opens exactly one transaction and always closes it before
/// returning: committed when every step succeeded, rolled back otherwise or
/// when there was nothing to do.
pub struct Migrator<C> {
    config: Config<C>,
    silent: bool,
}

impl<C: Connection> Migrator<C> {
    pub fn new(config: Config<C>) -> Self {
        Self {
            config,
            silent: false,
        }
    }

    /// Suppress progress messages. Errors are always reported.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn config(&self) -> &Config<C> {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config<C> {
        &mut self.config
    }

    pub fn into_config(self) -> Config<C> {
        self.config
    }

    pub fn run(&mut self, command: Command) -> Result<Outcome> {
        match command {
            Command::Up => self.up(),
            Command::Down => self.down(),
            Command::Latest => self.latest(),
            Command::Current => self.current(),
        }
    }

    /// Apply the next migration.
    pub fn up(&mut self) -> Result<Outcome> {
        let result = self.in_transaction(|session| {
            session.ensure_table()?;

            let current = session.current_id()?;
            let Some(next) = session.next_after(current.as_deref()) else {
                return Ok(Finish::Rollback(Outcome::NothingToApply));
            };

            session.run_script(next, Direction::Up)?;
            session.set_current_id(Some(next.id()))?;
            Ok(Finish::Commit(Outcome::Applied(next.id().to_string())))
        });
        self.report(&result);
        result
    }

    /// Revert the current migration.
    pub fn down(&mut self) -> Result<Outcome> {
        let result = self.in_transaction(|session| {
            session.ensure_table()?;

            let Some(current_id) = session.current_id()? else {
                return Ok(Finish::Rollback(Outcome::NothingToRevert));
            };

            let sequence = session.sequence;
            let current = sequence
                .get(&current_id)
                .ok_or_else(|| Error::MissingMigration(current_id.clone()))?;

            session.run_script(current, Direction::Down)?;

            let previous = sequence.previous(&current_id).map(Migration::id);
            session.set_current_id(previous)?;
            Ok(Finish::Commit(Outcome::Reverted {
                id: current_id,
                current: previous.map(str::to_string),
            }))
        });
        self.report(&result);
        result
    }

    /// Apply every pending migration in a single transaction.
    pub fn latest(&mut self) -> Result<Outcome> {
        let result = self.in_transaction(|session| {
            session.ensure_table()?;

            let mut current = session.current_id()?;
            let mut applied = Vec::new();
            while let Some(next) = session.next_after(current.as_deref()) {
                session.run_script(next, Direction::Up)?;
                session.set_current_id(Some(next.id()))?;
                debug!("applied migration '{}' as part of batch", next.id());
                applied.push(next.id().to_string());
                current = Some(next.id().to_string());
            }

            if applied.is_empty() {
                Ok(Finish::Rollback(Outcome::NoPendingMigrations))
            } else {
                Ok(Finish::Commit(Outcome::AppliedBatch(applied)))
            }
        });
        self.report(&result);
        result
    }

    /// Read the current migration id without changing it.
    pub fn current(&mut self) -> Result<Outcome> {
        let result = self.in_transaction(|session| {
            session.ensure_table()?;
            let current = session.current_id()?;
            Ok(Finish::Commit(Outcome::Current(current)))
        });
        self.report(&result);
        result
    }

    fn in_transaction<F>(&mut self, work: F) -> Result<Outcome>
    where
        F: FnOnce(&mut Session<'_, C>) -> Result<Finish>,
    {
        if self.config.sequence().is_empty() {
            return Ok(Outcome::NoMigrations);
        }

        let silent = self.silent;
        let (conn, sequence, sql, table) = self.config.parts()?;
        conn.begin()?;

        let mut session = Session {
            conn,
            sequence,
            sql,
            table,
            silent,
            last_stamp: None,
        };

        match work(&mut session) {
            Ok(Finish::Commit(outcome)) => match session.conn.commit() {
                Ok(()) => Ok(outcome),
                Err(e) => {
                    session.abort();
                    Err(e)
                }
            },
            Ok(Finish::Rollback(outcome)) => {
                session.conn.rollback()?;
                Ok(outcome)
            }
            Err(e) => {
                session.abort();
                Err(e)
            }
        }
    }

    fn report(&self, result: &Result<Outcome>) {
        match result {
            Ok(outcome) => {
                if !self.silent {
                    info!("{outcome}");
                }
            }
            Err(Error::Script {
                id,
                direction,
                message,
                ..
            }) => error!("Failed to execute migration '{id}' {direction}: {message}."),
            Err(e) => error!("ERROR: {e}"),
        }
    }
}

/// One open transaction and the state borrowed for it.
struct Session<'a, C: Connection> {
    conn: &'a mut C,
    sequence: &'a MigrationSequence,
    sql: &'static dyn BookkeepingSql,
    table: &'a str,
    silent: bool,
    last_stamp: Option<NaiveDateTime>,
}

impl<'a, C: Connection> Session<'a, C> {
    /// Create the bookkeeping table unless the existence check confirms it.
    ///
    /// A failing check counts as "missing"; only create-table errors
    /// propagate.
    fn ensure_table(&mut self) -> Result<()> {
        if self.table_exists() {
            return Ok(());
        }

        if !self.silent {
            info!("Creating '{}' table...", self.table);
        }
        self.conn.execute_script(&self.sql.create_table(self.table))
    }

    /// Runs the dialect's existence check inside a savepoint so a failed
    /// check leaves the transaction usable.
    fn table_exists(&mut self) -> bool {
        if let Err(e) = self
            .conn
            .execute_script(&format!("SAVEPOINT {CHECK_SAVEPOINT}"))
        {
            debug!("could not open savepoint for table check: {e}");
            return false;
        }

        let checked = self
            .conn
            .query_first(
                &self.sql.check_table(self.table),
                &[Param::Text(Some(self.sql.check_table_arg(self.table)))],
            );

        match checked {
            Ok(row) => {
                if let Err(e) = self
                    .conn
                    .execute_script(&format!("RELEASE SAVEPOINT {CHECK_SAVEPOINT}"))
                {
                    debug!("could not release table check savepoint: {e}");
                }
                matches!(row, Some(Some(_)))
            }
            Err(e) => {
                debug!(
                    "table existence check failed, treating '{}' as missing: {e}",
                    self.table
                );
                let undo = format!(
                    "ROLLBACK TO SAVEPOINT {CHECK_SAVEPOINT}; RELEASE SAVEPOINT {CHECK_SAVEPOINT}"
                );
                if let Err(e) = self.conn.execute_script(&undo) {
                    warn!("could not roll back table check savepoint: {e}");
                }
                false
            }
        }
    }

    fn current_id(&mut self) -> Result<Option<String>> {
        let sql = self.sql.select_current(self.table);
        Ok(self.conn.query_first(&sql, &[])?.flatten())
    }

    /// Append a new position row. Timestamps strictly increase within one
    /// transaction.
    fn set_current_id(&mut self, id: Option<&str>) -> Result<()> {
        let mut stamp = Utc::now().naive_utc().trunc_subsecs(6);
        if let Some(last) = self.last_stamp {
            if stamp <= last {
                stamp = last + Duration::microseconds(1);
            }
        }
        self.last_stamp = Some(stamp);

        let sql = self.sql.insert_current(self.table);
        self.conn
            .execute(&sql, &[Param::Text(id), Param::Timestamp(stamp)])?;
        Ok(())
    }

    /// The migration to apply after `current`, or the first one when
    /// nothing is applied yet.
    fn next_after(&self, current: Option<&str>) -> Option<&'a Migration> {
        let sequence = self.sequence;
        match current {
            None => sequence.first(),
            Some(id) => {
                if sequence.get(id).is_none() {
                    warn!("current migration '{id}' is not in the migration set");
                }
                sequence.next(id)
            }
        }
    }

    fn run_script(&mut self, migration: &Migration, direction: Direction) -> Result<()> {
        let script = match direction {
            Direction::Up => migration.up(),
            Direction::Down => migration.down(),
        };
        debug!("executing migration '{}' {direction}", migration.id());

        self.conn.execute_script(script).map_err(|e| {
            let (message, code) = match e {
                Error::Database { message, code } => (message, code),
                other => (other.to_string(), None),
            };
            Error::Script {
                id: migration.id().to_string(),
                direction,
                message,
                code,
            }
        })
    }

    /// Roll back after a failure, keeping the original error.
    fn abort(&mut self) {
        if let Err(e) = self.conn.rollback() {
            warn!("rollback failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;

    /// Wraps a SQLite connection and records transaction control calls.
    struct Recording {
        inner: rusqlite::Connection,
        calls: Vec<&'static str>,
        fail_commit: bool,
        fail_check: bool,
    }

    impl Recording {
        fn new() -> Self {
            Self {
                inner: rusqlite::Connection::open_in_memory().unwrap(),
                calls: Vec::new(),
                fail_commit: false,
                fail_check: false,
            }
        }
    }

    impl Connection for Recording {
        fn begin(&mut self) -> Result<()> {
            self.calls.push("begin");
            self.inner.begin()
        }

        fn commit(&mut self) -> Result<()> {
            self.calls.push("commit");
            if self.fail_commit {
                return Err(Error::Database {
                    message: "database is locked".into(),
                    code: Some(5),
                });
            }
            self.inner.commit()
        }

        fn rollback(&mut self) -> Result<()> {
            self.calls.push("rollback");
            self.inner.rollback()
        }

        fn execute_script(&mut self, sql: &str) -> Result<()> {
            self.inner.execute_script(sql)
        }

        fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
            Connection::execute(&mut self.inner, sql, params)
        }

        fn query_first(
            &mut self,
            sql: &str,
            params: &[Param<'_>],
        ) -> Result<Option<Option<String>>> {
            if self.fail_check && sql.contains("sqlite_master") {
                return Err(Error::database("catalog unavailable"));
            }
            self.inner.query_first(sql, params)
        }
    }

    fn sequence(ids: &[&str]) -> MigrationSequence {
        MigrationSequence::new(
            ids.iter()
                .map(|id| {
                    Migration::new(
                        *id,
                        format!("CREATE TABLE t_{id} (v TEXT);"),
                        format!("DROP TABLE t_{id};"),
                    )
                })
                .collect(),
        )
        .unwrap()
    }

    fn migrator<'c>(conn: &'c mut Recording, ids: &[&str]) -> Migrator<&'c mut Recording> {
        Migrator::new(Config::with_connection(conn, sequence(ids)).with_dialect(Dialect::Sqlite))
            .silent(true)
    }

    fn rows(conn: &Recording) -> i64 {
        conn.inner
            .query_row("SELECT count(*) FROM migrations", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn every_operation_closes_its_transaction() {
        let mut conn = Recording::new();
        {
            let mut m = migrator(&mut conn, &["a"]);
            m.up().unwrap();
            m.up().unwrap();
            m.current().unwrap();
            m.down().unwrap();
            m.down().unwrap();
            m.latest().unwrap();
            m.latest().unwrap();
        }
        assert_eq!(
            conn.calls,
            [
                "begin", "commit", // up: applied
                "begin", "rollback", // up: nothing to apply
                "begin", "commit", // current
                "begin", "commit", // down: reverted
                "begin", "rollback", // down: nothing to revert
                "begin", "commit", // latest: applied one
                "begin", "rollback", // latest: nothing
            ]
        );
    }

    #[test]
    fn empty_sequence_never_touches_the_connection() {
        let mut conn = Recording::new();
        {
            let mut m = migrator(&mut conn, &[]);
            for command in [Command::Up, Command::Down, Command::Latest, Command::Current] {
                assert_eq!(m.run(command).unwrap(), Outcome::NoMigrations);
            }
        }
        assert!(conn.calls.is_empty());
    }

    #[test]
    fn failed_commit_rolls_back_and_reports_the_code() {
        let mut conn = Recording::new();
        conn.fail_commit = true;
        let result = migrator(&mut conn, &["a"]).up();
        assert_eq!(status(&result), 5);
        assert_eq!(conn.calls, ["begin", "commit", "rollback"]);

        conn.fail_commit = false;
        let current = migrator(&mut conn, &["a"]).current().unwrap();
        assert_eq!(current, Outcome::Current(None));
    }

    #[test]
    fn failing_existence_check_falls_through_to_create() {
        let mut conn = Recording::new();
        conn.fail_check = true;

        let outcome = migrator(&mut conn, &["a"]).up().unwrap();
        assert_eq!(outcome, Outcome::Applied("a".into()));
        assert_eq!(rows(&conn), 1);
    }

    #[test]
    fn failing_existence_check_with_existing_table_surfaces_create_error() {
        let mut conn = Recording::new();
        migrator(&mut conn, &["a"]).up().unwrap();

        conn.fail_check = true;
        let err = migrator(&mut conn, &["a"]).current().unwrap_err();
        assert!(err.to_string().contains("already exists"), "{err}");
        assert_eq!(conn.calls.last(), Some(&"rollback"));
    }

    #[test]
    fn batch_timestamps_strictly_increase() {
        let mut conn = Recording::new();
        let ids: Vec<String> = (0..50).map(|i| format!("m{i:02}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        let outcome = migrator(&mut conn, &refs).latest().unwrap();
        assert_eq!(outcome.applied_count(), 50);

        let distinct: i64 = conn
            .inner
            .query_row("SELECT count(DISTINCT timestamp) FROM migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(distinct, 50);
    }

    #[test]
    fn script_errors_name_the_migration() {
        let mut conn = Recording::new();
        let seq = MigrationSequence::new(vec![Migration::new("broken", "CREATE TABLE (", "")])
            .unwrap();
        let mut m = Migrator::new(Config::with_connection(&mut conn, seq).with_dialect(Dialect::Sqlite))
            .silent(true);

        match m.up().unwrap_err() {
            Error::Script {
                id,
                direction,
                code,
                ..
            } => {
                assert_eq!(id, "broken");
                assert_eq!(direction, Direction::Up);
                assert_eq!(code, Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(Outcome::NoMigrations.to_string(), "No migrations in the set.");
        assert_eq!(Outcome::NothingToApply.to_string(), "No migration to apply.");
        assert_eq!(
            Outcome::NoPendingMigrations.to_string(),
            "No migrations to apply."
        );
        assert_eq!(
            Outcome::NothingToRevert.to_string(),
            "No migration currently applied, nothing to do."
        );
        assert_eq!(
            Outcome::Applied("0001".into()).to_string(),
            "Successfully applied migration '0001'."
        );
        assert_eq!(
            Outcome::AppliedBatch(vec!["a".into(), "b".into()]).to_string(),
            "Applied 2 migrations."
        );
        assert_eq!(
            Outcome::Reverted {
                id: "0002".into(),
                current: Some("0001".into())
            }
            .to_string(),
            "Successfully reverted migration '0002'."
        );
        assert_eq!(
            Outcome::Current(Some("0001".into())).to_string(),
            "Migration '0001' is currently applied."
        );
        assert_eq!(
            Outcome::Current(None).to_string(),
            "No migration is currently applied."
        );
    }

    #[test]
    fn status_is_zero_only_on_success() {
        assert_eq!(status(&Ok(Outcome::NothingToApply)), 0);
        assert_eq!(status(&Err(Error::MissingMigration("x".into()))), 1);
    }
}
