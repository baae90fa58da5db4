use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlstep_config::{ConfigLoader, MigrationPlan};
use sqlstep_db::{Command, Config, Connection, Dialect, Migrator, status};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "sqlstep",
    version,
    about = "Apply and revert ordered SQL migrations"
)]
struct Cli {
    /// Migration file (.toml, .yaml, .yml or .json)
    #[arg(short, long, env = "SQLSTEP_CONFIG", default_value = "sqlstep.toml")]
    config: PathBuf,

    /// SQLite path or PostgreSQL connection string; overrides the file
    #[arg(short, long, env = "SQLSTEP_DATABASE")]
    database: Option<String>,

    /// Only report errors
    #[arg(short, long)]
    silent: bool,

    /// Emit log lines as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Commands {
    /// Apply the next migration
    Up,
    /// Revert the current migration
    Down,
    /// Apply every pending migration in one transaction
    Latest,
    /// Show the current migration
    Current,
}

impl From<Commands> for Command {
    fn from(value: Commands) -> Self {
        match value {
            Commands::Up => Command::Up,
            Commands::Down => Command::Down,
            Commands::Latest => Command::Latest,
            Commands::Current => Command::Current,
        }
    }
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.silent, cli.log_json);

    match run(cli) {
        Ok(code) => exit_code(code),
        Err(e) => {
            error!("ERROR: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(silent: bool, json: bool) {
    let default_level = if silent { "warn" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let plan = ConfigLoader::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let database = cli
        .database
        .or_else(|| plan.database.clone())
        .context("no database given: set `database` in the migration file or pass --database")?;

    let command = Command::from(cli.command);
    debug!("running {command:?} against a {} database", plan.dialect);

    match plan.dialect {
        Dialect::Sqlite => {
            let path = PathBuf::from(database);
            let config = build_config(plan, move || sqlstep_db::sqlite::open(&path))?;
            Ok(execute(config, cli.silent, command))
        }
        Dialect::Postgresql => run_postgres(plan, database, cli.silent, command),
    }
}

#[cfg(feature = "postgres")]
fn run_postgres(
    plan: MigrationPlan,
    database: String,
    silent: bool,
    command: Command,
) -> anyhow::Result<i32> {
    let config = build_config(plan, move || sqlstep_db::PgConnection::connect(&database))?;
    Ok(execute(config, silent, command))
}

#[cfg(not(feature = "postgres"))]
fn run_postgres(
    _plan: MigrationPlan,
    _database: String,
    _silent: bool,
    _command: Command,
) -> anyhow::Result<i32> {
    anyhow::bail!("PostgreSQL support is not compiled in; rebuild with the `postgres` feature")
}

/// The connection is only opened once an operation needs it, so an empty
/// migration set never touches the database.
fn build_config<C, F>(plan: MigrationPlan, factory: F) -> sqlstep_common::Result<Config<C>>
where
    F: FnOnce() -> sqlstep_common::Result<C> + 'static,
{
    Config::with_factory(factory, plan.sequence)
        .with_dialect(plan.dialect)
        .with_table_name(plan.table)
}

fn execute<C: Connection>(config: Config<C>, silent: bool, command: Command) -> i32 {
    let result = Migrator::new(config).silent(silent).run(command);
    status(&result)
}

/// Driver codes above 255 do not fit an exit status and collapse to 1.
fn exit_code(status: i32) -> ExitCode {
    match u8::try_from(status) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_subcommands_and_flags() {
        let cli = Cli::try_parse_from([
            "sqlstep",
            "--config",
            "db/migrations.yaml",
            "--database",
            "app.db",
            "--silent",
            "latest",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("db/migrations.yaml"));
        assert_eq!(cli.database.as_deref(), Some("app.db"));
        assert!(cli.silent);
        assert_eq!(Command::from(cli.command), Command::Latest);
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["sqlstep"]).is_err());
        assert!(Cli::try_parse_from(["sqlstep", "sideways"]).is_err());
    }

    #[test]
    fn exit_codes_stay_non_zero_on_failure() {
        assert_eq!(exit_code(0), ExitCode::SUCCESS);
        assert_eq!(exit_code(1), ExitCode::from(1));
        assert_eq!(exit_code(19), ExitCode::from(19));
        assert_eq!(exit_code(2067), ExitCode::FAILURE);
    }
}
