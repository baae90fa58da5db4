use std::fs;

use sqlstep_config::ConfigLoader;
use sqlstep_db::Dialect;

#[test]
fn loads_toml_with_script_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("sql")).unwrap();
    fs::write(
        dir.path().join("sql/0002.up.sql"),
        "CREATE TABLE posts (id INTEGER);",
    )
    .unwrap();
    fs::write(dir.path().join("sql/0002.down.sql"), "DROP TABLE posts;").unwrap();

    let path = dir.path().join("sqlstep.toml");
    fs::write(
        &path,
        r#"
dialect = "SQLITE"
table = "schema_log"
database = "app.db"

[[migrations]]
id = "0001"
up = "CREATE TABLE users (id INTEGER);"
down = "DROP TABLE users;"

[[migrations]]
id = "0002"
up_file = "sql/0002.up.sql"
down_file = "sql/0002.down.sql"
"#,
    )
    .unwrap();

    let plan = ConfigLoader::load(&path).unwrap();
    assert_eq!(plan.dialect, Dialect::Sqlite);
    assert_eq!(plan.table, "schema_log");
    assert_eq!(plan.database.as_deref(), Some("app.db"));
    assert_eq!(plan.sequence.count(), 2);

    let second = plan.sequence.get("0002").unwrap();
    assert_eq!(second.up(), "CREATE TABLE posts (id INTEGER);");
    assert_eq!(second.down(), "DROP TABLE posts;");
    assert_eq!(plan.sequence.next("0001").unwrap().id(), "0002");
}

#[test]
fn missing_script_file_names_the_migration() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("m.yaml");
    fs::write(
        &path,
        "migrations:\n  - id: only\n    up_file: nope.sql\n    down: ''\n",
    )
    .unwrap();

    let err = ConfigLoader::load(&path).unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains("failed to read up script for migration 'only'"),
        "{message}"
    );
}

#[test]
fn missing_migration_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConfigLoader::load(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, sqlstep_common::Error::Io(_)));
}
