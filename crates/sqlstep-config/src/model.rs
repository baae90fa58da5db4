use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sqlstep_db::{DEFAULT_TABLE_NAME, Dialect, MigrationSequence};

/// On-disk layout of a migration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationFile {
    #[serde(default)]
    pub dialect: Dialect,

    #[serde(default = "default_table")]
    pub table: String,

    /// SQLite path or PostgreSQL connection string.
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub migrations: Vec<MigrationEntry>,
}

impl Default for MigrationFile {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            table: default_table(),
            database: None,
            migrations: Vec::new(),
        }
    }
}

fn default_table() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

/// One migration as written in the file. Each script is given either
/// inline or as a path relative to the migration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationEntry {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down_file: Option<PathBuf>,
}

/// A loaded migration file with every script resolved.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub dialect: Dialect,
    pub table: String,
    pub database: Option<String>,
    pub sequence: MigrationSequence,
}
