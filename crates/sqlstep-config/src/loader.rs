use std::path::{Path, PathBuf};

use sqlstep_common::{Error, Result};
use sqlstep_db::{Migration, MigrationSequence};
use tracing::{debug, info};

use crate::model::{MigrationFile, MigrationPlan};

/// Supported migration file encodings, picked by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Toml,
    Yaml,
    Json,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "toml" => Ok(FileFormat::Toml),
            "yml" | "yaml" => Ok(FileFormat::Yaml),
            "json" => Ok(FileFormat::Json),
            other => Err(Error::Config(format!(
                "unsupported migration file extension: '{other}'"
            ))),
        }
    }
}

/// Reads migration files into a ready-to-run [`MigrationPlan`].
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: &Path) -> Result<MigrationPlan> {
        let format = FileFormat::from_path(path)?;
        info!("loading migrations from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let file = Self::parse(&contents, format)?;

        let base_dir = path.parent().unwrap_or(Path::new("."));
        Self::resolve(file, base_dir)
    }

    pub fn parse(contents: &str, format: FileFormat) -> Result<MigrationFile> {
        match format {
            FileFormat::Toml => toml::from_str(contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}"))),
            FileFormat::Yaml => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            FileFormat::Json => Ok(serde_json::from_str(contents)?),
        }
    }

    /// Turn parsed entries into a sequence, reading `*_file` scripts
    /// relative to `base_dir`.
    pub fn resolve(file: MigrationFile, base_dir: &Path) -> Result<MigrationPlan> {
        let mut migrations = Vec::with_capacity(file.migrations.len());
        for entry in file.migrations {
            let up = script(&entry.id, "up", entry.up, entry.up_file, base_dir)?;
            let down = script(&entry.id, "down", entry.down, entry.down_file, base_dir)?;
            migrations.push(Migration::new(entry.id, up, down));
        }

        let sequence = MigrationSequence::new(migrations)?;
        debug!("loaded {} migrations", sequence.count());

        Ok(MigrationPlan {
            dialect: file.dialect,
            table: file.table,
            database: file.database,
            sequence,
        })
    }
}

fn script(
    id: &str,
    kind: &str,
    inline: Option<String>,
    file: Option<PathBuf>,
    base_dir: &Path,
) -> Result<String> {
    match (inline, file) {
        (Some(sql), None) => Ok(sql),
        (None, Some(relative)) => {
            let path = base_dir.join(relative);
            std::fs::read_to_string(&path).map_err(|e| {
                Error::Config(format!(
                    "failed to read {kind} script for migration '{id}' from {}: {e}",
                    path.display()
                ))
            })
        }
        (Some(_), Some(_)) => Err(Error::Config(format!(
            "migration '{id}' sets both `{kind}` and `{kind}_file`"
        ))),
        (None, None) => Err(Error::Config(format!(
            "migration '{id}' has no `{kind}` script"
        ))),
    }
}
