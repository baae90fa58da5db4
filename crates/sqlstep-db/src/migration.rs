use std::collections::HashSet;

use sqlstep_common::{Error, Result};

/// A named, reversible schema change: one script to apply it and one to
/// revert it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    id: String,
    up: String,
    down: String,
}

impl Migration {
    pub fn new(id: impl Into<String>, up: impl Into<String>, down: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            up: up.into(),
            down: down.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn up(&self) -> &str {
        &self.up
    }

    pub fn down(&self) -> &str {
        &self.down
    }
}

/// Ordered, read-only list of migrations. Insertion order is apply order.
///
/// Lookups are linear scans; sequences are short and are built once at
/// startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSequence {
    migrations: Vec<Migration>,
}

impl MigrationSequence {
    /// Build a sequence, rejecting empty or duplicate ids.
    pub fn new(migrations: Vec<Migration>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(migrations.len());
        for migration in &migrations {
            if migration.id.is_empty() {
                return Err(Error::Config("migration id cannot be empty".into()));
            }
            if !seen.insert(migration.id.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate migration id '{}'",
                    migration.id
                )));
            }
        }
        Ok(Self { migrations })
    }

    pub fn count(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn first(&self) -> Option<&Migration> {
        self.migrations.first()
    }

    pub fn get(&self, id: &str) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.id == id)
    }

    /// The migration applied right after `id`, if any.
    pub fn next(&self, id: &str) -> Option<&Migration> {
        let index = self.position(id)?;
        self.migrations.get(index + 1)
    }

    /// The migration applied right before `id`, if any.
    pub fn previous(&self, id: &str) -> Option<&Migration> {
        let index = self.position(id)?;
        index.checked_sub(1).and_then(|i| self.migrations.get(i))
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.migrations.iter().position(|m| m.id == id)
    }
}

impl<'a> IntoIterator for &'a MigrationSequence {
    type Item = &'a Migration;
    type IntoIter = std::slice::Iter<'a, Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.migrations.iter()
    }
}
