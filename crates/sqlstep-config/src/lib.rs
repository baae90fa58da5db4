pub mod loader;
pub mod model;

pub use loader::{ConfigLoader, FileFormat};
pub use model::{MigrationEntry, MigrationFile, MigrationPlan};
