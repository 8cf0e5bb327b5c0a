use std::path::PathBuf;
use std::sync::Arc;

use tallysync_infra::database::DbManager;
use tempfile::TempDir;

/// Temporary database wrapper that keeps the underlying file alive for the
/// duration of a test run.
pub struct TestDatabase {
    pub manager: Arc<DbManager>,
    temp_dir: TempDir,
}

impl TestDatabase {
    /// Create a new temporary database with the schema applied.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");
        let manager = open(temp_dir.path().join("tallysync.db"));
        Self { manager, temp_dir }
    }

    pub fn path(&self) -> PathBuf {
        self.temp_dir.path().join("tallysync.db")
    }

    /// Drop the pool and open the same file again, as after a restart.
    pub fn reopen(self) -> Self {
        let Self { manager, temp_dir } = self;
        drop(manager);
        let manager = open(temp_dir.path().join("tallysync.db"));
        Self { manager, temp_dir }
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

fn open(path: PathBuf) -> Arc<DbManager> {
    let manager = DbManager::new(&path, 4).expect("db manager should be created");
    manager.run_migrations().expect("schema migrations should apply");
    Arc::new(manager)
}
