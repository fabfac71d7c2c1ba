use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Resolves the on-disk layout used by the service, rooted at `DATA_DIR`.
#[derive(Debug, Clone)]
pub struct PortablePathManager {
    root: PathBuf,
}

impl PortablePathManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data directory itself (./data by default).
    pub fn data_dir(&self) -> &Path {
        &self.root
    }

    /// SQLite database directory (./data/db).
    pub fn db_dir(&self) -> PathBuf {
        self.root.join("db")
    }

    /// Local embedding model cache (./data/models).
    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    /// LanceDB vector index (./data/vectors).
    pub fn vectors_dir(&self) -> PathBuf {
        self.root.join("vectors")
    }

    /// Default SQLite connection string inside `db_dir`.
    pub fn database_url(&self) -> String {
        format!(
            "sqlite://{}?mode=rwc",
            self.db_dir().join("codeyatra.sqlite").to_string_lossy()
        )
    }

    /// Creates the data, db, models and vectors directories if they do not exist.
    pub fn init(&self) -> Result<(), std::io::Error> {
        for dir in [
            self.root.clone(),
            self.db_dir(),
            self.models_dir(),
            self.vectors_dir(),
        ] {
            if !dir.exists() {
                info!("Creating directory: {:?}", dir);
                fs::create_dir_all(&dir)?;
            }
        }
        Ok(())
    }
}
