//! Raw input collaborators.
//!
//! The pipeline never acquires data itself. A [`DatasetSource`] hands it the
//! readable raw files of a unit and takes them back once the daily dataset
//! is durably published.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::runner::UnitOfWork;

/// Provider of raw input files for one (region, year) unit.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Readable raw files for the unit. An empty list is not an error.
    async fn paths(&self, unit: &UnitOfWork) -> Result<Vec<PathBuf>>;

    /// Called once the daily dataset built from `paths` is published.
    async fn release(&self, unit: &UnitOfWork, paths: &[PathBuf]) -> Result<()>;
}

/// Raw files already on disk under `{root}/{region}/{year}/`.
#[derive(Debug, Clone)]
pub struct LocalDirectorySource {
    root: PathBuf,
    delete_on_release: bool,
}

/// Extensions accepted as raw inputs.
const RAW_EXTENSIONS: &[&str] = &["nc", "cdl"];

impl LocalDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            delete_on_release: false,
        }
    }

    /// Delete raw files once they are released.
    pub fn delete_on_release(mut self, delete: bool) -> Self {
        self.delete_on_release = delete;
        self
    }

    pub fn unit_dir(&self, unit: &UnitOfWork) -> PathBuf {
        self.root.join(&unit.region).join(unit.year.to_string())
    }
}

fn is_raw_input(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
    !hidden
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| RAW_EXTENSIONS.contains(&e))
}

#[async_trait]
impl DatasetSource for LocalDirectorySource {
    #[instrument(skip(self), fields(region = %unit.region, year = unit.year))]
    async fn paths(&self, unit: &UnitOfWork) -> Result<Vec<PathBuf>> {
        let dir = self.unit_dir(unit);
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "No raw input directory");
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&dir).max_depth(1) {
            let entry =
                entry.with_context(|| format!("Failed to list raw inputs in {}", dir.display()))?;
            if entry.file_type().is_file() && is_raw_input(entry.path()) {
                paths.push(entry.into_path());
            }
        }
        paths.sort();
        debug!(count = paths.len(), "Raw inputs found");
        Ok(paths)
    }

    async fn release(&self, unit: &UnitOfWork, paths: &[PathBuf]) -> Result<()> {
        if !self.delete_on_release {
            return Ok(());
        }
        for path in paths {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "Raw input already gone");
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to delete {}", path.display()));
                }
            }
        }
        info!(
            region = %unit.region,
            year = unit.year,
            count = paths.len(),
            "Raw inputs released"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> UnitOfWork {
        UnitOfWork {
            region: "Tiny".to_string(),
            year: 2021,
            variables: vec!["tp".to_string()],
        }
    }

    #[tokio::test]
    async fn test_lists_raw_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalDirectorySource::new(dir.path());
        let unit_dir = source.unit_dir(&unit());
        std::fs::create_dir_all(unit_dir.join("nested")).unwrap();
        for name in ["b.nc", "a.cdl", "notes.txt", ".c.nc.partial", "nested/d.nc"] {
            std::fs::write(unit_dir.join(name), b"").unwrap();
        }

        let paths = source.paths(&unit()).await.unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.cdl", "b.nc"]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let paths = LocalDirectorySource::new(dir.path())
            .paths(&unit())
            .await
            .unwrap();
        assert!(paths.is_empty());
    }

    #[tokio::test]
    async fn test_release_deletes_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("raw.nc");
        std::fs::write(&file, b"").unwrap();

        let keep = LocalDirectorySource::new(dir.path());
        keep.release(&unit(), &[file.clone()]).await.unwrap();
        assert!(file.exists());

        let delete = LocalDirectorySource::new(dir.path()).delete_on_release(true);
        delete.release(&unit(), &[file.clone()]).await.unwrap();
        assert!(!file.exists());
        // Releasing twice is harmless.
        delete.release(&unit(), &[file]).await.unwrap();
    }
}
