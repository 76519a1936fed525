//! Executor workspace layout

use std::path::PathBuf;

use crate::filesys::dir::Dir;

/// On-disk layout of executor workspaces
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    /// Base directory for all workspaces
    pub base_dir: PathBuf,
}

impl WorkspaceLayout {
    /// Create a new workspace layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Fresh workspace for one executor run; never shared between runs,
    /// even for the same deployment id
    pub fn run_dir(&self, deployment_id: &str) -> Dir {
        Dir::new(
            self.base_dir
                .join(format!("{}-{}", deployment_id, uuid::Uuid::new_v4().simple())),
        )
    }

    /// Where the repository is materialized inside a run directory
    pub fn source_dir(run_dir: &Dir) -> Dir {
        run_dir.subdir("source")
    }
}

impl Default for WorkspaceLayout {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("shipyard"))
    }
}
