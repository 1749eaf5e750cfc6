//! Per-build scratch directories (spec §3 "Lifecycles", §4.I, §5).
//!
//! A scratch directory is created under a deterministic temp path derived
//! from a hash of the build identifier, and is guaranteed-removed on every
//! exit path — success, error, or unwind — via `Drop`, the way a real
//! filesystem-heavy build step must clean up regardless of how it returns.

use std::fs;
use std::path::{Path, PathBuf};

use util::errors::{ErrorKind, Res};
use util::hash::hash_parts;

/// An RAII guard over a scratch directory. The directory is created on
/// construction and removed (best-effort) on drop.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create a scratch directory named after a hash of `build_id`, rooted
    /// at `root` (typically `<storage_dir>/scratch`).
    pub fn create(root: &Path, build_id: &str) -> Res<Self> {
        let name = hash_parts(vec![build_id]);
        let path = root.join(name);
        fs::create_dir_all(&path).map_err(|e| {
            ErrorKind::StoreError(format!("could not create scratch dir: {}", e))
        })?;
        Ok(ScratchDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn node_modules(&self) -> PathBuf {
        self.path.join("node_modules")
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}
