//! File-based locking: one process owns a storage directory at a time.
//!
//! Cross-platform (fs2) advisory lock on `<root>/LOCK`, held by `Db` for its
//! whole lifetime. Writers inside the process are serialized separately by the
//! transaction writer token; this lock only keeps a second process out.
//! Lock is released on Drop.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = "LOCK";

pub struct LockGuard {
    file: std::fs::File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("path", &self.path).finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // fs2 unlock errors on drop are ignored deliberately.
        let _ = self.file.unlock();
    }
}

fn open_lock_file(root: &Path) -> Result<(std::fs::File, PathBuf)> {
    let path = root.join(LOCK_FILE);
    let f = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    Ok((f, path))
}

/// Acquire the exclusive lock. Blocks until acquired.
pub fn acquire_exclusive_lock(root: &Path) -> Result<LockGuard> {
    let (file, path) = open_lock_file(root)?;
    file.lock_exclusive()
        .with_context(|| format!("lock_exclusive {}", path.display()))?;
    Ok(LockGuard { file, path })
}

/// Try to acquire the exclusive lock. Returns Err if another handle holds it.
pub fn try_acquire_exclusive_lock(root: &Path) -> Result<LockGuard> {
    let (file, path) = open_lock_file(root)?;
    file.try_lock_exclusive()
        .with_context(|| format!("try_lock_exclusive failed: {}", path.display()))?;
    Ok(LockGuard { file, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_try_lock_fails_until_drop() {
        let root = std::env::temp_dir().join(format!(
            "tsr-lock-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&root).unwrap();

        let g = try_acquire_exclusive_lock(&root).unwrap();
        assert!(g.path().ends_with(LOCK_FILE));
        assert!(try_acquire_exclusive_lock(&root).is_err());
        drop(g);
        let _g2 = try_acquire_exclusive_lock(&root).unwrap();
    }
}
