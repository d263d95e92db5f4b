//! Atomic JSON persistence, defensive loading, and advisory file locks.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::StoreError;

/// Serialize `value` and atomically replace `path` with it.
///
/// The JSON goes to a temp file in the same directory which is then renamed
/// over the target, so readers see either the old or the new file.
pub fn atomic_write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::StateDir(path.to_path_buf()))?;
    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

    let json = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialize {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| StoreError::io(parent, e))?;
    tmp.write_all(&json).map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

/// Load JSON state, treating a missing or corrupt file as the default.
///
/// Corruption is logged and the bad file is left in place; the next save
/// replaces it.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read state file, starting empty");
            return T::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt state file, starting empty");
            T::default()
        }
    }
}

/// Create the state directory (0700) or fail: an unusable state directory is
/// the one fatal startup error.
pub fn ensure_state_dir(dir: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(dir).map_err(|_| StoreError::StateDir(dir.to_path_buf()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(|_| StoreError::StateDir(dir.to_path_buf()))?;
    }
    let probe = dir.join(".write-probe");
    fs::write(&probe, b"").map_err(|_| StoreError::StateDir(dir.to_path_buf()))?;
    let _ = fs::remove_file(&probe);
    Ok(())
}

// ─── Advisory lock ────────────────────────────────────────────────

/// Exclusive `flock` held until dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the lock on `path` (created if missing) is acquired.
    pub fn acquire(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;
        file.lock_exclusive().map_err(|e| StoreError::io(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release file lock");
        }
    }
}
