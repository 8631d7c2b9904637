//! Lock file management for single-instance enforcement.
//!
//! Only one geoalarm process may own a state directory at a time: two engines
//! sharing a suppression file and a timer file would race each other. The lock
//! lives in the runtime directory and records the owner's PID.

use anyhow::{Context, Result, bail};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::constants::LOCK_FILE_NAME;
use crate::state::get_state_dir;

/// A held lock. The file is unlocked and removed on drop.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Path of the lock file for the given configuration directory.
///
/// Each state namespace gets its own lock so a second instance with a
/// different `--config` can run side by side.
pub fn lock_path(config_dir: Option<&Path>) -> Result<PathBuf> {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".to_string());
    let state_dir = get_state_dir(config_dir)?;
    let file_name = match state_dir.file_name().and_then(|n| n.to_str()) {
        Some("default") | None => LOCK_FILE_NAME.to_string(),
        Some(namespace) => format!("{namespace}-{LOCK_FILE_NAME}"),
    };
    Ok(PathBuf::from(runtime_dir).join(file_name))
}

/// Acquire the instance lock at `path`.
///
/// A lock left behind by a process that no longer exists is removed and the
/// acquisition retried once. A live owner is an error naming its PID.
pub fn acquire_lock(path: &Path) -> Result<InstanceLock> {
    match try_lock(path)? {
        Some(lock) => Ok(lock),
        None => {
            handle_lock_conflict(path)?;
            try_lock(path)?.with_context(|| {
                format!("Failed to acquire lock {} after cleanup", path.display())
            })
        }
    }
}

fn try_lock(path: &Path) -> Result<Option<InstanceLock>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    // Open without truncating so a live owner's PID stays readable
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open lock file {}", path.display()))?;

    if file.try_lock_exclusive().is_err() {
        return Ok(None);
    }

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", std::process::id())?;
    file.flush()?;

    Ok(Some(InstanceLock {
        file,
        path: path.to_path_buf(),
    }))
}

/// Decide what to do about a lock someone else holds.
///
/// Returns `Ok(())` when the lock was stale and has been removed.
fn handle_lock_conflict(path: &Path) -> Result<()> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return Ok(()),
    };

    let pid = match content.trim().lines().next().map(str::parse::<u32>) {
        Some(Ok(pid)) => pid,
        _ => {
            log_warning!("Lock file contains invalid PID, removing stale lock");
            let _ = std::fs::remove_file(path);
            return Ok(());
        }
    };

    if !is_process_running(pid) {
        log_warning!("Removing stale lock file (process {pid} no longer running)");
        let _ = std::fs::remove_file(path);
        return Ok(());
    }

    bail!("geoalarm is already running (PID: {pid})")
}

fn is_process_running(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}
