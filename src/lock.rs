//! Instance Lock Manager (§4.9): a JSON lock file guarding single-instance
//! operation. Grounded on `other_examples/`'s XDG-style daemon lock-file
//! pattern (lock held for the process lifetime, PID liveness via a
//! zero-signal probe), adapted to this crate's `ProcessLock` shape.

use crate::error::LockError;
use crate::models::ProcessLock;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct LockManager {
    path: PathBuf,
}

impl LockManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Option<ProcessLock> {
        let raw = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// True iff the PID in a lock file is still alive. Corrupted or missing
    /// files are never "running" — they're stale (§4.9).
    pub fn has_running_instance(&self) -> bool {
        match self.read() {
            Some(lock) => pid_is_alive(lock.pid),
            None => false,
        }
    }

    /// Deletes the lock file if it is stale: missing PID, dead PID, or
    /// content that fails to parse.
    pub fn cleanup_stale_lock(&self) -> Result<(), LockError> {
        if !self.path.exists() {
            return Ok(());
        }
        let is_stale = match self.read() {
            Some(lock) => !pid_is_alive(lock.pid),
            None => true,
        };
        if is_stale {
            match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(LockError::Io(e)),
            }
        } else {
            Ok(())
        }
    }

    /// Writes the lock file. Call only after `cleanup_stale_lock` and a
    /// `has_running_instance` check have both passed.
    pub fn acquire_lock(&self, port: u16) -> Result<ProcessLock, LockError> {
        if let Some(existing) = self.read() {
            if pid_is_alive(existing.pid) {
                return Err(LockError::AlreadyRunning {
                    pid: existing.pid,
                    instance_id: existing.instance_id,
                });
            }
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock = ProcessLock {
            pid: std::process::id(),
            port,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
            instance_id: Uuid::new_v4().to_string(),
        };
        let serialized =
            serde_json::to_string_pretty(&lock).map_err(|e| LockError::Corrupt(e.to_string()))?;
        fs::write(&self.path, serialized)?;
        Ok(lock)
    }

    /// Idempotent: removing an already-absent lock file is not an error.
    pub fn release_lock(&self) -> Result<(), LockError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    // Signal 0 performs no delivery, only existence/permission checks.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_then_has_running_instance_is_true_for_self() {
        let dir = tempdir().unwrap();
        let manager = LockManager::new(dir.path().join("agentctl.lock"));
        let lock = manager.acquire_lock(9000).unwrap();
        assert_eq!(lock.pid, std::process::id());
        assert!(manager.has_running_instance());
    }

    #[test]
    fn cleanup_stale_lock_removes_dead_pid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agentctl.lock");
        let stale = ProcessLock {
            pid: dead_pid(),
            port: 9000,
            version: "0.0.0".to_string(),
            started_at: Utc::now(),
            instance_id: "stale".to_string(),
        };
        fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        let manager = LockManager::new(&path);
        manager.cleanup_stale_lock().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn corrupted_lock_file_is_treated_as_stale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agentctl.lock");
        fs::write(&path, "not json at all").unwrap();

        let manager = LockManager::new(&path);
        assert!(!manager.has_running_instance());
        manager.cleanup_stale_lock().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn acquire_lock_fails_when_a_live_instance_holds_it() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agentctl.lock");
        let manager = LockManager::new(&path);
        manager.acquire_lock(9000).unwrap();

        let second = LockManager::new(&path);
        let result = second.acquire_lock(9001);
        assert!(matches!(result, Err(LockError::AlreadyRunning { .. })));
    }

    #[test]
    fn release_lock_is_idempotent() {
        let dir = tempdir().unwrap();
        let manager = LockManager::new(dir.path().join("agentctl.lock"));
        manager.acquire_lock(9000).unwrap();
        manager.release_lock().unwrap();
        manager.release_lock().unwrap();
    }

    /// A PID essentially guaranteed not to be alive, for stale-lock tests.
    fn dead_pid() -> u32 {
        999_999
    }
}
