//! Single-instance lock
//!
//! A pid file whose recorded process must actually be alive to count.
//! Stale files left by a crash are taken over.
//!
//! The file is written under a unique name and then hard-linked into
//! place, so it never appears without a pid and only one of several
//! simultaneous starters can win the link.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sysinfo::{Pid, System};
use thiserror::Error;
use uuid::Uuid;

/// Stale takeovers before giving up on a contended lock
const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another instance is already running (pid {0})")]
    AlreadyRunning(u32),
    #[error("lock file error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    pid: u32,
}

impl PidLock {
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pid = std::process::id();
        let staged = staging_path(path);
        fs::write(&staged, pid.to_string())?;

        let result = Self::link_staged(&staged, path);
        let _ = fs::remove_file(&staged);
        result?;

        Ok(Self { path: path.to_path_buf(), pid })
    }

    fn link_staged(staged: &Path, path: &Path) -> Result<(), LockError> {
        for _ in 0..MAX_ATTEMPTS {
            match fs::hard_link(staged, path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            match read_pid(path) {
                Some(holder) if process_alive(holder) => {
                    return Err(LockError::AlreadyRunning(holder));
                }
                holder => {
                    log::info!("Removing stale lock {} (pid {:?})", path.display(), holder);
                    match fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        Err(std::io::Error::new(
            ErrorKind::WouldBlock,
            format!("lock {} kept changing hands", path.display()),
        )
        .into())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        // Leave the file alone if someone else took it over
        if read_pid(&self.path) == Some(self.pid) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "lock".to_string());
    path.with_file_name(format!(".{}.{}", name, Uuid::new_v4().simple()))
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_process(Pid::from_u32(pid))
}
