//! Run-level advisory lock on the artifact hierarchy.
//!
//! Two runs against the same hierarchy could each see the other's half-written
//! outputs, so a run holds an exclusive `flock` for its whole lifetime. The kernel
//! drops the lock when the process exits, however it exits.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use vp_types::constants::LOCK_FILE_NAME;
use vp_types::PipelineError;

#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock under `root`, failing immediately with `LockHeld` if another run has it.
    pub fn acquire(root: &Path) -> Result<RunLock> {
        let path = root.join(LOCK_FILE_NAME);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| path.display().to_string())?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(PipelineError::LockHeld { path }.into());
            }
            return Err(err).with_context(|| format!("locking {}", path.display()));
        }

        // Informational only: who holds the lock.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(RunLock { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let lock = RunLock::acquire(dir.path())?;
        assert!(lock.path().is_file());

        // flock locks belong to the open file description, so a second open conflicts
        let err = RunLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::LockHeld { .. })
        ));

        drop(lock);
        let _relocked = RunLock::acquire(dir.path())?;
        Ok(())
    }
}
