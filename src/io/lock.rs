use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const LOCK_FILE: &str = ".flowedit.lock";

/// Advisory lock held while a workflow document is read-modified-written.
///
/// Two `flowedit` processes pointed at the same project take turns through
/// `flock`; the lock drops with the file handle.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("could not open lock file {path}: {source}")]
    CreateError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("timed out waiting for {path}; another flowedit process is writing")]
    Timeout { path: PathBuf },
}

impl FileLock {
    /// Lock `dir`, polling until `timeout` runs out.
    pub fn acquire(dir: &Path, timeout: Duration) -> Result<Self, LockError> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| LockError::CreateError {
                path: path.clone(),
                source,
            })?;

        let start = Instant::now();
        while try_lock(&file).is_err() {
            if start.elapsed() >= timeout {
                return Err(LockError::Timeout { path });
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        tracing::trace!(path = %path.display(), "lock acquired");
        Ok(FileLock { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_is_reusable_after_drop() {
        let tmp = TempDir::new().unwrap();
        let lock = FileLock::acquire(tmp.path(), Duration::from_secs(1)).unwrap();
        assert!(lock.path().ends_with(LOCK_FILE));
        drop(lock);
        assert!(FileLock::acquire(tmp.path(), Duration::from_secs(1)).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn second_holder_times_out() {
        let tmp = TempDir::new().unwrap();
        let _held = FileLock::acquire(tmp.path(), Duration::from_secs(1)).unwrap();
        let err = FileLock::acquire(tmp.path(), Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
    }
}
