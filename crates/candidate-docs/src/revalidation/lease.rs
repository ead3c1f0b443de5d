//! Exclusive execution rights for the revalidation loop.
//!
//! Only one process may run cycles at a time. `FileLease` relies on `flock`, which the
//! kernel drops when the holder exits, so a crashed worker never strands the lease.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

pub trait Lease: Send + Sync {
    /// Non-blocking. `Ok(false)` means another holder has it.
    fn acquire(&self) -> Result<bool, LeaseError>;
    /// Idempotent; releasing a lease that is not held is a no-op.
    fn release(&self) -> Result<(), LeaseError>;
    fn describe(&self) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("lease file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Advisory lock on a file, held for as long as the handle stays open.
pub struct FileLease {
    path: PathBuf,
    handle: Mutex<Option<File>>,
}

impl FileLease {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            handle: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn handle(&self) -> MutexGuard<'_, Option<File>> {
        self.handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn io_error(&self, source: io::Error) -> LeaseError {
        LeaseError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Lease for FileLease {
    fn acquire(&self) -> Result<bool, LeaseError> {
        let mut handle = self.handle();
        if handle.is_some() {
            return Ok(true);
        }
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|err| self.io_error(err))?;
        if try_flock_exclusive(&file).map_err(|err| self.io_error(err))? {
            *handle = Some(file);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn release(&self) -> Result<(), LeaseError> {
        // Closing the descriptor drops the flock.
        self.handle().take();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file lease {}", self.path.display())
    }
}

fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: `fd` is a valid descriptor owned by `file` for the duration of the call.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

/// Shared lease table standing in for several processes inside one test binary.
#[derive(Debug, Default)]
pub struct LeaseRegistry {
    holders: Mutex<HashMap<String, u64>>,
    next_holder: AtomicU64,
}

impl LeaseRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn holder_of(&self, name: &str) -> Option<u64> {
        self.holders().get(name).copied()
    }

    fn holders(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.holders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct MemoryLease {
    registry: Arc<LeaseRegistry>,
    name: String,
    holder: u64,
}

impl MemoryLease {
    pub fn new(registry: Arc<LeaseRegistry>, name: impl Into<String>) -> Self {
        let holder = registry.next_holder.fetch_add(1, Ordering::Relaxed) + 1;
        Self {
            registry,
            name: name.into(),
            holder,
        }
    }

    pub fn holder(&self) -> u64 {
        self.holder
    }
}

impl Lease for MemoryLease {
    fn acquire(&self) -> Result<bool, LeaseError> {
        let mut holders = self.registry.holders();
        match holders.get(&self.name) {
            Some(current) => Ok(*current == self.holder),
            None => {
                holders.insert(self.name.clone(), self.holder);
                Ok(true)
            }
        }
    }

    fn release(&self) -> Result<(), LeaseError> {
        let mut holders = self.registry.holders();
        if holders.get(&self.name) == Some(&self.holder) {
            holders.remove(&self.name);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory lease {} (holder {})", self.name, self.holder)
    }
}

/// Per-process wrapper that records whether this process started the loop, so shutdown
/// hooks release only what was actually acquired.
pub struct ProcessLease {
    lease: Box<dyn Lease>,
    started: AtomicBool,
}

impl ProcessLease {
    pub fn new(lease: impl Lease + 'static) -> Self {
        Self {
            lease: Box::new(lease),
            started: AtomicBool::new(false),
        }
    }

    /// Acquires the lease if this process does not already hold it. Contention is reported
    /// as `Ok(false)`.
    pub fn try_start(&self) -> Result<bool, LeaseError> {
        if self.is_started() {
            return Ok(true);
        }
        if self.lease.acquire()? {
            self.started.store(true, Ordering::SeqCst);
            info!(lease = %self.lease.describe(), "revalidation lease acquired");
            Ok(true)
        } else {
            info!(
                lease = %self.lease.describe(),
                "revalidation lease held by another process; not starting"
            );
            Ok(false)
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) -> Result<(), LeaseError> {
        if self.started.swap(false, Ordering::SeqCst) {
            self.lease.release()?;
            info!(lease = %self.lease.describe(), "revalidation lease released");
        }
        Ok(())
    }
}

impl Drop for ProcessLease {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "failed to release revalidation lease");
        }
    }
}
