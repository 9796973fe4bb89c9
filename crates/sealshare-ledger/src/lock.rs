//! Cross-process exclusion for a ledger state path.
//!
//! Opening a store, applying mutations and flushing must happen under one
//! exclusive lock, or two processes each load the same snapshot and the last
//! flush silently drops the other's commits. The lock is an advisory lock on a
//! sibling `<state>.lock` file, released when the guard drops.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub type StateGuard<'a> = fd_lock::RwLockWriteGuard<'a, File>;

pub struct StateLock {
    path: PathBuf,
    lock: fd_lock::RwLock<File>,
}

impl StateLock {
    /// Open (creating if needed) the lock file guarding `state_path`.
    pub fn open(state_path: &Path) -> Result<Self> {
        let path = Self::lock_path(state_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating state dir: {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("opening state lock: {}", path.display()))?;
        Ok(Self {
            path,
            lock: fd_lock::RwLock::new(file),
        })
    }

    /// `ledger.json` → `ledger.json.lock`
    pub fn lock_path(state_path: &Path) -> PathBuf {
        let mut name = state_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        state_path.with_file_name(name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is held exclusively.
    pub fn acquire(&mut self) -> Result<StateGuard<'_>> {
        self.lock
            .write()
            .with_context(|| format!("locking ledger state: {}", self.path.display()))
    }

    /// Take the lock if it is free. `None` while another holder has it.
    pub fn try_acquire(&mut self) -> Result<Option<StateGuard<'_>>> {
        match self.lock.try_write() {
            Ok(guard) => Ok(Some(guard)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e)
                .with_context(|| format!("locking ledger state: {}", self.path.display())),
        }
    }
}
