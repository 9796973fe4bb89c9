//! Off-chain replica built purely from the ledger's event stream.
//!
//! The mirror is an index for fast listing ("who can open this file?"), not an
//! authority. Anything that discloses a content pointer or wrapped key must
//! re-check [`crate::AccessLedger::is_authorized`] first.

use anyhow::{Context, Result};
use sealshare_core::{FileHash, Principal};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;
use thiserror::Error;

use crate::event::LedgerEvent;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirrorError {
    #[error("event for unknown file {0}")]
    UnknownFile(FileHash),

    #[error("file {0} created while already live")]
    DuplicateCreate(FileHash),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirroredFile {
    pub content_pointer: String,
    pub owner: Principal,
    pub authorized: BTreeSet<Principal>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EventMirror {
    files: BTreeMap<FileHash, MirroredFile>,
    applied: u64,
}

impl EventMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mirror from an ordered event sequence.
    pub fn replay<'a, I>(events: I) -> Result<Self, MirrorError>
    where
        I: IntoIterator<Item = &'a LedgerEvent>,
    {
        let mut mirror = Self::new();
        for event in events {
            mirror.apply(event)?;
        }
        Ok(mirror)
    }

    /// Build a mirror from a JSONL event journal. Blank lines are skipped.
    pub fn from_jsonl<R: BufRead>(reader: R) -> Result<Self> {
        let mut mirror = Self::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("reading journal line {}", n + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let event = LedgerEvent::from_bytes(line.as_bytes())
                .with_context(|| format!("journal line {}", n + 1))?;
            mirror
                .apply(&event)
                .with_context(|| format!("applying journal line {}", n + 1))?;
        }
        Ok(mirror)
    }

    pub fn apply(&mut self, event: &LedgerEvent) -> Result<(), MirrorError> {
        match event {
            LedgerEvent::FileCreated {
                file_hash,
                content_pointer,
                uploader,
                ..
            } => {
                if self.files.contains_key(file_hash) {
                    return Err(MirrorError::DuplicateCreate(*file_hash));
                }
                // Grants arrive as their own events.
                self.files.insert(
                    *file_hash,
                    MirroredFile {
                        content_pointer: content_pointer.clone(),
                        owner: *uploader,
                        authorized: BTreeSet::new(),
                    },
                );
            }
            LedgerEvent::PointerUpdated {
                file_hash,
                content_pointer,
                ..
            } => {
                self.file_mut(file_hash)?.content_pointer = content_pointer.clone();
            }
            LedgerEvent::FileDeleted { file_hash, .. } => {
                self.files
                    .remove(file_hash)
                    .ok_or(MirrorError::UnknownFile(*file_hash))?;
            }
            LedgerEvent::AccessGranted {
                file_hash,
                principal,
            } => {
                self.file_mut(file_hash)?.authorized.insert(*principal);
            }
            LedgerEvent::AccessRevoked {
                file_hash,
                principal,
            } => {
                self.file_mut(file_hash)?.authorized.remove(principal);
            }
            LedgerEvent::OwnershipTransferred {
                file_hash,
                new_owner,
                ..
            } => {
                self.file_mut(file_hash)?.owner = *new_owner;
            }
        }
        self.applied += 1;
        Ok(())
    }

    fn file_mut(&mut self, file: &FileHash) -> Result<&mut MirroredFile, MirrorError> {
        self.files
            .get_mut(file)
            .ok_or(MirrorError::UnknownFile(*file))
    }

    pub fn file(&self, file: &FileHash) -> Option<&MirroredFile> {
        self.files.get(file)
    }

    pub fn is_authorized(&self, file: &FileHash, principal: &Principal) -> bool {
        self.files
            .get(file)
            .map(|f| f.authorized.contains(principal))
            .unwrap_or(false)
    }

    /// Principals currently authorized on `file`, in address order.
    pub fn authorized(&self, file: &FileHash) -> Vec<Principal> {
        self.files
            .get(file)
            .map(|f| f.authorized.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn files(&self) -> impl Iterator<Item = (&FileHash, &MirroredFile)> {
        self.files.iter()
    }

    /// Number of live files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of events applied so far.
    pub fn applied(&self) -> u64 {
        self.applied
    }
}
