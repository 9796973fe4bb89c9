//! The access ledger.
//!
//! Every mutation names its caller explicitly, runs against a staged copy of
//! the file's state, and returns the events it emitted. A failed precondition
//! returns an error and changes nothing.

use sealshare_core::config::LedgerConfig;
use sealshare_core::{FileHash, Generation, Principal};
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::event::LedgerEvent;
use crate::record::FileRecord;
use crate::store::LedgerStore;
use crate::txn::Txn;

/// Default cap on principals authorized for one file, uploader included.
pub const MAX_AUTHORIZED: u32 = sealshare_core::config::DEFAULT_MAX_AUTHORIZED;

pub struct AccessLedger<S> {
    store: S,
    max_authorized: u32,
}

impl<S: LedgerStore> AccessLedger<S> {
    pub fn new(store: S) -> Self {
        Self::with_capacity(store, MAX_AUTHORIZED)
    }

    /// Ledger with a custom authorized-set cap. A cap of zero is raised to one
    /// so an uploader can always hold their own grant.
    pub fn with_capacity(store: S, max_authorized: u32) -> Self {
        Self {
            store,
            max_authorized: max_authorized.max(1),
        }
    }

    pub fn from_config(store: S, config: &LedgerConfig) -> Self {
        Self::with_capacity(store, config.max_authorized)
    }

    pub fn max_authorized(&self) -> u32 {
        self.max_authorized
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn flush(&mut self) -> LedgerResult<()> {
        self.store
            .flush()
            .map_err(|e| LedgerError::Store(format!("{e:#}")))
    }

    /// Run `op` against a staged copy of `file` and commit only if it succeeds.
    fn execute<F>(
        &mut self,
        file: FileHash,
        name: &'static str,
        op: F,
    ) -> LedgerResult<Vec<LedgerEvent>>
    where
        F: FnOnce(&mut Txn<'_, S>) -> LedgerResult<()>,
    {
        let staged = {
            let mut txn = Txn::begin(&self.store, file, self.max_authorized);
            op(&mut txn)?;
            txn.finish()
        };
        let generation = staged.record().generation;
        let authorized = staged.record().authorized_count;
        let events = staged
            .commit(&mut self.store)
            .map_err(|e| LedgerError::Store(format!("{e:#}")))?;
        debug!(
            op = name,
            file = %file.short(),
            generation,
            authorized,
            events = events.len(),
            "ledger mutation committed"
        );
        Ok(events)
    }

    // ── Mutations ────────────────────────────────────────────────────────────

    /// Create a record, or re-create a deleted one under a fresh generation.
    ///
    /// The caller becomes the uploader and is authorized first, then each
    /// initial grantee in order. Duplicates (including the caller) are
    /// absorbed by the grant primitive.
    pub fn create(
        &mut self,
        caller: Principal,
        file: FileHash,
        content_pointer: &str,
        grantees: &[Principal],
    ) -> LedgerResult<Vec<LedgerEvent>> {
        if self.exists(file) {
            return Err(LedgerError::AlreadyExists);
        }
        if content_pointer.trim().is_empty() {
            return Err(LedgerError::EmptyPointer);
        }
        if grantees.len() > self.max_authorized as usize {
            return Err(LedgerError::TooManyGrantees {
                requested: grantees.len(),
                max: self.max_authorized,
            });
        }
        if caller.is_zero() || grantees.iter().any(Principal::is_zero) {
            return Err(LedgerError::InvalidPrincipal);
        }

        self.execute(file, "create", |txn| {
            let generation = match txn.record().generation.checked_add(1) {
                Some(g) => g,
                None => panic!("generation overflow on {}", txn.file()),
            };
            *txn.record_mut() = FileRecord {
                uploader: caller,
                content_pointer: content_pointer.to_string(),
                generation,
                exists: true,
                authorized_count: 0,
            };
            txn.emit(LedgerEvent::FileCreated {
                file_hash: txn.file(),
                content_pointer: content_pointer.to_string(),
                uploader: caller,
                grantees: grantees.to_vec(),
            });
            txn.authorize(caller)?;
            for grantee in grantees {
                txn.authorize(*grantee)?;
            }
            Ok(())
        })
    }

    pub fn update_pointer(
        &mut self,
        caller: Principal,
        file: FileHash,
        content_pointer: &str,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        self.execute(file, "update_pointer", |txn| {
            txn.require_owner(caller)?;
            if content_pointer.trim().is_empty() {
                return Err(LedgerError::EmptyPointer);
            }
            txn.record_mut().content_pointer = content_pointer.to_string();
            txn.emit(LedgerEvent::PointerUpdated {
                file_hash: txn.file(),
                content_pointer: content_pointer.to_string(),
                uploader: caller,
            });
            Ok(())
        })
    }

    /// Soft-delete. Grant stamps are left in place; the next `create` bumps
    /// the generation past all of them.
    pub fn delete(&mut self, caller: Principal, file: FileHash) -> LedgerResult<Vec<LedgerEvent>> {
        self.execute(file, "delete", |txn| {
            txn.require_owner(caller)?;
            let tombstone = txn.record().tombstone();
            *txn.record_mut() = tombstone;
            txn.emit(LedgerEvent::FileDeleted {
                file_hash: txn.file(),
                uploader: caller,
            });
            Ok(())
        })
    }

    /// Hand the file to `new_owner`. The outgoing owner loses access.
    pub fn transfer_ownership(
        &mut self,
        caller: Principal,
        file: FileHash,
        new_owner: Principal,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        self.execute(file, "transfer_ownership", |txn| {
            txn.require_owner(caller)?;
            if new_owner.is_zero() {
                return Err(LedgerError::InvalidPrincipal);
            }
            if new_owner == caller {
                return Err(LedgerError::SelfTransfer);
            }
            txn.deauthorize(caller);
            txn.record_mut().uploader = new_owner;
            txn.authorize(new_owner)?;
            txn.emit(LedgerEvent::OwnershipTransferred {
                file_hash: txn.file(),
                previous_owner: caller,
                new_owner,
            });
            Ok(())
        })
    }

    pub fn grant(
        &mut self,
        caller: Principal,
        file: FileHash,
        principal: Principal,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        self.execute(file, "grant", |txn| {
            txn.require_owner(caller)?;
            if principal.is_zero() {
                return Err(LedgerError::InvalidPrincipal);
            }
            txn.authorize(principal)?;
            Ok(())
        })
    }

    /// Grant each principal in input order. Each new principal is checked
    /// against the count as updated by the ones before it; if any would
    /// exceed the cap, nothing from the batch is kept. Principals already
    /// authorized, in the store or earlier in the batch, cost nothing, so the
    /// list itself may be longer than the cap.
    pub fn grant_batch(
        &mut self,
        caller: Principal,
        file: FileHash,
        principals: &[Principal],
    ) -> LedgerResult<Vec<LedgerEvent>> {
        self.execute(file, "grant_batch", |txn| {
            txn.require_owner(caller)?;
            if principals.iter().any(Principal::is_zero) {
                return Err(LedgerError::InvalidPrincipal);
            }
            for principal in principals {
                txn.authorize(*principal)?;
            }
            Ok(())
        })
    }

    /// Revoke `principal`. Revoking someone who holds no current grant is a
    /// no-op; the uploader cannot revoke themselves.
    pub fn revoke(
        &mut self,
        caller: Principal,
        file: FileHash,
        principal: Principal,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        self.execute(file, "revoke", |txn| {
            txn.require_owner(caller)?;
            if principal.is_zero() {
                return Err(LedgerError::InvalidPrincipal);
            }
            if principal == caller {
                return Err(LedgerError::SelfRevocation);
            }
            txn.deauthorize(principal);
            Ok(())
        })
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// `false` for missing or deleted files rather than an error.
    pub fn is_authorized(&self, file: FileHash, principal: Principal) -> bool {
        match self.store.record(&file) {
            Some(record) if record.exists => {
                self.store.grant_generation(&file, &principal) == Some(record.generation)
            }
            _ => false,
        }
    }

    pub fn exists(&self, file: FileHash) -> bool {
        self.store.record(&file).map(|r| r.exists).unwrap_or(false)
    }

    fn live(&self, file: FileHash) -> LedgerResult<&FileRecord> {
        self.store
            .record(&file)
            .filter(|r| r.exists)
            .ok_or(LedgerError::NotFound)
    }

    pub fn uploader_of(&self, file: FileHash) -> LedgerResult<Principal> {
        self.live(file).map(|r| r.uploader)
    }

    /// Location of the encrypted blob, disclosed only to authorized callers.
    pub fn content_pointer_of(&self, caller: Principal, file: FileHash) -> LedgerResult<&str> {
        let record = self.live(file)?;
        if !self.is_authorized(file, caller) {
            return Err(LedgerError::NotAuthorized);
        }
        Ok(record.content_pointer.as_str())
    }

    pub fn authorized_count_of(&self, file: FileHash) -> LedgerResult<u32> {
        self.live(file).map(|r| r.authorized_count)
    }

    /// Current or tombstoned generation; 0 if the hash was never created.
    pub fn generation_of(&self, file: FileHash) -> Generation {
        self.store.record(&file).map(|r| r.generation).unwrap_or(0)
    }

    pub fn record(&self, file: FileHash) -> Option<&FileRecord> {
        self.store.record(&file)
    }
}
