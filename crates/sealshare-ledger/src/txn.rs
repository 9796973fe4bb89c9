//! Staged mutations for a single file.
//!
//! A `Txn` reads through to the store but buffers every write: the record
//! copy, grant stamps, and emitted events. `finish()` releases the store
//! borrow and `Staged::commit()` applies the buffer. Dropping a `Txn` or a
//! `Staged` discards everything, which is how a failed operation leaves no
//! trace.

use sealshare_core::{FileHash, Generation, Principal};
use std::collections::BTreeMap;

use crate::error::{LedgerError, LedgerResult};
use crate::event::LedgerEvent;
use crate::record::FileRecord;
use crate::store::{Commit, LedgerStore};

pub(crate) struct Txn<'s, S: ?Sized> {
    store: &'s S,
    file: FileHash,
    max_authorized: u32,
    record: FileRecord,
    /// Pending stamp writes; `None` clears the stamp.
    writes: BTreeMap<Principal, Option<Generation>>,
    events: Vec<LedgerEvent>,
}

pub(crate) struct Staged {
    file: FileHash,
    record: FileRecord,
    writes: BTreeMap<Principal, Option<Generation>>,
    events: Vec<LedgerEvent>,
}

impl<'s, S: LedgerStore + ?Sized> Txn<'s, S> {
    pub fn begin(store: &'s S, file: FileHash, max_authorized: u32) -> Self {
        let record = store.record(&file).cloned().unwrap_or_default();
        Self {
            store,
            file,
            max_authorized,
            record,
            writes: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn file(&self) -> FileHash {
        self.file
    }

    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut FileRecord {
        &mut self.record
    }

    /// Live record owned by `caller`, or the matching precondition error.
    pub fn require_owner(&self, caller: Principal) -> LedgerResult<()> {
        if !self.record.exists {
            return Err(LedgerError::NotFound);
        }
        if self.record.uploader != caller {
            return Err(LedgerError::NotOwner);
        }
        Ok(())
    }

    fn stamp(&self, principal: &Principal) -> Option<Generation> {
        match self.writes.get(principal) {
            Some(pending) => *pending,
            None => self.store.grant_generation(&self.file, principal),
        }
    }

    pub fn is_authorized(&self, principal: &Principal) -> bool {
        self.record.exists && self.stamp(principal) == Some(self.record.generation)
    }

    /// Grant primitive. Returns `Ok(false)` if the principal already holds a
    /// grant for the current generation.
    ///
    /// Capacity is checked against the running count, so a batch is limited
    /// by every grant staged before it in the same transaction.
    pub fn authorize(&mut self, principal: Principal) -> LedgerResult<bool> {
        if self.is_authorized(&principal) {
            return Ok(false);
        }
        if self.record.authorized_count >= self.max_authorized {
            return Err(LedgerError::TooManyUsers {
                max: self.max_authorized,
            });
        }
        self.writes.insert(principal, Some(self.record.generation));
        self.record.authorized_count += 1;
        self.events.push(LedgerEvent::AccessGranted {
            file_hash: self.file,
            principal,
        });
        Ok(true)
    }

    /// Revoke primitive. Returns `false` if the principal was not authorized.
    pub fn deauthorize(&mut self, principal: Principal) -> bool {
        if !self.is_authorized(&principal) {
            return false;
        }
        self.record.authorized_count = match self.record.authorized_count.checked_sub(1) {
            Some(n) => n,
            None => panic!(
                "authorized count underflow on {}: {} holds a live grant but count is 0",
                self.file, principal
            ),
        };
        self.writes.insert(principal, None);
        self.events.push(LedgerEvent::AccessRevoked {
            file_hash: self.file,
            principal,
        });
        true
    }

    pub fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    pub fn finish(self) -> Staged {
        Staged {
            file: self.file,
            record: self.record,
            writes: self.writes,
            events: self.events,
        }
    }
}

impl Staged {
    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    /// Hand the buffered writes to the store as one commit, then the events
    /// in emission order. A store error discards the events.
    pub fn commit<S: LedgerStore + ?Sized>(
        self,
        store: &mut S,
    ) -> anyhow::Result<Vec<LedgerEvent>> {
        store.commit(Commit {
            file: self.file,
            record: self.record,
            grants: self.writes,
        })?;
        Ok(self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn file() -> FileHash {
        FileHash::new([1; 32])
    }

    fn who(n: u8) -> Principal {
        Principal::new([n; 20])
    }

    fn live_store(count: u32) -> MemoryStore {
        let mut store = MemoryStore::new();
        store.put_record(
            file(),
            FileRecord {
                uploader: who(1),
                content_pointer: "ptr".into(),
                generation: 1,
                exists: true,
                authorized_count: count,
            },
        );
        store
    }

    #[test]
    fn reads_see_staged_writes() {
        let store = live_store(0);
        let mut txn = Txn::begin(&store, file(), 10);
        assert!(txn.authorize(who(2)).unwrap());
        assert!(txn.is_authorized(&who(2)));
        // not yet in the store
        assert_eq!(store.grant_generation(&file(), &who(2)), None);
    }

    #[test]
    fn dropped_txn_leaves_store_untouched() {
        let store = live_store(0);
        {
            let mut txn = Txn::begin(&store, file(), 10);
            txn.authorize(who(2)).unwrap();
            txn.record_mut().content_pointer = "other".into();
        }
        assert_eq!(store.record(&file()).unwrap().content_pointer, "ptr");
        assert_eq!(store.record(&file()).unwrap().authorized_count, 0);
    }

    #[test]
    fn commit_applies_grants_and_clears() {
        let mut store = live_store(1);
        store.set_grant(file(), who(3), 1);

        let mut txn = Txn::begin(&store, file(), 10);
        assert!(txn.deauthorize(who(3)));
        assert!(txn.authorize(who(4)).unwrap());
        let events = txn.finish().commit(&mut store).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(store.grant_generation(&file(), &who(3)), None);
        assert_eq!(store.grant_generation(&file(), &who(4)), Some(1));
        assert_eq!(store.record(&file()).unwrap().authorized_count, 1);
    }

    #[test]
    fn stale_stamp_is_not_authorized() {
        let mut store = live_store(0);
        store.set_grant(file(), who(5), 0);
        let txn = Txn::begin(&store, file(), 10);
        assert!(!txn.is_authorized(&who(5)));
    }

    #[test]
    fn capacity_uses_running_count() {
        let store = live_store(0);
        let mut txn = Txn::begin(&store, file(), 2);
        txn.authorize(who(2)).unwrap();
        txn.authorize(who(3)).unwrap();
        assert_eq!(
            txn.authorize(who(4)),
            Err(LedgerError::TooManyUsers { max: 2 })
        );
    }

    #[test]
    #[should_panic(expected = "authorized count underflow")]
    fn underflow_panics() {
        // Corrupt state: a live stamp with a zero count.
        let mut store = live_store(0);
        store.set_grant(file(), who(6), 1);
        let mut txn = Txn::begin(&store, file(), 10);
        txn.deauthorize(who(6));
    }
}
