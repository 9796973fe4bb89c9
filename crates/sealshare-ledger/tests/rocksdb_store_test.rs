//! Integration tests for the RocksDB ledger store.
//!
//! Ledger state written through `RocksDbStore` must come back identical after
//! a reopen, grant stamps and cached counts included.

#![cfg(feature = "rocksdb")]

use sealshare_core::{FileHash, Principal};
use sealshare_ledger::{AccessLedger, LedgerError, LedgerStore, RocksDbStore, StoreBackend};
use tempfile::TempDir;

fn who(n: u8) -> Principal {
    Principal::new([n; 20])
}

#[test]
fn rocksdb_ledger_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("ledger.rocksdb");
    let file = FileHash::digest(b"rocks");

    {
        let store = RocksDbStore::open(&db_path).expect("open rocksdb");
        let mut ledger = AccessLedger::new(store);
        ledger
            .create(who(1), file, "bafy-1", &[who(2), who(3), who(4)])
            .unwrap();
        ledger.revoke(who(1), file, who(3)).unwrap();
        ledger.flush().unwrap();
    }

    let store = RocksDbStore::open(&db_path).expect("reopen rocksdb");
    let mut ledger = AccessLedger::new(store);
    assert_eq!(ledger.uploader_of(file), Ok(who(1)));
    assert_eq!(ledger.authorized_count_of(file), Ok(3));
    assert!(ledger.is_authorized(file, who(2)));
    assert!(!ledger.is_authorized(file, who(3)));
    assert_eq!(ledger.store().grant_generation(&file, &who(3)), None);
    assert_eq!(ledger.store().grant_generation(&file, &who(4)), Some(1));

    // the count read back matches the stamps read back: revoking everyone
    // but the uploader lands exactly on 1
    ledger.revoke(who(1), file, who(2)).unwrap();
    ledger.revoke(who(1), file, who(4)).unwrap();
    assert_eq!(ledger.authorized_count_of(file), Ok(1));
}

#[test]
fn rocksdb_tombstone_and_stale_stamps_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("ledger.rocksdb");
    let file = FileHash::digest(b"ghost");

    {
        let mut ledger = AccessLedger::new(RocksDbStore::open(&db_path).unwrap());
        ledger.create(who(1), file, "v1", &[who(2)]).unwrap();
        ledger.delete(who(1), file).unwrap();
    }
    {
        let mut ledger = AccessLedger::new(RocksDbStore::open(&db_path).unwrap());
        assert!(!ledger.exists(file));
        assert_eq!(ledger.generation_of(file), 1);
        assert_eq!(ledger.store().grant_generation(&file, &who(2)), Some(1));
        ledger.create(who(1), file, "v2", &[]).unwrap();
    }

    let ledger = AccessLedger::new(RocksDbStore::open(&db_path).unwrap());
    assert_eq!(ledger.generation_of(file), 2);
    assert!(!ledger.is_authorized(file, who(2)));
    assert_eq!(
        ledger.content_pointer_of(who(2), file),
        Err(LedgerError::NotAuthorized)
    );
}

#[test]
fn backend_selects_rocksdb_without_json_extension() {
    let tmp = TempDir::new().unwrap();
    let backend = StoreBackend::open(&tmp.path().join("state.db")).unwrap();
    assert_eq!(backend.kind(), "rocksdb");
    assert!(backend.is_empty());
}
