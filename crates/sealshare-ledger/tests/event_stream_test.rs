//! Exact event sequences emitted by each mutation, and the guarantee that an
//! off-chain mirror fed only those events agrees with the ledger.

use sealshare_core::{FileHash, Principal};
use sealshare_ledger::{AccessLedger, EventMirror, LedgerError, LedgerEvent, MemoryStore};

fn who(n: u8) -> Principal {
    Principal::new([n; 20])
}

fn file() -> FileHash {
    FileHash::digest(b"event stream")
}

#[test]
fn create_emits_created_then_grants_in_input_order() {
    let mut ledger = AccessLedger::new(MemoryStore::new());
    let events = ledger
        .create(who(1), file(), "bafy", &[who(3), who(2)])
        .unwrap();

    assert_eq!(
        events,
        vec![
            LedgerEvent::FileCreated {
                file_hash: file(),
                content_pointer: "bafy".into(),
                uploader: who(1),
                grantees: vec![who(3), who(2)],
            },
            LedgerEvent::AccessGranted {
                file_hash: file(),
                principal: who(1),
            },
            LedgerEvent::AccessGranted {
                file_hash: file(),
                principal: who(3),
            },
            LedgerEvent::AccessGranted {
                file_hash: file(),
                principal: who(2),
            },
        ]
    );
}

#[test]
fn transfer_emits_revoke_grant_transfer() {
    let mut ledger = AccessLedger::new(MemoryStore::new());
    ledger.create(who(1), file(), "bafy", &[]).unwrap();

    let events = ledger.transfer_ownership(who(1), file(), who(2)).unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
    assert_eq!(
        types,
        vec!["access_revoked", "access_granted", "ownership_transferred"]
    );
    assert_eq!(
        events[2],
        LedgerEvent::OwnershipTransferred {
            file_hash: file(),
            previous_owner: who(1),
            new_owner: who(2),
        }
    );
}

#[test]
fn update_and_delete_events() {
    let mut ledger = AccessLedger::new(MemoryStore::new());
    ledger.create(who(1), file(), "v1", &[who(2)]).unwrap();

    assert_eq!(
        ledger.update_pointer(who(1), file(), "v2").unwrap(),
        vec![LedgerEvent::PointerUpdated {
            file_hash: file(),
            content_pointer: "v2".into(),
            uploader: who(1),
        }]
    );

    // delete does not emit per-principal revocations
    assert_eq!(
        ledger.delete(who(1), file()).unwrap(),
        vec![LedgerEvent::FileDeleted {
            file_hash: file(),
            uploader: who(1),
        }]
    );
}

#[test]
fn failed_operation_emits_nothing() {
    let mut ledger = AccessLedger::new(MemoryStore::new());
    ledger.create(who(1), file(), "v1", &[]).unwrap();

    assert_eq!(
        ledger.revoke(who(1), file(), who(1)),
        Err(LedgerError::SelfRevocation)
    );
    assert_eq!(
        ledger.grant(who(9), file(), who(2)),
        Err(LedgerError::NotOwner)
    );
}

#[test]
fn event_subjects_carry_file_hash() {
    let mut ledger = AccessLedger::new(MemoryStore::new());
    let events = ledger.create(who(1), file(), "v1", &[]).unwrap();
    for event in &events {
        assert!(event.subject().starts_with(&format!("LEDGER.{}.", file())));
        assert_eq!(event.file_hash(), &file());
    }
}

#[test]
fn mirror_tracks_full_lifecycle() {
    let mut ledger = AccessLedger::new(MemoryStore::new());
    let mut journal = Vec::new();

    journal.extend(ledger.create(who(1), file(), "v1", &[who(2), who(3)]).unwrap());
    journal.extend(ledger.revoke(who(1), file(), who(2)).unwrap());
    journal.extend(ledger.update_pointer(who(1), file(), "v2").unwrap());
    journal.extend(ledger.transfer_ownership(who(1), file(), who(4)).unwrap());

    let mirror = EventMirror::replay(&journal).unwrap();
    let mirrored = mirror.file(&file()).unwrap();
    assert_eq!(mirrored.owner, who(4));
    assert_eq!(mirrored.content_pointer, "v2");
    assert_eq!(mirror.authorized(&file()), vec![who(3), who(4)]);
    assert_eq!(
        mirrored.authorized.len() as u32,
        ledger.authorized_count_of(file()).unwrap()
    );

    journal.extend(ledger.delete(who(4), file()).unwrap());
    journal.extend(ledger.create(who(5), file(), "v3", &[]).unwrap());

    let mirror = EventMirror::replay(&journal).unwrap();
    assert_eq!(mirror.authorized(&file()), vec![who(5)]);
    for n in 1..=5 {
        assert_eq!(
            mirror.is_authorized(&file(), &who(n)),
            ledger.is_authorized(file(), who(n)),
            "principal {n}"
        );
    }
}
