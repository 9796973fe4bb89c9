//! sealshare-ledger: the authoritative access ledger for encrypted file blobs.
//!
//! Each file hash maps to an owner, a content pointer, a permission generation
//! and a capped set of authorized principals. A principal is authorized only
//! while its grant stamp equals the file's current generation, so deleting and
//! re-creating a file invalidates every earlier grant without enumerating them.
//!
//! ```text
//! ABSENT --create--> LIVE(g) --delete--> TOMBSTONED(g) --create--> LIVE(g+1)
//! ```
//!
//! Every mutation runs in a staged transaction and either commits completely or
//! leaves the store untouched. Mutations return the [`LedgerEvent`]s they
//! emitted, in order, for off-chain mirrors such as [`EventMirror`].

pub mod error;
pub mod event;
pub mod ledger;
pub mod lock;
pub mod mirror;
pub mod record;
pub mod store;
mod txn;

pub use error::{LedgerError, LedgerResult};
pub use event::LedgerEvent;
pub use ledger::{AccessLedger, MAX_AUTHORIZED};
pub use lock::{StateGuard, StateLock};
pub use mirror::{EventMirror, MirrorError, MirroredFile};
pub use record::FileRecord;
pub use store::{Commit, JsonStore, LedgerStore, MemoryStore, StoreBackend};

#[cfg(feature = "rocksdb")]
pub use store::RocksDbStore;
