//! Ledger state stores.
//!
//! State is two flat tables:
//!   - `records`: file hash → [`FileRecord`]
//!   - `grants`:  (file hash, principal) → generation stamp
//!
//! Only point lookups are ever needed. The authorized count is cached on the
//! record, so a file's grant set is never enumerated.
//!
//! Backends:
//!   - **Memory**: plain maps, for tests and embedding.
//!   - **JSON**: memory maps plus a snapshot file replaced via temp+rename.
//!   - **RocksDB** (behind `rocksdb` feature): one `WriteBatch` per commit, mirrored in memory.
//!
//! All implement `LedgerStore`, so the ledger is generic over the backend.
//! Writes reach a store only through [`LedgerStore::commit`], one accepted
//! mutation at a time.

use anyhow::{Context, Result};
use sealshare_core::{FileHash, Generation, Principal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::record::FileRecord;

/// Every write produced by one accepted mutation on one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub file: FileHash,
    pub record: FileRecord,
    /// Stamp writes; `None` clears the principal's stamp.
    pub grants: BTreeMap<Principal, Option<Generation>>,
}

impl Commit {
    /// A commit that only replaces the record.
    pub fn record_only(file: FileHash, record: FileRecord) -> Self {
        Self {
            file,
            record,
            grants: BTreeMap::new(),
        }
    }

    pub fn grant(mut self, principal: Principal, generation: Generation) -> Self {
        self.grants.insert(principal, Some(generation));
        self
    }

    pub fn clear(mut self, principal: Principal) -> Self {
        self.grants.insert(principal, None);
        self
    }
}

/// Storage backend for ledger state.
pub trait LedgerStore {
    /// Look up the record for a file hash (live or tombstoned).
    fn record(&self, file: &FileHash) -> Option<&FileRecord>;
    /// The generation a principal was last granted under, if any.
    fn grant_generation(&self, file: &FileHash, principal: &Principal) -> Option<Generation>;
    /// Apply one mutation's writes. Either every write lands or none does.
    fn commit(&mut self, commit: Commit) -> Result<()>;
    /// Flush pending changes to durable storage.
    fn flush(&mut self) -> Result<()>;
    /// Number of records, live or tombstoned.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: LedgerStore + ?Sized> LedgerStore for &mut S {
    fn record(&self, file: &FileHash) -> Option<&FileRecord> {
        (**self).record(file)
    }
    fn grant_generation(&self, file: &FileHash, principal: &Principal) -> Option<Generation> {
        (**self).grant_generation(file, principal)
    }
    fn commit(&mut self, commit: Commit) -> Result<()> {
        (**self).commit(commit)
    }
    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
    fn len(&self) -> usize {
        (**self).len()
    }
}

// ── Memory backend ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: HashMap<FileHash, FileRecord>,
    grants: HashMap<(FileHash, Principal), Generation>,
}

/// On-disk shape of the ledger. Grants are nested per file so the JSON stays
/// readable; in memory they are flat.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    records: BTreeMap<FileHash, FileRecord>,
    #[serde(default)]
    grants: BTreeMap<FileHash, BTreeMap<Principal, Generation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of grant stamps held, including stale ones under old generations.
    pub fn grant_len(&self) -> usize {
        self.grants.len()
    }

    pub fn put_record(&mut self, file: FileHash, record: FileRecord) {
        self.records.insert(file, record);
    }

    pub fn set_grant(&mut self, file: FileHash, principal: Principal, generation: Generation) {
        self.grants.insert((file, principal), generation);
    }

    pub fn clear_grant(&mut self, file: &FileHash, principal: &Principal) {
        self.grants.remove(&(*file, *principal));
    }

    fn apply(&mut self, commit: Commit) {
        for (principal, stamp) in commit.grants {
            match stamp {
                Some(generation) => self.set_grant(commit.file, principal, generation),
                None => self.clear_grant(&commit.file, &principal),
            }
        }
        self.put_record(commit.file, commit.record);
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        let grants = snapshot
            .grants
            .into_iter()
            .flat_map(|(file, stamps)| {
                stamps
                    .into_iter()
                    .map(move |(principal, generation)| ((file, principal), generation))
            })
            .collect();
        Self {
            records: snapshot.records.into_iter().collect(),
            grants,
        }
    }

    fn snapshot(&self) -> Snapshot {
        let mut grants: BTreeMap<FileHash, BTreeMap<Principal, Generation>> = BTreeMap::new();
        for (&(file, principal), &generation) in &self.grants {
            grants.entry(file).or_default().insert(principal, generation);
        }
        Snapshot {
            records: self.records.iter().map(|(k, v)| (*k, v.clone())).collect(),
            grants,
        }
    }
}

impl LedgerStore for MemoryStore {
    fn record(&self, file: &FileHash) -> Option<&FileRecord> {
        self.records.get(file)
    }
    fn grant_generation(&self, file: &FileHash, principal: &Principal) -> Option<Generation> {
        self.grants.get(&(*file, *principal)).copied()
    }
    fn commit(&mut self, commit: Commit) -> Result<()> {
        self.apply(commit);
        Ok(())
    }
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
    fn len(&self) -> usize {
        self.records.len()
    }
}

// ── JSON backend ─────────────────────────────────────────────────────────────

/// Ledger tables kept in memory and written out as one JSON snapshot.
///
/// The store takes no lock of its own. Processes sharing a state path
/// serialize through [`crate::StateLock`].
pub struct JsonStore {
    path: PathBuf,
    inner: MemoryStore,
    /// Commits not yet in the snapshot
    dirty: bool,
}

impl JsonStore {
    /// Read the snapshot at `path`, or start with empty tables when there is
    /// none yet.
    pub fn open(path: &Path) -> Result<Self> {
        let snapshot = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading ledger state: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing ledger state: {}", path.display()))?
        } else {
            Snapshot::default()
        };

        let inner = MemoryStore::from_snapshot(snapshot);
        tracing::info!(
            path = %path.display(),
            records = inner.len(),
            grants = inner.grant_len(),
            "opened JSON ledger store"
        );

        Ok(JsonStore {
            path: path.to_path_buf(),
            inner,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl LedgerStore for JsonStore {
    fn record(&self, file: &FileHash) -> Option<&FileRecord> {
        self.inner.record(file)
    }
    fn grant_generation(&self, file: &FileHash, principal: &Principal) -> Option<Generation> {
        self.inner.grant_generation(file, principal)
    }
    fn commit(&mut self, commit: Commit) -> Result<()> {
        self.inner.apply(commit);
        self.dirty = true;
        Ok(())
    }

    /// Replace the snapshot: write a sibling `.tmp` file, then rename it over
    /// the old one so readers never see a partial write.
    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating state dir: {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&self.inner.snapshot())
            .context("serializing ledger state")?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json)
            .with_context(|| format!("writing ledger state temp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming ledger state: {}", self.path.display()))?;

        self.dirty = false;
        tracing::debug!(path = %self.path.display(), "flushed ledger state");
        Ok(())
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl Drop for JsonStore {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                tracing::warn!("failed to flush ledger state on drop: {e}");
            }
        }
    }
}

// ── RocksDB backend ──────────────────────────────────────────────────────────

#[cfg(feature = "rocksdb")]
mod rocksdb_backend {
    use super::*;

    const RECORD_PREFIX: &str = "r/";
    const GRANT_PREFIX: &str = "g/";

    fn record_key(file: &FileHash) -> String {
        format!("{RECORD_PREFIX}{file}")
    }

    fn grant_key(file: &FileHash, principal: &Principal) -> String {
        format!("{GRANT_PREFIX}{file}/{principal}")
    }

    /// Grant stamps are stored as decimal text.
    fn encode_generation(generation: Generation) -> Vec<u8> {
        generation.to_string().into_bytes()
    }

    fn decode_generation(value: &[u8]) -> Result<Generation> {
        let text = std::str::from_utf8(value).context("grant value is not utf-8")?;
        text.parse()
            .with_context(|| format!("grant value is not a generation: {text:?}"))
    }

    /// RocksDB-backed ledger store with an in-memory mirror.
    ///
    /// On `open()`, all keys are loaded into a `MemoryStore` so reads can hand
    /// out references. Each commit is a single `WriteBatch`; the mirror is only
    /// updated once RocksDB has accepted it, so `flush()` is a no-op.
    pub struct RocksDbStore {
        db: rocksdb::DB,
        inner: MemoryStore,
    }

    impl RocksDbStore {
        /// Open or create a RocksDB ledger store at the given path.
        pub fn open(db_path: &Path) -> Result<Self> {
            let mut opts = rocksdb::Options::default();
            opts.create_if_missing(true);

            let db = rocksdb::DB::open(&opts, db_path)
                .with_context(|| format!("opening RocksDB: {}", db_path.display()))?;

            let mut inner = MemoryStore::new();
            for item in db.iterator(rocksdb::IteratorMode::Start) {
                let (key_bytes, value_bytes) = item.context("iterating RocksDB entries")?;
                let key = String::from_utf8_lossy(&key_bytes).to_string();

                if let Some(hash) = key.strip_prefix(RECORD_PREFIX) {
                    let file: FileHash = hash
                        .parse()
                        .with_context(|| format!("bad record key: {key}"))?;
                    let record: FileRecord = serde_json::from_slice(&value_bytes)
                        .with_context(|| format!("bad record value: {key}"))?;
                    inner.put_record(file, record);
                } else if let Some(rest) = key.strip_prefix(GRANT_PREFIX) {
                    let (hash, principal) = rest
                        .split_once('/')
                        .with_context(|| format!("bad grant key: {key}"))?;
                    let generation = decode_generation(&value_bytes)
                        .with_context(|| format!("bad grant value: {key}"))?;
                    inner.set_grant(
                        hash.parse().with_context(|| format!("bad grant key: {key}"))?,
                        principal
                            .parse()
                            .with_context(|| format!("bad grant key: {key}"))?,
                        generation,
                    );
                } else {
                    tracing::warn!("ignoring unknown RocksDB key: {key}");
                }
            }

            tracing::info!(
                path = %db_path.display(),
                records = inner.len(),
                grants = inner.grant_len(),
                "opened RocksDB ledger store"
            );
            Ok(RocksDbStore { db, inner })
        }
    }

    impl LedgerStore for RocksDbStore {
        fn record(&self, file: &FileHash) -> Option<&FileRecord> {
            self.inner.record(file)
        }

        fn grant_generation(&self, file: &FileHash, principal: &Principal) -> Option<Generation> {
            self.inner.grant_generation(file, principal)
        }

        fn commit(&mut self, commit: Commit) -> Result<()> {
            let mut batch = rocksdb::WriteBatch::default();
            for (principal, stamp) in &commit.grants {
                let key = grant_key(&commit.file, principal);
                match stamp {
                    Some(generation) => batch.put(key.as_bytes(), encode_generation(*generation)),
                    None => batch.delete(key.as_bytes()),
                }
            }
            let record = serde_json::to_vec(&commit.record)
                .with_context(|| format!("serializing record {}", commit.file))?;
            batch.put(record_key(&commit.file).as_bytes(), record);

            self.db
                .write(&batch)
                .with_context(|| format!("writing ledger batch for {}", commit.file))?;
            self.inner.apply(commit);
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            // Batches are durable once written; the RocksDB WAL covers crashes.
            Ok(())
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn generation_encoding_roundtrips() {
            for g in [0, 1, 42, Generation::MAX] {
                assert_eq!(decode_generation(&encode_generation(g)).unwrap(), g);
            }
            assert!(decode_generation(b"x1").is_err());
            assert!(decode_generation(&[0xff, 0xfe]).is_err());
        }

        #[test]
        fn grant_keys_split_back_into_parts() {
            let file = FileHash::new([3; 32]);
            let who = Principal::new([4; 20]);
            let key = grant_key(&file, &who);
            let rest = key.strip_prefix(GRANT_PREFIX).unwrap();
            let (hash, principal) = rest.split_once('/').unwrap();
            assert_eq!(hash.parse::<FileHash>().unwrap(), file);
            assert_eq!(principal.parse::<Principal>().unwrap(), who);
        }
    }
}

#[cfg(feature = "rocksdb")]
pub use rocksdb_backend::RocksDbStore;

/// Dispatch enum over the concrete stores, selected at runtime.
pub enum StoreBackend {
    Memory(MemoryStore),
    Json(JsonStore),
    #[cfg(feature = "rocksdb")]
    Rocks(RocksDbStore),
}

impl StoreBackend {
    /// Open the appropriate backend based on path extension.
    ///
    /// Paths ending in `.json` use the JSON backend; otherwise RocksDB (if
    /// compiled with `rocksdb`).
    pub fn open(path: &Path) -> Result<Self> {
        let is_json = path.extension().map(|ext| ext == "json").unwrap_or(false);

        #[cfg(feature = "rocksdb")]
        if !is_json {
            return Ok(StoreBackend::Rocks(RocksDbStore::open(path)?));
        }

        #[cfg(not(feature = "rocksdb"))]
        if !is_json {
            tracing::warn!(
                "RocksDB not compiled in (missing 'rocksdb' feature), falling back to JSON backend"
            );
        }

        Ok(StoreBackend::Json(JsonStore::open(path)?))
    }

    pub fn memory() -> Self {
        StoreBackend::Memory(MemoryStore::new())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StoreBackend::Memory(_) => "memory",
            StoreBackend::Json(_) => "json",
            #[cfg(feature = "rocksdb")]
            StoreBackend::Rocks(_) => "rocksdb",
        }
    }
}

impl LedgerStore for StoreBackend {
    fn record(&self, file: &FileHash) -> Option<&FileRecord> {
        match self {
            StoreBackend::Memory(s) => s.record(file),
            StoreBackend::Json(s) => s.record(file),
            #[cfg(feature = "rocksdb")]
            StoreBackend::Rocks(s) => s.record(file),
        }
    }
    fn grant_generation(&self, file: &FileHash, principal: &Principal) -> Option<Generation> {
        match self {
            StoreBackend::Memory(s) => s.grant_generation(file, principal),
            StoreBackend::Json(s) => s.grant_generation(file, principal),
            #[cfg(feature = "rocksdb")]
            StoreBackend::Rocks(s) => s.grant_generation(file, principal),
        }
    }
    fn commit(&mut self, commit: Commit) -> Result<()> {
        match self {
            StoreBackend::Memory(s) => s.commit(commit),
            StoreBackend::Json(s) => s.commit(commit),
            #[cfg(feature = "rocksdb")]
            StoreBackend::Rocks(s) => s.commit(commit),
        }
    }
    fn flush(&mut self) -> Result<()> {
        match self {
            StoreBackend::Memory(s) => s.flush(),
            StoreBackend::Json(s) => s.flush(),
            #[cfg(feature = "rocksdb")]
            StoreBackend::Rocks(s) => s.flush(),
        }
    }
    fn len(&self) -> usize {
        match self {
            StoreBackend::Memory(s) => s.len(),
            StoreBackend::Json(s) => s.len(),
            #[cfg(feature = "rocksdb")]
            StoreBackend::Rocks(s) => s.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(n: u8) -> FileHash {
        FileHash::new([n; 32])
    }

    fn who(n: u8) -> Principal {
        Principal::new([n; 20])
    }

    fn live(owner: Principal, generation: Generation) -> FileRecord {
        FileRecord {
            uploader: owner,
            content_pointer: "bafy-test".into(),
            generation,
            exists: true,
            authorized_count: 1,
        }
    }

    #[test]
    fn open_nonexistent_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(&dir.path().join("ledger.json")).unwrap();
        assert!(store.is_empty());
        assert!(!store.is_dirty());
    }

    #[test]
    fn commit_flush_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let mut store = JsonStore::open(&path).unwrap();
        store
            .commit(
                Commit::record_only(file(1), live(who(1), 3))
                    .grant(who(1), 3)
                    .grant(who(2), 2),
            )
            .unwrap();
        assert!(store.is_dirty());
        store.flush().unwrap();
        assert!(!store.is_dirty());

        let reloaded = JsonStore::open(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.record(&file(1)), Some(&live(who(1), 3)));
        assert_eq!(reloaded.grant_generation(&file(1), &who(1)), Some(3));
        assert_eq!(reloaded.grant_generation(&file(1), &who(2)), Some(2));
        assert_eq!(reloaded.grant_generation(&file(1), &who(3)), None);
    }

    #[test]
    fn commit_clears_stamps() {
        let mut store = MemoryStore::new();
        store.set_grant(file(1), who(4), 1);
        store.set_grant(file(1), who(5), 1);
        assert_eq!(store.grant_len(), 2);

        store
            .commit(Commit::record_only(file(1), live(who(5), 1)).clear(who(4)))
            .unwrap();
        assert_eq!(store.grant_generation(&file(1), &who(4)), None);
        assert_eq!(store.grant_generation(&file(1), &who(5)), Some(1));
        assert_eq!(store.grant_len(), 1);
    }

    #[test]
    fn grants_are_scoped_per_file() {
        let mut store = MemoryStore::new();
        store.set_grant(file(1), who(1), 1);
        assert_eq!(store.grant_generation(&file(2), &who(1)), None);
    }

    #[test]
    fn drop_flushes_dirty_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/ledger.json");
        {
            let mut store = JsonStore::open(&path).unwrap();
            store
                .commit(Commit::record_only(file(9), live(who(9), 1)))
                .unwrap();
        }
        let reloaded = JsonStore::open(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_flush_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let mut store = JsonStore::open(&path).unwrap();

        // Nothing dirty: no file is written
        store.flush().unwrap();
        store.flush().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(JsonStore::open(&path).is_err());
    }

    #[test]
    fn backend_selects_json_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StoreBackend::open(&dir.path().join("ledger.json")).unwrap();
        assert_eq!(backend.kind(), "json");
        assert_eq!(StoreBackend::memory().kind(), "memory");
    }

    #[test]
    fn borrowed_store_is_a_store() {
        fn put_one<S: LedgerStore>(mut store: S) {
            store
                .commit(Commit::record_only(file(5), live(who(5), 1)))
                .unwrap();
        }

        let mut store = MemoryStore::new();
        put_one(&mut store);
        assert_eq!(store.len(), 1);
    }
}
