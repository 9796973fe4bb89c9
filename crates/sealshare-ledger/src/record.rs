use sealshare_core::{Generation, Principal};
use serde::{Deserialize, Serialize};

/// Per-file ledger state, keyed by content hash in the store.
///
/// Grant stamps live beside the record in the store's flat
/// `(file, principal) -> generation` table, not inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Current owner. Zero while the record is tombstoned.
    pub uploader: Principal,
    /// Locator of the encrypted blob. Empty while tombstoned.
    pub content_pointer: String,
    /// Bumped by one on every create; never decremented.
    pub generation: Generation,
    pub exists: bool,
    /// Number of principals whose stamp equals `generation`.
    pub authorized_count: u32,
}

impl FileRecord {
    /// A deleted record keeps only its generation.
    pub fn tombstone(&self) -> FileRecord {
        FileRecord {
            generation: self.generation,
            ..FileRecord::default()
        }
    }
}
