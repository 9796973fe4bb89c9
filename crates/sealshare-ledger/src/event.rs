//! Ledger event stream.
//!
//! Every accepted mutation returns the events it emitted, in emission order.
//! Off-chain mirrors treat this stream as the only source of truth for who can
//! currently decrypt what.
//!
//! Subject hierarchy: `LEDGER.{file_hash}.{event_type}`

use anyhow::Result;
use sealshare_core::{FileHash, Principal};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A file record was created or re-created after deletion.
    FileCreated {
        file_hash: FileHash,
        content_pointer: String,
        uploader: Principal,
        /// Initial grantee list exactly as submitted.
        grantees: Vec<Principal>,
    },
    /// The content pointer of a live file was replaced.
    PointerUpdated {
        file_hash: FileHash,
        content_pointer: String,
        uploader: Principal,
    },
    /// A file was soft-deleted; all of its grants are now void.
    FileDeleted {
        file_hash: FileHash,
        uploader: Principal,
    },
    /// A principal became authorized under the current generation.
    AccessGranted {
        file_hash: FileHash,
        principal: Principal,
    },
    /// A currently authorized principal lost access.
    AccessRevoked {
        file_hash: FileHash,
        principal: Principal,
    },
    OwnershipTransferred {
        file_hash: FileHash,
        previous_owner: Principal,
        new_owner: Principal,
    },
}

impl LedgerEvent {
    pub fn file_hash(&self) -> &FileHash {
        match self {
            LedgerEvent::FileCreated { file_hash, .. } => file_hash,
            LedgerEvent::PointerUpdated { file_hash, .. } => file_hash,
            LedgerEvent::FileDeleted { file_hash, .. } => file_hash,
            LedgerEvent::AccessGranted { file_hash, .. } => file_hash,
            LedgerEvent::AccessRevoked { file_hash, .. } => file_hash,
            LedgerEvent::OwnershipTransferred { file_hash, .. } => file_hash,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::FileCreated { .. } => "file_created",
            LedgerEvent::PointerUpdated { .. } => "pointer_updated",
            LedgerEvent::FileDeleted { .. } => "file_deleted",
            LedgerEvent::AccessGranted { .. } => "access_granted",
            LedgerEvent::AccessRevoked { .. } => "access_revoked",
            LedgerEvent::OwnershipTransferred { .. } => "ownership_transferred",
        }
    }

    /// Build the pub/sub subject for this event.
    pub fn subject(&self) -> String {
        format!("LEDGER.{}.{}", self.file_hash(), self.event_type())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| anyhow::anyhow!("serializing LedgerEvent: {e}"))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| anyhow::anyhow!("deserializing LedgerEvent: {e}"))
    }
}
