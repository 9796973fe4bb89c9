use sealshare_core::SealError;
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Precondition failures of ledger operations.
///
/// Every variant aborts the operation with no state change. Invariant
/// violations are not represented here; they panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("file does not exist")]
    NotFound,

    #[error("file already exists")]
    AlreadyExists,

    #[error("caller is not the uploader")]
    NotOwner,

    #[error("content pointer is empty")]
    EmptyPointer,

    #[error("invalid principal (null address)")]
    InvalidPrincipal,

    #[error("too many grantees: {requested} exceeds limit of {max}")]
    TooManyGrantees { requested: usize, max: u32 },

    #[error("too many users: file already has {max} authorized principals")]
    TooManyUsers { max: u32 },

    #[error("uploader cannot revoke their own access")]
    SelfRevocation,

    #[error("cannot transfer ownership to the current owner")]
    SelfTransfer,

    #[error("caller is not authorized for this file")]
    NotAuthorized,

    #[error("store error: {0}")]
    Store(String),
}

impl LedgerError {
    /// Stable machine-readable code for API and UI layers.
    pub fn reason(&self) -> &'static str {
        match self {
            LedgerError::NotFound => "not_found",
            LedgerError::AlreadyExists => "already_exists",
            LedgerError::NotOwner => "not_owner",
            LedgerError::EmptyPointer => "empty_pointer",
            LedgerError::InvalidPrincipal => "invalid_principal",
            LedgerError::TooManyGrantees { .. } => "too_many_grantees",
            LedgerError::TooManyUsers { .. } => "too_many_users",
            LedgerError::SelfRevocation => "self_revocation",
            LedgerError::SelfTransfer => "self_transfer",
            LedgerError::NotAuthorized => "not_authorized",
            LedgerError::Store(_) => "store",
        }
    }
}

impl From<LedgerError> for SealError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Store(msg) => SealError::Storage(msg),
            other => SealError::Ledger(format!("{} ({})", other, other.reason())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_distinct() {
        let all = [
            LedgerError::NotFound,
            LedgerError::AlreadyExists,
            LedgerError::NotOwner,
            LedgerError::EmptyPointer,
            LedgerError::InvalidPrincipal,
            LedgerError::TooManyGrantees {
                requested: 2,
                max: 1,
            },
            LedgerError::TooManyUsers { max: 1 },
            LedgerError::SelfRevocation,
            LedgerError::SelfTransfer,
            LedgerError::NotAuthorized,
            LedgerError::Store("x".into()),
        ];
        let mut reasons: Vec<_> = all.iter().map(|e| e.reason()).collect();
        reasons.sort_unstable();
        reasons.dedup();
        assert_eq!(reasons.len(), all.len());
    }

    #[test]
    fn converts_into_seal_error() {
        let e: SealError = LedgerError::SelfRevocation.into();
        assert!(e.to_string().contains("self_revocation"));

        let e: SealError = LedgerError::Store("disk full".into()).into();
        assert!(matches!(e, SealError::Storage(ref m) if m == "disk full"));
    }
}
