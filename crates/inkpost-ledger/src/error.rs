use inkpost_types::{AccountId, EntryId, OrderId};

/// Errors produced by ledger operations.
///
/// Every variant is fatal to the operation that produced it: the ledger
/// state is left exactly as it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance on {account}: {available} available, {requested} requested")]
    InsufficientBalance {
        account: AccountId,
        available: u64,
        requested: u64,
    },

    #[error("precondition not met: {0}")]
    InsufficientPrecondition(String),

    #[error("order {0} is already completed")]
    AlreadyCompleted(OrderId),

    #[error("order {0} already has a capture in progress")]
    CaptureInProgress(OrderId),

    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("order already registered: {0}")]
    DuplicateOrder(OrderId),

    #[error("account {0} cannot refer itself")]
    SelfReferral(AccountId),

    #[error("account {0} has already been referred")]
    DuplicateReferral(AccountId),

    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("account {0} is closed")]
    AccountClosed(AccountId),

    #[error("entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("credit counter overflow on {0}")]
    Overflow(AccountId),

    #[error("integrity violation at seq {seq}: {reason}")]
    IntegrityViolation { seq: u64, reason: String },

    #[error("invalid time range: {0}")]
    InvalidRange(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl LedgerError {
    pub(crate) fn poisoned(kind: &str) -> Self {
        Self::IntegrityViolation {
            seq: 0,
            reason: format!("ledger {kind} lock poisoned"),
        }
    }
}
