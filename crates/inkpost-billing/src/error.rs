use inkpost_ledger::LedgerError;
use inkpost_types::{AccountId, OrderId, PlanId, TypeError};

/// Errors surfaced by the billing workflows.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BillingError {
    #[error(
        "not enough credits: {available} remaining, {required} required. \
         Purchase more credits to keep generating posts"
    )]
    InsufficientCredits { available: u64, required: u64 },

    #[error("precondition not met: {0}")]
    InsufficientPrecondition(String),

    #[error("plan not found: {0}")]
    PlanNotFound(PlanId),

    #[error("plan {0} cannot be purchased")]
    PlanNotPayable(PlanId),

    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("order {0} is already completed")]
    AlreadyCompleted(OrderId),

    #[error("order {0} has already failed")]
    OrderFailed(OrderId),

    #[error("payment for order {order} was not completed: processor reported {status}")]
    PaymentDeclined { order: OrderId, status: String },

    /// Another capture of the same order is waiting on the processor.
    #[error("order {0} is already being captured")]
    CaptureInProgress(OrderId),

    /// The processor did not answer in time. The order stays open and no
    /// credits are granted until a later capture resolves it.
    #[error("capture outcome for order {order} is unknown: {reason}")]
    CaptureOutcomeUnknown { order: OrderId, reason: String },

    #[error("referral code not found: {0}")]
    CodeNotFound(String),

    #[error("account {0} cannot use its own referral code")]
    SelfReferral(AccountId),

    #[error("account {0} has already been referred")]
    DuplicateReferral(AccountId),

    #[error("no unused referral code found after {0} attempts")]
    CodeSpaceExhausted(usize),

    #[error("{service} failed: {reason}")]
    ExternalServiceFailure { service: String, reason: String },

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("invalid value: {0}")]
    Type(#[from] TypeError),
}

impl BillingError {
    pub fn external(service: &str, reason: impl Into<String>) -> Self {
        Self::ExternalServiceFailure {
            service: service.to_string(),
            reason: reason.into(),
        }
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
