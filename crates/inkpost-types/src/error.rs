use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid referral code {code:?}: {reason}")]
    InvalidReferralCode { code: String, reason: String },

    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("invalid tenant name: {0}")]
    InvalidTenant(String),
}
