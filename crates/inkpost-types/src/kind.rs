use std::fmt;

use serde::{Deserialize, Serialize};

/// Direction of a balance mutation recorded in the journal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Spendable credits were consumed.
    Debit,
    /// New credits were granted (purchase, referral, adjustment).
    Credit,
    /// A previous debit was returned after a failed generation.
    Refund,
}

impl EntryKind {
    /// Whether an entry of this kind raises the lifetime total as well as
    /// the spendable balance.
    pub fn grows_total(&self) -> bool {
        matches!(self, Self::Credit)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debit => write!(f, "debit"),
            Self::Credit => write!(f, "credit"),
            Self::Refund => write!(f, "refund"),
        }
    }
}

/// Business reason attached to a ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryReason {
    /// One paid AI generation call.
    GenerationUse,
    /// Credits bought through the payment processor.
    PlanPurchase,
    /// Reward paid to the user who shared a referral code.
    ReferralReward,
    /// Bonus paid to the newly registered user who redeemed a code.
    ReferralSignup,
    /// Compensation for a debit whose generation failed.
    Refund,
    /// Manual operator correction.
    AdminAdjustment,
}

impl EntryReason {
    /// The only entry kinds this reason may be recorded with.
    pub fn permits(&self, kind: EntryKind) -> bool {
        match self {
            Self::GenerationUse => kind == EntryKind::Debit,
            Self::PlanPurchase | Self::ReferralReward | Self::ReferralSignup => {
                kind == EntryKind::Credit
            }
            Self::Refund => kind == EntryKind::Refund,
            Self::AdminAdjustment => matches!(kind, EntryKind::Credit | EntryKind::Debit),
        }
    }
}

impl fmt::Display for EntryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GenerationUse => "generation_use",
            Self::PlanPurchase => "plan_purchase",
            Self::ReferralReward => "referral_reward",
            Self::ReferralSignup => "referral_signup",
            Self::Refund => "refund",
            Self::AdminAdjustment => "admin_adjustment",
        };
        f.write_str(name)
    }
}
