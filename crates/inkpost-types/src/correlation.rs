use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::{GenerationId, OrderId, ReferralId};

/// Reference tying a ledger entry to the business event that caused it.
///
/// Reconciliation joins entries on [`Correlation::key`]: a generation debit
/// and its refund share the same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Correlation {
    /// A purchase order being settled.
    Purchase(OrderId),
    /// A generation attempt (the content item being produced).
    Generation(GenerationId),
    /// A completed referral.
    Referral(ReferralId),
    /// An operator ticket or note reference.
    Adjustment(String),
}

impl Correlation {
    /// Stable string key used for journal lookups and joins.
    pub fn key(&self) -> String {
        self.to_string()
    }

    pub fn as_generation(&self) -> Option<GenerationId> {
        match self {
            Self::Generation(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Correlation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Purchase(id) => write!(f, "purchase:{id}"),
            Self::Generation(id) => write!(f, "generation:{id}"),
            Self::Referral(id) => write!(f, "referral:{id}"),
            Self::Adjustment(reference) => write!(f, "adjustment:{reference}"),
        }
    }
}

/// Parses the `label:id` form produced by `Display`.
impl FromStr for Correlation {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (label, id) = s
            .split_once(':')
            .ok_or_else(|| TypeError::InvalidId(format!("correlation without label: {s}")))?;
        match label {
            "purchase" => id.parse().map(Self::Purchase),
            "generation" => id.parse().map(Self::Generation),
            "referral" => id.parse().map(Self::Referral),
            "adjustment" if !id.is_empty() => Ok(Self::Adjustment(id.to_string())),
            _ => Err(TypeError::InvalidId(format!("unknown correlation: {s}"))),
        }
    }
}
