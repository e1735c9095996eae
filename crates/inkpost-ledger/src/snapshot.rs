use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::records::{
    AccountBalance, EntryAnnotation, LedgerEntry, PlanHistoryRecord, PurchaseOrder,
    ReferralRecord,
};

/// Portable export of every record a ledger holds.
///
/// Operators verify and reconcile snapshots offline; see
/// [`crate::JournalValidator`] and [`crate::Reconciler`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalSnapshot {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub balances: Vec<AccountBalance>,
    pub entries: Vec<LedgerEntry>,
    #[serde(default)]
    pub annotations: Vec<EntryAnnotation>,
    #[serde(default)]
    pub orders: Vec<PurchaseOrder>,
    #[serde(default)]
    pub plan_history: Vec<PlanHistoryRecord>,
    #[serde(default)]
    pub referrals: Vec<ReferralRecord>,
}

impl JournalSnapshot {
    pub const VERSION: u32 = 1;

    pub fn to_json(&self) -> Result<String, LedgerError> {
        serde_json::to_string_pretty(self).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, LedgerError> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        if snapshot.version != Self::VERSION {
            return Err(LedgerError::Serialization(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }

    pub fn write_to(&self, path: &Path) -> Result<(), LedgerError> {
        let json = self.to_json()?;
        fs::write(path, json).map_err(|e| LedgerError::Io(format!("{}: {e}", path.display())))
    }

    pub fn read_from(path: &Path) -> Result<Self, LedgerError> {
        let json = fs::read_to_string(path)
            .map_err(|e| LedgerError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }
}
