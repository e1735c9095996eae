use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use inkpost_types::{
    AccountId, Correlation, EntryId, EntryKind, EntryReason, Money, OrderId, PlanId,
    ReferralCode, ReferralId, SoftDeleted, TenantId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LedgerError;

/// Domain tag prepended to every entry hash.
const ENTRY_HASH_DOMAIN: &[u8] = b"inkpost-entry-v1:";

/// Per-account credit counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account: AccountId,
    pub tenant: TenantId,
    /// Spendable credits.
    pub credits_remaining: u64,
    /// Lifetime credits granted. Never decreases.
    pub credits_total: u64,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl AccountBalance {
    pub fn open(tenant: TenantId, account: AccountId, now: DateTime<Utc>) -> Self {
        Self {
            account,
            tenant,
            credits_remaining: 0,
            credits_total: 0,
            opened_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

impl SoftDeleted for AccountBalance {
    fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }
}

/// Immutable journal row recording exactly one balance mutation.
///
/// Entries of one account form a hash chain: `seq` starts at 1 and
/// increases by one, `prev_hash` is the previous entry's `entry_hash`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub account: AccountId,
    pub tenant: TenantId,
    pub seq: u64,
    pub kind: EntryKind,
    pub reason: EntryReason,
    /// Signed delta applied to `credits_remaining`.
    pub amount: i64,
    pub balance_before: u64,
    pub balance_after: u64,
    pub correlation: Option<Correlation>,
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub prev_hash: Option<[u8; 32]>,
    pub entry_hash: [u8; 32],
}

impl LedgerEntry {
    /// Recompute the content hash with `entry_hash` zeroed.
    pub fn compute_hash(&self) -> Result<[u8; 32], LedgerError> {
        let mut canonical = self.clone();
        canonical.entry_hash = [0; 32];
        let encoded = serde_json::to_vec(&canonical)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(ENTRY_HASH_DOMAIN);
        hasher.update(&encoded);
        Ok(*hasher.finalize().as_bytes())
    }

    /// `balance_after == balance_before + amount`, without overflow.
    pub fn arithmetic_holds(&self) -> bool {
        i128::from(self.balance_before) + i128::from(self.amount)
            == i128::from(self.balance_after)
    }

    /// Absolute size of the mutation.
    pub fn magnitude(&self) -> u64 {
        self.amount.unsigned_abs()
    }

    pub fn short_hash(&self) -> String {
        hex::encode(&self.entry_hash[..4])
    }
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {:+} ({}) {} -> {}",
            self.seq, self.kind, self.amount, self.reason, self.balance_before, self.balance_after
        )
    }
}

/// Metadata attached to an entry after it was written (e.g. generation
/// output length). The entry itself is never modified.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryAnnotation {
    pub entry: EntryId,
    pub metadata: BTreeMap<String, Value>,
    pub recorded_at: DateTime<Utc>,
}

/// Lifecycle of a purchase order. `Completed` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Completed,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Created)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One external payment attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: OrderId,
    pub tenant: TenantId,
    pub account: AccountId,
    pub plan: PlanId,
    pub price: Money,
    pub credits_to_grant: u64,
    pub status: OrderStatus,
    /// Order handle issued by the payment processor. Unique per order.
    pub processor_handle: Option<String>,
    pub capture_id: Option<String>,
    pub payer: Option<String>,
    pub failure_reason: Option<String>,
    /// Set while a capture call to the processor is outstanding.
    #[serde(default)]
    pub capture_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PurchaseOrder {
    /// A fresh order in the `Created` state.
    pub fn new(
        tenant: TenantId,
        account: AccountId,
        plan: PlanId,
        price: Money,
        credits_to_grant: u64,
    ) -> Self {
        Self {
            id: OrderId::new(),
            tenant,
            account,
            plan,
            price,
            credits_to_grant,
            status: OrderStatus::Created,
            processor_handle: None,
            capture_id: None,
            payer: None,
            failure_reason: None,
            capture_started_at: None,
            created_at: Utc::now(),
            completed_at: None,
            deleted_at: None,
        }
    }
}

impl SoftDeleted for PurchaseOrder {
    fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}

/// Processor-confirmed capture details used to settle an order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseSettlement {
    pub order: OrderId,
    pub capture_id: String,
    pub captured: Option<Money>,
    pub payer: Option<String>,
}

/// Record of a plan a user bought, appended when an order completes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanHistoryRecord {
    pub account: AccountId,
    pub tenant: TenantId,
    pub plan: PlanId,
    pub order: OrderId,
    pub credits: u64,
    pub price: Money,
    pub purchased_at: DateTime<Utc>,
}

/// Everything `apply_purchase` changed, returned as one unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurchaseApplied {
    pub order: PurchaseOrder,
    pub entry: LedgerEntry,
    pub history: PlanHistoryRecord,
    pub balance: AccountBalance,
}

/// Request to credit both sides of a referral.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferralGrant {
    pub tenant: TenantId,
    pub referrer: AccountId,
    pub referee: AccountId,
    pub code: ReferralCode,
    pub referrer_credits: u64,
    pub referee_credits: u64,
}

/// One successful referral. At most one exists per referee.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralRecord {
    pub id: ReferralId,
    pub tenant: TenantId,
    pub referrer: AccountId,
    pub referee: AccountId,
    pub code: ReferralCode,
    pub referrer_credits: u64,
    pub referee_credits: u64,
    pub completed_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SoftDeleted for ReferralRecord {
    fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}

/// Everything `apply_referral` changed, returned as one unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferralApplied {
    pub record: ReferralRecord,
    pub referrer_entry: LedgerEntry,
    pub referee_entry: LedgerEntry,
}
