use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use inkpost_types::{AccountId, Correlation, EntryId, OrderId, Scope, TenantId};
use serde_json::Value;

use crate::error::LedgerError;
use crate::records::{
    AccountBalance, EntryAnnotation, LedgerEntry, PlanHistoryRecord, PurchaseApplied,
    PurchaseOrder, PurchaseSettlement, ReferralApplied, ReferralGrant, ReferralRecord,
};

/// Write boundary for balance mutations.
///
/// Every method is one atomic step: the balance change and its journal
/// entry are committed together or not at all. Calls against the same
/// account are linearizable. Implementations must never block on external
/// I/O inside a call.
pub trait LedgerWriter: Send + Sync {
    /// Create a zero balance for `account`. Idempotent.
    fn open_account(
        &self,
        tenant: &TenantId,
        account: AccountId,
    ) -> Result<AccountBalance, LedgerError>;

    /// Soft-delete an account. Its journal stays readable; further
    /// mutations fail with [`LedgerError::AccountClosed`].
    fn close_account(
        &self,
        tenant: &TenantId,
        account: AccountId,
    ) -> Result<AccountBalance, LedgerError>;

    /// Grant purchased credits and complete the settled order in the same
    /// step. Fails with [`LedgerError::InsufficientPrecondition`] unless the
    /// order is `Created`, owned by `account`, and grants `credits`.
    fn apply_purchase(
        &self,
        tenant: &TenantId,
        account: AccountId,
        credits: u64,
        settlement: &PurchaseSettlement,
    ) -> Result<PurchaseApplied, LedgerError>;

    /// Debit spendable credits for one paid action.
    fn apply_consumption(
        &self,
        tenant: &TenantId,
        account: AccountId,
        amount: u64,
        correlation: &Correlation,
    ) -> Result<LedgerEntry, LedgerError>;

    /// Return credits taken by an earlier debit with the same correlation.
    /// Does not raise the lifetime total.
    fn apply_refund(
        &self,
        tenant: &TenantId,
        account: AccountId,
        amount: u64,
        correlation: &Correlation,
        cause: &str,
    ) -> Result<LedgerEntry, LedgerError>;

    /// Create the referral record and credit both parties.
    fn apply_referral(&self, grant: &ReferralGrant) -> Result<ReferralApplied, LedgerError>;

    /// Operator correction. Positive deltas grant credits, negative deltas
    /// remove spendable credits but never below zero.
    fn apply_adjustment(
        &self,
        tenant: &TenantId,
        account: AccountId,
        delta: i64,
        reference: &str,
        note: &str,
    ) -> Result<LedgerEntry, LedgerError>;

    /// Attach metadata to an existing debit entry.
    fn annotate(
        &self,
        entry: EntryId,
        metadata: BTreeMap<String, Value>,
    ) -> Result<EntryAnnotation, LedgerError>;
}

/// Read boundary for balances, journal queries, and referral lookups.
pub trait LedgerReader: Send + Sync {
    fn balance(
        &self,
        scope: &Scope,
        account: AccountId,
    ) -> Result<Option<AccountBalance>, LedgerError>;

    /// Journal of one account in `seq` order.
    fn entries_for_account(&self, account: AccountId) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Entries sharing a correlation, across accounts, in creation order.
    fn entries_for_correlation(
        &self,
        correlation: &Correlation,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Entries created in `[from, to)`, optionally restricted to one account.
    fn entries_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        account: Option<AccountId>,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;

    fn get_entry(&self, id: EntryId) -> Result<Option<LedgerEntry>, LedgerError>;

    fn annotations(&self, entry: EntryId) -> Result<Vec<EntryAnnotation>, LedgerError>;

    /// All accounts with a balance row, sorted.
    fn accounts(&self) -> Result<Vec<AccountId>, LedgerError>;

    fn entry_count(&self, account: AccountId) -> Result<u64, LedgerError>;

    fn referral_for_referee(
        &self,
        scope: &Scope,
        referee: AccountId,
    ) -> Result<Option<ReferralRecord>, LedgerError>;

    fn plan_history(&self, account: AccountId) -> Result<Vec<PlanHistoryRecord>, LedgerError>;
}

/// Purchase order lifecycle outside the crediting step.
pub trait OrderBook: Send + Sync {
    /// Store a new order in the `Created` state.
    fn register_order(&self, order: &PurchaseOrder) -> Result<(), LedgerError>;

    /// Record the processor's order handle for a `Created` order.
    fn attach_processor_handle(
        &self,
        order: OrderId,
        handle: &str,
    ) -> Result<PurchaseOrder, LedgerError>;

    /// Mark a `Created` order as being captured. Fails with
    /// [`LedgerError::CaptureInProgress`] while another capture holds a
    /// claim younger than `lease`; an older claim is taken over.
    fn claim_capture(&self, order: OrderId, lease: Duration) -> Result<PurchaseOrder, LedgerError>;

    /// Drop the capture claim so the order can be captured again.
    fn release_capture(&self, order: OrderId) -> Result<PurchaseOrder, LedgerError>;

    /// Transition a `Created` order to `Failed`.
    fn fail_order(&self, order: OrderId, reason: &str) -> Result<PurchaseOrder, LedgerError>;

    fn order(&self, scope: &Scope, order: OrderId) -> Result<Option<PurchaseOrder>, LedgerError>;

    fn order_by_handle(
        &self,
        scope: &Scope,
        handle: &str,
    ) -> Result<Option<PurchaseOrder>, LedgerError>;
}
