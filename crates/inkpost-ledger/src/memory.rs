//! In-memory ledger: balances, journals, orders, and referrals behind one lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use inkpost_types::{
    AccountId, Correlation, EntryId, EntryKind, EntryReason, OrderId, ReferralId, Scope,
    TenantId,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::records::{
    AccountBalance, EntryAnnotation, LedgerEntry, OrderStatus, PlanHistoryRecord,
    PurchaseApplied, PurchaseOrder, PurchaseSettlement, ReferralApplied, ReferralGrant,
    ReferralRecord,
};
use crate::snapshot::JournalSnapshot;
use crate::traits::{LedgerReader, LedgerWriter, OrderBook};

/// In-memory credit ledger for tests, local demos, and embedding.
///
/// Balances, the journal, purchase orders, plan history, and referral
/// records share one `RwLock`. Every write method takes the write guard
/// once, stages all changes against the current state, and commits them
/// only after every check has passed, so a failed call leaves no trace.
pub struct InMemoryLedger {
    inner: RwLock<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<AccountId, AccountBalance>,
    journals: HashMap<AccountId, Vec<LedgerEntry>>,
    entry_index: HashMap<EntryId, (AccountId, usize)>,
    correlation_index: HashMap<String, Vec<EntryId>>,
    annotations: HashMap<EntryId, Vec<EntryAnnotation>>,
    orders: HashMap<OrderId, PurchaseOrder>,
    handle_index: HashMap<String, OrderId>,
    plan_history: HashMap<AccountId, Vec<PlanHistoryRecord>>,
    referrals: HashMap<ReferralId, ReferralRecord>,
    referee_index: HashMap<AccountId, ReferralId>,
}

/// A balance mutation to be staged against the current state.
struct Mutation<'a> {
    kind: EntryKind,
    reason: EntryReason,
    amount: i64,
    correlation: Option<&'a Correlation>,
    metadata: BTreeMap<String, Value>,
}

/// An entry and the balance it produces, computed but not yet committed.
struct Staged {
    entry: LedgerEntry,
    balance: AccountBalance,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(LedgerState::default()),
        }
    }

    /// Rebuild a ledger from an exported snapshot.
    ///
    /// The snapshot is loaded as-is so that offline validation can report
    /// whatever it contains; nothing is re-hashed or corrected.
    pub fn from_snapshot(snapshot: JournalSnapshot) -> Result<Self, LedgerError> {
        let mut state = LedgerState::default();

        for balance in snapshot.balances {
            state.balances.insert(balance.account, balance);
        }

        let mut entries = snapshot.entries;
        entries.sort_by(|a, b| (a.account, a.seq).cmp(&(b.account, b.seq)));
        for entry in entries {
            state.index_entry(entry);
        }

        for annotation in snapshot.annotations {
            state
                .annotations
                .entry(annotation.entry)
                .or_default()
                .push(annotation);
        }
        for order in snapshot.orders {
            if let Some(handle) = &order.processor_handle {
                state.handle_index.insert(handle.clone(), order.id);
            }
            state.orders.insert(order.id, order);
        }
        for record in snapshot.plan_history {
            state
                .plan_history
                .entry(record.account)
                .or_default()
                .push(record);
        }
        for record in snapshot.referrals {
            state.referee_index.insert(record.referee, record.id);
            state.referrals.insert(record.id, record);
        }

        Ok(Self {
            inner: RwLock::new(state),
        })
    }

    /// Export every record held by the ledger.
    pub fn export_snapshot(&self) -> Result<JournalSnapshot, LedgerError> {
        let state = self.read_state()?;

        let mut balances: Vec<_> = state.balances.values().cloned().collect();
        balances.sort_by_key(|b| b.account);

        let mut entries: Vec<_> = state.journals.values().flatten().cloned().collect();
        entries.sort_by(|a, b| (a.account, a.seq).cmp(&(b.account, b.seq)));

        let mut annotations: Vec<_> = state.annotations.values().flatten().cloned().collect();
        annotations.sort_by_key(|a| (a.entry, a.recorded_at));

        let mut orders: Vec<_> = state.orders.values().cloned().collect();
        orders.sort_by_key(|o| o.id);

        let mut plan_history: Vec<_> = state.plan_history.values().flatten().cloned().collect();
        plan_history.sort_by_key(|h| (h.account, h.purchased_at));

        let mut referrals: Vec<_> = state.referrals.values().cloned().collect();
        referrals.sort_by_key(|r| r.id);

        Ok(JournalSnapshot {
            version: JournalSnapshot::VERSION,
            exported_at: Utc::now(),
            balances,
            entries,
            annotations,
            orders,
            plan_history,
            referrals,
        })
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, LedgerState>, LedgerError> {
        self.inner.read().map_err(|_| LedgerError::poisoned("read"))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, LedgerState>, LedgerError> {
        self.inner.write().map_err(|_| LedgerError::poisoned("write"))
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerState {
    /// An order that can still be captured.
    fn open_order(&self, order: OrderId) -> Result<&PurchaseOrder, LedgerError> {
        let current = self
            .orders
            .get(&order)
            .ok_or(LedgerError::OrderNotFound(order))?;
        match current.status {
            OrderStatus::Created => Ok(current),
            OrderStatus::Completed => Err(LedgerError::AlreadyCompleted(order)),
            OrderStatus::Failed => Err(LedgerError::InsufficientPrecondition(format!(
                "order {order} has failed"
            ))),
        }
    }

    /// Current balance of an account that may be mutated under `tenant`.
    ///
    /// Accounts of another tenant are reported as missing. Unknown accounts
    /// are opened on the fly when `open_missing` is set.
    fn writable_balance(
        &self,
        tenant: &TenantId,
        account: AccountId,
        now: DateTime<Utc>,
        open_missing: bool,
    ) -> Result<AccountBalance, LedgerError> {
        match self.balances.get(&account) {
            Some(balance) if balance.tenant != *tenant => Err(LedgerError::AccountNotFound(account)),
            Some(balance) if balance.is_closed() => Err(LedgerError::AccountClosed(account)),
            Some(balance) => Ok(balance.clone()),
            None if open_missing => Ok(AccountBalance::open(tenant.clone(), account, now)),
            None => Err(LedgerError::AccountNotFound(account)),
        }
    }

    fn stage(
        &self,
        balance: AccountBalance,
        mutation: Mutation<'_>,
        now: DateTime<Utc>,
    ) -> Result<Staged, LedgerError> {
        let account = balance.account;
        let journal = self.journals.get(&account);
        let seq = journal.map_or(1, |j| j.len() as u64 + 1);
        let last = journal.and_then(|j| j.last());

        if mutation.amount == 0 {
            return Err(LedgerError::InvalidAmount("mutation amount must be non-zero".into()));
        }
        if !mutation.reason.permits(mutation.kind)
            || (mutation.kind == EntryKind::Debit) != (mutation.amount < 0)
        {
            return Err(LedgerError::IntegrityViolation {
                seq,
                reason: format!(
                    "{} entry with reason {} cannot carry amount {}",
                    mutation.kind, mutation.reason, mutation.amount
                ),
            });
        }
        if let Some(last) = last {
            if last.balance_after != balance.credits_remaining {
                return Err(LedgerError::IntegrityViolation {
                    seq,
                    reason: format!(
                        "journal head shows {} credits but balance holds {}",
                        last.balance_after, balance.credits_remaining
                    ),
                });
            }
        }

        let before = balance.credits_remaining;
        let magnitude = mutation.amount.unsigned_abs();
        let mut next = balance;
        if mutation.amount > 0 {
            next.credits_remaining = before
                .checked_add(magnitude)
                .ok_or(LedgerError::Overflow(account))?;
            if mutation.kind.grows_total() {
                next.credits_total = next
                    .credits_total
                    .checked_add(magnitude)
                    .ok_or(LedgerError::Overflow(account))?;
            }
        } else {
            next.credits_remaining =
                before
                    .checked_sub(magnitude)
                    .ok_or(LedgerError::InsufficientBalance {
                        account,
                        available: before,
                        requested: magnitude,
                    })?;
        }
        if next.credits_remaining > next.credits_total {
            return Err(LedgerError::IntegrityViolation {
                seq,
                reason: format!(
                    "remaining credits {} would exceed lifetime total {}",
                    next.credits_remaining, next.credits_total
                ),
            });
        }
        next.updated_at = now;

        let mut entry = LedgerEntry {
            id: EntryId::new(),
            account,
            tenant: next.tenant.clone(),
            seq,
            kind: mutation.kind,
            reason: mutation.reason,
            amount: mutation.amount,
            balance_before: before,
            balance_after: next.credits_remaining,
            correlation: mutation.correlation.cloned(),
            metadata: mutation.metadata,
            created_at: now,
            prev_hash: last.map(|e| e.entry_hash),
            entry_hash: [0; 32],
        };
        entry.entry_hash = entry.compute_hash()?;

        Ok(Staged {
            entry,
            balance: next,
        })
    }

    /// Apply a staged mutation. Infallible: all checks ran in `stage`.
    fn commit(&mut self, staged: Staged) -> LedgerEntry {
        let Staged { entry, balance } = staged;
        debug!(
            account = %entry.account,
            seq = entry.seq,
            kind = %entry.kind,
            reason = %entry.reason,
            amount = entry.amount,
            balance = entry.balance_after,
            "journal append"
        );
        self.balances.insert(balance.account, balance);
        self.index_entry(entry.clone());
        entry
    }

    fn index_entry(&mut self, entry: LedgerEntry) {
        let id = entry.id;
        let account = entry.account;
        if let Some(correlation) = &entry.correlation {
            self.correlation_index
                .entry(correlation.key())
                .or_default()
                .push(id);
        }
        let journal = self.journals.entry(account).or_default();
        journal.push(entry);
        self.entry_index.insert(id, (account, journal.len() - 1));
    }

    fn entry(&self, id: &EntryId) -> Option<&LedgerEntry> {
        let (account, index) = self.entry_index.get(id)?;
        self.journals.get(account).and_then(|j| j.get(*index))
    }

    fn correlated(&self, correlation: &Correlation) -> impl Iterator<Item = &LedgerEntry> {
        self.correlation_index
            .get(&correlation.key())
            .into_iter()
            .flatten()
            .filter_map(|id| self.entry(id))
    }

    /// Credits debited for `correlation` on `account` that have not been
    /// refunded yet.
    fn refundable(&self, account: AccountId, correlation: &Correlation) -> (u64, u64) {
        let mut debited = 0u64;
        let mut refunded = 0u64;
        for entry in self.correlated(correlation).filter(|e| e.account == account) {
            match (entry.kind, entry.reason) {
                (EntryKind::Debit, EntryReason::GenerationUse) => debited += entry.magnitude(),
                (EntryKind::Refund, _) => refunded += entry.magnitude(),
                _ => {}
            }
        }
        (debited, refunded)
    }
}

fn signed(amount: u64) -> Result<i64, LedgerError> {
    i64::try_from(amount)
        .map_err(|_| LedgerError::InvalidAmount(format!("{amount} exceeds the entry range")))
}

impl LedgerWriter for InMemoryLedger {
    fn open_account(
        &self,
        tenant: &TenantId,
        account: AccountId,
    ) -> Result<AccountBalance, LedgerError> {
        let mut state = self.write_state()?;
        let balance = state.writable_balance(tenant, account, Utc::now(), true)?;
        state.balances.entry(account).or_insert(balance.clone());
        Ok(balance)
    }

    fn close_account(
        &self,
        tenant: &TenantId,
        account: AccountId,
    ) -> Result<AccountBalance, LedgerError> {
        let mut state = self.write_state()?;
        let now = Utc::now();
        let mut balance = state.writable_balance(tenant, account, now, false)?;
        balance.closed_at = Some(now);
        balance.updated_at = now;
        state.balances.insert(account, balance.clone());
        info!(account = %account, tenant = %tenant, "account closed");
        Ok(balance)
    }

    fn apply_purchase(
        &self,
        tenant: &TenantId,
        account: AccountId,
        credits: u64,
        settlement: &PurchaseSettlement,
    ) -> Result<PurchaseApplied, LedgerError> {
        let mut state = self.write_state()?;
        let now = Utc::now();

        let order = state
            .orders
            .get(&settlement.order)
            .cloned()
            .ok_or(LedgerError::OrderNotFound(settlement.order))?;
        if order.tenant != *tenant || order.account != account || order.deleted_at.is_some() {
            return Err(LedgerError::InsufficientPrecondition(format!(
                "order {} does not belong to account {account}",
                order.id
            )));
        }
        match order.status {
            OrderStatus::Created => {}
            OrderStatus::Completed => return Err(LedgerError::AlreadyCompleted(order.id)),
            OrderStatus::Failed => {
                return Err(LedgerError::InsufficientPrecondition(format!(
                    "order {} has failed and cannot be credited",
                    order.id
                )))
            }
        }
        if credits != order.credits_to_grant {
            return Err(LedgerError::InsufficientPrecondition(format!(
                "order {} grants {} credits, not {credits}",
                order.id, order.credits_to_grant
            )));
        }

        let correlation = Correlation::Purchase(order.id);
        let mut metadata = BTreeMap::new();
        metadata.insert("plan".to_string(), Value::from(order.plan.as_str()));
        metadata.insert("capture_id".to_string(), Value::from(settlement.capture_id.as_str()));
        if let Some(payer) = &settlement.payer {
            metadata.insert("payer".to_string(), Value::from(payer.as_str()));
        }

        let balance = state.writable_balance(tenant, account, now, true)?;
        let staged = state.stage(
            balance,
            Mutation {
                kind: EntryKind::Credit,
                reason: EntryReason::PlanPurchase,
                amount: signed(credits)?,
                correlation: Some(&correlation),
                metadata,
            },
            now,
        )?;

        let mut completed = order;
        completed.status = OrderStatus::Completed;
        completed.capture_id = Some(settlement.capture_id.clone());
        completed.payer = settlement.payer.clone();
        completed.completed_at = Some(now);
        completed.capture_started_at = None;

        let history = PlanHistoryRecord {
            account,
            tenant: tenant.clone(),
            plan: completed.plan.clone(),
            order: completed.id,
            credits,
            price: completed.price.clone(),
            purchased_at: now,
        };

        let balance = staged.balance.clone();
        let entry = state.commit(staged);
        state.orders.insert(completed.id, completed.clone());
        state
            .plan_history
            .entry(account)
            .or_default()
            .push(history.clone());

        info!(
            account = %account,
            order = %completed.id,
            credits,
            balance = balance.credits_remaining,
            "purchase credited"
        );

        Ok(PurchaseApplied {
            order: completed,
            entry,
            history,
            balance,
        })
    }

    fn apply_consumption(
        &self,
        tenant: &TenantId,
        account: AccountId,
        amount: u64,
        correlation: &Correlation,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut state = self.write_state()?;
        let now = Utc::now();

        let balance = match state.writable_balance(tenant, account, now, false) {
            Err(LedgerError::AccountNotFound(_)) if !state.balances.contains_key(&account) => {
                return Err(LedgerError::InsufficientBalance {
                    account,
                    available: 0,
                    requested: amount,
                })
            }
            other => other?,
        };
        if state.refundable(account, correlation).0 > 0 {
            return Err(LedgerError::InsufficientPrecondition(format!(
                "{correlation} has already been debited"
            )));
        }

        let staged = state.stage(
            balance,
            Mutation {
                kind: EntryKind::Debit,
                reason: EntryReason::GenerationUse,
                amount: -signed(amount)?,
                correlation: Some(correlation),
                metadata: BTreeMap::new(),
            },
            now,
        )?;
        Ok(state.commit(staged))
    }

    fn apply_refund(
        &self,
        tenant: &TenantId,
        account: AccountId,
        amount: u64,
        correlation: &Correlation,
        cause: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut state = self.write_state()?;
        let now = Utc::now();

        let (debited, refunded) = state.refundable(account, correlation);
        let outstanding = debited.saturating_sub(refunded);
        if amount > outstanding {
            return Err(LedgerError::InsufficientPrecondition(format!(
                "{correlation} has {outstanding} refundable credits, {amount} requested"
            )));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("cause".to_string(), Value::from(cause));

        let balance = state.writable_balance(tenant, account, now, false)?;
        let staged = state.stage(
            balance,
            Mutation {
                kind: EntryKind::Refund,
                reason: EntryReason::Refund,
                amount: signed(amount)?,
                correlation: Some(correlation),
                metadata,
            },
            now,
        )?;
        Ok(state.commit(staged))
    }

    fn apply_referral(&self, grant: &ReferralGrant) -> Result<ReferralApplied, LedgerError> {
        let mut state = self.write_state()?;
        let now = Utc::now();

        if grant.referrer == grant.referee {
            return Err(LedgerError::SelfReferral(grant.referee));
        }
        if state.referee_index.contains_key(&grant.referee) {
            return Err(LedgerError::DuplicateReferral(grant.referee));
        }

        let record = ReferralRecord {
            id: ReferralId::new(),
            tenant: grant.tenant.clone(),
            referrer: grant.referrer,
            referee: grant.referee,
            code: grant.code.clone(),
            referrer_credits: grant.referrer_credits,
            referee_credits: grant.referee_credits,
            completed_at: now,
            deleted_at: None,
        };
        let correlation = Correlation::Referral(record.id);
        let code_metadata = || {
            let mut metadata = BTreeMap::new();
            metadata.insert("code".to_string(), Value::from(grant.code.as_str()));
            metadata
        };

        let referrer_balance = state.writable_balance(&grant.tenant, grant.referrer, now, true)?;
        let referee_balance = state.writable_balance(&grant.tenant, grant.referee, now, true)?;
        let referrer_staged = state.stage(
            referrer_balance,
            Mutation {
                kind: EntryKind::Credit,
                reason: EntryReason::ReferralReward,
                amount: signed(grant.referrer_credits)?,
                correlation: Some(&correlation),
                metadata: code_metadata(),
            },
            now,
        )?;
        let referee_staged = state.stage(
            referee_balance,
            Mutation {
                kind: EntryKind::Credit,
                reason: EntryReason::ReferralSignup,
                amount: signed(grant.referee_credits)?,
                correlation: Some(&correlation),
                metadata: code_metadata(),
            },
            now,
        )?;

        let referrer_entry = state.commit(referrer_staged);
        let referee_entry = state.commit(referee_staged);
        state.referee_index.insert(record.referee, record.id);
        state.referrals.insert(record.id, record.clone());

        info!(
            referral = %record.id,
            referrer = %record.referrer,
            referee = %record.referee,
            "referral credited"
        );

        Ok(ReferralApplied {
            record,
            referrer_entry,
            referee_entry,
        })
    }

    fn apply_adjustment(
        &self,
        tenant: &TenantId,
        account: AccountId,
        delta: i64,
        reference: &str,
        note: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut state = self.write_state()?;
        let now = Utc::now();

        let correlation = Correlation::Adjustment(reference.to_string());
        let mut metadata = BTreeMap::new();
        metadata.insert("note".to_string(), Value::from(note));

        let balance = state.writable_balance(tenant, account, now, delta > 0)?;
        let kind = if delta < 0 {
            EntryKind::Debit
        } else {
            EntryKind::Credit
        };
        let staged = state.stage(
            balance,
            Mutation {
                kind,
                reason: EntryReason::AdminAdjustment,
                amount: delta,
                correlation: Some(&correlation),
                metadata,
            },
            now,
        )?;
        let entry = state.commit(staged);
        info!(account = %account, delta, reference, "admin adjustment applied");
        Ok(entry)
    }

    fn annotate(
        &self,
        entry: EntryId,
        metadata: BTreeMap<String, Value>,
    ) -> Result<EntryAnnotation, LedgerError> {
        let mut state = self.write_state()?;

        let target = state.entry(&entry).ok_or(LedgerError::EntryNotFound(entry))?;
        if target.kind != EntryKind::Debit || target.reason != EntryReason::GenerationUse {
            return Err(LedgerError::InsufficientPrecondition(format!(
                "only generation debits can be annotated, entry {entry} is a {} ({})",
                target.kind, target.reason
            )));
        }

        let annotation = EntryAnnotation {
            entry,
            metadata,
            recorded_at: Utc::now(),
        };
        state
            .annotations
            .entry(entry)
            .or_default()
            .push(annotation.clone());
        Ok(annotation)
    }
}

impl LedgerReader for InMemoryLedger {
    fn balance(
        &self,
        scope: &Scope,
        account: AccountId,
    ) -> Result<Option<AccountBalance>, LedgerError> {
        let state = self.read_state()?;
        Ok(state
            .balances
            .get(&account)
            .filter(|b| scope.admits(*b))
            .cloned())
    }

    fn entries_for_account(&self, account: AccountId) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.read_state()?;
        Ok(state.journals.get(&account).cloned().unwrap_or_default())
    }

    fn entries_for_correlation(
        &self,
        correlation: &Correlation,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.read_state()?;
        Ok(state.correlated(correlation).cloned().collect())
    }

    fn entries_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        account: Option<AccountId>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        if from > to {
            return Err(LedgerError::InvalidRange(format!("{from} is after {to}")));
        }

        let state = self.read_state()?;
        let in_range = |e: &&LedgerEntry| e.created_at >= from && e.created_at < to;
        let mut entries: Vec<_> = match account {
            Some(account) => state
                .journals
                .get(&account)
                .into_iter()
                .flatten()
                .filter(in_range)
                .cloned()
                .collect(),
            None => state
                .journals
                .values()
                .flatten()
                .filter(in_range)
                .cloned()
                .collect(),
        };
        entries.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(entries)
    }

    fn get_entry(&self, id: EntryId) -> Result<Option<LedgerEntry>, LedgerError> {
        let state = self.read_state()?;
        Ok(state.entry(&id).cloned())
    }

    fn annotations(&self, entry: EntryId) -> Result<Vec<EntryAnnotation>, LedgerError> {
        let state = self.read_state()?;
        Ok(state.annotations.get(&entry).cloned().unwrap_or_default())
    }

    fn accounts(&self) -> Result<Vec<AccountId>, LedgerError> {
        let state = self.read_state()?;
        let mut ids: Vec<_> = state
            .balances
            .keys()
            .chain(state.journals.keys())
            .copied()
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn entry_count(&self, account: AccountId) -> Result<u64, LedgerError> {
        let state = self.read_state()?;
        Ok(state.journals.get(&account).map_or(0, |j| j.len() as u64))
    }

    fn referral_for_referee(
        &self,
        scope: &Scope,
        referee: AccountId,
    ) -> Result<Option<ReferralRecord>, LedgerError> {
        let state = self.read_state()?;
        Ok(state
            .referee_index
            .get(&referee)
            .and_then(|id| state.referrals.get(id))
            .filter(|r| scope.admits(*r))
            .cloned())
    }

    fn plan_history(&self, account: AccountId) -> Result<Vec<PlanHistoryRecord>, LedgerError> {
        let state = self.read_state()?;
        Ok(state.plan_history.get(&account).cloned().unwrap_or_default())
    }
}

impl OrderBook for InMemoryLedger {
    fn register_order(&self, order: &PurchaseOrder) -> Result<(), LedgerError> {
        if order.status != OrderStatus::Created {
            return Err(LedgerError::InsufficientPrecondition(format!(
                "new order {} must be in state created, found {}",
                order.id, order.status
            )));
        }

        let mut state = self.write_state()?;
        if state.orders.contains_key(&order.id) {
            return Err(LedgerError::DuplicateOrder(order.id));
        }
        if let Some(handle) = &order.processor_handle {
            if state.handle_index.contains_key(handle) {
                return Err(LedgerError::DuplicateOrder(order.id));
            }
            state.handle_index.insert(handle.clone(), order.id);
        }
        state.orders.insert(order.id, order.clone());
        debug!(order = %order.id, account = %order.account, plan = %order.plan, "order registered");
        Ok(())
    }

    fn attach_processor_handle(
        &self,
        order: OrderId,
        handle: &str,
    ) -> Result<PurchaseOrder, LedgerError> {
        let mut state = self.write_state()?;
        if let Some(existing) = state.handle_index.get(handle) {
            if *existing != order {
                return Err(LedgerError::DuplicateOrder(order));
            }
        }

        let current = state
            .orders
            .get(&order)
            .ok_or(LedgerError::OrderNotFound(order))?;
        match current.status {
            OrderStatus::Created => {}
            OrderStatus::Completed => return Err(LedgerError::AlreadyCompleted(order)),
            OrderStatus::Failed => {
                return Err(LedgerError::InsufficientPrecondition(format!(
                    "order {order} has failed"
                )))
            }
        }
        if let Some(previous) = &current.processor_handle {
            if previous != handle {
                return Err(LedgerError::InsufficientPrecondition(format!(
                    "order {order} already carries processor handle {previous}"
                )));
            }
        }

        let mut updated = current.clone();
        updated.processor_handle = Some(handle.to_string());
        state.handle_index.insert(handle.to_string(), order);
        state.orders.insert(order, updated.clone());
        Ok(updated)
    }

    fn claim_capture(&self, order: OrderId, lease: Duration) -> Result<PurchaseOrder, LedgerError> {
        let mut state = self.write_state()?;
        let current = state.open_order(order)?;
        let now = Utc::now();
        if let Some(started) = current.capture_started_at {
            if started.checked_add_signed(lease).map_or(true, |expiry| now < expiry) {
                return Err(LedgerError::CaptureInProgress(order));
            }
            debug!(order = %order, started = %started, "stale capture claim taken over");
        }

        let mut updated = current.clone();
        updated.capture_started_at = Some(now);
        state.orders.insert(order, updated.clone());
        Ok(updated)
    }

    fn release_capture(&self, order: OrderId) -> Result<PurchaseOrder, LedgerError> {
        let mut state = self.write_state()?;
        let mut updated = state.open_order(order)?.clone();
        updated.capture_started_at = None;
        state.orders.insert(order, updated.clone());
        Ok(updated)
    }

    fn fail_order(&self, order: OrderId, reason: &str) -> Result<PurchaseOrder, LedgerError> {
        let mut state = self.write_state()?;
        let current = state
            .orders
            .get(&order)
            .ok_or(LedgerError::OrderNotFound(order))?;
        match current.status {
            OrderStatus::Created => {}
            OrderStatus::Completed => return Err(LedgerError::AlreadyCompleted(order)),
            OrderStatus::Failed => {
                return Err(LedgerError::InsufficientPrecondition(format!(
                    "order {order} has already failed"
                )))
            }
        }

        let mut updated = current.clone();
        updated.status = OrderStatus::Failed;
        updated.failure_reason = Some(reason.to_string());
        updated.completed_at = Some(Utc::now());
        updated.capture_started_at = None;
        state.orders.insert(order, updated.clone());
        Ok(updated)
    }

    fn order(&self, scope: &Scope, order: OrderId) -> Result<Option<PurchaseOrder>, LedgerError> {
        let state = self.read_state()?;
        Ok(state
            .orders
            .get(&order)
            .filter(|o| scope.admits(*o))
            .cloned())
    }

    fn order_by_handle(
        &self,
        scope: &Scope,
        handle: &str,
    ) -> Result<Option<PurchaseOrder>, LedgerError> {
        let state = self.read_state()?;
        Ok(state
            .handle_index
            .get(handle)
            .and_then(|id| state.orders.get(id))
            .filter(|o| scope.admits(*o))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use inkpost_types::{GenerationId, Money, PlanId, ReferralCode};

    use super::*;

    fn tenant() -> TenantId {
        TenantId::default()
    }

    fn scope() -> Scope {
        Scope::tenant(tenant())
    }

    fn generation() -> Correlation {
        Correlation::Generation(GenerationId::new())
    }

    fn funded(credits: i64) -> (InMemoryLedger, AccountId) {
        let ledger = InMemoryLedger::default();
        let account = AccountId::new();
        ledger
            .apply_adjustment(&tenant(), account, credits, "seed", "test funding")
            .unwrap();
        (ledger, account)
    }

    fn order(account: AccountId, credits: u64) -> PurchaseOrder {
        PurchaseOrder::new(
            tenant(),
            account,
            PlanId::new("starter"),
            Money::new(1000, "USD").unwrap(),
            credits,
        )
    }

    fn settlement(order: &PurchaseOrder) -> PurchaseSettlement {
        PurchaseSettlement {
            order: order.id,
            capture_id: "CAP-1".into(),
            captured: Some(order.price.clone()),
            payer: Some("payer@example.com".into()),
        }
    }

    fn remaining(ledger: &InMemoryLedger, account: AccountId) -> u64 {
        ledger
            .balance(&scope(), account)
            .unwrap()
            .map_or(0, |b| b.credits_remaining)
    }

    #[test]
    fn consumption_debits_and_links_journal() {
        let (ledger, account) = funded(3);
        let entry = ledger
            .apply_consumption(&tenant(), account, 1, &generation())
            .unwrap();

        assert_eq!(entry.seq, 2);
        assert_eq!(entry.kind, EntryKind::Debit);
        assert_eq!(entry.reason, EntryReason::GenerationUse);
        assert_eq!(entry.amount, -1);
        assert_eq!((entry.balance_before, entry.balance_after), (3, 2));
        assert_eq!(remaining(&ledger, account), 2);

        let journal = ledger.entries_for_account(account).unwrap();
        assert_eq!(entry.prev_hash, Some(journal[0].entry_hash));
    }

    #[test]
    fn consumption_without_funds_is_rejected() {
        let (ledger, account) = funded(1);
        ledger
            .apply_consumption(&tenant(), account, 1, &generation())
            .unwrap();
        let err = ledger
            .apply_consumption(&tenant(), account, 1, &generation())
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                account,
                available: 0,
                requested: 1
            }
        );
        assert_eq!(ledger.entry_count(account).unwrap(), 2);
    }

    #[test]
    fn consumption_on_unknown_account_reports_zero_balance() {
        let ledger = InMemoryLedger::default();
        let account = AccountId::new();
        let err = ledger
            .apply_consumption(&tenant(), account, 1, &generation())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { available: 0, .. }));
    }

    #[test]
    fn same_generation_cannot_be_debited_twice() {
        let (ledger, account) = funded(5);
        let correlation = generation();
        ledger
            .apply_consumption(&tenant(), account, 1, &correlation)
            .unwrap();
        let err = ledger
            .apply_consumption(&tenant(), account, 1, &correlation)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientPrecondition(_)));
        assert_eq!(remaining(&ledger, account), 4);
    }

    #[test]
    fn refund_restores_remaining_but_not_total() {
        let (ledger, account) = funded(5);
        let correlation = generation();
        ledger
            .apply_consumption(&tenant(), account, 1, &correlation)
            .unwrap();
        let refund = ledger
            .apply_refund(&tenant(), account, 1, &correlation, "timeout")
            .unwrap();

        assert_eq!(refund.kind, EntryKind::Refund);
        assert_eq!(refund.metadata.get("cause"), Some(&Value::from("timeout")));
        let balance = ledger.balance(&scope(), account).unwrap().unwrap();
        assert_eq!(balance.credits_remaining, 5);
        assert_eq!(balance.credits_total, 5);

        let correlated = ledger.entries_for_correlation(&correlation).unwrap();
        assert_eq!(correlated.len(), 2);
    }

    #[test]
    fn refund_without_matching_debit_is_rejected() {
        let (ledger, account) = funded(5);
        let err = ledger
            .apply_refund(&tenant(), account, 1, &generation(), "spurious")
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientPrecondition(_)));

        let correlation = generation();
        ledger
            .apply_consumption(&tenant(), account, 1, &correlation)
            .unwrap();
        ledger
            .apply_refund(&tenant(), account, 1, &correlation, "failed")
            .unwrap();
        let err = ledger
            .apply_refund(&tenant(), account, 1, &correlation, "failed again")
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientPrecondition(_)));
        assert_eq!(remaining(&ledger, account), 5);
    }

    #[test]
    fn purchase_credits_completes_order_and_records_history() {
        let ledger = InMemoryLedger::default();
        let account = AccountId::new();
        let order = order(account, 100);
        ledger.register_order(&order).unwrap();

        let applied = ledger
            .apply_purchase(&tenant(), account, 100, &settlement(&order))
            .unwrap();

        assert_eq!(applied.order.status, OrderStatus::Completed);
        assert_eq!(applied.entry.reason, EntryReason::PlanPurchase);
        assert_eq!(applied.balance.credits_total, 100);
        assert_eq!(ledger.plan_history(account).unwrap().len(), 1);
        let stored = ledger.order(&scope(), order.id).unwrap().unwrap();
        assert_eq!(stored.capture_id.as_deref(), Some("CAP-1"));
    }

    #[test]
    fn second_purchase_on_same_order_is_rejected() {
        let ledger = InMemoryLedger::default();
        let account = AccountId::new();
        let order = order(account, 100);
        ledger.register_order(&order).unwrap();
        ledger
            .apply_purchase(&tenant(), account, 100, &settlement(&order))
            .unwrap();

        let err = ledger
            .apply_purchase(&tenant(), account, 100, &settlement(&order))
            .unwrap_err();
        assert_eq!(err, LedgerError::AlreadyCompleted(order.id));
        assert_eq!(ledger.entry_count(account).unwrap(), 1);
        assert_eq!(remaining(&ledger, account), 100);
    }

    #[test]
    fn purchase_precondition_failures_leave_no_trace() {
        let ledger = InMemoryLedger::default();
        let account = AccountId::new();
        let order = order(account, 100);
        ledger.register_order(&order).unwrap();

        let wrong_amount = ledger
            .apply_purchase(&tenant(), account, 200, &settlement(&order))
            .unwrap_err();
        assert!(matches!(wrong_amount, LedgerError::InsufficientPrecondition(_)));

        let stranger = ledger
            .apply_purchase(&tenant(), AccountId::new(), 100, &settlement(&order))
            .unwrap_err();
        assert!(matches!(stranger, LedgerError::InsufficientPrecondition(_)));

        ledger.fail_order(order.id, "declined").unwrap();
        let failed = ledger
            .apply_purchase(&tenant(), account, 100, &settlement(&order))
            .unwrap_err();
        assert!(matches!(failed, LedgerError::InsufficientPrecondition(_)));

        assert_eq!(ledger.entry_count(account).unwrap(), 0);
        assert!(ledger.balance(&scope(), account).unwrap().is_none());
        assert!(ledger.plan_history(account).unwrap().is_empty());
    }

    #[test]
    fn referral_credits_both_parties_once() {
        let ledger = InMemoryLedger::default();
        let referrer = AccountId::new();
        let referee = AccountId::new();
        let grant = ReferralGrant {
            tenant: tenant(),
            referrer,
            referee,
            code: ReferralCode::parse("ABCD2345").unwrap(),
            referrer_credits: 10,
            referee_credits: 5,
        };

        let applied = ledger.apply_referral(&grant).unwrap();
        assert_eq!(applied.referrer_entry.reason, EntryReason::ReferralReward);
        assert_eq!(applied.referee_entry.reason, EntryReason::ReferralSignup);
        assert_eq!(remaining(&ledger, referrer), 10);
        assert_eq!(remaining(&ledger, referee), 5);

        let err = ledger.apply_referral(&grant).unwrap_err();
        assert_eq!(err, LedgerError::DuplicateReferral(referee));
        assert_eq!(remaining(&ledger, referrer), 10);
        assert!(ledger
            .referral_for_referee(&scope(), referee)
            .unwrap()
            .is_some());
    }

    #[test]
    fn self_referral_is_rejected() {
        let ledger = InMemoryLedger::default();
        let user = AccountId::new();
        let err = ledger
            .apply_referral(&ReferralGrant {
                tenant: tenant(),
                referrer: user,
                referee: user,
                code: ReferralCode::parse("ABCD2345").unwrap(),
                referrer_credits: 10,
                referee_credits: 5,
            })
            .unwrap_err();
        assert_eq!(err, LedgerError::SelfReferral(user));
        assert_eq!(ledger.entry_count(user).unwrap(), 0);
    }

    #[test]
    fn referral_with_zero_side_rolls_back_entirely() {
        let ledger = InMemoryLedger::default();
        let referrer = AccountId::new();
        let referee = AccountId::new();
        let err = ledger
            .apply_referral(&ReferralGrant {
                tenant: tenant(),
                referrer,
                referee,
                code: ReferralCode::parse("ABCD2345").unwrap(),
                referrer_credits: 10,
                referee_credits: 0,
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
        assert_eq!(ledger.entry_count(referrer).unwrap(), 0);
        assert!(ledger
            .referral_for_referee(&scope(), referee)
            .unwrap()
            .is_none());
    }

    #[test]
    fn negative_adjustment_cannot_overdraw() {
        let (ledger, account) = funded(3);
        let err = ledger
            .apply_adjustment(&tenant(), account, -4, "T-1", "chargeback")
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        let entry = ledger
            .apply_adjustment(&tenant(), account, -3, "T-1", "chargeback")
            .unwrap();
        assert_eq!(entry.kind, EntryKind::Debit);
        let balance = ledger.balance(&scope(), account).unwrap().unwrap();
        assert_eq!(balance.credits_remaining, 0);
        assert_eq!(balance.credits_total, 3);
    }

    #[test]
    fn closed_and_foreign_accounts_reject_mutations() {
        let (ledger, account) = funded(3);
        let other = TenantId::new("other").unwrap();
        let err = ledger
            .apply_consumption(&other, account, 1, &generation())
            .unwrap_err();
        assert_eq!(err, LedgerError::AccountNotFound(account));

        ledger.close_account(&tenant(), account).unwrap();
        let err = ledger
            .apply_consumption(&tenant(), account, 1, &generation())
            .unwrap_err();
        assert_eq!(err, LedgerError::AccountClosed(account));

        assert!(ledger.balance(&scope(), account).unwrap().is_none());
        let audit = Scope::with_deleted(tenant());
        assert!(ledger.balance(&audit, account).unwrap().is_some());
    }

    #[test]
    fn annotate_only_targets_generation_debits() {
        let (ledger, account) = funded(3);
        let debit = ledger
            .apply_consumption(&tenant(), account, 1, &generation())
            .unwrap();
        let mut metadata = BTreeMap::new();
        metadata.insert("output_length".to_string(), Value::from(280));
        ledger.annotate(debit.id, metadata).unwrap();
        assert_eq!(ledger.annotations(debit.id).unwrap().len(), 1);
        assert_eq!(ledger.get_entry(debit.id).unwrap().unwrap(), debit);

        let seed = ledger.entries_for_account(account).unwrap()[0].clone();
        let err = ledger.annotate(seed.id, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientPrecondition(_)));
    }

    #[test]
    fn processor_handles_are_unique() {
        let ledger = InMemoryLedger::default();
        let account = AccountId::new();
        let first = order(account, 10);
        let second = order(account, 10);
        ledger.register_order(&first).unwrap();
        ledger.register_order(&second).unwrap();

        ledger.attach_processor_handle(first.id, "PP-1").unwrap();
        let err = ledger.attach_processor_handle(second.id, "PP-1").unwrap_err();
        assert_eq!(err, LedgerError::DuplicateOrder(second.id));

        let found = ledger.order_by_handle(&scope(), "PP-1").unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[test]
    fn capture_claim_is_exclusive_until_released() {
        let ledger = InMemoryLedger::default();
        let account = AccountId::new();
        let pending = order(account, 10);
        ledger.register_order(&pending).unwrap();
        let lease = Duration::minutes(1);

        let claimed = ledger.claim_capture(pending.id, lease).unwrap();
        assert!(claimed.capture_started_at.is_some());
        assert_eq!(
            ledger.claim_capture(pending.id, lease).unwrap_err(),
            LedgerError::CaptureInProgress(pending.id)
        );

        ledger.release_capture(pending.id).unwrap();
        ledger.claim_capture(pending.id, lease).unwrap();

        // An expired claim is taken over.
        ledger.claim_capture(pending.id, Duration::zero()).unwrap();

        let applied = ledger
            .apply_purchase(&tenant(), account, 10, &settlement(&pending))
            .unwrap();
        assert!(applied.order.capture_started_at.is_none());
        assert_eq!(
            ledger.claim_capture(pending.id, lease).unwrap_err(),
            LedgerError::AlreadyCompleted(pending.id)
        );
    }

    #[test]
    fn entries_in_range_filters_by_time() {
        let (ledger, account) = funded(3);
        let now = Utc::now();
        let all = ledger
            .entries_in_range(now - chrono::Duration::minutes(1), now + chrono::Duration::minutes(1), None)
            .unwrap();
        assert_eq!(all.len(), 1);

        let none = ledger
            .entries_in_range(now + chrono::Duration::minutes(1), now + chrono::Duration::minutes(2), Some(account))
            .unwrap();
        assert!(none.is_empty());

        let err = ledger.entries_in_range(now, now - chrono::Duration::seconds(1), None).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRange(_)));
    }

    #[test]
    fn concurrent_consumption_never_overdraws() {
        let (ledger, account) = funded(50);
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    let mut ok = 0u32;
                    for _ in 0..10 {
                        if ledger
                            .apply_consumption(&TenantId::default(), account, 1, &generation())
                            .is_ok()
                        {
                            ok += 1;
                        }
                    }
                    ok
                })
            })
            .collect();

        let succeeded: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(succeeded, 50);
        assert_eq!(remaining(&ledger, account), 0);

        let journal = ledger.entries_for_account(account).unwrap();
        for pair in journal.windows(2) {
            assert_eq!(pair[0].balance_after, pair[1].balance_before);
        }
    }

    #[test]
    fn snapshot_round_trip_preserves_state() {
        let (ledger, account) = funded(3);
        ledger
            .apply_consumption(&tenant(), account, 1, &generation())
            .unwrap();

        let snapshot = ledger.export_snapshot().unwrap();
        let restored = InMemoryLedger::from_snapshot(snapshot).unwrap();
        assert_eq!(
            restored.entries_for_account(account).unwrap(),
            ledger.entries_for_account(account).unwrap()
        );
        assert_eq!(remaining(&restored, account), 2);

        restored
            .apply_consumption(&tenant(), account, 1, &generation())
            .unwrap();
        assert_eq!(restored.entry_count(account).unwrap(), 3);
    }
}
