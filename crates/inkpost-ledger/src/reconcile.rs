//! Debit reconciliation: match each generation debit to a delivery or refund.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use inkpost_types::{AccountId, Correlation, EntryId, EntryKind, EntryReason};

use crate::error::LedgerError;
use crate::traits::LedgerReader;

/// A generation debit with neither a delivery annotation nor a refund.
///
/// Left behind when the process stopped between the debit and its
/// settlement. An operator decides whether to refund it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutstandingDebit {
    pub account: AccountId,
    pub entry: EntryId,
    pub correlation: Correlation,
    pub amount: u64,
    pub debited_at: DateTime<Utc>,
}

/// A refund whose correlation returns more than was ever debited for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrphanRefund {
    pub account: AccountId,
    pub entry: EntryId,
    pub correlation: Option<Correlation>,
    pub amount: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub debits_checked: u64,
    /// Debits with a delivery annotation.
    pub delivered: u64,
    /// Debits fully returned by refunds.
    pub refunded: u64,
    /// Unsettled debits newer than the cutoff; still plausibly running.
    pub in_flight: u64,
    pub outstanding: Vec<OutstandingDebit>,
    pub orphan_refunds: Vec<OrphanRefund>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.outstanding.is_empty() && self.orphan_refunds.is_empty()
    }
}

/// Pairs every generation debit with its outcome.
pub struct Reconciler;

impl Reconciler {
    /// Reconcile all accounts. Unsettled debits created before `cutoff`
    /// are reported as outstanding.
    pub fn reconcile<R: LedgerReader>(
        reader: &R,
        cutoff: DateTime<Utc>,
    ) -> Result<ReconciliationReport, LedgerError> {
        let mut report = ReconciliationReport::default();
        for account in reader.accounts()? {
            Self::reconcile_into(reader, account, cutoff, &mut report)?;
        }
        Ok(report)
    }

    pub fn reconcile_account<R: LedgerReader>(
        reader: &R,
        account: AccountId,
        cutoff: DateTime<Utc>,
    ) -> Result<ReconciliationReport, LedgerError> {
        let mut report = ReconciliationReport::default();
        Self::reconcile_into(reader, account, cutoff, &mut report)?;
        Ok(report)
    }

    fn reconcile_into<R: LedgerReader>(
        reader: &R,
        account: AccountId,
        cutoff: DateTime<Utc>,
        report: &mut ReconciliationReport,
    ) -> Result<(), LedgerError> {
        let entries = reader.entries_for_account(account)?;

        let mut refunded: HashMap<String, u64> = HashMap::new();
        for entry in entries.iter().filter(|e| e.kind == EntryKind::Refund) {
            let key = entry.correlation.as_ref().map(Correlation::key).unwrap_or_default();
            *refunded.entry(key).or_default() += entry.magnitude();
        }

        for debit in entries
            .iter()
            .filter(|e| e.kind == EntryKind::Debit && e.reason == EntryReason::GenerationUse)
        {
            report.debits_checked += 1;
            let key = debit.correlation.as_ref().map(Correlation::key).unwrap_or_default();
            let returned = refunded.get(&key).copied().unwrap_or(0);
            if returned >= debit.magnitude() {
                report.refunded += 1;
                refunded.insert(key, returned - debit.magnitude());
                continue;
            }
            if !reader.annotations(debit.id)?.is_empty() {
                report.delivered += 1;
                continue;
            }
            if debit.created_at >= cutoff {
                report.in_flight += 1;
                continue;
            }
            if let Some(correlation) = debit.correlation.clone() {
                report.outstanding.push(OutstandingDebit {
                    account,
                    entry: debit.id,
                    correlation,
                    amount: debit.magnitude(),
                    debited_at: debit.created_at,
                });
            }
        }

        // Whatever refund volume was not matched against a debit above.
        for entry in entries.iter().filter(|e| e.kind == EntryKind::Refund) {
            let key = entry.correlation.as_ref().map(Correlation::key).unwrap_or_default();
            let Some(left) = refunded.get_mut(&key) else {
                continue;
            };
            if *left == 0 {
                continue;
            }
            let amount = entry.magnitude().min(*left);
            *left -= amount;
            report.orphan_refunds.push(OrphanRefund {
                account,
                entry: entry.id,
                correlation: entry.correlation.clone(),
                amount,
            });
        }

        Ok(())
    }
}
