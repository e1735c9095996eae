use chrono::{DateTime, Utc};
use inkpost_types::{AccountId, Correlation, EntryId, EntryKind, EntryReason};

use crate::error::LedgerError;
use crate::records::LedgerEntry;
use crate::traits::LedgerReader;

/// Which journal entries an audit query selects.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub account: Option<AccountId>,
    pub correlation: Option<Correlation>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    fn matches(&self, entry: &LedgerEntry) -> bool {
        self.account.map_or(true, |a| a == entry.account)
            && self
                .correlation
                .as_ref()
                .map_or(true, |c| entry.correlation.as_ref() == Some(c))
            && self.since.map_or(true, |t| entry.created_at >= t)
            && self.until.map_or(true, |t| entry.created_at < t)
    }
}

/// Row in the audit trail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditRow {
    pub entry: EntryId,
    pub account: AccountId,
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    pub kind: EntryKind,
    pub reason: EntryReason,
    pub amount: i64,
    pub balance_after: u64,
    pub correlation: Option<Correlation>,
    pub annotations: usize,
    /// Leading bytes of the entry hash, for matching rows against a journal.
    pub hash: String,
    pub summary: String,
}

/// Per-account rollup of the journal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountSummary {
    pub account: AccountId,
    pub entries: u64,
    pub granted: u64,
    pub consumed: u64,
    pub refunded: u64,
    pub credits_remaining: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Read-only views derived from the journal.
pub struct ProjectionBuilder;

impl ProjectionBuilder {
    /// Entries selected by `filter`, oldest first.
    pub fn audit_trail<R: LedgerReader>(
        reader: &R,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditRow>, LedgerError> {
        let accounts = match filter.account {
            Some(account) => vec![account],
            None => reader.accounts()?,
        };

        let mut rows = Vec::new();
        for account in accounts {
            for entry in reader.entries_for_account(account)? {
                if !filter.matches(&entry) {
                    continue;
                }
                let annotations = reader.annotations(entry.id)?.len();
                rows.push(AuditRow {
                    entry: entry.id,
                    account: entry.account,
                    seq: entry.seq,
                    created_at: entry.created_at,
                    kind: entry.kind,
                    reason: entry.reason,
                    amount: entry.amount,
                    balance_after: entry.balance_after,
                    hash: entry.short_hash(),
                    summary: summarize(&entry),
                    correlation: entry.correlation,
                    annotations,
                });
            }
        }
        rows.sort_by(|a, b| (a.created_at, a.account, a.seq).cmp(&(b.created_at, b.account, b.seq)));
        Ok(rows)
    }

    pub fn account_summary<R: LedgerReader>(
        reader: &R,
        account: AccountId,
    ) -> Result<AccountSummary, LedgerError> {
        let entries = reader.entries_for_account(account)?;
        let mut summary = AccountSummary {
            account,
            entries: entries.len() as u64,
            granted: 0,
            consumed: 0,
            refunded: 0,
            credits_remaining: entries.last().map_or(0, |e| e.balance_after),
            last_activity: entries.last().map(|e| e.created_at),
        };
        for entry in &entries {
            match entry.kind {
                EntryKind::Credit => summary.granted += entry.magnitude(),
                EntryKind::Debit => summary.consumed += entry.magnitude(),
                EntryKind::Refund => summary.refunded += entry.magnitude(),
            }
        }
        Ok(summary)
    }
}

fn summarize(entry: &LedgerEntry) -> String {
    let note = |key: &str| {
        entry
            .metadata
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    };
    match entry.reason {
        EntryReason::PlanPurchase => format!("plan {}", note("plan")),
        EntryReason::ReferralReward | EntryReason::ReferralSignup => {
            format!("referral code {}", note("code"))
        }
        EntryReason::Refund => format!("refund: {}", note("cause")),
        EntryReason::AdminAdjustment => format!("adjustment: {}", note("note")),
        EntryReason::GenerationUse => entry
            .correlation
            .as_ref()
            .map_or_else(|| "generation".to_string(), ToString::to_string),
    }
}
