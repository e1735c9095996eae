use inkpost_types::{AccountId, Scope};

use crate::error::LedgerError;
use crate::records::LedgerEntry;
use crate::traits::LedgerReader;

/// Balance reconstructed by folding an account's journal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayResult {
    pub account: AccountId,
    pub credits_remaining: u64,
    pub credits_total: u64,
    pub applied_entries: u64,
}

/// Deterministic journal replay.
pub struct ReplayEngine;

impl ReplayEngine {
    pub fn replay_account<R: LedgerReader>(
        reader: &R,
        account: AccountId,
    ) -> Result<ReplayResult, LedgerError> {
        let entries = reader.entries_for_account(account)?;
        apply_entries(account, &entries, u64::MAX)
    }

    /// Replay entries up to and including `seq`, giving the balance as it
    /// stood right after that entry.
    pub fn replay_until<R: LedgerReader>(
        reader: &R,
        account: AccountId,
        seq: u64,
    ) -> Result<ReplayResult, LedgerError> {
        let entries = reader.entries_for_account(account)?;
        apply_entries(account, &entries, seq)
    }

    /// Returns `true` if replaying the journal yields exactly the stored
    /// balance. An account with neither a balance row nor entries
    /// converges trivially.
    pub fn verify_against_balance<R: LedgerReader>(
        reader: &R,
        account: AccountId,
    ) -> Result<bool, LedgerError> {
        let entries = reader.entries_for_account(account)?;
        let replayed = apply_entries(account, &entries, u64::MAX)?;
        let Some(first) = entries.first() else {
            return Ok(true);
        };
        let stored = reader.balance(&Scope::with_deleted(first.tenant.clone()), account)?;
        Ok(stored.is_some_and(|b| {
            b.credits_remaining == replayed.credits_remaining
                && b.credits_total == replayed.credits_total
        }))
    }
}

fn apply_entries(
    account: AccountId,
    entries: &[LedgerEntry],
    until_seq: u64,
) -> Result<ReplayResult, LedgerError> {
    let mut remaining = 0u64;
    let mut total = 0u64;
    let mut applied_entries = 0u64;

    for entry in entries.iter().take_while(|e| e.seq <= until_seq) {
        let magnitude = entry.magnitude();
        if entry.amount < 0 {
            remaining = remaining
                .checked_sub(magnitude)
                .ok_or_else(|| LedgerError::IntegrityViolation {
                    seq: entry.seq,
                    reason: format!("debit of {magnitude} exceeds replayed balance {remaining}"),
                })?;
        } else {
            remaining = remaining
                .checked_add(magnitude)
                .ok_or(LedgerError::Overflow(account))?;
            if entry.kind.grows_total() {
                total = total
                    .checked_add(magnitude)
                    .ok_or(LedgerError::Overflow(account))?;
            }
        }
        applied_entries += 1;
    }

    Ok(ReplayResult {
        account,
        credits_remaining: remaining,
        credits_total: total,
        applied_entries,
    })
}
