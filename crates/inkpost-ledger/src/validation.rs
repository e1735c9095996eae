//! Journal validation: sequence, hash chain, and balance arithmetic checks.
//!
//! Every violation in an account's journal is reported, not just the first.

use inkpost_types::{AccountId, EntryKind, Scope};

use crate::error::LedgerError;
use crate::traits::LedgerReader;

/// Result of validating one account's journal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationReport {
    pub account: AccountId,
    pub entry_count: u64,
    pub hash_chain_valid: bool,
    pub sequence_monotonic: bool,
    pub arithmetic_valid: bool,
    pub balances_linked: bool,
    pub matches_balance: bool,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    /// Returns `true` if all checks passed.
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// A specific integrity violation detected during validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub seq: u64,
    pub kind: ViolationKind,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    SequenceGap,
    HashChainBreak,
    HashMismatch,
    /// `balance_after != balance_before + amount`.
    ArithmeticMismatch,
    /// `balance_before` differs from the previous entry's `balance_after`.
    BalanceLinkBreak,
    /// The journal head disagrees with the stored balance.
    BalanceMismatch,
    /// Entry kind, reason, and amount sign are inconsistent.
    MisclassifiedEntry,
    /// Spendable credits exceed lifetime credits.
    TotalExceeded,
}

/// Journal integrity validator.
pub struct JournalValidator;

impl JournalValidator {
    /// Validate a single account's journal for all invariants.
    pub fn validate_account<R: LedgerReader>(
        reader: &R,
        account: AccountId,
    ) -> Result<ValidationReport, LedgerError> {
        let entries = reader.entries_for_account(account)?;
        let mut violations = Vec::new();
        let mut hash_chain_valid = true;
        let mut sequence_monotonic = true;
        let mut arithmetic_valid = true;
        let mut balances_linked = true;
        let mut matches_balance = true;
        let mut lifetime_total: u64 = 0;

        for (index, entry) in entries.iter().enumerate() {
            let expected_seq = (index + 1) as u64;
            if entry.seq != expected_seq {
                sequence_monotonic = false;
                violations.push(Violation {
                    seq: entry.seq,
                    kind: ViolationKind::SequenceGap,
                    description: format!("expected seq {expected_seq}, got {}", entry.seq),
                });
            }

            let previous = index.checked_sub(1).map(|i| &entries[i]);
            if entry.prev_hash != previous.map(|p| p.entry_hash) {
                hash_chain_valid = false;
                violations.push(Violation {
                    seq: entry.seq,
                    kind: ViolationKind::HashChainBreak,
                    description: "previous hash link mismatch".into(),
                });
            }

            if let Ok(computed) = entry.compute_hash() {
                if computed != entry.entry_hash {
                    hash_chain_valid = false;
                    violations.push(Violation {
                        seq: entry.seq,
                        kind: ViolationKind::HashMismatch,
                        description: "entry hash does not match computed".into(),
                    });
                }
            }

            if !entry.arithmetic_holds() {
                arithmetic_valid = false;
                violations.push(Violation {
                    seq: entry.seq,
                    kind: ViolationKind::ArithmeticMismatch,
                    description: format!(
                        "{} {:+} != {}",
                        entry.balance_before, entry.amount, entry.balance_after
                    ),
                });
            }

            let expected_before = previous.map_or(0, |p| p.balance_after);
            if entry.balance_before != expected_before {
                balances_linked = false;
                violations.push(Violation {
                    seq: entry.seq,
                    kind: ViolationKind::BalanceLinkBreak,
                    description: format!(
                        "balance before is {}, previous entry left {expected_before}",
                        entry.balance_before
                    ),
                });
            }

            let sign_ok = (entry.kind == EntryKind::Debit) == (entry.amount < 0);
            if !entry.reason.permits(entry.kind) || !sign_ok {
                violations.push(Violation {
                    seq: entry.seq,
                    kind: ViolationKind::MisclassifiedEntry,
                    description: format!(
                        "{} entry with reason {} and amount {}",
                        entry.kind, entry.reason, entry.amount
                    ),
                });
            }

            if entry.kind.grows_total() {
                lifetime_total = lifetime_total.saturating_add(entry.magnitude());
            }
            if entry.balance_after > lifetime_total {
                violations.push(Violation {
                    seq: entry.seq,
                    kind: ViolationKind::TotalExceeded,
                    description: format!(
                        "{} spendable credits exceed {lifetime_total} granted",
                        entry.balance_after
                    ),
                });
            }
        }

        let tenant = entries.first().map(|e| e.tenant.clone()).unwrap_or_default();
        let stored = reader.balance(&Scope::with_deleted(tenant), account)?;
        let head_after = entries.last().map_or(0, |e| e.balance_after);
        let stored_remaining = stored.as_ref().map_or(0, |b| b.credits_remaining);
        let stored_total = stored.as_ref().map_or(0, |b| b.credits_total);
        if head_after != stored_remaining || lifetime_total != stored_total {
            matches_balance = false;
            violations.push(Violation {
                seq: entries.last().map_or(0, |e| e.seq),
                kind: ViolationKind::BalanceMismatch,
                description: format!(
                    "journal implies {head_after}/{lifetime_total}, balance holds {stored_remaining}/{stored_total}"
                ),
            });
        }

        Ok(ValidationReport {
            account,
            entry_count: entries.len() as u64,
            hash_chain_valid,
            sequence_monotonic,
            arithmetic_valid,
            balances_linked,
            matches_balance,
            violations,
        })
    }

    /// Validate every account in the ledger.
    pub fn validate_all<R: LedgerReader>(reader: &R) -> Result<Vec<ValidationReport>, LedgerError> {
        let accounts = reader.accounts()?;
        let mut reports = Vec::with_capacity(accounts.len());
        for account in accounts {
            reports.push(Self::validate_account(reader, account)?);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use inkpost_types::{Correlation, GenerationId, TenantId};
    use proptest::prelude::*;

    use super::*;
    use crate::memory::InMemoryLedger;
    use crate::snapshot::JournalSnapshot;
    use crate::traits::LedgerWriter;

    fn tenant() -> TenantId {
        TenantId::default()
    }

    fn tampered(mutate: impl FnOnce(&mut JournalSnapshot)) -> (InMemoryLedger, AccountId) {
        let ledger = InMemoryLedger::default();
        let account = AccountId::new();
        ledger
            .apply_adjustment(&tenant(), account, 5, "seed", "grant")
            .unwrap();
        ledger
            .apply_consumption(&tenant(), account, 1, &Correlation::Generation(GenerationId::new()))
            .unwrap();
        let mut snapshot = ledger.export_snapshot().unwrap();
        mutate(&mut snapshot);
        (InMemoryLedger::from_snapshot(snapshot).unwrap(), account)
    }

    #[test]
    fn untouched_journal_is_valid() {
        let (ledger, account) = tampered(|_| {});
        let report = JournalValidator::validate_account(&ledger, account).unwrap();
        assert!(report.is_valid(), "{:?}", report.violations);
        assert_eq!(report.entry_count, 2);
    }

    #[test]
    fn edited_amount_breaks_hash_and_arithmetic() {
        let (ledger, account) = tampered(|s| s.entries[1].amount = -2);
        let report = JournalValidator::validate_account(&ledger, account).unwrap();
        assert!(!report.hash_chain_valid);
        assert!(!report.arithmetic_valid);
        let kinds: Vec<_> = report.violations.iter().map(|v| v.kind.clone()).collect();
        assert!(kinds.contains(&ViolationKind::HashMismatch));
        assert!(kinds.contains(&ViolationKind::ArithmeticMismatch));
    }

    #[test]
    fn edited_balance_row_is_detected() {
        let (ledger, account) = tampered(|s| s.balances[0].credits_remaining = 50);
        let report = JournalValidator::validate_account(&ledger, account).unwrap();
        assert!(!report.matches_balance);
        assert!(report.hash_chain_valid);
    }

    #[test]
    fn dropped_entry_breaks_sequence_and_links() {
        let (ledger, account) = tampered(|s| {
            s.entries.remove(0);
        });
        let report = JournalValidator::validate_account(&ledger, account).unwrap();
        assert!(!report.sequence_monotonic);
        assert!(!report.balances_linked);
    }

    #[test]
    fn validate_all_covers_every_account() {
        let ledger = InMemoryLedger::default();
        for _ in 0..3 {
            ledger
                .apply_adjustment(&tenant(), AccountId::new(), 1, "seed", "grant")
                .unwrap();
        }
        let reports = JournalValidator::validate_all(&ledger).unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(ValidationReport::is_valid));
    }

    #[derive(Clone, Debug)]
    enum Op {
        Grant(u8),
        Consume,
        ConsumeThenRefund,
        Remove(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u8..20).prop_map(Op::Grant),
            Just(Op::Consume),
            Just(Op::ConsumeThenRefund),
            (1u8..5).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn any_operation_sequence_keeps_journal_valid(ops in prop::collection::vec(op(), 1..40)) {
            let ledger = InMemoryLedger::default();
            let account = AccountId::new();
            for op in ops {
                let _ = match op {
                    Op::Grant(n) => ledger
                        .apply_adjustment(&tenant(), account, i64::from(n), "p", "grant")
                        .map(|_| ()),
                    Op::Consume => ledger
                        .apply_consumption(&tenant(), account, 1, &Correlation::Generation(GenerationId::new()))
                        .map(|_| ()),
                    Op::ConsumeThenRefund => {
                        let c = Correlation::Generation(GenerationId::new());
                        ledger
                            .apply_consumption(&tenant(), account, 1, &c)
                            .and_then(|_| ledger.apply_refund(&tenant(), account, 1, &c, "failed"))
                            .map(|_| ())
                    }
                    Op::Remove(n) => ledger
                        .apply_adjustment(&tenant(), account, -i64::from(n), "p", "removal")
                        .map(|_| ()),
                };
            }

            let report = JournalValidator::validate_account(&ledger, account).unwrap();
            prop_assert!(report.is_valid(), "{:?}", report.violations);
        }
    }
}
