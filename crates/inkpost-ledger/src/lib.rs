//! Credit ledger engine for Inkpost.
//!
//! This crate owns every balance mutation. It provides:
//! - Account balances and a per-account, hash-linked, append-only journal
//! - `LedgerWriter` / `LedgerReader` / `OrderBook` trait boundaries
//! - `InMemoryLedger`, a single-writer implementation for tests and embedding
//! - Journal snapshots for offline verification
//! - Journal validation, replay, projections, and debit reconciliation

pub mod error;
pub mod memory;
pub mod projection;
pub mod reconcile;
pub mod records;
pub mod replay;
pub mod snapshot;
pub mod traits;
pub mod validation;

pub use error::LedgerError;
pub use memory::InMemoryLedger;
pub use projection::{AccountSummary, AuditFilter, AuditRow, ProjectionBuilder};
pub use reconcile::{OrphanRefund, OutstandingDebit, ReconciliationReport, Reconciler};
pub use records::{
    AccountBalance, EntryAnnotation, LedgerEntry, OrderStatus, PlanHistoryRecord,
    PurchaseApplied, PurchaseOrder, PurchaseSettlement, ReferralApplied, ReferralGrant,
    ReferralRecord,
};
pub use replay::{ReplayEngine, ReplayResult};
pub use snapshot::JournalSnapshot;
pub use traits::{LedgerReader, LedgerWriter, OrderBook};
pub use validation::{JournalValidator, ValidationReport, Violation, ViolationKind};
