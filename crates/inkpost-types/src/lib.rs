//! Foundation types for the Inkpost credit ledger.
//!
//! This crate provides the identity, classification, and scoping types used
//! throughout the credit ledger. Every other Inkpost crate depends on
//! `inkpost-types`.
//!
//! # Key Types
//!
//! - [`AccountId`]: UUID v7 identity of a credit-holding user
//! - [`OrderId`], [`EntryId`], [`ReferralId`], [`GenerationId`]: time-ordered record ids
//! - [`TenantId`]: tenant partition threaded explicitly through every workflow
//! - [`Correlation`]: ties a ledger entry to the business event that caused it
//! - [`EntryKind`] / [`EntryReason`]: classification of a balance mutation
//! - [`ReferralCode`]: per-user shareable referral identifier
//! - [`Scope`]: tenant + soft-delete predicate applied at the storage boundary

pub mod code;
pub mod correlation;
pub mod error;
pub mod ids;
pub mod kind;
pub mod money;
pub mod scope;

pub use code::ReferralCode;
pub use correlation::Correlation;
pub use error::TypeError;
pub use ids::{AccountId, EntryId, GenerationId, OrderId, PlanId, ReferralId, TenantId};
pub use kind::{EntryKind, EntryReason};
pub use money::Money;
pub use scope::{Scope, SoftDeleted};
