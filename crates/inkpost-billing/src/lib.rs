//! Billing workflows for the Inkpost credit ledger.
//!
//! Each workflow talks to the ledger only through [`LedgerStore`] and to
//! the outside world only through the traits in [`collaborators`]:
//! - [`PurchaseWorkflow`]: order creation and processor-confirmed capture
//! - [`ConsumptionWorkflow`]: pay-first generation with refund on failure
//! - [`ReferralWorkflow`]: code validation and two-sided referral rewards

pub mod codes;
pub mod collaborators;
pub mod config;
pub mod consumption;
pub mod directory;
pub mod error;
pub mod plans;
pub mod purchase;
pub mod referral;
pub mod service;
pub mod store;

pub use codes::CodeRegistry;
pub use collaborators::{
    AccountDirectory, CaptureResult, CaptureStatus, ContentGenerator, GenerationOptions,
    PaymentProcessor, PlanCatalog,
};
pub use config::{BillingConfig, ReferralDefaults};
pub use consumption::{ConsumptionWorkflow, Generated};
pub use directory::InMemoryDirectory;
pub use error::{BillingError, BillingResult};
pub use plans::{InMemoryPlanCatalog, Plan, ReferralPlan};
pub use purchase::{CreatedOrder, PurchaseWorkflow};
pub use referral::{CodeDetails, ReferralOutcome, ReferralWorkflow};
pub use service::{BillingService, Collaborators};
pub use store::LedgerStore;
