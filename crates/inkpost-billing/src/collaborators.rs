//! Interfaces to the services the billing workflows depend on but do not
//! own: the payment processor, the post generator, the plan catalog, and
//! the account directory.

use std::fmt;

use async_trait::async_trait;
use inkpost_types::{AccountId, Money, PlanId, TenantId};
use serde::{Deserialize, Serialize};

use crate::error::BillingResult;
use crate::plans::{Plan, ReferralPlan};

/// Status reported by the processor for a capture attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Completed,
    Pending,
    Declined,
    Other(String),
}

impl CaptureStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "COMPLETED"),
            Self::Pending => write!(f, "PENDING"),
            Self::Declined => write!(f, "DECLINED"),
            Self::Other(status) => write!(f, "{status}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureResult {
    pub status: CaptureStatus,
    pub capture_id: Option<String>,
    pub captured: Option<Money>,
    pub payer: Option<String>,
}

/// External payment processor.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Open a payment and return the processor's order handle.
    async fn create_order(&self, amount: &Money, description: &str) -> BillingResult<String>;

    async fn capture_order(&self, handle: &str) -> BillingResult<CaptureResult>;
}

/// Options forwarded to the generator and recorded with the debit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub tone: String,
    pub max_length: Option<usize>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            tone: "professional".into(),
            max_length: None,
        }
    }
}

/// Opaque text generator. May fail or hang.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, source: &str, options: &GenerationOptions) -> BillingResult<String>;
}

/// Purchasable plans and referral reward settings per tenant.
pub trait PlanCatalog: Send + Sync {
    fn plan(&self, tenant: &TenantId, plan: &PlanId) -> Option<Plan>;

    fn referral_plan(&self, tenant: &TenantId) -> Option<ReferralPlan>;
}

/// User profiles maintained outside the ledger.
pub trait AccountDirectory: Send + Sync {
    fn display_name(&self, tenant: &TenantId, account: AccountId) -> Option<String>;

    /// `false` for unknown and soft-deleted accounts.
    fn is_active(&self, tenant: &TenantId, account: AccountId) -> bool;
}
