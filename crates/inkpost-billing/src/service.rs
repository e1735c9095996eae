use std::sync::Arc;

use inkpost_types::TenantId;

use crate::codes::CodeRegistry;
use crate::collaborators::{AccountDirectory, ContentGenerator, PaymentProcessor, PlanCatalog};
use crate::config::BillingConfig;
use crate::consumption::ConsumptionWorkflow;
use crate::error::BillingResult;
use crate::purchase::PurchaseWorkflow;
use crate::referral::ReferralWorkflow;
use crate::store::LedgerStore;

/// The three billing workflows wired to one shared ledger.
pub struct BillingService {
    pub purchases: PurchaseWorkflow,
    pub consumption: ConsumptionWorkflow,
    pub referrals: ReferralWorkflow,
    config: BillingConfig,
}

/// Collaborators required by [`BillingService::new`].
pub struct Collaborators {
    pub processor: Arc<dyn PaymentProcessor>,
    pub generator: Arc<dyn ContentGenerator>,
    pub catalog: Arc<dyn PlanCatalog>,
    pub directory: Arc<dyn AccountDirectory>,
}

impl BillingService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        collaborators: Collaborators,
        config: BillingConfig,
    ) -> Self {
        let codes = Arc::new(CodeRegistry::new(config.referral_code_length));
        Self {
            purchases: PurchaseWorkflow::new(
                Arc::clone(&ledger),
                collaborators.processor,
                Arc::clone(&collaborators.catalog),
                config.clone(),
            ),
            consumption: ConsumptionWorkflow::new(
                Arc::clone(&ledger),
                collaborators.generator,
                config.clone(),
            ),
            referrals: ReferralWorkflow::new(
                ledger,
                codes,
                collaborators.catalog,
                collaborators.directory,
                config.clone(),
            ),
            config,
        }
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    /// The tenant a request acts for. A request that names no tenant (or a
    /// blank one) falls back to `default_tenant`; the result is what gets
    /// passed to the workflow entrypoints.
    pub fn tenant_for(&self, requested: Option<&str>) -> BillingResult<TenantId> {
        match requested.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => Ok(TenantId::new(name)?),
            None => Ok(self.config.default_tenant.clone()),
        }
    }
}
