use std::collections::HashMap;
use std::sync::RwLock;

use inkpost_types::{Money, PlanId, TenantId};
use serde::{Deserialize, Serialize};

use crate::collaborators::PlanCatalog;

/// A credit bundle offered for sale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub price: Money,
    pub credits: u64,
    pub active: bool,
}

impl Plan {
    /// Active, priced, and granting credits.
    pub fn is_payable(&self) -> bool {
        self.active && !self.price.is_zero() && self.credits > 0
    }
}

/// Tenant-specific referral reward amounts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralPlan {
    pub referrer_credits: u64,
    pub referee_credits: u64,
    pub active: bool,
}

/// Plan catalog held in memory.
#[derive(Default)]
pub struct InMemoryPlanCatalog {
    plans: RwLock<HashMap<(TenantId, PlanId), Plan>>,
    referral_plans: RwLock<HashMap<TenantId, ReferralPlan>>,
}

impl InMemoryPlanCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_plan(&self, tenant: &TenantId, plan: Plan) {
        if let Ok(mut plans) = self.plans.write() {
            plans.insert((tenant.clone(), plan.id.clone()), plan);
        }
    }

    pub fn set_referral_plan(&self, tenant: &TenantId, plan: ReferralPlan) {
        if let Ok(mut plans) = self.referral_plans.write() {
            plans.insert(tenant.clone(), plan);
        }
    }
}

impl PlanCatalog for InMemoryPlanCatalog {
    fn plan(&self, tenant: &TenantId, plan: &PlanId) -> Option<Plan> {
        let plans = self.plans.read().ok()?;
        plans.get(&(tenant.clone(), plan.clone())).cloned()
    }

    fn referral_plan(&self, tenant: &TenantId) -> Option<ReferralPlan> {
        let plans = self.referral_plans.read().ok()?;
        plans.get(tenant).cloned()
    }
}
