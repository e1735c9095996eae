//! Referral workflow: code lookup and two-sided sign-up rewards.
//!
//! Rejected referrals are logged and skipped; they never fail registration.

use std::sync::Arc;

use inkpost_ledger::{LedgerError, ReferralApplied, ReferralGrant};
use inkpost_types::{AccountId, ReferralCode, Scope, TenantId};
use tracing::{info, warn};

use crate::codes::CodeRegistry;
use crate::collaborators::{AccountDirectory, PlanCatalog};
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::store::LedgerStore;

/// What a valid referral code grants, shown before sign-up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeDetails {
    pub referrer_name: String,
    pub referrer_credits: u64,
    pub referee_credits: u64,
}

/// Result of a referral attempt during registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReferralOutcome {
    Credited(ReferralApplied),
    /// The referral was ignored; registration proceeds regardless.
    Skipped(BillingError),
}

impl ReferralOutcome {
    pub fn is_credited(&self) -> bool {
        matches!(self, Self::Credited(_))
    }
}

pub struct ReferralWorkflow {
    ledger: Arc<dyn LedgerStore>,
    codes: Arc<CodeRegistry>,
    catalog: Arc<dyn PlanCatalog>,
    directory: Arc<dyn AccountDirectory>,
    config: BillingConfig,
}

impl ReferralWorkflow {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        codes: Arc<CodeRegistry>,
        catalog: Arc<dyn PlanCatalog>,
        directory: Arc<dyn AccountDirectory>,
        config: BillingConfig,
    ) -> Self {
        Self {
            ledger,
            codes,
            catalog,
            directory,
            config,
        }
    }

    /// The account's shareable code, issued on first request.
    pub fn referral_code(&self, tenant: &TenantId, account: AccountId) -> BillingResult<ReferralCode> {
        self.codes.code_for(tenant, account)
    }

    pub fn validate_code(&self, tenant: &TenantId, code: &str) -> BillingResult<CodeDetails> {
        let (referrer, _) = self.resolve(tenant, code)?;
        let referrer_name = self
            .directory
            .display_name(tenant, referrer)
            .ok_or_else(|| BillingError::CodeNotFound(code.to_string()))?;
        let (referrer_credits, referee_credits) = self.reward_amounts(tenant);
        Ok(CodeDetails {
            referrer_name,
            referrer_credits,
            referee_credits,
        })
    }

    /// Credit a new user and their referrer. Never fails registration:
    /// every rejection is logged and returned as [`ReferralOutcome::Skipped`].
    pub fn process_referral(
        &self,
        tenant: &TenantId,
        code: &str,
        referee: AccountId,
    ) -> ReferralOutcome {
        match self.try_process(tenant, code, referee) {
            Ok(applied) => {
                info!(
                    referral = %applied.record.id,
                    referrer = %applied.record.referrer,
                    referee = %referee,
                    code = %applied.record.code,
                    "referral processed"
                );
                ReferralOutcome::Credited(applied)
            }
            Err(err) => {
                warn!(referee = %referee, code, error = %err, "referral skipped");
                ReferralOutcome::Skipped(err)
            }
        }
    }

    fn try_process(
        &self,
        tenant: &TenantId,
        code: &str,
        referee: AccountId,
    ) -> BillingResult<ReferralApplied> {
        let (referrer, code) = self.resolve(tenant, code)?;
        if referrer == referee {
            return Err(BillingError::SelfReferral(referee));
        }
        if self
            .ledger
            .referral_for_referee(&Scope::with_deleted(tenant.clone()), referee)?
            .is_some()
        {
            return Err(BillingError::DuplicateReferral(referee));
        }

        let (referrer_credits, referee_credits) = self.reward_amounts(tenant);
        let grant = ReferralGrant {
            tenant: tenant.clone(),
            referrer,
            referee,
            code,
            referrer_credits,
            referee_credits,
        };
        self.ledger.apply_referral(&grant).map_err(|err| match err {
            LedgerError::SelfReferral(id) => BillingError::SelfReferral(id),
            LedgerError::DuplicateReferral(id) => BillingError::DuplicateReferral(id),
            other => BillingError::Ledger(other),
        })
    }

    /// The live account that owns `code`.
    fn resolve(&self, tenant: &TenantId, code: &str) -> BillingResult<(AccountId, ReferralCode)> {
        let not_found = || BillingError::CodeNotFound(code.to_string());
        let parsed = ReferralCode::parse(code).map_err(|_| not_found())?;
        let referrer = self.codes.resolve(tenant, &parsed)?.ok_or_else(not_found)?;
        if !self.directory.is_active(tenant, referrer) {
            return Err(not_found());
        }
        Ok((referrer, parsed))
    }

    /// Active referral plan amounts, or the configured defaults.
    fn reward_amounts(&self, tenant: &TenantId) -> (u64, u64) {
        match self.catalog.referral_plan(tenant) {
            Some(plan) if plan.active && plan.referrer_credits > 0 && plan.referee_credits > 0 => {
                (plan.referrer_credits, plan.referee_credits)
            }
            _ => (
                self.config.referral.referrer_credits,
                self.config.referral.referee_credits,
            ),
        }
    }
}
