use std::fs;
use std::path::Path;
use std::time::Duration;

use inkpost_types::TenantId;
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};

/// Settings shared by the billing workflows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Tenant used by entrypoints that receive no explicit tenant.
    pub default_tenant: TenantId,
    /// Credits debited for one generation call.
    pub credits_per_generation: u64,
    /// Seconds to wait for the generator before refunding.
    pub generation_timeout_secs: u64,
    /// Seconds to wait for the payment processor.
    pub capture_timeout_secs: u64,
    /// Length of newly issued referral codes.
    pub referral_code_length: usize,
    /// Reward amounts used when a tenant has no active referral plan.
    pub referral: ReferralDefaults,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferralDefaults {
    pub referrer_credits: u64,
    pub referee_credits: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_tenant: TenantId::default(),
            credits_per_generation: 1,
            generation_timeout_secs: 60,
            capture_timeout_secs: 30,
            referral_code_length: 8,
            referral: ReferralDefaults::default(),
        }
    }
}

impl Default for ReferralDefaults {
    fn default() -> Self {
        Self {
            referrer_credits: 10,
            referee_credits: 5,
        }
    }
}

impl BillingConfig {
    pub fn from_toml_str(input: &str) -> BillingResult<Self> {
        let config: Self = toml::from_str(input).map_err(|e| BillingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> BillingResult<Self> {
        let input = fs::read_to_string(path)
            .map_err(|e| BillingError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&input)
    }

    pub fn to_toml_string(&self) -> BillingResult<String> {
        toml::to_string_pretty(self).map_err(|e| BillingError::Config(e.to_string()))
    }

    pub fn validate(&self) -> BillingResult<()> {
        if self.credits_per_generation == 0 {
            return Err(BillingError::Config(
                "credits_per_generation must be at least 1".into(),
            ));
        }
        if self.generation_timeout_secs == 0 || self.capture_timeout_secs == 0 {
            return Err(BillingError::Config("timeouts must be at least 1 second".into()));
        }
        if self.referral.referrer_credits == 0 || self.referral.referee_credits == 0 {
            return Err(BillingError::Config(
                "default referral rewards must be positive on both sides".into(),
            ));
        }
        if !(inkpost_types::code::MIN_CODE_LEN..=inkpost_types::code::MAX_CODE_LEN)
            .contains(&self.referral_code_length)
        {
            return Err(BillingError::Config(format!(
                "referral_code_length must be between {} and {}",
                inkpost_types::code::MIN_CODE_LEN,
                inkpost_types::code::MAX_CODE_LEN
            )));
        }
        Ok(())
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }
}
