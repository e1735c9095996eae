//! Consumption workflow: pay-first debit around one generation call.

use std::collections::BTreeMap;
use std::sync::Arc;

use inkpost_ledger::{LedgerEntry, LedgerError};
use inkpost_types::{AccountId, Correlation, GenerationId, Scope, TenantId};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::collaborators::{ContentGenerator, GenerationOptions};
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::store::LedgerStore;

const GENERATOR: &str = "post generator";

/// A generation that was paid for and delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Generated {
    pub generation: GenerationId,
    pub text: String,
    pub debit: LedgerEntry,
}

/// Pay-first generation: debit, generate, then annotate or refund.
pub struct ConsumptionWorkflow {
    ledger: Arc<dyn LedgerStore>,
    generator: Arc<dyn ContentGenerator>,
    config: BillingConfig,
}

impl ConsumptionWorkflow {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        generator: Arc<dyn ContentGenerator>,
        config: BillingConfig,
    ) -> Self {
        Self {
            ledger,
            generator,
            config,
        }
    }

    pub async fn generate(
        &self,
        tenant: &TenantId,
        account: AccountId,
        source: &str,
        options: &GenerationOptions,
    ) -> BillingResult<Generated> {
        let cost = self.config.credits_per_generation;
        let available = self
            .ledger
            .balance(&Scope::tenant(tenant.clone()), account)?
            .map_or(0, |b| b.credits_remaining);
        if available < cost {
            return Err(BillingError::InsufficientCredits {
                available,
                required: cost,
            });
        }

        let generation = GenerationId::new();
        let correlation = Correlation::Generation(generation);
        let debit = self
            .ledger
            .apply_consumption(tenant, account, cost, &correlation)
            .map_err(|err| match err {
                LedgerError::InsufficientBalance {
                    available,
                    requested,
                    ..
                } => BillingError::InsufficientCredits {
                    available,
                    required: requested,
                },
                other => BillingError::Ledger(other),
            })?;
        debug!(account = %account, generation = %generation, cost, "generation paid");

        let outcome = match timeout(
            self.config.generation_timeout(),
            self.generator.generate(source, options),
        )
        .await
        {
            Ok(Ok(text)) if text.trim().is_empty() => {
                Err(BillingError::external(GENERATOR, "empty output"))
            }
            Ok(result) => result,
            Err(_) => Err(BillingError::external(
                GENERATOR,
                format!("timed out after {}s", self.config.generation_timeout_secs),
            )),
        };

        match outcome {
            Ok(text) => {
                let mut metadata = BTreeMap::new();
                metadata.insert("output_length".to_string(), Value::from(text.chars().count()));
                metadata.insert("tone".to_string(), Value::from(options.tone.as_str()));
                metadata.insert("status".to_string(), Value::from("delivered"));
                if let Err(err) = self.ledger.annotate(debit.id, metadata) {
                    warn!(entry = %debit.id, error = %err, "could not record generation metadata");
                }
                Ok(Generated {
                    generation,
                    text,
                    debit,
                })
            }
            Err(cause) => {
                if let Err(refund_err) =
                    self.ledger
                        .apply_refund(tenant, account, cost, &correlation, &cause.to_string())
                {
                    error!(
                        account = %account,
                        generation = %generation,
                        cause = %cause,
                        error = %refund_err,
                        "refund after failed generation did not apply"
                    );
                } else {
                    debug!(account = %account, generation = %generation, cause = %cause, "generation refunded");
                }
                Err(cause)
            }
        }
    }
}
