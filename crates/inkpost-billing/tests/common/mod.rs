#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use inkpost_billing::{
    BillingConfig, BillingError, BillingResult, BillingService, CaptureResult, CaptureStatus,
    Collaborators, ContentGenerator, GenerationOptions, InMemoryDirectory, InMemoryPlanCatalog,
    PaymentProcessor, Plan,
};
use inkpost_ledger::{InMemoryLedger, LedgerReader, LedgerWriter};
use inkpost_types::{AccountId, Money, PlanId, Scope, TenantId};

/// How the mock processor answers a capture.
#[derive(Clone, Debug)]
pub enum CaptureScript {
    Status(CaptureStatus),
    /// Answer with the status after a pause.
    Delayed(Duration, CaptureStatus),
    Fail(String),
    Hang,
}

#[derive(Default)]
pub struct MockProcessor {
    next_handle: AtomicUsize,
    amounts: Mutex<HashMap<String, Money>>,
    script: Mutex<VecDeque<CaptureScript>>,
    pub captures: AtomicUsize,
    pub fail_create: Mutex<Option<String>>,
}

impl MockProcessor {
    pub fn push(&self, step: CaptureScript) {
        self.script.lock().unwrap().push_back(step);
    }
}

#[async_trait]
impl PaymentProcessor for MockProcessor {
    async fn create_order(&self, amount: &Money, _description: &str) -> BillingResult<String> {
        if let Some(reason) = self.fail_create.lock().unwrap().clone() {
            return Err(BillingError::external("payment processor", reason));
        }
        let handle = format!("PP-{}", self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        self.amounts
            .lock()
            .unwrap()
            .insert(handle.clone(), amount.clone());
        Ok(handle)
    }

    async fn capture_order(&self, handle: &str) -> BillingResult<CaptureResult> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CaptureScript::Status(CaptureStatus::Completed));
        let status = match step {
            CaptureScript::Status(status) => status,
            CaptureScript::Delayed(pause, status) => {
                tokio::time::sleep(pause).await;
                status
            }
            CaptureScript::Fail(reason) => {
                return Err(BillingError::external("payment processor", reason))
            }
            CaptureScript::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("capture should have timed out")
            }
        };
        Ok(CaptureResult {
            status,
            capture_id: Some(format!("CAP-{handle}")),
            captured: self.amounts.lock().unwrap().get(handle).cloned(),
            payer: Some("buyer@example.com".into()),
        })
    }
}

/// How the mock generator answers one call.
#[derive(Clone, Debug)]
pub enum GenerateScript {
    Reply(String),
    Fail(String),
    Hang,
}

#[derive(Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<GenerateScript>>,
    pub calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn push(&self, step: GenerateScript) {
        self.script.lock().unwrap().push_back(step);
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate(&self, source: &str, options: &GenerationOptions) -> BillingResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| GenerateScript::Reply(format!("[{}] {source}", options.tone)));
        match step {
            GenerateScript::Reply(text) => Ok(text),
            GenerateScript::Fail(reason) => Err(BillingError::external("post generator", reason)),
            GenerateScript::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("generation should have timed out")
            }
        }
    }
}

pub struct Harness {
    pub tenant: TenantId,
    pub ledger: Arc<InMemoryLedger>,
    pub processor: Arc<MockProcessor>,
    pub generator: Arc<ScriptedGenerator>,
    pub catalog: Arc<InMemoryPlanCatalog>,
    pub directory: Arc<InMemoryDirectory>,
    pub service: BillingService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(BillingConfig {
            generation_timeout_secs: 1,
            capture_timeout_secs: 1,
            ..BillingConfig::default()
        })
    }

    pub fn with_config(config: BillingConfig) -> Self {
        let tenant = config.default_tenant.clone();
        let ledger = Arc::new(InMemoryLedger::default());
        let processor = Arc::new(MockProcessor::default());
        let generator = Arc::new(ScriptedGenerator::default());
        let catalog = Arc::new(InMemoryPlanCatalog::new());
        let directory = Arc::new(InMemoryDirectory::new());

        catalog.insert_plan(
            &tenant,
            Plan {
                id: PlanId::new("starter"),
                name: "Starter".into(),
                price: Money::new(1000, "USD").unwrap(),
                credits: 100,
                active: true,
            },
        );
        catalog.insert_plan(
            &tenant,
            Plan {
                id: PlanId::new("free"),
                name: "Free".into(),
                price: Money::new(0, "USD").unwrap(),
                credits: 5,
                active: true,
            },
        );

        let service = BillingService::new(
            ledger.clone(),
            Collaborators {
                processor: processor.clone(),
                generator: generator.clone(),
                catalog: catalog.clone(),
                directory: directory.clone(),
            },
            config,
        );

        Self {
            tenant,
            ledger,
            processor,
            generator,
            catalog,
            directory,
            service,
        }
    }

    /// A registered user holding `credits` from an operator grant.
    pub fn user(&self, name: &str, credits: i64) -> AccountId {
        let account = AccountId::new();
        self.directory.register(&self.tenant, account, name);
        self.ledger.open_account(&self.tenant, account).unwrap();
        if credits > 0 {
            self.ledger
                .apply_adjustment(&self.tenant, account, credits, "test", "starting credits")
                .unwrap();
        }
        account
    }

    pub fn remaining(&self, account: AccountId) -> u64 {
        self.ledger
            .balance(&Scope::tenant(self.tenant.clone()), account)
            .unwrap()
            .map_or(0, |b| b.credits_remaining)
    }

    pub fn total(&self, account: AccountId) -> u64 {
        self.ledger
            .balance(&Scope::tenant(self.tenant.clone()), account)
            .unwrap()
            .map_or(0, |b| b.credits_total)
    }
}
