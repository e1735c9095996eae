use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};

use inkpost_types::{AccountId, ReferralCode, TenantId};
use tracing::debug;

use crate::error::{BillingError, BillingResult};

/// Attempts to draw an unused code before giving up.
const MAX_ATTEMPTS: usize = 16;

/// One referral code per account, issued on first request and never
/// changed afterwards. Codes are unique within a tenant.
pub struct CodeRegistry {
    code_length: usize,
    inner: RwLock<CodeState>,
}

#[derive(Default)]
struct CodeState {
    by_account: HashMap<(TenantId, AccountId), ReferralCode>,
    by_code: HashMap<(TenantId, ReferralCode), AccountId>,
}

impl CodeRegistry {
    pub fn new(code_length: usize) -> Self {
        Self {
            code_length,
            inner: RwLock::new(CodeState::default()),
        }
    }

    /// The account's code, issuing one if it has none yet.
    pub fn code_for(&self, tenant: &TenantId, account: AccountId) -> BillingResult<ReferralCode> {
        self.code_with(tenant, account, || ReferralCode::generate(self.code_length))
    }

    fn code_with(
        &self,
        tenant: &TenantId,
        account: AccountId,
        mut draw: impl FnMut() -> ReferralCode,
    ) -> BillingResult<ReferralCode> {
        let key = (tenant.clone(), account);
        if let Some(code) = self.read_existing(&key)? {
            return Ok(code);
        }

        let mut state = self.write_state()?;
        if let Some(code) = state.by_account.get(&key) {
            return Ok(code.clone());
        }
        for _ in 0..MAX_ATTEMPTS {
            let code = draw();
            let code_key = (tenant.clone(), code.clone());
            if state.by_code.contains_key(&code_key) {
                debug!(tenant = %tenant, "referral code collision, drawing again");
                continue;
            }
            state.by_code.insert(code_key, account);
            state.by_account.insert(key, code.clone());
            debug!(tenant = %tenant, account = %account, code = %code, "referral code issued");
            return Ok(code);
        }
        Err(BillingError::CodeSpaceExhausted(MAX_ATTEMPTS))
    }

    /// The account that owns `code`, if any.
    pub fn resolve(&self, tenant: &TenantId, code: &ReferralCode) -> BillingResult<Option<AccountId>> {
        let state = self.inner.read().map_err(|_| poisoned())?;
        Ok(state.by_code.get(&(tenant.clone(), code.clone())).copied())
    }

    /// Number of accounts holding a code.
    pub fn len(&self) -> BillingResult<usize> {
        let state = self.inner.read().map_err(|_| poisoned())?;
        Ok(state.by_account.len())
    }

    pub fn is_empty(&self) -> BillingResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read_existing(&self, key: &(TenantId, AccountId)) -> BillingResult<Option<ReferralCode>> {
        let state = self.inner.read().map_err(|_| poisoned())?;
        Ok(state.by_account.get(key).cloned())
    }

    fn write_state(&self) -> BillingResult<RwLockWriteGuard<'_, CodeState>> {
        self.inner.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> BillingError {
    BillingError::LockPoisoned("code registry")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn codes_are_lazy_and_stable() {
        let registry = CodeRegistry::new(8);
        let tenant = TenantId::default();
        let account = AccountId::new();
        assert!(registry.is_empty().unwrap());

        let first = registry.code_for(&tenant, account).unwrap();
        let second = registry.code_for(&tenant, account).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 8);
        assert_eq!(registry.resolve(&tenant, &first).unwrap(), Some(account));
        assert_eq!(registry.len().unwrap(), 1);
    }

    #[test]
    fn collisions_draw_again() {
        let registry = CodeRegistry::new(8);
        let tenant = TenantId::default();
        let taken = ReferralCode::parse("AAAA2222").unwrap();
        let fresh = ReferralCode::parse("BBBB3333").unwrap();

        registry
            .code_with(&tenant, AccountId::new(), || taken.clone())
            .unwrap();
        let mut draws = vec![fresh.clone(), taken.clone()];
        let code = registry
            .code_with(&tenant, AccountId::new(), || draws.pop().unwrap())
            .unwrap();
        assert_eq!(code, fresh);
    }

    #[test]
    fn exhausted_code_space_is_an_error() {
        let registry = CodeRegistry::new(8);
        let tenant = TenantId::default();
        let taken = ReferralCode::parse("AAAA2222").unwrap();
        registry
            .code_with(&tenant, AccountId::new(), || taken.clone())
            .unwrap();

        let err = registry
            .code_with(&tenant, AccountId::new(), || taken.clone())
            .unwrap_err();
        assert_eq!(err, BillingError::CodeSpaceExhausted(MAX_ATTEMPTS));
    }

    #[test]
    fn concurrent_requests_issue_one_code() {
        let registry = Arc::new(CodeRegistry::new(8));
        let account = AccountId::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.code_for(&TenantId::default(), account).unwrap())
            })
            .collect();
        let codes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(codes.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(registry.len().unwrap(), 1);
    }

    #[test]
    fn poisoned_registry_reports_lock_failure() {
        let registry = Arc::new(CodeRegistry::new(8));
        let holder = Arc::clone(&registry);
        let _ = thread::spawn(move || {
            let _guard = holder.inner.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        let poisoned = BillingError::LockPoisoned("code registry");
        assert_eq!(
            registry.code_for(&TenantId::default(), AccountId::new()).unwrap_err(),
            poisoned
        );
        assert_eq!(registry.len().unwrap_err(), poisoned);
        assert_eq!(registry.is_empty().unwrap_err(), poisoned);
    }

    #[test]
    fn unknown_code_resolves_to_none() {
        let registry = CodeRegistry::new(8);
        let code = ReferralCode::parse("ZZZZ9999").unwrap();
        assert_eq!(registry.resolve(&TenantId::default(), &code).unwrap(), None);
    }
}
