use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use inkpost_types::{AccountId, SoftDeleted, TenantId};

use crate::collaborators::AccountDirectory;

#[derive(Clone, Debug)]
struct Profile {
    tenant: TenantId,
    display_name: String,
    deleted_at: Option<DateTime<Utc>>,
}

impl SoftDeleted for Profile {
    fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}

/// Account directory held in memory.
#[derive(Default)]
pub struct InMemoryDirectory {
    profiles: RwLock<HashMap<AccountId, Profile>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tenant: &TenantId, account: AccountId, display_name: &str) {
        if let Ok(mut profiles) = self.profiles.write() {
            profiles.insert(
                account,
                Profile {
                    tenant: tenant.clone(),
                    display_name: display_name.to_string(),
                    deleted_at: None,
                },
            );
        }
    }

    /// Soft-delete a profile. Returns `false` if it was unknown.
    pub fn deactivate(&self, account: AccountId) -> bool {
        let Ok(mut profiles) = self.profiles.write() else {
            return false;
        };
        match profiles.get_mut(&account) {
            Some(profile) => {
                profile.deleted_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    fn live(&self, tenant: &TenantId, account: AccountId) -> Option<Profile> {
        let scope = inkpost_types::Scope::tenant(tenant.clone());
        let profiles = self.profiles.read().ok()?;
        profiles.get(&account).filter(|p| scope.admits(*p)).cloned()
    }
}

impl AccountDirectory for InMemoryDirectory {
    fn display_name(&self, tenant: &TenantId, account: AccountId) -> Option<String> {
        self.live(tenant, account).map(|p| p.display_name)
    }

    fn is_active(&self, tenant: &TenantId, account: AccountId) -> bool {
        self.live(tenant, account).is_some()
    }
}
