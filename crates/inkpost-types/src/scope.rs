use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TenantId;

/// A stored record that belongs to a tenant and may be soft-deleted.
pub trait SoftDeleted {
    fn tenant(&self) -> &TenantId;
    fn deleted_at(&self) -> Option<DateTime<Utc>>;
}

/// Storage-boundary predicate: which tenant a query runs for and whether
/// soft-deleted rows are visible.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub tenant: TenantId,
    pub include_deleted: bool,
}

impl Scope {
    /// Live records of one tenant.
    pub fn tenant(tenant: TenantId) -> Self {
        Self {
            tenant,
            include_deleted: false,
        }
    }

    /// Every record of one tenant, including soft-deleted ones (audit use).
    pub fn with_deleted(tenant: TenantId) -> Self {
        Self {
            tenant,
            include_deleted: true,
        }
    }

    /// Returns `true` if `record` is visible under this scope.
    pub fn admits<R: SoftDeleted + ?Sized>(&self, record: &R) -> bool {
        record.tenant() == &self.tenant && (self.include_deleted || record.deleted_at().is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Row {
        tenant: TenantId,
        deleted_at: Option<DateTime<Utc>>,
    }

    impl SoftDeleted for Row {
        fn tenant(&self) -> &TenantId {
            &self.tenant
        }

        fn deleted_at(&self) -> Option<DateTime<Utc>> {
            self.deleted_at
        }
    }

    #[test]
    fn scope_filters_tenant_and_deleted() {
        let acme = TenantId::new("acme").unwrap();
        let live = Row {
            tenant: acme.clone(),
            deleted_at: None,
        };
        let deleted = Row {
            tenant: acme.clone(),
            deleted_at: Some(Utc::now()),
        };
        let other = Row {
            tenant: TenantId::default(),
            deleted_at: None,
        };

        let scope = Scope::tenant(acme.clone());
        assert!(scope.admits(&live));
        assert!(!scope.admits(&deleted));
        assert!(!scope.admits(&other));

        let audit = Scope::with_deleted(acme);
        assert!(audit.admits(&deleted));
        assert!(!audit.admits(&other));
    }
}
