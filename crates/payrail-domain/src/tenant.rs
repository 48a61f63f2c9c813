//! Tenant scoping.
//!
//! Every request and every aggregate carries an explicit `TenantContext`;
//! there is no ambient "current tenant". Queries are scoped by
//! `(tenant_id, business_unit)` and must never observe another tenant's
//! aggregates.

use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Two-level scope used for isolation and for selecting applicable rules.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantContext {
    tenant_id: String,
    business_unit: Option<String>,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>) -> Result<Self, DomainError> {
        let tenant_id = tenant_id.into();
        if tenant_id.trim().is_empty() {
            return Err(DomainError::EmptyIdentifier("tenant id"));
        }
        Ok(Self {
            tenant_id,
            business_unit: None,
        })
    }

    pub fn with_business_unit(mut self, business_unit: impl Into<String>) -> Self {
        self.business_unit = Some(business_unit.into());
        self
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn business_unit(&self) -> Option<&str> {
        self.business_unit.as_deref()
    }

    /// Whether an aggregate stored under this context may be returned to a
    /// caller holding `scope`. Tenants never match across ids; a scope
    /// without a business unit sees all of its tenant's business units.
    pub fn visible_to(&self, scope: &TenantContext) -> bool {
        if self.tenant_id != scope.tenant_id {
            return false;
        }
        match scope.business_unit() {
            None => true,
            Some(unit) => self.business_unit() == Some(unit),
        }
    }

    /// Rule-selection scoping: a rule authored without a business unit
    /// applies tenant-wide, one with a business unit only inside it.
    pub fn matches_rule_scope(&self, rule_business_unit: Option<&str>) -> bool {
        match rule_business_unit {
            None => true,
            Some(unit) => self.business_unit() == Some(unit),
        }
    }
}

impl fmt::Display for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.business_unit {
            Some(unit) => write!(f, "{}/{}", self.tenant_id, unit),
            None => write!(f, "{}", self.tenant_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_tenant() {
        assert!(TenantContext::new("").is_err());
    }

    #[test]
    fn cross_tenant_is_never_visible() {
        let t1 = TenantContext::new("T1").unwrap();
        let t2 = TenantContext::new("T2").unwrap();
        assert!(!t1.visible_to(&t2));
        assert!(t1.visible_to(&t1));
    }

    #[test]
    fn business_unit_scoping() {
        let stored = TenantContext::new("T1").unwrap().with_business_unit("B1");
        let same_unit = TenantContext::new("T1").unwrap().with_business_unit("B1");
        let other_unit = TenantContext::new("T1").unwrap().with_business_unit("B2");
        let tenant_wide = TenantContext::new("T1").unwrap();

        assert!(stored.visible_to(&same_unit));
        assert!(!stored.visible_to(&other_unit));
        assert!(stored.visible_to(&tenant_wide));
    }

    #[test]
    fn rule_scope_matching() {
        let ctx = TenantContext::new("T1").unwrap().with_business_unit("B1");
        assert!(ctx.matches_rule_scope(None));
        assert!(ctx.matches_rule_scope(Some("B1")));
        assert!(!ctx.matches_rule_scope(Some("B2")));
    }
}
