//! Decide which store an operation targets: the fixed (master) store or the current tenant's store.

use crate::context::TenantContext;
use crate::error::TenancyError;
use std::collections::HashSet;
use std::fmt;

/// Alias of the fixed store.
pub const MASTER_ALIAS: &str = "default";

/// Declared ownership class of a data model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModelClass {
    /// Lives only in the fixed store (auth, configuration, administrative data).
    Fixed,
    /// Lives only in the current tenant's store.
    TenantScoped,
}

impl fmt::Display for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelClass::Fixed => f.write_str("fixed"),
            ModelClass::TenantScoped => f.write_str("tenant-scoped"),
        }
    }
}

/// A concrete store an operation runs against.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DbTarget {
    Master,
    Tenant(String),
}

impl DbTarget {
    pub fn alias(&self) -> &str {
        match self {
            DbTarget::Master => MASTER_ALIAS,
            DbTarget::Tenant(alias) => alias,
        }
    }
}

impl fmt::Display for DbTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alias())
    }
}

/// Routing policy. App labels map to ownership classes; labels in neither set get no routing opinion.
#[derive(Clone, Debug)]
pub struct DbRouter {
    fixed_apps: HashSet<String>,
    tenant_apps: HashSet<String>,
}

impl Default for DbRouter {
    fn default() -> Self {
        DbRouter::new(["config", "auth", "admin", "contenttypes", "sessions"], ["api"])
    }
}

impl DbRouter {
    pub fn new<F, T, S>(fixed_apps: F, tenant_apps: T) -> Self
    where
        F: IntoIterator<Item = S>,
        T: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DbRouter {
            fixed_apps: fixed_apps.into_iter().map(Into::into).collect(),
            tenant_apps: tenant_apps.into_iter().map(Into::into).collect(),
        }
    }

    pub fn class_of(&self, app_label: &str) -> Option<ModelClass> {
        if self.fixed_apps.contains(app_label) {
            Some(ModelClass::Fixed)
        } else if self.tenant_apps.contains(app_label) {
            Some(ModelClass::TenantScoped)
        } else {
            None
        }
    }

    /// Target for reads and writes of a model of `class` in the request described by `ctx`.
    pub fn target_for(&self, class: ModelClass, ctx: &TenantContext) -> Result<DbTarget, TenancyError> {
        match class {
            ModelClass::Fixed => Ok(DbTarget::Master),
            ModelClass::TenantScoped => ctx
                .get()
                .map(|alias| DbTarget::Tenant(alias.to_string()))
                .ok_or(TenancyError::TenantAliasMissing),
        }
    }

    /// Relations are allowed only between entities living in the same store.
    pub fn allow_relation(&self, a: &DbTarget, b: &DbTarget) -> bool {
        a == b
    }

    /// Fixed-class schema changes apply only to the fixed store, tenant-scoped ones only to tenant stores.
    pub fn allow_schema_change(&self, target: &DbTarget, class: ModelClass) -> bool {
        matches!(
            (target, class),
            (DbTarget::Master, ModelClass::Fixed) | (DbTarget::Tenant(_), ModelClass::TenantScoped)
        )
    }

    /// `allow_schema_change` keyed by app label; unknown labels are never migrated.
    pub fn allow_schema_change_for_app(&self, target: &DbTarget, app_label: &str) -> bool {
        self.class_of(app_label)
            .map(|class| self.allow_schema_change(target, class))
            .unwrap_or(false)
    }
}
