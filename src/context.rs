//! Request-scoped tenant context.
//!
//! One value per request, created by the tenant middleware and carried in that request's
//! extensions; handlers receive it as an extractor and pass it down explicitly. There is no
//! thread-local or task-local copy, so concurrent requests can never observe each other's
//! value and nothing survives the request that created it.

use crate::error::TenancyError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TenantContext {
    alias: Option<String>,
}

impl TenantContext {
    /// Context of a request that has not (yet) resolved a tenant: master-only access.
    pub fn unresolved() -> Self {
        Self::default()
    }

    pub fn for_alias(alias: impl Into<String>) -> Self {
        TenantContext {
            alias: Some(alias.into()),
        }
    }

    /// Set once per request. Setting the same alias again is a no-op; switching to a
    /// different alias mid-request is refused.
    pub fn set(&mut self, alias: Option<String>) -> Result<(), TenancyError> {
        if let Some(current) = &self.alias {
            return match alias {
                Some(requested) if requested == *current => Ok(()),
                other => Err(TenancyError::ContextConflict {
                    current: current.clone(),
                    requested: other.unwrap_or_else(|| "<none>".into()),
                }),
            };
        }
        self.alias = alias;
        Ok(())
    }

    pub fn get(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn is_set(&self) -> bool {
        self.alias.is_some()
    }

    pub fn clear(&mut self) {
        self.alias = None;
    }
}
