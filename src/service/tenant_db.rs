//! Data-access entry point: every persistence call asks here for the pool its model class routes to.

use crate::context::TenantContext;
use crate::error::TenancyError;
use crate::registry::AliasRegistry;
use crate::router::{DbRouter, DbTarget, ModelClass};
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct TenantDb {
    master: PgPool,
    registry: Arc<AliasRegistry>,
    router: DbRouter,
}

impl TenantDb {
    pub fn new(master: PgPool, registry: Arc<AliasRegistry>, router: DbRouter) -> Self {
        TenantDb {
            master,
            registry,
            router,
        }
    }

    pub fn router(&self) -> &DbRouter {
        &self.router
    }

    pub fn master(&self) -> &PgPool {
        &self.master
    }

    pub fn target(&self, class: ModelClass, ctx: &TenantContext) -> Result<DbTarget, TenancyError> {
        self.router.target_for(class, ctx)
    }

    /// Pool serving `target`. A tenant target must be registered.
    pub fn pool_for_target(&self, target: &DbTarget) -> Result<PgPool, TenancyError> {
        match target {
            DbTarget::Master => Ok(self.master.clone()),
            DbTarget::Tenant(alias) => self
                .registry
                .get(alias)
                .map(|conn| conn.pool.clone())
                .ok_or_else(|| TenancyError::AliasNotRegistered(alias.clone())),
        }
    }

    /// Pool for a model of `class` in the request described by `ctx`.
    pub fn pool(&self, class: ModelClass, ctx: &TenantContext) -> Result<PgPool, TenancyError> {
        let target = self.target(class, ctx)?;
        self.pool_for_target(&target)
    }

    /// Guard to call before persisting a relation between entities loaded from `left` and `right`.
    pub fn ensure_same_store(&self, left: &DbTarget, right: &DbTarget) -> Result<(), TenancyError> {
        if self.router.allow_relation(left, right) {
            Ok(())
        } else {
            tracing::warn!(left = %left, right = %right, "rejected cross-store relation");
            Err(TenancyError::CrossStoreRelation {
                left: left.to_string(),
                right: right.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TenantDbConfig;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use std::time::Duration;

    fn tenant_config(database: &str) -> TenantDbConfig {
        TenantDbConfig {
            host: "127.0.0.1".into(),
            port: 5432,
            database: database.into(),
            user: "u".into(),
            password: "p".into(),
            max_age: Duration::from_secs(60),
            health_check: true,
            connect_timeout: Duration::from_secs(1),
            max_connections: 1,
        }
    }

    fn db(registry: Arc<AliasRegistry>) -> TenantDb {
        let master = PgPoolOptions::new().connect_lazy_with(PgConnectOptions::new().database("master"));
        TenantDb::new(master, registry, DbRouter::default())
    }

    #[tokio::test]
    async fn routes_tenant_models_to_registered_pool() {
        let registry = Arc::new(AliasRegistry::new());
        let conn = registry.register("client_1", tenant_config("t1")).connection().clone();
        let db = db(registry);

        let ctx = TenantContext::for_alias("client_1");
        let pool = db.pool(ModelClass::TenantScoped, &ctx).unwrap();
        assert_eq!(pool.connect_options().get_database(), conn.pool.connect_options().get_database());
        assert_eq!(pool.connect_options().get_database(), Some("t1"));

        let master = db.pool(ModelClass::Fixed, &ctx).unwrap();
        assert_eq!(master.connect_options().get_database(), Some("master"));
    }

    #[tokio::test]
    async fn missing_context_or_registration_is_an_error() {
        let db = db(Arc::new(AliasRegistry::new()));
        assert!(matches!(
            db.pool(ModelClass::TenantScoped, &TenantContext::unresolved()),
            Err(TenancyError::TenantAliasMissing)
        ));
        assert!(matches!(
            db.pool(ModelClass::TenantScoped, &TenantContext::for_alias("client_9")),
            Err(TenancyError::AliasNotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn relation_across_tenants_fails() {
        let db = db(Arc::new(AliasRegistry::new()));
        let a = DbTarget::Tenant("client_1".into());
        let b = DbTarget::Tenant("client_2".into());
        assert!(matches!(db.ensure_same_store(&a, &b), Err(TenancyError::CrossStoreRelation { .. })));
        assert!(db.ensure_same_store(&a, &a.clone()).is_ok());
    }
}
