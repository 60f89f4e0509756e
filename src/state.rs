//! Shared application state for all routes.

use crate::config::TenancyConfig;
use crate::names::NameResolver;
use crate::provision::Provisioner;
use crate::router::DbRouter;
use crate::service::TenantDb;
use jsonwebtoken::DecodingKey;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Fixed (master) store.
    pub pool: PgPool,
    pub config: Arc<TenancyConfig>,
    pub provisioner: Arc<Provisioner>,
    pub tenant_db: TenantDb,
    pub names: Arc<NameResolver>,
    /// Bearer tokens are ignored when no secret is configured.
    pub jwt_key: Option<DecodingKey>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: Arc<TenancyConfig>,
        provisioner: Arc<Provisioner>,
        names: Arc<NameResolver>,
        router: DbRouter,
    ) -> Self {
        let tenant_db = TenantDb::new(pool.clone(), provisioner.registry().clone(), router);
        let jwt_key = config
            .jwt_secret
            .as_deref()
            .map(|secret| DecodingKey::from_secret(secret.as_bytes()));
        AppState {
            pool,
            config,
            provisioner,
            tenant_db,
            names,
            jwt_key,
        }
    }
}
