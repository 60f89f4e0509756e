//! Tenant server: the tenancy SDK wired into a runnable HTTP service.
//!
//! Run from repo root: `cargo run -p tenant-server`

use std::sync::Arc;
use tenancy_sdk::{
    app_routes, ensure_database_exists, AccountsClient, AliasRegistry, AppState, DbRouter, NameResolver, PgProbe,
    Provisioner, SecretDecryptor, SqlDirMigrator, TenancyConfig,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tenancy_sdk=info,tenant_server=info")),
        )
        .init();

    let config = Arc::new(TenancyConfig::from_env()?);
    tracing::debug!(config = ?config, "loaded configuration");

    ensure_database_exists(&config.database_url).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    let decryptor = SecretDecryptor::new(config.encryption_key.as_deref())?;
    if !decryptor.is_configured() {
        tracing::warn!("DB_ENCRYPTION_KEY not set; tenants with encrypted passwords cannot be provisioned");
    }
    let accounts = AccountsClient::new(
        config.accounts_url.clone(),
        config.internal_token.clone(),
        config.accounts_timeout,
    )?;
    let router = DbRouter::default();
    let mut provisioner = Provisioner::new(
        config.clone(),
        Arc::new(accounts),
        Arc::new(decryptor),
        Arc::new(PgProbe),
        Arc::new(AliasRegistry::new()),
    );
    match (&config.tenant_migrations_dir, config.auto_migrate) {
        (Some(dir), true) => {
            tracing::info!(dir = %dir.display(), "tenant migrations enabled");
            provisioner = provisioner.with_migrator(Arc::new(SqlDirMigrator::new(dir.clone(), router.clone())));
        }
        (None, true) => tracing::warn!("ASSET_AUTO_MIGRATE set without TENANT_MIGRATIONS_DIR; skipping tenant migrations"),
        _ => {}
    }
    let names = NameResolver::new(
        config.internal_master_base.clone(),
        config.internal_master_timeout,
        config.name_cache_ttl,
    )?;

    let state = AppState::new(pool, config.clone(), Arc::new(provisioner), Arc::new(names), router);
    let app = app_routes(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Tenant server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
