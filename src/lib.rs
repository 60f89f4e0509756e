//! Tenancy SDK: per-request tenant resolution and on-demand PostgreSQL provisioning.
//!
//! A request names its tenant (bearer JWT or `X-Tenant-Alias`); the tenant middleware makes
//! sure the tenant's database is registered, fetching credentials from the accounts service
//! on first use, and installs a request-scoped `TenantContext` that `TenantDb` routes on.

pub mod cache;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod migration;
pub mod names;
pub mod probe;
pub mod provision;
pub mod registry;
pub mod resolver;
pub mod response;
pub mod router;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;
pub mod tenant;

pub use cache::{CredentialCache, TtlCache};
pub use config::TenancyConfig;
pub use context::TenantContext;
pub use crypto::SecretDecryptor;
pub use error::{AppError, ConfigError, TenancyError};
pub use extractors::TenantIdentity;
pub use middleware::tenant_context_layer;
pub use migration::{SqlDirMigrator, TenantMigrator};
pub use names::NameResolver;
pub use probe::{ConnectivityProbe, PgProbe, ProbeOutcome};
pub use provision::Provisioner;
pub use registry::{AliasRegistry, RegisteredConnection, Registration, TenantDbConfig};
pub use resolver::{AccountsClient, CredentialSource};
pub use response::{success_one, success_one_ok};
pub use router::{DbRouter, DbTarget, ModelClass, MASTER_ALIAS};
pub use routes::{admin_routes, app_routes, common_routes, tenant_routes};
pub use service::TenantDb;
pub use state::AppState;
pub use store::ensure_database_exists;
pub use tenant::{DbPassword, TenantDescriptor, TenantKey};
