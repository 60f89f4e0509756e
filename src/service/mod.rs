//! TenantDb: store selection for data access.

mod tenant_db;
pub use tenant_db::TenantDb;
