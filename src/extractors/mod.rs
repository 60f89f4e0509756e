pub mod tenant;
pub use tenant::{identify, TenantIdentity, TENANT_ALIAS_HEADER};
