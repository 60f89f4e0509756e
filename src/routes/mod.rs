//! Router builders.

mod common;
mod tenant;

pub use common::common_routes;
pub use tenant::{admin_routes, app_routes, tenant_routes};
