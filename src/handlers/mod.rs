//! HTTP handlers for tenant administration and tenant-scoped lookups.

pub mod tenant;
pub use tenant::*;
