//! statesman: a versioned, lockable, access-controlled store for Terraform state,
//! served over the Terraform http backend protocol and a management API.

pub mod config;
pub mod deps;
pub mod error;
pub mod identity;
pub mod index;
pub mod rbac;
pub mod server;
pub mod storage;
