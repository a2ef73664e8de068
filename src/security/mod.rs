// src/security/mod.rs
//! Security boundary enforcement
//!
//! - **Allowlist**: persisted set of host paths permitted for container
//!   mounts, stored outside the managed tree so a compromised container
//!   cannot self-amend it

pub mod allowlist;

// Re-export commonly used types
pub use allowlist::{MountAllowlist, MountSpec};
