// src/security/allowlist.rs
//! Mount allowlist validator
//!
//! Holds the persisted set of host paths permitted for container mounts.
//! The allowlist file lives OUTSIDE the managed project tree and is never a
//! legal mount target itself, so no container can read or amend it.
//!
//! A host path is allowed only if it is byte-for-byte present in the loaded
//! allowlist or is a strict descendant of an allowlisted directory entry.
//! Matching is component-wise: `/a/b` never matches an entry `/a/bc`.
//!
//! The allowlist is loaded once at startup and mutated only through the
//! explicit administrative `save` entry point, never from request handling.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::utils::errors::{EngineError, Result};

/// One host path exposed into a session's filesystem view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    /// Absolute path on the host
    pub host_path: PathBuf,

    /// Target path inside the container
    pub container_path: String,

    /// Bind read-only
    pub readonly: bool,
}

impl MountSpec {
    /// Read-write bind mount
    pub fn read_write(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            readonly: false,
        }
    }

    /// Read-only bind mount
    pub fn read_only(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            readonly: true,
        }
    }
}

/// On-disk allowlist format
#[derive(Debug, Serialize, Deserialize)]
struct AllowlistFile {
    allow: Vec<String>,
}

/// Persisted set of host paths permitted for container mounts
#[derive(Debug)]
pub struct MountAllowlist {
    /// Location of the allowlist file (itself never mountable)
    path: PathBuf,

    /// Absolute allowlisted entries
    entries: Vec<PathBuf>,
}

impl MountAllowlist {
    /// Load the allowlist from its fixed location.
    ///
    /// A missing file yields an empty allowlist: every mount request is
    /// denied until an administrator creates the file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => {
                warn!(path = %path.display(), "mount allowlist missing, denying all mounts");
                return Ok(Self {
                    path: path.to_path_buf(),
                    entries: Vec::new(),
                });
            }
        };

        let file: AllowlistFile = serde_json::from_str(&contents)
            .map_err(|e| EngineError::ConfigInvalid(format!("malformed mount allowlist: {e}")))?;

        let mut entries = Vec::with_capacity(file.allow.len());
        for raw in file.allow {
            let entry = PathBuf::from(raw);
            if !entry.is_absolute() || has_parent_refs(&entry) {
                warn!(entry = %entry.display(), "skipping non-absolute allowlist entry");
                continue;
            }
            entries.push(entry);
        }

        info!(path = %path.display(), entries = entries.len(), "mount allowlist loaded");

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Persist a new set of entries. Administrative action only; session
    /// code paths never call this.
    pub fn save(path: &Path, entries: &[PathBuf]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = AllowlistFile {
            allow: entries
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
        };

        let contents = serde_json::to_string_pretty(&file)
            .map_err(|e| EngineError::ConfigInvalid(e.to_string()))?;
        fs::write(path, contents)?;

        Ok(())
    }

    /// Allowlisted entries
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Whether a host path may be mounted into a container
    pub fn is_allowed(&self, host_path: &Path) -> bool {
        if !host_path.is_absolute() || has_parent_refs(host_path) {
            return false;
        }

        // Self-protection: mounting the allowlist file or any ancestor of it
        // would expose the file inside the container.
        if self.path.starts_with(host_path) {
            return false;
        }

        // Path::starts_with matches whole components, so an entry `/a/bc`
        // never admits `/a/b` and vice versa. Equality also matches.
        self.entries
            .iter()
            .any(|entry| host_path.starts_with(entry))
    }

    /// Validate a full mount set; fails on the first offending host path.
    pub fn validate_mounts(&self, mounts: &[MountSpec]) -> Result<()> {
        for mount in mounts {
            if !self.is_allowed(&mount.host_path) {
                return Err(EngineError::MountRejected(mount.host_path.clone()));
            }
        }
        Ok(())
    }
}

fn has_parent_refs(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::ParentDir))
}
