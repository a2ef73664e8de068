// src/utils/config.rs
//! Engine configuration
//!
//! Configuration is resolved exactly once at process start: an optional
//! `denbox.toml` file is layered under process environment variables, then
//! every value is coerced into the immutable `EngineConfig` struct that the
//! rest of the engine receives by reference. No component reads the ambient
//! environment after startup.
//!
//! Secrets are NOT resolved here. They stay on disk and are read only at
//! container spawn time (see `runtime::spawner`), so they never leak into
//! long-lived structures or the host process environment.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};

use crate::utils::errors::{EngineError, Result};

/// Fixed IPC polling cadence (not configurable)
pub const IPC_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Group folder used for the primary conversation namespace
pub const MAIN_GROUP_FOLDER: &str = "main";

const DEFAULT_CONTAINER_IMAGE: &str = "denbox-agent:latest";
const DEFAULT_CONTAINER_RUNTIME: &str = "docker";
const DEFAULT_CONTAINER_TIMEOUT_MS: u64 = 1_800_000; // 30min
const DEFAULT_MAX_OUTPUT_BYTES: u64 = 10_485_760; // 10MB
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 1_800_000; // 30min
const DEFAULT_MAX_CONCURRENT: usize = 5;
const DEFAULT_REAPER_SWEEP_MS: u64 = 30_000;

/// Immutable engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Image identifier passed to the container runtime
    pub container_image: String,

    /// Container runtime binary (docker, podman, ...)
    pub container_runtime: String,

    /// Hard per-session deadline, regardless of activity
    pub container_timeout: Duration,

    /// Output Guard ceiling in bytes
    pub container_max_output_size: u64,

    /// Idle Reaper window: sessions with no IPC activity for longer are stopped
    pub idle_timeout: Duration,

    /// Concurrency Gate capacity (coerced to >= 1)
    pub max_concurrent_containers: usize,

    /// Idle Reaper sweep period (coarser than the IPC poll)
    pub reaper_sweep_interval: Duration,

    /// Managed data root (IPC artifacts, session scratch)
    pub data_dir: PathBuf,

    /// One directory per logical group namespace
    pub groups_dir: PathBuf,

    /// Artifact store area
    pub store_dir: PathBuf,

    /// Mount allowlist file, outside the managed tree
    pub mount_allowlist_path: PathBuf,

    /// `.env` file read at spawn time for container credentials
    pub env_file_path: PathBuf,
}

impl EngineConfig {
    /// Resolve configuration from `denbox.toml` (optional) and the environment
    pub fn load() -> Result<Self> {
        let raw = Config::builder()
            .add_source(File::with_name("denbox").required(false))
            .add_source(Environment::default())
            .build()
            .map_err(|e| EngineError::ConfigInvalid(e.to_string()))?;

        Ok(Self::from_raw(&raw))
    }

    fn from_raw(raw: &Config) -> Self {
        let home = get_str(raw, "home", "/root");
        let default_allowlist = PathBuf::from(&home)
            .join(".config")
            .join("denbox")
            .join("mount-allowlist.json");

        Self {
            container_image: get_str(raw, "container_image", DEFAULT_CONTAINER_IMAGE),
            container_runtime: get_str(raw, "container_runtime", DEFAULT_CONTAINER_RUNTIME),
            container_timeout: get_millis(raw, "container_timeout", DEFAULT_CONTAINER_TIMEOUT_MS),
            container_max_output_size: get_u64(
                raw,
                "container_max_output_size",
                DEFAULT_MAX_OUTPUT_BYTES,
            ),
            idle_timeout: get_millis(raw, "idle_timeout", DEFAULT_IDLE_TIMEOUT_MS),
            max_concurrent_containers: get_capacity(
                raw,
                "max_concurrent_containers",
                DEFAULT_MAX_CONCURRENT,
            ),
            reaper_sweep_interval: get_millis(raw, "reaper_sweep_interval", DEFAULT_REAPER_SWEEP_MS),
            data_dir: absolutize(PathBuf::from(get_str(raw, "data_dir", "./data"))),
            groups_dir: absolutize(PathBuf::from(get_str(raw, "groups_dir", "./groups"))),
            store_dir: absolutize(PathBuf::from(get_str(raw, "store_dir", "./store"))),
            mount_allowlist_path: raw
                .get_string("mount_allowlist_path")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .map(absolutize)
                .unwrap_or(default_allowlist),
            env_file_path: absolutize(PathBuf::from(get_str(raw, "env_file", "./.env"))),
        }
    }
}

/// Mount validation works on absolute paths only, so the managed roots are
/// resolved against the working directory once, at startup.
fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(&path).components().collect(),
        Err(_) => path,
    }
}

fn get_str(raw: &Config, key: &str, default: &str) -> String {
    raw.get_string(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Positive millisecond duration; zero, negative, or unparsable -> default
fn get_millis(raw: &Config, key: &str, default_ms: u64) -> Duration {
    let ms = raw
        .get_string(key)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
        .map(|v| v as u64)
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}

fn get_u64(raw: &Config, key: &str, default: u64) -> u64 {
    raw.get_string(key)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
        .map(|v| v as u64)
        .unwrap_or(default)
}

/// Gate capacity: parsed values are clamped to >= 1, unparsable -> default
fn get_capacity(raw: &Config, key: &str, default: usize) -> usize {
    raw.get_string(key)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .map(|v| v.max(1) as usize)
        .unwrap_or(default)
}
