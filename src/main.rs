// src/main.rs
//! Denbox Engine
//!
//! Boots the container lifecycle core: loads the immutable configuration,
//! loads the mount allowlist, starts the IPC poller and the idle reaper,
//! and waits for shutdown. Session creation is driven by external callers
//! (the chat transport and scheduler live outside this crate).

use std::fs;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use denbox_engine::ipc::poller::IpcPoller;
use denbox_engine::observability;
use denbox_engine::runtime::lifecycle::LifecycleManager;
use denbox_engine::runtime::reaper::IdleReaper;
use denbox_engine::security::allowlist::MountAllowlist;
use denbox_engine::utils::config::EngineConfig;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    info!("Starting Denbox Engine v{}", env!("CARGO_PKG_VERSION"));

    // Configuration is resolved once; components receive it by reference.
    let config = EngineConfig::load()?;
    info!("Configuration loaded: {config:?}");

    // Managed roots must exist before any session mounts them.
    fs::create_dir_all(&config.data_dir)?;
    fs::create_dir_all(&config.groups_dir)?;
    fs::create_dir_all(&config.store_dir)?;

    let allowlist = MountAllowlist::load(&config.mount_allowlist_path)?;
    let manager = Arc::new(LifecycleManager::new(config, allowlist));

    let shutdown = CancellationToken::new();
    let poller = tokio::spawn(IpcPoller::new(Arc::clone(&manager)).run(shutdown.clone()));
    let reaper = tokio::spawn(IdleReaper::new(Arc::clone(&manager)).run(shutdown.clone()));

    info!(
        capacity = manager.config().max_concurrent_containers,
        "Engine ready, waiting for sessions"
    );

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, cleaning up...");

    shutdown.cancel();
    manager.shutdown().await;

    let _ = poller.await;
    let _ = reaper.await;

    info!("Engine stopped gracefully");
    Ok(())
}
