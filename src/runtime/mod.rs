// src/runtime/mod.rs
//! Container session runtime
//!
//! This module provides the container lifecycle core, including:
//!
//! - **Admission**: bounded concurrency gate for session admission
//! - **Lifecycle**: session creation, monitoring, and teardown
//! - **Session**: session model, registry entries, caller handles
//! - **Spawner**: container process launching and termination
//! - **Output**: captured-output ceiling enforcement
//! - **Reaper**: idle-session reclamation
//!
//! # Architecture
//!
//! ```text
//! create_session ──▶ Allowlist ──▶ Gate ──▶ Spawner ──▶ monitor task
//!                    (validate)   (admit)   (spawn)         │
//!                                                           ├─ output guard
//! IPC poller ──▶ response artifacts ──▶ caller handle       ├─ hard timeout
//! Idle reaper ──▶ stop_session(idle_reaped)                 └─ finalize
//! ```

pub mod admission;
pub mod lifecycle;
pub mod output;
pub mod reaper;
pub mod session;
pub mod spawner;

// Re-export commonly used types
pub use admission::{AdmissionGate, AdmissionPermit};
pub use lifecycle::{CreateSessionRequest, LifecycleManager};
pub use output::{AppendOutcome, CapturedOutput, OutputGuard};
pub use reaper::IdleReaper;
pub use session::{SessionHandle, SessionId, SessionInfo, SessionState, StopReason};
pub use spawner::ContainerSpawner;
