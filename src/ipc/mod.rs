// src/ipc/mod.rs
//! Polling-based IPC between the host and running containers
//!
//! - **Message**: request/response units keyed by session id and sequence
//! - **Channel**: file-artifact conduit under each session's IPC directory
//! - **Poller**: cooperative tick loop driving response delivery
//!
//! There is no shared memory and no long-lived socket: the host writes
//! request artifacts once, the container leaves response artifacts, and a
//! single poll loop checks every running session each tick.

pub mod channel;
pub mod message;
pub mod poller;

// Re-export commonly used types
pub use channel::SessionChannel;
pub use message::{IpcRequest, IpcResponse};
pub use poller::IpcPoller;
