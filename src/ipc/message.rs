// src/ipc/message.rs
//! IPC message units
//!
//! Requests and responses are keyed by session id plus a per-session
//! monotonically increasing sequence number. Delivery is at most once per
//! polling cycle; duplicates across cycles are ignored by sequence number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runtime::session::SessionId;

/// Request written once by the host into a session's IPC directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcRequest {
    pub session_id: SessionId,

    /// Per-session monotonically increasing sequence number
    pub seq: u64,

    pub sent_at: DateTime<Utc>,

    pub payload: serde_json::Value,
}

/// Response artifact produced by the container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
    pub session_id: SessionId,

    /// Sequence number this response answers
    pub seq: u64,

    pub produced_at: DateTime<Utc>,

    pub payload: serde_json::Value,
}
