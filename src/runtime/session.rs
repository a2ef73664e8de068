// src/runtime/session.rs
//! Container session model
//!
//! A session is one spawned isolated process tied to a logical group. All
//! shared mutable state sits behind a short-lived `parking_lot` lock inside
//! the registry entry; the lock is never held across an await point.
//!
//! State machine:
//!
//! ```text
//! PendingAdmission → Starting → Running → Draining → Stopped(reason)
//! ```
//!
//! Only the first caller to move a session out of `Running` records the
//! stop reason; later callers observe the terminal state and do nothing.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::ipc::channel::SessionChannel;
use crate::ipc::message::{IpcRequest, IpcResponse};
use crate::runtime::admission::AdmissionPermit;
use crate::runtime::output::CapturedOutput;
use crate::security::allowlist::MountSpec;
use crate::utils::errors::{EngineError, Result};

/// Unique session identifier (ULID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    PendingAdmission,
    Starting,
    Running,
    Draining,
    Stopped(StopReason),
}

/// Terminal outcome of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Container exited on its own
    Completed,

    /// Hard deadline elapsed, regardless of activity
    TimedOut,

    /// No IPC activity within the idle window
    IdleReaped,

    /// Spawn or runtime failure
    Error,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopReason::Completed => "completed",
            StopReason::TimedOut => "timed_out",
            StopReason::IdleReaped => "idle_reaped",
            StopReason::Error => "error",
        };
        f.write_str(name)
    }
}

/// Mutable session state, guarded by the entry lock
pub(crate) struct SessionInner {
    pub state: SessionState,
    pub stop_reason: Option<StopReason>,
    pub permit: Option<AdmissionPermit>,
    pub pid: Option<u32>,
    pub output: CapturedOutput,
    pub last_activity: Instant,

    /// Highest response sequence number delivered to the caller
    pub delivered_seq: u64,
}

/// Registry entry for one session
pub struct SessionEntry {
    pub id: SessionId,
    pub group_folder: String,
    pub container_name: String,

    /// Immutable after spawn
    pub mounts: Vec<MountSpec>,

    pub started_at: DateTime<Utc>,
    pub channel: SessionChannel,

    /// Fires when the session must tear down; monitor task listens
    pub cancel: CancellationToken,

    pub(crate) inner: Mutex<SessionInner>,
    pub(crate) response_tx: mpsc::UnboundedSender<IpcResponse>,
    stopped: Notify,
    request_seq: AtomicU64,
}

impl SessionEntry {
    pub(crate) fn new(
        id: SessionId,
        group_folder: String,
        container_name: String,
        mounts: Vec<MountSpec>,
        channel: SessionChannel,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<IpcResponse>) {
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let entry = Arc::new(Self {
            id,
            group_folder,
            container_name,
            mounts,
            started_at: Utc::now(),
            channel,
            cancel: CancellationToken::new(),
            inner: Mutex::new(SessionInner {
                state: SessionState::PendingAdmission,
                stop_reason: None,
                permit: None,
                pid: None,
                output: CapturedOutput::default(),
                last_activity: Instant::now(),
                delivered_seq: 0,
            }),
            response_tx,
            stopped: Notify::new(),
            request_seq: AtomicU64::new(0),
        });

        (entry, response_rx)
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Time since the last IPC exchange
    pub fn idle_for(&self) -> Duration {
        self.inner.lock().last_activity.elapsed()
    }

    /// Transition `PendingAdmission` to `Starting` once a gate permit is held
    pub(crate) fn mark_starting(&self) {
        self.inner.lock().state = SessionState::Starting;
    }

    /// Transition `Starting` to `Running`, storing the admission permit and
    /// the child pid
    pub(crate) fn mark_running(&self, permit: AdmissionPermit, pid: Option<u32>) {
        let mut inner = self.inner.lock();
        inner.state = SessionState::Running;
        inner.permit = Some(permit);
        inner.pid = pid;
        inner.last_activity = Instant::now();
    }

    /// Claim the teardown of this session. Returns true for the first
    /// caller to move it out of `Starting`/`Running`; every later call is a
    /// no-op returning false.
    pub(crate) fn begin_stop(&self, reason: StopReason) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Starting | SessionState::Running => {
                inner.state = SessionState::Draining;
                inner.stop_reason = Some(reason);
                true
            }
            _ => false,
        }
    }

    /// Enter the terminal state and release the admission permit.
    ///
    /// Returns the recorded stop reason for the single caller that performs
    /// the finalization; `None` if the session is already stopped.
    pub(crate) fn finalize(&self) -> Option<StopReason> {
        let (reason, permit) = {
            let mut inner = self.inner.lock();
            if matches!(inner.state, SessionState::Stopped(_)) {
                return None;
            }
            let reason = inner.stop_reason.unwrap_or(StopReason::Completed);
            inner.state = SessionState::Stopped(reason);
            (reason, inner.permit.take())
        };

        // Permit drop releases the gate slot exactly once.
        drop(permit);
        self.stopped.notify_waiters();

        Some(reason)
    }

    /// Wait until the session reaches a terminal state
    pub async fn wait_stopped(&self) -> StopReason {
        loop {
            let notified = self.stopped.notified();
            tokio::pin!(notified);
            // Register before checking the state; notify_waiters only wakes
            // already-registered waiters.
            notified.as_mut().enable();

            if let SessionState::Stopped(reason) = self.state() {
                return reason;
            }
            notified.await;
        }
    }

    /// Next request sequence number
    pub(crate) fn next_request_seq(&self) -> u64 {
        self.request_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Point-in-time snapshot for callers
    pub fn info(&self) -> SessionInfo {
        let inner = self.inner.lock();
        SessionInfo {
            id: self.id.clone(),
            group_folder: self.group_folder.clone(),
            container_name: self.container_name.clone(),
            state: inner.state,
            pid: inner.pid,
            started_at: self.started_at,
            captured_output_bytes: inner.output.captured_bytes(),
            output_truncated: inner.output.truncated(),
            idle_ms: inner.last_activity.elapsed().as_millis() as u64,
        }
    }
}

/// Snapshot of a session's externally visible state
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub group_folder: String,
    pub container_name: String,
    pub state: SessionState,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub captured_output_bytes: u64,
    pub output_truncated: bool,
    pub idle_ms: u64,
}

/// Caller-facing handle to a running session
pub struct SessionHandle {
    entry: Arc<SessionEntry>,
    responses: mpsc::UnboundedReceiver<IpcResponse>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.entry.id)
            .field("group_folder", &self.entry.group_folder)
            .field("state", &self.entry.state())
            .finish()
    }
}

impl SessionHandle {
    pub(crate) fn new(
        entry: Arc<SessionEntry>,
        responses: mpsc::UnboundedReceiver<IpcResponse>,
    ) -> Self {
        Self { entry, responses }
    }

    pub fn id(&self) -> &SessionId {
        &self.entry.id
    }

    pub fn group_folder(&self) -> &str {
        &self.entry.group_folder
    }

    pub fn state(&self) -> SessionState {
        self.entry.state()
    }

    pub fn info(&self) -> SessionInfo {
        self.entry.info()
    }

    /// Write a request artifact for the container. Requests are written
    /// once; the returned sequence number identifies the response.
    pub fn send_request(&self, payload: serde_json::Value) -> Result<u64> {
        if !matches!(self.entry.state(), SessionState::Running) {
            return Err(EngineError::IpcFailed(format!(
                "session {} is not running",
                self.entry.id
            )));
        }

        let seq = self.entry.next_request_seq();
        let request = IpcRequest {
            session_id: self.entry.id.clone(),
            seq,
            sent_at: Utc::now(),
            payload,
        };

        self.entry.channel.write_request(&request)?;
        Ok(seq)
    }

    /// Await the next delivered response
    pub async fn recv_response(&mut self) -> Option<IpcResponse> {
        self.responses.recv().await
    }

    /// Non-blocking response check
    pub fn try_recv_response(&mut self) -> Option<IpcResponse> {
        self.responses.try_recv().ok()
    }

    /// Wait until the session reaches a terminal state
    pub async fn wait_stopped(&self) -> StopReason {
        self.entry.wait_stopped().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::admission::AdmissionGate;

    fn entry() -> Arc<SessionEntry> {
        let (entry, _rx) = SessionEntry::new(
            SessionId::generate(),
            "main".to_string(),
            "denbox-main-test".to_string(),
            vec![],
            SessionChannel::new("/tmp/denbox-test-ipc"),
        );
        entry
    }

    #[tokio::test]
    async fn test_first_stop_claims_teardown() {
        let gate = AdmissionGate::new(1);
        let permit = gate.acquire().await.unwrap();

        let entry = entry();
        entry.mark_running(permit, Some(42));

        assert!(entry.begin_stop(StopReason::TimedOut));
        assert!(!entry.begin_stop(StopReason::IdleReaped));
        assert_eq!(entry.state(), SessionState::Draining);

        assert_eq!(entry.finalize(), Some(StopReason::TimedOut));
        assert_eq!(entry.state(), SessionState::Stopped(StopReason::TimedOut));
    }

    #[tokio::test]
    async fn test_finalize_releases_permit_exactly_once() {
        let gate = AdmissionGate::new(1);
        let permit = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);

        let entry = entry();
        entry.mark_running(permit, None);
        entry.begin_stop(StopReason::Completed);

        assert_eq!(entry.finalize(), Some(StopReason::Completed));
        assert_eq!(gate.available(), 1);

        // Second finalize is a no-op; the gate is not double-released.
        assert_eq!(entry.finalize(), None);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_wait_stopped_observes_terminal_state() {
        let gate = AdmissionGate::new(1);
        let permit = gate.acquire().await.unwrap();

        let entry = entry();
        entry.mark_running(permit, None);

        let waiter = {
            let entry = Arc::clone(&entry);
            tokio::spawn(async move { entry.wait_stopped().await })
        };

        entry.begin_stop(StopReason::IdleReaped);
        entry.finalize();

        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter did not finish")
            .unwrap();
        assert_eq!(reason, StopReason::IdleReaped);
    }

    #[test]
    fn test_request_seq_is_monotonic() {
        let entry = entry();
        assert_eq!(entry.next_request_seq(), 1);
        assert_eq!(entry.next_request_seq(), 2);
        assert_eq!(entry.next_request_seq(), 3);
    }
}
