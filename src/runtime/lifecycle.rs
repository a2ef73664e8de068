// src/runtime/lifecycle.rs
//! Container lifecycle manager
//!
//! Owns the session registry and drives every session through
//! `PendingAdmission → Starting → Running → Draining → Stopped`:
//!
//! 1. Validate the full mount set against the allowlist (cheap checks
//!    before expensive admission)
//! 2. Acquire a concurrency-gate permit (may queue the caller)
//! 3. Create the session's group and IPC directories, spawn the container
//! 4. On success: mark running, start the monitor task, arm the hard
//!    timeout
//! 5. On spawn failure: release the permit, record `Stopped(Error)`,
//!    surface the cause
//!
//! Teardown is initiated by `stop_session` (from external callers, the
//! hard-timeout timer, or the idle reaper, whichever claims the session
//! first) and completed by the monitor task, which terminates the child and
//! releases the gate permit exactly once. Slow spawn/kill work never runs
//! on the IPC polling tick.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::ipc::channel::SessionChannel;
use crate::runtime::admission::AdmissionGate;
use crate::runtime::output::{AppendOutcome, OutputGuard};
use crate::runtime::session::{
    SessionEntry, SessionHandle, SessionId, SessionInfo, SessionState, StopReason,
};
use crate::runtime::spawner::{terminate_child, ContainerSpawner};
use crate::security::allowlist::{MountAllowlist, MountSpec};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};

/// Grace period between SIGTERM and SIGKILL at teardown
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Parameters for one session
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    /// Logical namespace; maps to a directory under the groups root
    pub group_folder: String,

    /// Extra mounts beyond the built-in group and IPC directories; every
    /// host path must be covered by the allowlist
    pub mounts: Vec<MountSpec>,

    /// How long to wait at the concurrency gate. `None` queues until
    /// capacity frees.
    pub admission_timeout: Option<Duration>,
}

impl CreateSessionRequest {
    pub fn new(group_folder: impl Into<String>) -> Self {
        Self {
            group_folder: group_folder.into(),
            mounts: Vec::new(),
            admission_timeout: None,
        }
    }
}

/// Creates, monitors, and tears down container sessions
pub struct LifecycleManager {
    config: EngineConfig,
    allowlist: MountAllowlist,
    gate: AdmissionGate,
    guard: OutputGuard,
    spawner: ContainerSpawner,
    sessions: DashMap<SessionId, Arc<SessionEntry>>,
}

impl LifecycleManager {
    pub fn new(config: EngineConfig, allowlist: MountAllowlist) -> Self {
        let gate = AdmissionGate::new(config.max_concurrent_containers);
        let guard = OutputGuard::new(config.container_max_output_size);
        let spawner = ContainerSpawner::new(
            config.container_runtime.clone(),
            config.container_image.clone(),
            config.env_file_path.clone(),
        );

        Self {
            config,
            allowlist,
            gate,
            guard,
            spawner,
            sessions: DashMap::new(),
        }
    }

    /// Engine configuration (immutable)
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Free slots at the concurrency gate
    pub fn available_capacity(&self) -> usize {
        self.gate.available()
    }

    /// Sessions currently in `Starting` or `Running`
    pub fn running_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| {
                matches!(
                    entry.value().state(),
                    SessionState::Starting | SessionState::Running
                )
            })
            .count()
    }

    /// Create and start a session for a group
    pub async fn create_session(
        self: &Arc<Self>,
        request: CreateSessionRequest,
    ) -> Result<SessionHandle> {
        let session_id = SessionId::generate();
        let container_name = format!(
            "denbox-{}-{}",
            sanitize_container_name(&request.group_folder),
            session_id
        );

        // 1. Validate the complete mount set before admission
        let mounts = self.build_mounts(&session_id, &request);
        self.allowlist.validate_mounts(&mounts)?;

        let channel = SessionChannel::new(self.ipc_dir(&session_id));
        let (entry, responses) = SessionEntry::new(
            session_id.clone(),
            request.group_folder.clone(),
            container_name,
            mounts,
            channel,
        );

        // 2. Admission
        let permit = match request.admission_timeout {
            Some(deadline) => self.gate.acquire_timeout(deadline).await?,
            None => self.gate.acquire().await?,
        };

        // 3. Starting
        entry.mark_starting();
        self.sessions.insert(session_id.clone(), Arc::clone(&entry));

        if let Err(e) = self.prepare_session_dirs(&entry) {
            entry.begin_stop(StopReason::Error);
            entry.finalize();
            return Err(e);
        }

        let child = match self.spawner.spawn(&entry.container_name, &entry.mounts) {
            Ok(child) => child,
            Err(e) => {
                // The local permit drops here, releasing the gate slot.
                entry.begin_stop(StopReason::Error);
                entry.finalize();
                warn!(session = %session_id, "spawn failed: {e}");
                return Err(e);
            }
        };

        // 4. Running
        let pid = child.id();
        entry.mark_running(permit, pid);

        self.spawn_monitor(Arc::clone(&entry), child);
        self.spawn_hard_timeout(Arc::clone(&entry));

        info!(
            session = %entry.id,
            group = %entry.group_folder,
            pid = ?pid,
            "session running"
        );

        Ok(SessionHandle::new(entry, responses))
    }

    /// Initiate teardown of a session.
    ///
    /// Returns `Ok(true)` if this call claimed the teardown, `Ok(false)` if
    /// the session was already draining or stopped (idempotent no-op). The
    /// monitor task terminates the child and releases the gate permit;
    /// callers can await `SessionHandle::wait_stopped` for completion.
    pub fn stop_session(&self, id: &SessionId, reason: StopReason) -> Result<bool> {
        let entry = match self.sessions.get(id) {
            Some(entry) => Arc::clone(entry.value()),
            None => return Err(EngineError::SessionNotFound(id.to_string())),
        };

        if !entry.begin_stop(reason) {
            return Ok(false);
        }

        info!(session = %id, %reason, "stopping session");
        entry.cancel.cancel();

        Ok(true)
    }

    /// One IPC polling tick: check every running session for its next
    /// response artifact, deliver at most one response per session, and
    /// refresh `last_activity` on delivery. Never blocks waiting for an
    /// artifact.
    pub fn poll_ipc_once(&self) {
        for session in self.sessions.iter() {
            let entry = session.value();

            let next_seq = {
                let inner = entry.inner.lock();
                if !matches!(inner.state, SessionState::Running) {
                    continue;
                }
                inner.delivered_seq + 1
            };

            match entry.channel.try_read_response(next_seq) {
                Ok(Some(response)) => {
                    let mut inner = entry.inner.lock();
                    // Re-check under the lock; a concurrent tick or stop may
                    // have advanced the session.
                    if matches!(inner.state, SessionState::Running)
                        && inner.delivered_seq + 1 == next_seq
                    {
                        inner.delivered_seq = next_seq;
                        inner.last_activity = Instant::now();
                        debug!(session = %entry.id, seq = next_seq, "response delivered");
                        let _ = entry.response_tx.send(response);
                    }
                }
                Ok(None) => {}
                Err(e) => debug!(session = %entry.id, "IPC poll error: {e}"),
            }
        }
    }

    /// One idle sweep: stop every running session whose last IPC activity
    /// is older than the idle window
    pub fn reap_idle_once(&self) {
        let idle_timeout = self.config.idle_timeout;

        let mut idle = Vec::new();
        for session in self.sessions.iter() {
            let entry = session.value();
            let over_window = {
                let inner = entry.inner.lock();
                matches!(inner.state, SessionState::Running)
                    && inner.last_activity.elapsed() > idle_timeout
            };
            if over_window {
                idle.push(entry.id.clone());
            }
        }

        for id in idle {
            if let Ok(true) = self.stop_session(&id, StopReason::IdleReaped) {
                info!(session = %id, "idle session reaped");
            }
        }
    }

    /// Snapshot of one session
    pub fn session_info(&self, id: &SessionId) -> Option<SessionInfo> {
        self.sessions.get(id).map(|entry| entry.value().info())
    }

    /// Snapshot of every known session, including recently stopped ones
    pub fn sessions_info(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| entry.value().info())
            .collect()
    }

    /// Captured (possibly truncated) output of a session
    pub fn session_output(&self, id: &SessionId) -> Option<Bytes> {
        self.sessions.get(id).map(|entry| {
            let inner = entry.value().inner.lock();
            inner.output.snapshot()
        })
    }

    /// Stop all live sessions and wait for their teardown
    pub async fn shutdown(&self) {
        info!("stopping all sessions");

        let entries: Vec<Arc<SessionEntry>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for entry in &entries {
            if entry.begin_stop(StopReason::Completed) {
                entry.cancel.cancel();
            }
        }

        let drained = entries.iter().map(|entry| entry.wait_stopped());
        let _ = tokio::time::timeout(Duration::from_secs(10), futures::future::join_all(drained))
            .await;
    }

    fn ipc_dir(&self, id: &SessionId) -> PathBuf {
        self.config.data_dir.join("ipc").join(id.as_str())
    }

    /// Built-in mounts (group dir, IPC dir) plus the caller's extra mounts.
    /// All of them go through allowlist validation.
    fn build_mounts(&self, id: &SessionId, request: &CreateSessionRequest) -> Vec<MountSpec> {
        let group_dir = self.config.groups_dir.join(&request.group_folder);

        let mut mounts = vec![
            MountSpec::read_write(group_dir, "/workspace/group"),
            MountSpec::read_write(self.ipc_dir(id), "/workspace/ipc"),
        ];
        mounts.extend(request.mounts.iter().cloned());
        mounts
    }

    fn prepare_session_dirs(&self, entry: &SessionEntry) -> Result<()> {
        fs::create_dir_all(self.config.groups_dir.join(&entry.group_folder))?;
        entry.channel.init()?;
        Ok(())
    }

    /// Monitor task: owns the child process, captures its output through
    /// the guard, and performs the one and only finalization.
    fn spawn_monitor(self: &Arc<Self>, entry: Arc<SessionEntry>, mut child: Child) {
        let manager = Arc::clone(self);
        let guard = self.guard.clone();

        tokio::spawn(async move {
            let mut capture_tasks = Vec::new();
            if let Some(stream) = child.stdout.take() {
                capture_tasks.push(tokio::spawn(capture_stream(
                    Arc::clone(&entry),
                    guard.clone(),
                    stream,
                )));
            }
            if let Some(stream) = child.stderr.take() {
                capture_tasks.push(tokio::spawn(capture_stream(
                    Arc::clone(&entry),
                    guard.clone(),
                    stream,
                )));
            }

            // Child::wait is cancel safe, so losing the race to the cancel
            // branch leaves the child reapable by terminate_child below.
            let exited = tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => debug!(session = %entry.id, %status, "container exited"),
                        Err(e) => warn!(session = %entry.id, "error waiting for container: {e}"),
                    }
                    true
                }
                _ = entry.cancel.cancelled() => false,
            };

            if exited {
                // Natural exit: claim the teardown unless a stop already did.
                entry.begin_stop(StopReason::Completed);
            } else {
                terminate_child(&mut child, STOP_GRACE).await;
            }

            // Pipes hit EOF once the child is gone; drain the last chunks.
            for task in capture_tasks {
                let _ = task.await;
            }

            manager.finalize_session(&entry);
        });
    }

    /// Hard per-session deadline, independent of the idle window. Races
    /// benignly with the reaper and external stops: the loser's stop call
    /// is a no-op.
    fn spawn_hard_timeout(self: &Arc<Self>, entry: Arc<SessionEntry>) {
        let manager = Arc::clone(self);
        let deadline = self.config.container_timeout;

        tokio::spawn(async move {
            tokio::select! {
                _ = entry.cancel.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    debug!(session = %entry.id, "hard timeout fired");
                    let _ = manager.stop_session(&entry.id, StopReason::TimedOut);
                }
            }
        });
    }

    fn finalize_session(&self, entry: &Arc<SessionEntry>) {
        // Persist the captured output before the terminal transition so
        // waiters woken by it see the log on disk.
        if let Err(e) = self.write_session_log(entry) {
            warn!(session = %entry.id, "failed to write session log: {e}");
        }

        let reason = match entry.finalize() {
            Some(reason) => reason,
            None => return,
        };

        // Release the timeout task if it is still armed.
        entry.cancel.cancel();

        info!(session = %entry.id, %reason, "session stopped");
    }

    /// Persist the captured output for post-mortems
    fn write_session_log(&self, entry: &SessionEntry) -> Result<()> {
        let logs_dir = self.config.groups_dir.join(&entry.group_folder).join("logs");
        fs::create_dir_all(&logs_dir)?;

        let timestamp = entry.started_at.format("%Y%m%d-%H%M%S%.3f");
        let path = logs_dir.join(format!("container-{timestamp}.log"));

        let (snapshot, truncated) = {
            let inner = entry.inner.lock();
            (inner.output.snapshot(), inner.output.truncated())
        };

        let mut contents = format!(
            "container={}\nsession={}\ngroup={}\ncaptured_bytes={}\ntruncated={}\n\n",
            entry.container_name,
            entry.id,
            entry.group_folder,
            snapshot.len(),
            truncated
        )
        .into_bytes();
        contents.extend_from_slice(&snapshot);

        fs::write(&path, contents)?;
        Ok(())
    }
}

/// Feed one child stream through the output guard
async fn capture_stream<R>(entry: Arc<SessionEntry>, guard: OutputGuard, mut stream: R)
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let outcome = {
                    let mut inner = entry.inner.lock();
                    guard.append(&mut inner.output, &buf[..n])
                };
                if outcome == AppendOutcome::Truncated {
                    warn!(session = %entry.id, "captured output reached ceiling, truncating");
                }
            }
        }
    }
}

/// Container names allow a restricted character set; everything else
/// becomes '-'
fn sanitize_container_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Long-running stand-in for a container process
    pub const SLEEP_SCRIPT: &str = "#!/bin/sh\nexec sleep 30\n";

    /// Exits immediately after a short burst of output
    pub const ECHO_SCRIPT: &str = "#!/bin/sh\necho hello from container\n";

    /// Produces 4 KiB of output, then exits
    pub const NOISY_SCRIPT: &str = "#!/bin/sh\nhead -c 4096 /dev/zero\n";

    pub struct StubOptions {
        pub script: &'static str,
        pub runtime_override: Option<&'static str>,
        pub max_concurrent: usize,
        pub container_timeout: Duration,
        pub idle_timeout: Duration,
        pub max_output: u64,
    }

    impl Default for StubOptions {
        fn default() -> Self {
            Self {
                script: SLEEP_SCRIPT,
                runtime_override: None,
                max_concurrent: 5,
                container_timeout: Duration::from_secs(30),
                idle_timeout: Duration::from_secs(30),
                max_output: 10 * 1024 * 1024,
            }
        }
    }

    /// Keeps the backing tempdir alive for the duration of a test
    pub struct StubFixture {
        pub dir: tempfile::TempDir,
    }

    /// Manager wired to a stub container runtime (a shell script standing in
    /// for docker), with the managed roots allowlisted.
    pub fn stub_manager(options: StubOptions) -> (StubFixture, Arc<LifecycleManager>) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let runtime = root.join("stub-runtime");
        std::fs::write(&runtime, options.script).unwrap();
        std::fs::set_permissions(&runtime, std::fs::Permissions::from_mode(0o755)).unwrap();

        let allowlist_path = root.join("allowlist").join("mount-allowlist.json");
        MountAllowlist::save(
            &allowlist_path,
            &[root.join("data"), root.join("groups"), root.join("store")],
        )
        .unwrap();
        let allowlist = MountAllowlist::load(&allowlist_path).unwrap();

        let config = EngineConfig {
            container_image: "denbox-agent:test".to_string(),
            container_runtime: options
                .runtime_override
                .map(str::to_string)
                .unwrap_or_else(|| runtime.to_string_lossy().into_owned()),
            container_timeout: options.container_timeout,
            container_max_output_size: options.max_output,
            idle_timeout: options.idle_timeout,
            max_concurrent_containers: options.max_concurrent,
            reaper_sweep_interval: Duration::from_millis(50),
            data_dir: root.join("data"),
            groups_dir: root.join("groups"),
            store_dir: root.join("store"),
            mount_allowlist_path: allowlist_path,
            env_file_path: root.join(".env"),
        };

        (
            StubFixture { dir },
            Arc::new(LifecycleManager::new(config, allowlist)),
        )
    }
}
