// src/runtime/spawner.rs
//! Container process spawner
//!
//! Builds and launches one isolated container process per session using the
//! configured OCI runtime binary (docker, podman, or a stand-in for tests).
//!
//! Credentials forwarded into the container are read from the `.env` file on
//! disk at spawn time and passed as `-e` arguments only. They are never
//! exported into the host process environment and never stored in any
//! long-lived structure.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::security::allowlist::MountSpec;
use crate::utils::env_file::read_env_file;
use crate::utils::errors::{EngineError, Result};

/// Credential keys forwarded into containers
const CONTAINER_SECRET_KEYS: &[&str] = &["AGENT_API_KEY", "AGENT_API_BASE_URL"];

/// Spawns container processes for sessions
#[derive(Debug, Clone)]
pub struct ContainerSpawner {
    runtime_binary: String,
    image: String,
    env_file_path: PathBuf,
}

impl ContainerSpawner {
    pub fn new(
        runtime_binary: impl Into<String>,
        image: impl Into<String>,
        env_file_path: PathBuf,
    ) -> Self {
        Self {
            runtime_binary: runtime_binary.into(),
            image: image.into(),
            env_file_path,
        }
    }

    /// Launch the container process with the validated mount set
    pub fn spawn(&self, container_name: &str, mounts: &[MountSpec]) -> Result<Child> {
        let args = self.build_args(container_name, mounts);

        debug!(container = container_name, runtime = %self.runtime_binary, "spawning container");

        let mut command = Command::new(&self.runtime_binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = command.spawn().map_err(|e| {
            EngineError::SpawnFailed(format!(
                "failed to launch '{}' for {container_name}: {e}",
                self.runtime_binary
            ))
        })?;

        debug!(container = container_name, pid = ?child.id(), "container spawned");

        Ok(child)
    }

    fn build_args(&self, container_name: &str, mounts: &[MountSpec]) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-i".to_string(),
            "--name".to_string(),
            container_name.to_string(),
        ];

        // Secrets are read here, immediately before spawn, and go into the
        // container environment only.
        let secrets = read_env_file(&self.env_file_path, CONTAINER_SECRET_KEYS);
        for (key, value) in &secrets {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        for mount in mounts {
            if mount.readonly {
                args.push("--mount".to_string());
                args.push(format!(
                    "type=bind,source={},target={},readonly",
                    mount.host_path.display(),
                    mount.container_path
                ));
            } else {
                args.push("-v".to_string());
                args.push(format!(
                    "{}:{}",
                    mount.host_path.display(),
                    mount.container_path
                ));
            }
        }

        args.push(self.image.clone());
        args
    }
}

/// Terminate a container child: SIGTERM, a bounded grace wait, then SIGKILL.
pub(crate) async fn terminate_child(child: &mut Child, grace: Duration) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let pid = Pid::from_raw(pid as i32);
        debug!(%pid, "sending SIGTERM");
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            // Already gone is the common benign case
            debug!(%pid, "SIGTERM failed: {e}");
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            if let Some(pid) = child.id() {
                let pid = Pid::from_raw(pid as i32);
                warn!(%pid, "process did not exit in time, sending SIGKILL");
                let _ = kill(pid, Signal::SIGKILL);
            }
            let _ = child.wait().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_build_args_order_and_mounts() {
        let spawner = ContainerSpawner::new("docker", "agent:latest", PathBuf::from("/nonexistent/.env"));
        let mounts = vec![
            MountSpec::read_write("/srv/groups/main", "/workspace/group"),
            MountSpec::read_only("/srv/store", "/workspace/store"),
        ];

        let args = spawner.build_args("denbox-main-01", &mounts);

        assert_eq!(args[0], "run");
        assert!(args.contains(&"--name".to_string()));
        assert!(args.contains(&"denbox-main-01".to_string()));
        assert!(args.contains(&"/srv/groups/main:/workspace/group".to_string()));
        assert!(args.contains(
            &"type=bind,source=/srv/store,target=/workspace/store,readonly".to_string()
        ));
        assert_eq!(args.last().unwrap(), "agent:latest");
    }

    #[test]
    fn test_secrets_injected_from_env_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        let mut file = std::fs::File::create(&env_path).unwrap();
        file.write_all(b"AGENT_API_KEY=sk-test\nUNRELATED=1\n").unwrap();

        let spawner = ContainerSpawner::new("docker", "agent:latest", env_path);
        let args = spawner.build_args("denbox-main-01", &[]);

        assert!(args.contains(&"AGENT_API_KEY=sk-test".to_string()));
        assert!(!args.iter().any(|a| a.contains("UNRELATED")));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_surfaced() {
        let spawner = ContainerSpawner::new(
            "/nonexistent/runtime-binary",
            "agent:latest",
            PathBuf::from("/nonexistent/.env"),
        );

        let result = spawner.spawn("denbox-main-01", &[]);
        assert!(matches!(result, Err(EngineError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_terminate_child_reaps_process() {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();

        terminate_child(&mut child, Duration::from_secs(2)).await;
        // A reaped child no longer has a pid.
        assert!(child.id().is_none());
    }
}
