// src/ipc/channel.rs
//! File-artifact IPC conduit for one session
//!
//! Layout under the session's IPC directory (bind-mounted into the
//! container at `/workspace/ipc`):
//!
//! ```text
//! <ipc_dir>/
//! ├─ requests/   req-000001.json ...   (written once by the host)
//! └─ responses/  res-000001.json ...   (left by the container)
//! ```
//!
//! Requests use create-new semantics so a sequence number can never be
//! rewritten. Responses are read by sequence number; re-reading a number
//! returns the same content and triggers nothing.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::ipc::message::{IpcRequest, IpcResponse};
use crate::utils::errors::{EngineError, Result};

/// IPC endpoints for one session
#[derive(Debug, Clone)]
pub struct SessionChannel {
    dir: PathBuf,
}

impl SessionChannel {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Session IPC root on the host
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the requests/responses directories
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.dir.join("requests"))?;
        fs::create_dir_all(self.dir.join("responses"))?;
        Ok(())
    }

    fn request_path(&self, seq: u64) -> PathBuf {
        self.dir.join("requests").join(format!("req-{seq:06}.json"))
    }

    fn response_path(&self, seq: u64) -> PathBuf {
        self.dir.join("responses").join(format!("res-{seq:06}.json"))
    }

    /// Write a request artifact. Each sequence number is written exactly
    /// once; a second write for the same number fails.
    pub fn write_request(&self, request: &IpcRequest) -> Result<()> {
        let path = self.request_path(request.seq);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    EngineError::IpcFailed(format!("request seq {} already written", request.seq))
                } else {
                    EngineError::Io(e)
                }
            })?;

        let contents = serde_json::to_vec(request)
            .map_err(|e| EngineError::IpcFailed(format!("failed to encode request: {e}")))?;
        file.write_all(&contents)?;

        Ok(())
    }

    /// Check for a response artifact with the given sequence number.
    ///
    /// Returns `Ok(None)` when the artifact is absent or not yet fully
    /// written (a half-written file parses again on a later tick).
    pub fn try_read_response(&self, seq: u64) -> Result<Option<IpcResponse>> {
        let path = self.response_path(seq);

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(EngineError::Io(e)),
        };

        match serde_json::from_str(&contents) {
            Ok(response) => Ok(Some(response)),
            Err(e) => {
                debug!(path = %path.display(), "response artifact not yet parseable: {e}");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::session::SessionId;
    use chrono::Utc;

    fn channel() -> (tempfile::TempDir, SessionChannel) {
        let dir = tempfile::tempdir().unwrap();
        let channel = SessionChannel::new(dir.path().join("ipc"));
        channel.init().unwrap();
        (dir, channel)
    }

    fn request(seq: u64) -> IpcRequest {
        IpcRequest {
            session_id: SessionId::generate(),
            seq,
            sent_at: Utc::now(),
            payload: serde_json::json!({"prompt": "hi"}),
        }
    }

    fn response(seq: u64) -> IpcResponse {
        IpcResponse {
            session_id: SessionId::generate(),
            seq,
            produced_at: Utc::now(),
            payload: serde_json::json!({"result": "done"}),
        }
    }

    #[test]
    fn test_request_written_exactly_once() {
        let (_dir, channel) = channel();

        channel.write_request(&request(1)).unwrap();
        let second = channel.write_request(&request(1));
        assert!(matches!(second, Err(EngineError::IpcFailed(_))));
    }

    #[test]
    fn test_absent_response_is_none() {
        let (_dir, channel) = channel();
        assert!(channel.try_read_response(1).unwrap().is_none());
    }

    #[test]
    fn test_response_read_is_idempotent() {
        let (_dir, channel) = channel();

        let expected = response(1);
        let contents = serde_json::to_string(&expected).unwrap();
        std::fs::write(channel.dir().join("responses").join("res-000001.json"), contents)
            .unwrap();

        let first = channel.try_read_response(1).unwrap().unwrap();
        let second = channel.try_read_response(1).unwrap().unwrap();
        assert_eq!(first, expected);
        assert_eq!(second, expected);
    }

    #[test]
    fn test_half_written_response_is_none() {
        let (_dir, channel) = channel();

        std::fs::write(
            channel.dir().join("responses").join("res-000001.json"),
            r#"{"session_id": "01ABC", "seq"#,
        )
        .unwrap();

        assert!(channel.try_read_response(1).unwrap().is_none());
    }
}
