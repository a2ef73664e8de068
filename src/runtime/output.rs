// src/runtime/output.rs
//! Output guard: bounds captured container output
//!
//! Accumulates per-session output up to a configured ceiling. The chunk that
//! crosses the ceiling is clipped and signalled once; everything after is
//! discarded silently. Truncation is a data policy only; terminating the
//! process remains the lifecycle manager's decision.

use bytes::{Bytes, BytesMut};

/// Result of appending a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Chunk stored in full
    Accepted,

    /// Ceiling reached on this chunk; the single truncation notice
    Truncated,

    /// Output already truncated; chunk dropped without further notice
    Discarded,
}

/// Captured output state for one session
#[derive(Debug, Default)]
pub struct CapturedOutput {
    buffer: BytesMut,
    truncated: bool,
    dropped_bytes: u64,
}

impl CapturedOutput {
    /// Bytes captured so far (never exceeds the guard ceiling)
    pub fn captured_bytes(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// Whether the ceiling was hit
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Bytes dropped after the ceiling was hit
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    /// Snapshot of the captured bytes
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buffer)
    }
}

/// Enforces the per-session captured-output ceiling
#[derive(Debug, Clone)]
pub struct OutputGuard {
    max_bytes: usize,
}

impl OutputGuard {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes: max_bytes as usize,
        }
    }

    /// Append a chunk to a session's captured output
    pub fn append(&self, output: &mut CapturedOutput, chunk: &[u8]) -> AppendOutcome {
        if output.truncated {
            output.dropped_bytes += chunk.len() as u64;
            return AppendOutcome::Discarded;
        }

        let remaining = self.max_bytes - output.buffer.len();
        if chunk.len() <= remaining {
            output.buffer.extend_from_slice(chunk);
            return AppendOutcome::Accepted;
        }

        // Clip the crossing chunk so the stored total never exceeds the
        // ceiling, then emit the one truncation notice.
        output.buffer.extend_from_slice(&chunk[..remaining]);
        output.truncated = true;
        output.dropped_bytes += (chunk.len() - remaining) as u64;

        AppendOutcome::Truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_under_limit() {
        let guard = OutputGuard::new(16);
        let mut output = CapturedOutput::default();

        assert_eq!(guard.append(&mut output, b"hello"), AppendOutcome::Accepted);
        assert_eq!(output.captured_bytes(), 5);
        assert!(!output.truncated());
    }

    #[test]
    fn test_exactly_filling_limit_is_accepted() {
        let guard = OutputGuard::new(4);
        let mut output = CapturedOutput::default();

        assert_eq!(guard.append(&mut output, b"abcd"), AppendOutcome::Accepted);
        assert!(!output.truncated());
        assert_eq!(output.captured_bytes(), 4);
    }

    #[test]
    fn test_crossing_chunk_is_clipped_with_single_notice() {
        let guard = OutputGuard::new(8);
        let mut output = CapturedOutput::default();

        assert_eq!(guard.append(&mut output, b"abcde"), AppendOutcome::Accepted);
        assert_eq!(guard.append(&mut output, b"fghij"), AppendOutcome::Truncated);

        assert_eq!(output.captured_bytes(), 8);
        assert_eq!(output.snapshot().as_ref(), b"abcdefgh");
        assert_eq!(output.dropped_bytes(), 2);
    }

    #[test]
    fn test_subsequent_chunks_discarded_silently() {
        let guard = OutputGuard::new(4);
        let mut output = CapturedOutput::default();

        assert_eq!(guard.append(&mut output, b"abcdef"), AppendOutcome::Truncated);
        assert_eq!(guard.append(&mut output, b"more"), AppendOutcome::Discarded);
        assert_eq!(guard.append(&mut output, b"even more"), AppendOutcome::Discarded);

        assert_eq!(output.captured_bytes(), 4);
        assert_eq!(output.dropped_bytes(), 2 + 4 + 9);
    }

    #[test]
    fn test_total_never_exceeds_ceiling() {
        let guard = OutputGuard::new(100);
        let mut output = CapturedOutput::default();

        for _ in 0..50 {
            guard.append(&mut output, &[0u8; 7]);
        }

        assert!(output.captured_bytes() <= 100);
        assert_eq!(output.captured_bytes(), 100);
        assert!(output.truncated());
    }
}
