// src/runtime/admission.rs
//! Concurrency gate: bounded admission control for container sessions
//!
//! A counting semaphore caps how many sessions may be in `Starting` or
//! `Running` at once. Permits are RAII: dropping an `AdmissionPermit`
//! releases the slot, so every exit path (success, spawn failure, timeout,
//! teardown) releases exactly once.
//!
//! Waiters queue fairly on the underlying semaphore, so any pending acquire
//! eventually succeeds once capacity frees.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::utils::errors::{EngineError, Result};

/// Slot held by a session from admission until teardown
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Bounded admission control for container sessions
#[derive(Debug)]
pub struct AdmissionGate {
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl AdmissionGate {
    /// Create a gate with the given capacity, coerced to at least 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Acquire a permit, waiting until capacity frees
    pub async fn acquire(&self) -> Result<AdmissionPermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::AdmissionTimeout)?;

        debug!(available = self.semaphore.available_permits(), "admission permit acquired");

        Ok(AdmissionPermit { _permit: permit })
    }

    /// Acquire a permit, surfacing `AdmissionTimeout` if the gate does not
    /// free a slot within the deadline
    pub async fn acquire_timeout(&self, deadline: Duration) -> Result<AdmissionPermit> {
        match tokio::time::timeout(deadline, self.acquire()).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::AdmissionTimeout),
        }
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_coerced_to_minimum_one() {
        let gate = AdmissionGate::new(0);
        assert_eq!(gate.capacity(), 1);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_acquire_release() {
        let gate = AdmissionGate::new(2);

        let first = gate.acquire().await.unwrap();
        let _second = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);

        drop(first);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_acquire_timeout_when_gate_full() {
        let gate = AdmissionGate::new(1);
        let _held = gate.acquire().await.unwrap();

        let result = gate.acquire_timeout(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(EngineError::AdmissionTimeout)));
    }

    #[tokio::test]
    async fn test_third_acquire_waits_for_release() {
        // Capacity 2: two acquires succeed immediately, the third only after
        // one of the first two releases.
        let gate = Arc::new(AdmissionGate::new(2));

        let first = gate.acquire().await.unwrap();
        let _second = gate.acquire().await.unwrap();

        let gate_clone = Arc::clone(&gate);
        let third = tokio::spawn(async move { gate_clone.acquire().await.unwrap() });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!third.is_finished());

        drop(first);
        let _third = third.await.unwrap();
        assert_eq!(gate.available(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_acquisitions_all_complete() {
        let gate = Arc::new(AdmissionGate::new(4));

        let mut handles = vec![];
        for i in 0..10 {
            let gate_clone = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                let permit = gate_clone.acquire().await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                drop(permit);
                i
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(gate.available(), 4);
    }
}
