//! Batch cancellation and lifecycle state.
//!
//! Uses a `watch` channel to broadcast the first cancellation reason, `ArcSwap`
//! for lock-free state transitions, and an atomic counter with RAII guards
//! for tracking running jobs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::job::JobId;

/// Batch lifecycle, advanced by the coordinator.
///
/// State machine: Pending -> Running -> (Cancelling ->) Finished. States
/// only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// Built but not yet running.
    Pending,
    /// Workers are dequeuing jobs.
    Running,
    /// Cancelled; running jobs are finishing, queued jobs are drained as cancelled.
    Cancelling,
    /// Every job has an outcome and the report is sealed.
    Finished,
}

/// Why a batch was cancelled. Only the first reason is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CancelReason {
    /// Someone called [`CancelHandle::cancel`].
    Requested,
    /// A job failed while `continue_on_error` was off.
    JobFailed { job_id: JobId },
}

/// Shared cancellation signal and state for one batch.
#[derive(Debug)]
pub struct BatchController {
    cancel_signal: watch::Sender<Option<CancelReason>>,
    in_flight: Arc<AtomicU64>,
    state: ArcSwap<BatchState>,
}

impl BatchController {
    /// Creates a controller in the `Pending` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            cancel_signal: tx,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: ArcSwap::from_pointee(BatchState::Pending),
        }
    }

    pub fn set_running(&self) {
        self.advance(BatchState::Running);
    }

    pub fn set_finished(&self) {
        self.advance(BatchState::Finished);
    }

    fn advance(&self, to: BatchState) {
        self.state.rcu(|current| if to > **current { to } else { **current });
    }

    #[must_use]
    pub fn state(&self) -> BatchState {
        **self.state.load()
    }

    /// Raises the cancel signal. Returns `true` if this call was the first.
    ///
    /// Later calls keep the original reason.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let first = self.cancel_signal.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            self.advance(BatchState::Cancelling);
            tracing::info!(?reason, "batch cancellation requested");
        }
        first
    }

    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        *self.cancel_signal.borrow()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_reason().is_some()
    }

    /// Receiver notified when cancellation is raised.
    #[must_use]
    pub fn cancel_receiver(&self) -> watch::Receiver<Option<CancelReason>> {
        self.cancel_signal.subscribe()
    }

    /// Creates an RAII guard that counts a running job.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }
}

impl Default for BatchController {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle for cancelling a batch from another task or thread.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    controller: Arc<BatchController>,
}

impl CancelHandle {
    pub(crate) fn new(controller: Arc<BatchController>) -> Self {
        Self { controller }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.controller.cancel(CancelReason::Requested);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.controller.is_cancelled()
    }

    #[must_use]
    pub fn state(&self) -> BatchState {
        self.controller.state()
    }

    /// Number of jobs currently executing.
    #[must_use]
    pub fn running_jobs(&self) -> u64 {
        self.controller.in_flight_count()
    }

    /// Resolves once the batch has been cancelled, for any reason.
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.controller.cancel_receiver();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                // The controller lives as long as this handle, so the sender
                // cannot be dropped first.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// RAII guard that decrements the running-job counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn state_transitions_pending_running_finished() {
        let controller = BatchController::new();
        assert_eq!(controller.state(), BatchState::Pending);

        controller.set_running();
        assert_eq!(controller.state(), BatchState::Running);

        controller.set_finished();
        assert_eq!(controller.state(), BatchState::Finished);
    }

    #[test]
    fn cancel_is_idempotent_and_keeps_first_reason() {
        let controller = BatchController::new();
        controller.set_running();

        assert!(controller.cancel(CancelReason::JobFailed { job_id: JobId(2) }));
        assert!(!controller.cancel(CancelReason::Requested));
        assert!(!controller.cancel(CancelReason::Requested));

        assert_eq!(
            controller.cancel_reason(),
            Some(CancelReason::JobFailed { job_id: JobId(2) })
        );
        assert_eq!(controller.state(), BatchState::Cancelling);

        controller.set_running();
        assert_eq!(controller.state(), BatchState::Cancelling);
    }

    #[test]
    fn in_flight_guard_increments_and_decrements() {
        let controller = BatchController::new();
        let guard1 = controller.in_flight_guard();
        let guard2 = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);

        drop(guard1);
        assert_eq!(controller.in_flight_count(), 1);
        drop(guard2);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn handle_resolves_on_cancel_from_other_task() {
        let controller = Arc::new(BatchController::new());
        let handle = CancelHandle::new(Arc::clone(&controller));
        let remote = handle.clone();

        let waiter = tokio::spawn(async move { handle.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        std::thread::spawn(move || remote.cancel()).join().unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, CancelReason::Requested);
        assert!(controller.is_cancelled());
    }

    #[test]
    fn cancel_reason_serializes_tagged() {
        let json = serde_json::to_value(CancelReason::JobFailed { job_id: JobId(4) }).unwrap();
        assert_eq!(json["reason"], "job_failed");
        assert_eq!(json["job_id"], 4);
    }
}
