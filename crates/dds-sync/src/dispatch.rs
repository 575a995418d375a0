//! Step dispatch
//!
//! Completing a step with `continue_processing` set hands the successor
//! `StepState` to a dispatcher. Production deployments enqueue the payload to
//! a longer-running execution unit and learn of completion out of band; the
//! local dispatcher queues states for in-process execution, which is how the
//! orchestrator chains steps inside a single invocation.

use crate::error::{Result, SyncError};
use crate::state::StepState;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

#[async_trait]
pub trait StepDispatcher: Send + Sync {
    /// Hand a successor state to its execution unit.
    async fn dispatch(&self, state: StepState) -> Result<()>;

    /// Next state queued for in-process execution. Remote dispatchers run
    /// steps elsewhere and always return `None`.
    async fn next_local(&self) -> Option<StepState>;
}

/// Runs dispatched steps in the current process, in dispatch order.
#[derive(Default)]
pub struct LocalDispatcher {
    queue: Mutex<VecDeque<StepState>>,
}

impl LocalDispatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepDispatcher for LocalDispatcher {
    async fn dispatch(&self, state: StepState) -> Result<()> {
        debug!(step = %state.step, "Queueing step for local execution");
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| SyncError::Dispatch("dispatch queue lock poisoned".to_string()))?;
        queue.push_back(state);
        Ok(())
    }

    async fn next_local(&self) -> Option<StepState> {
        self.queue.lock().ok().and_then(|mut q| q.pop_front())
    }
}
