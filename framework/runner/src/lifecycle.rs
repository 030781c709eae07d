use std::time::Duration;

use crate::event::WorkerId;
use crate::plan::WorkerPlan;

/// Where a worker is in its life, in the order the states are normally visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub enum WorkerState {
    Initializing,
    Online,
    Preparing,
    ReadyWaiting,
    Running,
    Exited,
}

impl WorkerState {
    /// A worker moves forward one state at a time, except that it can exit from anywhere.
    pub fn can_advance_to(self, next: WorkerState) -> bool {
        match next {
            WorkerState::Exited => self != WorkerState::Exited,
            _ => next as u8 == self as u8 + 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Worker {worker_id} cannot move from {from} to {to}")]
    InvalidTransition {
        worker_id: WorkerId,
        from: WorkerState,
        to: WorkerState,
    },
    #[error("Unknown worker {0}")]
    UnknownWorker(WorkerId),
    #[error("Timed out after {waited:?} waiting for {pending} worker(s) to reach {target}")]
    Timeout {
        target: WorkerState,
        pending: usize,
        waited: Duration,
    },
}

/// The coordinator's view of one worker.
#[derive(Debug)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub plan: WorkerPlan,
    state: WorkerState,
}

impl WorkerRecord {
    pub fn new(id: WorkerId, plan: WorkerPlan) -> Self {
        Self {
            id,
            plan,
            state: WorkerState::Initializing,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn advance(&mut self, next: WorkerState) -> Result<(), LifecycleError> {
        if !self.state.can_advance_to(next) {
            return Err(LifecycleError::InvalidTransition {
                worker_id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }

        log::trace!("Worker {} is now {}", self.id, next);
        self.state = next;
        Ok(())
    }

    pub fn has_exited(&self) -> bool {
        self.state == WorkerState::Exited
    }
}
