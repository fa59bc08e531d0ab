//! Admission control for AI work: one training per user at a time, and a
//! global cap on concurrently running AI processes.

use super::runner::RunnerError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

pub struct ConcurrencyGuard {
    training_users: Arc<Mutex<HashSet<usize>>>,
    process_permits: Arc<Semaphore>,
    max_processes: usize,
}

/// Exclusive right to train a user's model. Released on drop.
#[derive(Debug)]
pub struct TrainingSlot {
    user_id: usize,
    training_users: Arc<Mutex<HashSet<usize>>>,
}

impl TrainingSlot {
    pub fn user_id(&self) -> usize {
        self.user_id
    }
}

impl Drop for TrainingSlot {
    fn drop(&mut self) {
        self.training_users.lock().unwrap().remove(&self.user_id);
        debug!("Released training slot for user {}", self.user_id);
    }
}

/// Right to run one AI process. Released on drop.
#[derive(Debug)]
pub struct ProcessPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGuard {
    pub fn new(max_processes: usize) -> Self {
        let max_processes = max_processes.max(1);
        ConcurrencyGuard {
            training_users: Arc::new(Mutex::new(HashSet::new())),
            process_permits: Arc::new(Semaphore::new(max_processes)),
            max_processes,
        }
    }

    /// Never waits: returns `None` if the user already has a training running.
    pub fn try_acquire_training_slot(&self, user_id: usize) -> Option<TrainingSlot> {
        let mut training_users = self.training_users.lock().unwrap();
        if !training_users.insert(user_id) {
            debug!("Training slot for user {} is taken", user_id);
            return None;
        }
        Some(TrainingSlot {
            user_id,
            training_users: self.training_users.clone(),
        })
    }

    pub fn is_training(&self, user_id: usize) -> bool {
        self.training_users.lock().unwrap().contains(&user_id)
    }

    /// Waits for a free process permit. Waiters are served in arrival order.
    pub async fn acquire_process_permit(&self) -> Result<ProcessPermit, RunnerError> {
        let permit = self
            .process_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RunnerError::PoolClosed)?;
        Ok(ProcessPermit { _permit: permit })
    }

    pub fn available_process_permits(&self) -> usize {
        self.process_permits.available_permits()
    }

    pub fn max_processes(&self) -> usize {
        self.max_processes
    }
}
