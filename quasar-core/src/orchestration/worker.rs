use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{EngineError, Result};

/// Fixed number of session slots. A session holds its slot from the moment
/// it leaves the queue until it reaches a terminal state.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("busy", &self.busy())
            .finish()
    }
}

/// An occupied worker slot, freed on drop.
#[derive(Debug)]
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(EngineError::Validation(
                "worker pool size must be at least 1".into(),
            ));
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn busy(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    pub async fn acquire(&self, timeout: Duration) -> Result<WorkerSlot> {
        let permit = tokio::time::timeout(timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                EngineError::ResourceExhausted(format!(
                    "no worker slot free within {}ms",
                    timeout.as_millis()
                ))
            })?
            .map_err(|_| EngineError::Internal("worker pool closed".into()))?;
        Ok(WorkerSlot { _permit: permit })
    }
}
