use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use forgeflow_config::OverflowPolicy;

use crate::SandboxError;

/// Process-wide cap on concurrent sandbox executions.
///
/// Clones share the same counter. [`ConcurrencyGate::active`] is safe to
/// read from health endpoints at any time.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    capacity: usize,
    policy: OverflowPolicy,
}

/// Held for the duration of one execution. Dropping it releases the slot,
/// including during unwinding or task abort.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyGate {
    #[must_use]
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            active: Arc::new(AtomicUsize::new(0)),
            capacity,
            policy,
        }
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take a slot, waiting or failing according to the overflow policy.
    pub async fn acquire(&self) -> Result<GatePermit, SandboxError> {
        let permit = match self.policy {
            OverflowPolicy::Wait => Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| SandboxError::GateClosed)?,
            OverflowPolicy::Reject => match Arc::clone(&self.semaphore).try_acquire_owned() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => {
                    return Err(SandboxError::CapacityExhausted {
                        capacity: self.capacity,
                    });
                }
                Err(TryAcquireError::Closed) => return Err(SandboxError::GateClosed),
            },
        };
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(GatePermit {
            _permit: permit,
            active: Arc::clone(&self.active),
        })
    }
}
