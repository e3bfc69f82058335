use crate::error::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Cancellation state carried through a request.
///
/// Clones share the cancel flag, so a handle kept by the caller can abort
/// work running elsewhere.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    canceled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            canceled: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(Error::Canceled);
        }
        Ok(())
    }
}
