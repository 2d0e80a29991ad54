use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A minimal inter-thread cancellation flag.  The Ctrl+C handler holds a
/// clone and flips it; the poll loop checks it once per cycle.
#[derive(Clone, Default)]
pub struct CancellationToken {
    canceled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token.  Clone it to hand it to another thread.
    pub fn new() -> CancellationToken {
        CancellationToken {
            canceled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flip the token to canceled.  There is no way back.
    #[inline]
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    /// Check whether the token has been canceled
    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}
