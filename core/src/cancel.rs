//! Cooperative cancellation for caller-driven polling loops.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Cloneable handle; cancelling any clone wakes every waiter.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout`. Returns `true` if the token was cancelled.
    /// A timeout too large to represent as a deadline waits until cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let mut cancelled = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            while !*cancelled {
                cancelled = condvar.wait(cancelled).unwrap_or_else(PoisonError::into_inner);
            }
            return true;
        };
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            cancelled = condvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *cancelled
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn wait_times_out_when_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.wait(Duration::from_millis(10)));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_wakes_waiter() {
        let token = CancellationToken::new();
        let remote = token.clone();
        let handle = thread::spawn(move || remote.wait(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn cancelled_token_returns_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let start = Instant::now();
        assert!(token.wait(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn unbounded_wait_on_cancelled_token_returns() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(token.wait(Duration::MAX));
    }

    #[test]
    fn unbounded_wait_ends_on_cancel() {
        let token = CancellationToken::new();
        let remote = token.clone();
        let handle = thread::spawn(move || remote.wait(Duration::MAX));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
    }
}
