use crate::error::{RankError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Signal {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

/// Cooperative cancellation shared between a ranker task and whoever supervises it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    signal: Arc<Signal>,
}

impl CancelToken {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) {
        let mut cancelled = self.signal.cancelled.lock();
        *cancelled = true;
        self.signal.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool { *self.signal.cancelled.lock() }

    /// Checkpoint: `Err(Cancelled)` once the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RankError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Blocks for `duration`, returning early with `Err(Cancelled)` if the token fires.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.signal.cancelled.lock();
        while !*cancelled {
            if self.signal.cond.wait_until(&mut cancelled, deadline).timed_out() {
                return if *cancelled { Err(RankError::Cancelled) } else { Ok(()) };
            }
        }
        Err(RankError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn sleep_wakes_on_cancel() {
        let token = CancelToken::new();
        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        let started = Instant::now();
        let res = token.sleep(Duration::from_secs(30));
        handle.join().unwrap();
        assert!(matches!(res, Err(RankError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn short_sleep_completes() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_millis(5)).is_ok());
        assert!(token.check().is_ok());
        token.cancel();
        assert!(token.check().is_err());
    }
}
