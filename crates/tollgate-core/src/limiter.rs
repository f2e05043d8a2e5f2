//! Active-session accounting with an optional cap.
//!
//! [`SessionLimiter`] keeps an atomic count of live relay sessions. Each
//! admitted session holds a [`SessionGuard`], which releases its slot on drop.
//! With no cap configured, the count only feeds logging.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SessionLimiter {
    /// `None` = unlimited.
    max_sessions: Option<usize>,
    active: Arc<AtomicUsize>,
}

impl SessionLimiter {
    pub fn new(max_sessions: Option<usize>) -> Self {
        Self {
            max_sessions,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Claim a session slot, or `None` when the cap is reached.
    ///
    /// The slot is reserved with a compare-and-swap loop so concurrent
    /// admissions can never overshoot the cap.
    pub fn try_acquire(&self) -> Option<SessionGuard> {
        let mut current = self.active.load(Ordering::Relaxed);
        loop {
            if let Some(max) = self.max_sessions {
                if current >= max {
                    return None;
                }
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Some(SessionGuard {
                        counter: self.active.clone(),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Current number of live sessions. Approximate under concurrency;
    /// suitable for logging only.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn max_sessions(&self) -> Option<usize> {
        self.max_sessions
    }
}

/// RAII slot that decrements the session count on drop.
/// Owns an `Arc<AtomicUsize>`, so it is `Send` and can move into spawned tasks.
#[derive(Debug)]
pub struct SessionGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_always_admits() {
        let limiter = SessionLimiter::unlimited();
        let guards: Vec<_> = (0..1000).map(|_| limiter.try_acquire().unwrap()).collect();
        assert_eq!(limiter.active(), 1000);
        drop(guards);
        assert_eq!(limiter.active(), 0);
    }

    #[test]
    fn test_cap_reached() {
        let limiter = SessionLimiter::new(Some(2));
        let _g1 = limiter.try_acquire().unwrap();
        let _g2 = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.active(), 2);
    }

    #[test]
    fn test_guard_releases_slot() {
        let limiter = SessionLimiter::new(Some(1));
        {
            let _guard = limiter.try_acquire().unwrap();
            assert!(limiter.try_acquire().is_none());
        }
        assert_eq!(limiter.active(), 0);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn test_clones_share_count() {
        let limiter = SessionLimiter::new(Some(1));
        let clone = limiter.clone();
        let _guard = limiter.try_acquire().unwrap();
        assert!(clone.try_acquire().is_none());
        assert_eq!(clone.active(), 1);
    }
}
