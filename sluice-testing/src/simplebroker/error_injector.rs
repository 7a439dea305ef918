//! Error injection controller for testing.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Controller for injecting broker failures during testing.
#[derive(Debug, Default)]
pub struct ErrorInjector {
    /// Fail the delivery of the next N sends.
    fail_next_deliveries: AtomicUsize,
    /// Let the first N deliveries succeed before failing.
    skip_deliveries_before_fail: AtomicUsize,
    /// Fail the next N transaction commits.
    fail_next_commits: AtomicUsize,
    /// Fail the next N transaction aborts.
    fail_next_aborts: AtomicUsize,
    /// Fail the next N session aborts (recovery) with a non-unknown error.
    fail_next_session_aborts: AtomicUsize,
    /// Fail the next N producer closes.
    fail_next_closes: AtomicUsize,
    /// Artificial delivery latency in milliseconds.
    delivery_latency_ms: AtomicU64,
}

impl ErrorInjector {
    /// Create a new error injector with all errors disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the delivery of the next N sends.
    pub fn fail_deliveries(&self, count: usize) {
        self.fail_next_deliveries.store(count, Ordering::Relaxed);
    }

    /// Let `skip` deliveries succeed, then fail the next `fail` deliveries.
    pub fn skip_deliveries_then_fail(&self, skip: usize, fail: usize) {
        self.skip_deliveries_before_fail
            .store(skip, Ordering::Relaxed);
        self.fail_next_deliveries.store(fail, Ordering::Relaxed);
    }

    pub fn fail_commits(&self, count: usize) {
        self.fail_next_commits.store(count, Ordering::Relaxed);
    }

    pub fn fail_aborts(&self, count: usize) {
        self.fail_next_aborts.store(count, Ordering::Relaxed);
    }

    pub fn fail_session_aborts(&self, count: usize) {
        self.fail_next_session_aborts
            .store(count, Ordering::Relaxed);
    }

    pub fn fail_closes(&self, count: usize) {
        self.fail_next_closes.store(count, Ordering::Relaxed);
    }

    /// Set artificial delivery latency.
    pub fn set_delivery_latency(&self, ms: u64) {
        self.delivery_latency_ms.store(ms, Ordering::Relaxed);
    }

    pub(crate) fn should_fail_delivery(&self) -> bool {
        let skip = self
            .skip_deliveries_before_fail
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                if c > 0 { Some(c - 1) } else { None }
            })
            .is_ok();
        if skip {
            return false;
        }
        Self::decrement_counter(&self.fail_next_deliveries)
    }

    pub(crate) fn should_fail_commit(&self) -> bool {
        Self::decrement_counter(&self.fail_next_commits)
    }

    pub(crate) fn should_fail_abort(&self) -> bool {
        Self::decrement_counter(&self.fail_next_aborts)
    }

    pub(crate) fn should_fail_session_abort(&self) -> bool {
        Self::decrement_counter(&self.fail_next_session_aborts)
    }

    pub(crate) fn should_fail_close(&self) -> bool {
        Self::decrement_counter(&self.fail_next_closes)
    }

    pub(crate) fn delivery_latency(&self) -> Option<Duration> {
        match self.delivery_latency_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Decrements the counter and returns true if it was > 0.
    fn decrement_counter(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                if c > 0 { Some(c - 1) } else { None }
            })
            .is_ok()
    }
}
