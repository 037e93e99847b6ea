//! Waiting strategies for notification counters

use std::time::Duration;

/// Decides how to wait between two reads of a notification counter.
///
/// [`pause`](PollStrategy::pause) is called after every unsuccessful read. Returning
/// `false` gives up waiting.
pub trait PollStrategy: Send + Sync {
    /// Wait before read number `attempt + 1`. `waited` is the time spent so far
    fn pause(&self, attempt: u64, waited: Duration) -> bool;
}

/// Spin without a deadline, yielding the thread after a number of spins.
#[derive(Debug, Clone, Copy)]
pub struct SpinPoll {
    spins_before_yield: u64,
}

impl SpinPoll {
    /// Create new strategy yielding after `spins_before_yield` consecutive spins
    pub fn new(spins_before_yield: u64) -> Self {
        Self { spins_before_yield }
    }
}

impl Default for SpinPoll {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl PollStrategy for SpinPoll {
    fn pause(&self, attempt: u64, _waited: Duration) -> bool {
        if attempt < self.spins_before_yield {
            std::hint::spin_loop();
        } else {
            std::thread::yield_now();
        }
        true
    }
}

/// Spin like [`SpinPoll`] but give up after `timeout`.
#[derive(Debug, Clone, Copy)]
pub struct DeadlinePoll {
    timeout: Duration,
    spin: SpinPoll,
}

impl DeadlinePoll {
    /// Create new strategy with the given deadline
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            spin: SpinPoll::default(),
        }
    }

    /// The deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl PollStrategy for DeadlinePoll {
    fn pause(&self, attempt: u64, waited: Duration) -> bool {
        waited < self.timeout && self.spin.pause(attempt, waited)
    }
}
