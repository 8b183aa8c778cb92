/*!
 * Admission Semaphore
 * Counting semaphore gating total worker concurrency
 *
 * The orchestrator never blocks on it indefinitely: acquisition is either
 * an immediate try or a short timed wait inside a polling loop that also
 * drains finished workers.
 */

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

pub struct Semaphore {
    permits: Mutex<usize>,
    total: usize,
    cv: Condvar,
}

impl Semaphore {
    pub fn new(total: usize) -> Self {
        Self {
            permits: Mutex::new(total),
            total,
            cv: Condvar::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn available(&self) -> usize {
        *self.permits.lock()
    }

    /// Take `n` permits if immediately available
    pub fn try_acquire(&self, n: usize) -> bool {
        let mut permits = self.permits.lock();
        if *permits >= n {
            *permits -= n;
            true
        } else {
            false
        }
    }

    /// Take `n` permits, waiting at most `timeout`
    pub fn acquire_timeout(&self, n: usize, timeout: Duration) -> bool {
        let mut permits = self.permits.lock();
        if *permits >= n {
            *permits -= n;
            return true;
        }
        self.cv.wait_for(&mut permits, timeout);
        if *permits >= n {
            *permits -= n;
            true
        } else {
            false
        }
    }

    pub fn release(&self, n: usize) {
        let mut permits = self.permits.lock();
        *permits = (*permits + n).min(self.total);
        self.cv.notify_all();
    }
}
