/*!
 * Spin Strategies
 * Configurable wait loops used at the rendezvous barriers
 *
 * All four variants are retained deliberately: the contention and latency
 * differences they produce are part of what the outer system measures.
 */

use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Busy-wait flavor used while a worker waits out a barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpinStyle {
    /// Tight loop, no hint
    Busy,
    /// `thread::yield_now` between checks
    Yield,
    /// Hardware spin-wait hint between checks
    Hint,
    /// Park with a nanosecond-scale timeout between checks
    Park,
}

/// Spin until `cond` holds, using the given style between checks
#[inline]
pub(crate) fn wait_until(style: SpinStyle, cond: impl Fn() -> bool) {
    while !cond() {
        match style {
            SpinStyle::Busy => {}
            SpinStyle::Yield => thread::yield_now(),
            SpinStyle::Hint => std::hint::spin_loop(),
            SpinStyle::Park => thread::park_timeout(Duration::from_nanos(100)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_wait_until_already_true() {
        for style in [SpinStyle::Busy, SpinStyle::Yield, SpinStyle::Hint, SpinStyle::Park] {
            wait_until(style, || true);
        }
    }

    #[test]
    fn test_wait_until_observes_flip() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = {
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                flag.store(true, Ordering::Release);
            })
        };
        wait_until(SpinStyle::Yield, || flag.load(Ordering::Acquire));
        setter.join().unwrap();
    }
}
