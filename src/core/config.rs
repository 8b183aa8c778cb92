/*!
 * Harness Configuration
 * Capability flags and tunable parameters, constructed once at startup
 */

use crate::rendezvous::SpinStyle;
use serde::{Deserialize, Serialize};

/// Host capabilities relevant to affinity placement
///
/// Constructed once at startup from whatever probing the embedder performs
/// and passed explicitly into the allocator and orchestrator. There is no
/// process-wide detection singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Per-thread affinity syscalls are available (required for LOCAL)
    pub affinity_supported: bool,
    /// Whole-process CPU pinning is available (required for GLOBAL)
    pub global_pin_supported: bool,
}

impl Capabilities {
    /// Everything available
    pub fn all() -> Self {
        Self {
            affinity_supported: true,
            global_pin_supported: true,
        }
    }

    /// Nothing available; only NONE-mode placement is attempted
    pub fn none() -> Self {
        Self {
            affinity_supported: false,
            global_pin_supported: false,
        }
    }
}

/// Tunable harness parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Total hardware thread budget gating concurrent workers
    pub max_threads: usize,
    /// Forked requests per batch before an immediate flush
    pub batch_size: usize,
    /// Spin strategy used at the rendezvous barriers
    pub spin_style: SpinStyle,
    /// Stride at the first epoch of every experiment
    pub initial_stride: usize,
    /// Stride ceiling; adaptive growth never exceeds this
    pub max_stride: usize,
    /// An experiment is abandoned as a timeout after
    /// `timeout_multiplier * time_budget`
    pub timeout_multiplier: u32,
    /// Interval for the orchestrator's bounded polling
    pub poll_interval_ms: u64,
    /// Verify allocator invariants after every acquire/release (fatal on
    /// violation); never enabled in normal operation
    pub debug_checks: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            batch_size: 10,
            spin_style: SpinStyle::Hint,
            initial_stride: 10,
            max_stride: 10_000,
            timeout_multiplier: 10,
            poll_interval_ms: 10,
            debug_checks: false,
        }
    }
}

impl HarnessConfig {
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_spin_style(mut self, style: SpinStyle) -> Self {
        self.spin_style = style;
        self
    }

    pub fn with_strides(mut self, initial: usize, max: usize) -> Self {
        self.initial_stride = initial;
        self.max_stride = max;
        self
    }

    pub fn with_timeout_multiplier(mut self, multiplier: u32) -> Self {
        self.timeout_multiplier = multiplier;
        self
    }

    pub fn with_debug_checks(mut self, enabled: bool) -> Self {
        self.debug_checks = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_sane() {
        let cfg = HarnessConfig::default();
        assert!(cfg.max_threads >= 1);
        assert!(cfg.initial_stride <= cfg.max_stride);
        assert!(!cfg.debug_checks);
    }

    #[test]
    fn test_builder_chain() {
        let cfg = HarnessConfig::default()
            .with_max_threads(8)
            .with_batch_size(3)
            .with_strides(2, 64)
            .with_debug_checks(true);
        assert_eq!(cfg.max_threads, 8);
        assert_eq!(cfg.batch_size, 3);
        assert_eq!(cfg.initial_stride, 2);
        assert_eq!(cfg.max_stride, 64);
        assert!(cfg.debug_checks);
    }
}
