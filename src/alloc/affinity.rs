/*!
 * Thread Affinity
 * Best-effort pinning of the calling thread to one OS CPU
 */

/// Pin the calling thread to a single OS CPU id
///
/// Returns false when the syscall is unavailable or rejected; callers treat
/// pinning as best-effort and never fail an experiment over it.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(real_cpu: usize) -> bool {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    if set.set(real_cpu).is_err() {
        log::warn!("cpu {} outside CpuSet capacity, not pinning", real_cpu);
        return false;
    }
    match sched_setaffinity(Pid::from_raw(0), &set) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("sched_setaffinity to cpu {} failed: {}", real_cpu, e);
            false
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_real_cpu: usize) -> bool {
    false
}
