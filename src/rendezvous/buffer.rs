/*!
 * Epoch Buffers
 * Immutable-until-swapped state/result bundle shared by worker threads
 * for exactly one epoch
 */

use rand::seq::SliceRandom;
use rand::Rng;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Slot array with interior mutability and externally enforced disjoint
/// ownership
///
/// During an epoch, slot `(actor, i)` is touched only by that actor's
/// worker thread; between the not-finished and not-consumed latches, the
/// epoch winner has exclusive access to every result slot. Those two rules
/// are the entire safety argument for the unchecked accessors below.
pub(crate) struct Slots<T> {
    cells: Box<[UnsafeCell<T>]>,
}

unsafe impl<T: Send> Sync for Slots<T> {}

impl<T: Default> Slots<T> {
    fn new(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| UnsafeCell::new(T::default())).collect(),
        }
    }
}

impl<T> Slots<T> {
    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }

    /// # Safety
    /// Caller must hold exclusive access to index `i` under the buffer's
    /// latch protocol.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn get_mut(&self, i: usize) -> &mut T {
        &mut *self.cells[i].get()
    }
}

/// One epoch's worth of shared experiment state
///
/// Exactly one live buffer exists per in-flight experiment; the epoch
/// winner replaces it atomically. A zero-stride buffer is the poison value
/// telling workers to exit.
pub struct EpochBuffer<S, R> {
    pub(crate) states: Slots<S>,
    pub(crate) results: Slots<R>,
    /// Traversal order over stride indices, reshuffled every epoch to avoid
    /// systematic access-order bias
    pub(crate) perm: Box<[usize]>,
    pub(crate) stride: usize,
    pub(crate) actors: usize,
    pub(crate) lagged: AtomicBool,
    pub(crate) not_started: AtomicUsize,
    pub(crate) not_finished: AtomicUsize,
    pub(crate) not_consumed: AtomicUsize,
    pub(crate) not_updated: AtomicUsize,
}

impl<S: Default, R: Default> EpochBuffer<S, R> {
    pub(crate) fn new(actors: usize, stride: usize, rng: &mut impl Rng) -> Self {
        let mut perm: Vec<usize> = (0..stride).collect();
        perm.shuffle(rng);
        Self {
            states: Slots::new(actors * stride),
            results: Slots::new(actors * stride),
            perm: perm.into_boxed_slice(),
            stride,
            actors,
            lagged: AtomicBool::new(false),
            not_started: AtomicUsize::new(actors),
            not_finished: AtomicUsize::new(actors),
            not_consumed: AtomicUsize::new(actors),
            not_updated: AtomicUsize::new(actors),
        }
    }

    /// Distinguished empty buffer signaling termination
    pub(crate) fn poison(actors: usize) -> Self {
        Self {
            states: Slots::new(0),
            results: Slots::new(0),
            perm: Box::new([]),
            stride: 0,
            actors,
            lagged: AtomicBool::new(false),
            not_started: AtomicUsize::new(actors),
            not_finished: AtomicUsize::new(actors),
            not_consumed: AtomicUsize::new(actors),
            not_updated: AtomicUsize::new(actors),
        }
    }
}

impl<S, R> EpochBuffer<S, R> {
    pub fn is_poison(&self) -> bool {
        self.stride == 0
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub(crate) fn mark_lagged(&self) {
        self.lagged.store(true, Ordering::Relaxed);
    }

    pub(crate) fn was_lagged(&self) -> bool {
        self.lagged.load(Ordering::Relaxed)
    }

    /// Flat slot index for `(actor, stride index)`
    #[inline]
    pub(crate) fn slot(&self, actor: usize, i: usize) -> usize {
        i * self.actors + actor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_recognition() {
        let buf: EpochBuffer<u64, u64> = EpochBuffer::poison(3);
        assert!(buf.is_poison());
        let live: EpochBuffer<u64, u64> = EpochBuffer::new(3, 8, &mut rand::thread_rng());
        assert!(!live.is_poison());
    }

    #[test]
    fn test_perm_is_a_permutation() {
        let buf: EpochBuffer<u64, u64> = EpochBuffer::new(2, 16, &mut rand::thread_rng());
        let mut seen = vec![false; 16];
        for &i in buf.perm.iter() {
            assert!(!seen[i]);
            seen[i] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_slot_indices_disjoint_across_actors() {
        let buf: EpochBuffer<u64, u64> = EpochBuffer::new(3, 5, &mut rand::thread_rng());
        let mut seen = std::collections::HashSet::new();
        for actor in 0..3 {
            for i in 0..5 {
                assert!(seen.insert(buf.slot(actor, i)));
            }
        }
        assert_eq!(seen.len(), buf.states.len());
    }

    #[test]
    fn test_latches_initialized_to_actor_count() {
        let buf: EpochBuffer<u64, u64> = EpochBuffer::new(4, 2, &mut rand::thread_rng());
        assert_eq!(buf.not_started.load(Ordering::Relaxed), 4);
        assert_eq!(buf.not_finished.load(Ordering::Relaxed), 4);
        assert_eq!(buf.not_consumed.load(Ordering::Relaxed), 4);
        assert_eq!(buf.not_updated.load(Ordering::Relaxed), 4);
    }
}
