/*!
 * Fixed-Capacity Bitset
 * Dense membership tracking for thread and core availability
 */

const WORD_BITS: usize = 64;

/// Fixed-capacity bitset over `u64` words
///
/// Capacity is set at construction and never grows. Indices at or beyond
/// capacity are rejected with a panic in debug builds and ignored reads
/// return false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// All bits clear
    pub fn empty(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    /// All bits set
    pub fn filled(len: usize) -> Self {
        let mut set = Self::empty(len);
        for word in set.words.iter_mut() {
            *word = u64::MAX;
        }
        // Mask off the tail beyond len
        let tail = len % WORD_BITS;
        if tail != 0 {
            if let Some(last) = set.words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        set
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn set(&mut self, idx: usize) {
        debug_assert!(idx < self.len);
        self.words[idx / WORD_BITS] |= 1u64 << (idx % WORD_BITS);
    }

    #[inline]
    pub fn clear(&mut self, idx: usize) {
        debug_assert!(idx < self.len);
        self.words[idx / WORD_BITS] &= !(1u64 << (idx % WORD_BITS));
    }

    #[inline]
    pub fn test(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        self.words[idx / WORD_BITS] & (1u64 << (idx % WORD_BITS)) != 0
    }

    /// Number of set bits
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Lowest set bit, if any
    pub fn first_set(&self) -> Option<usize> {
        for (i, word) in self.words.iter().enumerate() {
            if *word != 0 {
                return Some(i * WORD_BITS + word.trailing_zeros() as usize);
            }
        }
        None
    }

    /// Iterate set bits in ascending order
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.test(i))
    }
}
