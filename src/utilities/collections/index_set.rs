//! Bitset over nonnegative indices, used for batch referenced-handle sets
//! and graph traversal marks.

use crate::utilities::memory::buffer::Buffer;
use crate::utilities::memory::buffer_pool::BufferPool;

pub struct IndexSet {
    flags: Buffer<u64>,
}

impl IndexSet {
    const SHIFT: i32 = 6;
    const MASK: i32 = 63;

    #[inline(always)]
    fn bundle_capacity_for(count: i32) -> i32 {
        (count + Self::MASK) >> Self::SHIFT
    }

    pub fn new(initial_capacity: i32, pool: &mut BufferPool) -> Self {
        let mut set = Self {
            flags: Buffer::default(),
        };
        set.internal_resize(Self::bundle_capacity_for(initial_capacity), pool);
        set
    }

    pub fn empty() -> Self {
        Self {
            flags: Buffer::default(),
        }
    }

    #[inline(always)]
    pub fn allocated(&self) -> bool {
        self.flags.allocated()
    }

    fn internal_resize(&mut self, bundle_capacity: i32, pool: &mut BufferPool) {
        let copy_count = bundle_capacity.min(self.flags.len());
        pool.resize_to_at_least(&mut self.flags, bundle_capacity, copy_count);
        if self.flags.len() > copy_count {
            let zero_count = self.flags.len() - copy_count;
            self.flags.clear(copy_count, zero_count);
        }
    }

    #[inline(always)]
    pub fn contains(&self, index: i32) -> bool {
        debug_assert!(index >= 0);
        let bundle = index >> Self::SHIFT;
        bundle < self.flags.len()
            && (*self.flags.get(bundle) & (1u64 << (index & Self::MASK))) != 0
    }

    /// True when none of the indices are present.
    #[inline(always)]
    pub fn can_fit(&self, indices: &[i32]) -> bool {
        indices.iter().all(|&index| !self.contains(index))
    }

    #[inline(always)]
    pub fn set(&mut self, index: i32, pool: &mut BufferPool) {
        debug_assert!(index >= 0);
        let bundle = index >> Self::SHIFT;
        if bundle >= self.flags.len() {
            self.internal_resize(bundle + 1, pool);
        }
        *self.flags.get_mut(bundle) |= 1u64 << (index & Self::MASK);
    }

    #[inline(always)]
    pub fn unset(&mut self, index: i32) {
        debug_assert!(index >= 0);
        let bundle = index >> Self::SHIFT;
        if bundle < self.flags.len() {
            *self.flags.get_mut(bundle) &= !(1u64 << (index & Self::MASK));
        }
    }

    /// Ors another set's bits into this one. Grows as needed.
    pub fn union_with(&mut self, other: &IndexSet, pool: &mut BufferPool) {
        if !other.allocated() {
            return;
        }
        if self.flags.len() < other.flags.len() {
            self.internal_resize(other.flags.len(), pool);
        }
        for i in 0..other.flags.len() {
            *self.flags.get_mut(i) |= *other.flags.get(i);
        }
    }

    pub fn clear(&mut self) {
        let count = self.flags.len();
        if count > 0 {
            self.flags.clear(0, count);
        }
    }

    pub fn ensure_capacity(&mut self, index_capacity: i32, pool: &mut BufferPool) {
        if (self.flags.len() << Self::SHIFT) < index_capacity {
            self.internal_resize(Self::bundle_capacity_for(index_capacity), pool);
        }
    }

    pub fn dispose(&mut self, pool: &mut BufferPool) {
        if self.flags.allocated() {
            pool.return_buffer(&mut self.flags);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_contains_unset() {
        let mut pool = BufferPool::new(4096);
        let mut set = IndexSet::new(64, &mut pool);
        assert!(!set.contains(5));
        set.set(5, &mut pool);
        set.set(63, &mut pool);
        set.set(200, &mut pool);
        assert!(set.contains(5));
        assert!(set.contains(63));
        assert!(set.contains(200));
        assert!(!set.can_fit(&[1, 5]));
        assert!(set.can_fit(&[1, 2, 62]));
        set.unset(5);
        assert!(!set.contains(5));
        set.dispose(&mut pool);
        pool.clear();
    }
}
