//! Dense integer id allocation with LIFO reuse.

use super::buffer::Buffer;
use super::buffer_pool::BufferPool;

/// Hands out dense integer ids. Returned ids are reused before new ones are
/// minted, so the claimed id range stays as compact as the usage pattern
/// allows.
pub struct IdPool {
    next_index: i32,
    available_count: i32,
    available_ids: Buffer<i32>,
}

impl IdPool {
    pub fn new(initial_capacity: i32, pool: &mut BufferPool) -> Self {
        Self {
            next_index: 0,
            available_count: 0,
            available_ids: pool.take_at_least(initial_capacity),
        }
    }

    /// Highest id any claim could have produced so far; -1 if none.
    #[inline(always)]
    pub fn highest_possibly_claimed_id(&self) -> i32 {
        self.next_index - 1
    }

    #[inline(always)]
    pub fn available_id_count(&self) -> i32 {
        self.available_count
    }

    #[inline(always)]
    pub fn allocated(&self) -> bool {
        self.available_ids.allocated()
    }

    #[inline(always)]
    pub fn take(&mut self) -> i32 {
        debug_assert!(self.available_ids.allocated());
        if self.available_count > 0 {
            self.available_count -= 1;
            *self.available_ids.get(self.available_count)
        } else {
            let id = self.next_index;
            self.next_index += 1;
            id
        }
    }

    pub fn return_id(&mut self, id: i32, pool: &mut BufferPool) {
        debug_assert!(id >= 0 && id < self.next_index, "Returned id was never claimed.");
        if self.available_count == self.available_ids.len() {
            let grown = (self.available_count * 2).max(self.available_ids.len());
            pool.resize_to_at_least(&mut self.available_ids, grown, self.available_count);
        }
        *self.available_ids.get_mut(self.available_count) = id;
        self.available_count += 1;
    }

    pub fn ensure_capacity(&mut self, count: i32, pool: &mut BufferPool) {
        if !self.available_ids.allocated() {
            *self = Self::new(count, pool);
        } else if self.available_ids.len() < count {
            pool.resize_to_at_least(&mut self.available_ids, count, self.available_count);
        }
    }

    pub fn clear(&mut self) {
        self.next_index = 0;
        self.available_count = 0;
    }

    pub fn dispose(&mut self, pool: &mut BufferPool) {
        pool.return_buffer(&mut self.available_ids);
        self.next_index = 0;
        self.available_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_returned_ids_before_minting() {
        let mut pool = BufferPool::new(4096);
        let mut ids = IdPool::new(8, &mut pool);
        assert_eq!(ids.take(), 0);
        assert_eq!(ids.take(), 1);
        assert_eq!(ids.take(), 2);
        ids.return_id(1, &mut pool);
        assert_eq!(ids.take(), 1);
        assert_eq!(ids.take(), 3);
        assert_eq!(ids.highest_possibly_claimed_id(), 3);
        ids.dispose(&mut pool);
        pool.clear();
    }
}
