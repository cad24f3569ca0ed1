//! A group of constraint batches: the active set or a sleeping island's
//! constraints.

use crate::physics::constraint_batch::ConstraintBatch;
use crate::utilities::collections::quick_list::QuickList;
use crate::utilities::memory::buffer_pool::BufferPool;

pub struct ConstraintSet {
    pub batches: QuickList<ConstraintBatch>,
}

impl Default for ConstraintSet {
    fn default() -> Self {
        Self {
            batches: QuickList::default(),
        }
    }
}

impl ConstraintSet {
    pub fn new(initial_batch_capacity: i32, pool: &mut BufferPool) -> Self {
        Self {
            batches: QuickList::with_capacity(initial_batch_capacity.max(1), pool),
        }
    }

    #[inline(always)]
    pub fn allocated(&self) -> bool {
        self.batches.span.allocated()
    }

    pub fn constraint_count(&self) -> i32 {
        let mut count = 0;
        for batch_index in 0..self.batches.count {
            let batch = self.batches.get(batch_index);
            for type_batch_index in 0..batch.type_batches.count {
                count += batch.type_batches.get(type_batch_index).constraint_count;
            }
        }
        count
    }

    pub fn dispose(&mut self, pool: &mut BufferPool) {
        for i in 0..self.batches.count {
            self.batches.get_mut(i).dispose(pool);
        }
        self.batches.dispose(pool);
    }
}
