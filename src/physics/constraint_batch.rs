//! A batch of constraints guaranteed to reference disjoint bodies, grouped
//! by constraint type.

use crate::physics::constraints::type_batch::TypeBatch;
use crate::physics::constraints::type_processor::TypeProcessor;
use crate::utilities::collections::quick_list::QuickList;
use crate::utilities::memory::buffer::Buffer;
use crate::utilities::memory::buffer_pool::BufferPool;

pub struct ConstraintBatch {
    pub type_batches: QuickList<TypeBatch>,
    /// Constraint type id -> index in `type_batches`, or -1.
    pub type_id_to_index: Buffer<i32>,
}

impl Default for ConstraintBatch {
    fn default() -> Self {
        Self {
            type_batches: QuickList::default(),
            type_id_to_index: Buffer::default(),
        }
    }
}

impl ConstraintBatch {
    pub fn new(type_id_capacity: i32, pool: &mut BufferPool) -> Self {
        let mut type_id_to_index: Buffer<i32> = pool.take_at_least(type_id_capacity);
        for i in 0..type_id_to_index.len() {
            *type_id_to_index.get_mut(i) = -1;
        }
        Self {
            type_batches: QuickList::with_capacity(8, pool),
            type_id_to_index,
        }
    }

    #[inline(always)]
    pub fn allocated(&self) -> bool {
        self.type_id_to_index.allocated()
    }

    #[inline(always)]
    pub fn type_batch_index(&self, type_id: i32) -> i32 {
        if type_id < self.type_id_to_index.len() {
            *self.type_id_to_index.get(type_id)
        } else {
            -1
        }
    }

    pub fn get_type_batch(&self, type_id: i32) -> Option<&TypeBatch> {
        let index = self.type_batch_index(type_id);
        if index >= 0 {
            Some(self.type_batches.get(index))
        } else {
            None
        }
    }

    pub fn get_type_batch_mut(&mut self, type_id: i32) -> Option<&mut TypeBatch> {
        let index = self.type_batch_index(type_id);
        if index >= 0 {
            Some(self.type_batches.get_mut(index))
        } else {
            None
        }
    }

    /// Gets the type batch for a type, creating and initializing one if the
    /// batch doesn't have it yet.
    pub fn get_or_create_type_batch(
        &mut self,
        type_id: i32,
        processor: &dyn TypeProcessor,
        initial_capacity: i32,
        pool: &mut BufferPool,
    ) -> &mut TypeBatch {
        debug_assert!(type_id < self.type_id_to_index.len());
        let existing = *self.type_id_to_index.get(type_id);
        if existing >= 0 {
            return self.type_batches.get_mut(existing);
        }
        let index = self.type_batches.count;
        self.type_batches.add(TypeBatch::default(), pool);
        *self.type_id_to_index.get_mut(type_id) = index;
        let type_batch = self.type_batches.get_mut(index);
        processor.initialize(type_batch, initial_capacity, pool);
        type_batch
    }

    /// Removes a type batch that has gone empty, disposing its storage.
    pub fn remove_type_batch_if_empty(&mut self, type_id: i32, pool: &mut BufferPool) {
        let index = self.type_batch_index(type_id);
        debug_assert!(index >= 0);
        if self.type_batches.get(index).constraint_count > 0 {
            return;
        }
        self.type_batches.get_mut(index).dispose(pool);
        self.type_batches.fast_remove_at(index);
        *self.type_id_to_index.get_mut(type_id) = -1;
        if index < self.type_batches.count {
            // The swap moved another type batch into the vacated slot.
            let moved_type_id = self.type_batches.get(index).type_id;
            *self.type_id_to_index.get_mut(moved_type_id) = index;
        }
    }

    pub fn dispose(&mut self, pool: &mut BufferPool) {
        for i in 0..self.type_batches.count {
            self.type_batches.get_mut(i).dispose(pool);
        }
        self.type_batches.dispose(pool);
        pool.return_buffer(&mut self.type_id_to_index);
    }
}
