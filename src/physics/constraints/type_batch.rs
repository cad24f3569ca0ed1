//! Raw AOSOA storage for all constraints of one type within a batch.

use crate::physics::handles::ConstraintHandle;
use crate::utilities::bundle_indexing::BundleIndexing;
use crate::utilities::memory::buffer::Buffer;
use crate::utilities::memory::buffer_pool::BufferPool;

/// Untyped bundle storage; the owning type processor knows the real bundle
/// layouts. One constraint occupies one lane of each bundle.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TypeBatch {
    pub body_references: Buffer<u8>,
    pub prestep_data: Buffer<u8>,
    /// Solver coefficients derived each step by the prestep; never persisted
    /// across frames or migrations.
    pub projections: Buffer<u8>,
    pub accumulated_impulses: Buffer<u8>,
    pub index_to_handle: Buffer<ConstraintHandle>,
    pub constraint_count: i32,
    pub type_id: i32,
}

impl Default for TypeBatch {
    fn default() -> Self {
        Self {
            body_references: Buffer::default(),
            prestep_data: Buffer::default(),
            projections: Buffer::default(),
            accumulated_impulses: Buffer::default(),
            index_to_handle: Buffer::default(),
            constraint_count: 0,
            type_id: -1,
        }
    }
}

impl TypeBatch {
    #[inline(always)]
    pub fn allocated(&self) -> bool {
        self.index_to_handle.allocated()
    }

    /// Capacity in constraints.
    #[inline(always)]
    pub fn capacity(&self) -> i32 {
        self.index_to_handle.len()
    }

    #[inline(always)]
    pub fn bundle_count(&self) -> i32 {
        BundleIndexing::get_bundle_count(self.constraint_count)
    }

    pub fn dispose(&mut self, pool: &mut BufferPool) {
        pool.return_buffer(&mut self.body_references);
        pool.return_buffer(&mut self.prestep_data);
        pool.return_buffer(&mut self.projections);
        pool.return_buffer(&mut self.accumulated_impulses);
        pool.return_buffer(&mut self.index_to_handle);
        self.constraint_count = 0;
        self.type_id = -1;
    }
}
