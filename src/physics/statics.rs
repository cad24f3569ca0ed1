//! Statics: pose plus collidable, no velocity or inertia.

use crate::physics::body_description::StaticDescription;
use crate::physics::body_properties::RigidPose;
use crate::physics::collidable::Collidable;
use crate::physics::handles::StaticHandle;
use crate::utilities::memory::buffer::Buffer;
use crate::utilities::memory::buffer_pool::BufferPool;
use crate::utilities::memory::id_pool::IdPool;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Static {
    pub pose: RigidPose,
    pub collidable: Collidable,
}

pub struct Statics {
    pub handle_to_index: Buffer<i32>,
    pub index_to_handle: Buffer<StaticHandle>,
    pub statics_buffer: Buffer<Static>,
    pub handle_pool: IdPool,
    pub count: i32,
}

impl Statics {
    pub fn new(initial_capacity: i32, pool: &mut BufferPool) -> Self {
        let mut handle_to_index: Buffer<i32> = pool.take_at_least(initial_capacity);
        for i in 0..handle_to_index.len() {
            *handle_to_index.get_mut(i) = -1;
        }
        Self {
            handle_to_index,
            index_to_handle: pool.take_at_least(initial_capacity),
            statics_buffer: pool.take_at_least(initial_capacity),
            handle_pool: IdPool::new(initial_capacity, pool),
            count: 0,
        }
    }

    #[inline(always)]
    pub fn exists(&self, handle: StaticHandle) -> bool {
        handle.0 >= 0
            && handle.0 < self.handle_to_index.len()
            && *self.handle_to_index.get(handle.0) >= 0
    }

    #[inline(always)]
    pub fn index_of(&self, handle: StaticHandle) -> i32 {
        debug_assert!(self.exists(handle));
        *self.handle_to_index.get(handle.0)
    }

    pub fn get(&self, handle: StaticHandle) -> &Static {
        self.statics_buffer.get(self.index_of(handle))
    }

    pub fn get_mut(&mut self, handle: StaticHandle) -> &mut Static {
        let index = self.index_of(handle);
        self.statics_buffer.get_mut(index)
    }

    /// Adds a static. The caller attaches the broadphase leaf and writes its
    /// index into the returned slot's collidable.
    pub fn add(&mut self, description: &StaticDescription, pool: &mut BufferPool) -> StaticHandle {
        let handle_index = self.handle_pool.take();
        if handle_index == self.handle_to_index.len() {
            let old_capacity = self.handle_to_index.len();
            pool.resize_to_at_least(&mut self.handle_to_index, old_capacity * 2, old_capacity);
            for i in old_capacity..self.handle_to_index.len() {
                *self.handle_to_index.get_mut(i) = -1;
            }
        }
        let index = self.count;
        if index == self.statics_buffer.len() {
            pool.resize_to_at_least(&mut self.statics_buffer, index * 2, index);
            pool.resize_to_at_least(&mut self.index_to_handle, index * 2, index);
        }
        self.count += 1;
        let handle = StaticHandle(handle_index);
        *self.handle_to_index.get_mut(handle_index) = index;
        *self.index_to_handle.get_mut(index) = handle;
        *self.statics_buffer.get_mut(index) = Static {
            pose: description.pose,
            collidable: Collidable {
                shape: description.shape,
                broad_phase_index: -1,
                ..Collidable::default()
            },
        };
        handle
    }

    /// Removes a static by handle. Returns the handle of the static moved
    /// into the vacated slot, if any; the caller patches broadphase state.
    pub fn remove(
        &mut self,
        handle: StaticHandle,
        pool: &mut BufferPool,
    ) -> Option<StaticHandle> {
        debug_assert!(self.exists(handle));
        let index = self.index_of(handle);
        *self.handle_to_index.get_mut(handle.0) = -1;
        self.handle_pool.return_id(handle.0, pool);
        self.count -= 1;
        if index < self.count {
            let last = self.count;
            *self.statics_buffer.get_mut(index) = *self.statics_buffer.get(last);
            let moved_handle = *self.index_to_handle.get(last);
            *self.index_to_handle.get_mut(index) = moved_handle;
            *self.handle_to_index.get_mut(moved_handle.0) = index;
            Some(moved_handle)
        } else {
            None
        }
    }

    pub fn clear(&mut self, pool: &mut BufferPool) {
        for i in 0..self.count {
            let handle = *self.index_to_handle.get(i);
            *self.handle_to_index.get_mut(handle.0) = -1;
            self.handle_pool.return_id(handle.0, pool);
        }
        self.count = 0;
    }

    pub fn dispose(&mut self, pool: &mut BufferPool) {
        pool.return_buffer(&mut self.handle_to_index);
        pool.return_buffer(&mut self.index_to_handle);
        pool.return_buffer(&mut self.statics_buffer);
        self.handle_pool.dispose(pool);
        self.count = 0;
    }
}
