//! Shape storage.
//!
//! The core only needs shapes for identity and bounds; collision pair
//! testers consume raw shape data through the narrowphase registry and live
//! outside this crate.

use crate::utilities::bounding_box::BoundingBox;
use crate::utilities::memory::buffer::Buffer;
use crate::utilities::memory::buffer_pool::BufferPool;
use crate::utilities::memory::id_pool::IdPool;
use glam::{Quat, Vec3};

/// Index of a shape within the shape collection, paired with its type.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypedIndex {
    pub packed: u32,
}

impl TypedIndex {
    #[inline(always)]
    pub fn new(type_id: i32, index: i32) -> Self {
        debug_assert!(type_id >= 0 && type_id < 128);
        debug_assert!(index >= 0);
        // The high bit flags existence so a zeroed TypedIndex reads as empty.
        Self {
            packed: 0x8000_0000 | ((type_id as u32) << 24) | index as u32,
        }
    }

    #[inline(always)]
    pub fn exists(self) -> bool {
        self.packed & 0x8000_0000 != 0
    }

    #[inline(always)]
    pub fn type_id(self) -> i32 {
        ((self.packed >> 24) & 0x7F) as i32
    }

    #[inline(always)]
    pub fn index(self) -> i32 {
        (self.packed & 0x00FF_FFFF) as i32
    }
}

impl Default for TypedIndex {
    fn default() -> Self {
        Self { packed: 0 }
    }
}

/// A shape the core can store and compute bounds for.
pub trait Shape: Copy + 'static {
    const TYPE_ID: i32;

    /// Computes the shape's bounds around its pose's orientation, centered
    /// on the origin.
    fn compute_bounds(&self, orientation: Quat) -> BoundingBox;

    /// Maximum distance from the center to the surface; used for angular
    /// bounds expansion.
    fn maximum_radius(&self) -> f32;
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Sphere {
    pub radius: f32,
}

impl Shape for Sphere {
    const TYPE_ID: i32 = 0;

    fn compute_bounds(&self, _orientation: Quat) -> BoundingBox {
        BoundingBox::new(Vec3::splat(-self.radius), Vec3::splat(self.radius))
    }

    fn maximum_radius(&self) -> f32 {
        self.radius
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct BoxShape {
    pub half_width: f32,
    pub half_height: f32,
    pub half_length: f32,
}

impl BoxShape {
    pub fn new(width: f32, height: f32, length: f32) -> Self {
        Self {
            half_width: width * 0.5,
            half_height: height * 0.5,
            half_length: length * 0.5,
        }
    }
}

impl Shape for BoxShape {
    const TYPE_ID: i32 = 1;

    fn compute_bounds(&self, orientation: Quat) -> BoundingBox {
        // Extent along each world axis is the absolute rotated half extents.
        let x = orientation * Vec3::new(self.half_width, 0.0, 0.0);
        let y = orientation * Vec3::new(0.0, self.half_height, 0.0);
        let z = orientation * Vec3::new(0.0, 0.0, self.half_length);
        let extent = x.abs() + y.abs() + z.abs();
        BoundingBox::new(-extent, extent)
    }

    fn maximum_radius(&self) -> f32 {
        Vec3::new(self.half_width, self.half_height, self.half_length).length()
    }
}

struct ShapeBatch {
    /// Raw shape storage; stride is the shape type's size.
    data: Buffer<u8>,
    ids: IdPool,
    shape_size: i32,
    /// Computes bounds for a shape at the given slot.
    compute_bounds: unsafe fn(*const u8, Quat) -> BoundingBox,
    maximum_radius: unsafe fn(*const u8) -> f32,
}

unsafe fn compute_bounds_erased<S: Shape>(data: *const u8, orientation: Quat) -> BoundingBox {
    (*(data as *const S)).compute_bounds(orientation)
}

unsafe fn maximum_radius_erased<S: Shape>(data: *const u8) -> f32 {
    (*(data as *const S)).maximum_radius()
}

/// Collection of all shapes registered with a simulation, stored per type in
/// untyped arenas.
pub struct Shapes {
    batches: Vec<Option<ShapeBatch>>,
    initial_capacity_per_type: i32,
}

impl Shapes {
    pub fn new(initial_capacity_per_type: i32) -> Self {
        Self {
            batches: Vec::new(),
            initial_capacity_per_type: initial_capacity_per_type.max(1),
        }
    }

    /// Adds a shape and returns its typed index.
    pub fn add<S: Shape>(&mut self, shape: S, pool: &mut BufferPool) -> TypedIndex {
        let type_id = S::TYPE_ID as usize;
        if type_id >= self.batches.len() {
            self.batches.resize_with(type_id + 1, || None);
        }
        let shape_size = std::mem::size_of::<S>().max(1) as i32;
        let initial_capacity = self.initial_capacity_per_type;
        let batch = self.batches[type_id].get_or_insert_with(|| ShapeBatch {
            data: pool.take_at_least(initial_capacity * shape_size),
            ids: IdPool::new(initial_capacity, pool),
            shape_size,
            compute_bounds: compute_bounds_erased::<S>,
            maximum_radius: maximum_radius_erased::<S>,
        });
        debug_assert!(batch.shape_size == shape_size);
        let index = batch.ids.take();
        let required = (index + 1) * shape_size;
        if required > batch.data.len() {
            let copy_count = batch.data.len();
            pool.resize_to_at_least(&mut batch.data, required, copy_count);
        }
        unsafe {
            let slot = batch.data.as_mut_ptr().add((index * shape_size) as usize) as *mut S;
            std::ptr::write(slot, shape);
        }
        TypedIndex::new(S::TYPE_ID, index)
    }

    /// Removes a shape. The slot is recycled for later adds of the same
    /// type. Collidables referencing the shape must already be gone.
    pub fn remove(&mut self, shape: TypedIndex, pool: &mut BufferPool) {
        debug_assert!(shape.exists());
        let batch = self.batches[shape.type_id() as usize]
            .as_mut()
            .expect("Shape type must have a batch to remove from.");
        batch.ids.return_id(shape.index(), pool);
    }

    /// Gets a pointer to a shape's raw data for tester consumption.
    #[inline(always)]
    pub fn get_data(&self, shape: TypedIndex) -> *const u8 {
        debug_assert!(shape.exists());
        let batch = self.batches[shape.type_id() as usize]
            .as_ref()
            .expect("Shape type must be registered.");
        unsafe {
            batch
                .data
                .as_ptr()
                .add((shape.index() * batch.shape_size) as usize)
        }
    }

    pub fn get<S: Shape>(&self, shape: TypedIndex) -> &S {
        debug_assert!(shape.type_id() == S::TYPE_ID);
        unsafe { &*(self.get_data(shape) as *const S) }
    }

    /// Computes bounds for a shape at the given orientation, centered on the
    /// origin.
    pub fn compute_bounds(&self, shape: TypedIndex, orientation: Quat) -> BoundingBox {
        debug_assert!(shape.exists());
        let batch = self.batches[shape.type_id() as usize]
            .as_ref()
            .expect("Shape type must be registered.");
        unsafe { (batch.compute_bounds)(self.get_data(shape), orientation) }
    }

    pub fn maximum_radius(&self, shape: TypedIndex) -> f32 {
        debug_assert!(shape.exists());
        let batch = self.batches[shape.type_id() as usize]
            .as_ref()
            .expect("Shape type must be registered.");
        unsafe { (batch.maximum_radius)(self.get_data(shape)) }
    }

    pub fn dispose(&mut self, pool: &mut BufferPool) {
        for batch in self.batches.iter_mut().flatten() {
            pool.return_buffer(&mut batch.data);
            batch.ids.dispose(pool);
        }
        self.batches.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_index_packs_and_unpacks() {
        let index = TypedIndex::new(5, 1234);
        assert!(index.exists());
        assert_eq!(index.type_id(), 5);
        assert_eq!(index.index(), 1234);
        assert!(!TypedIndex::default().exists());
    }

    #[test]
    fn shapes_store_and_recycle() {
        let mut pool = BufferPool::new(4096);
        let mut shapes = Shapes::new(4);
        let sphere = shapes.add(Sphere { radius: 0.5 }, &mut pool);
        let box_shape = shapes.add(BoxShape::new(1.0, 2.0, 3.0), &mut pool);
        assert_eq!(shapes.get::<Sphere>(sphere).radius, 0.5);
        assert_eq!(shapes.get::<BoxShape>(box_shape).half_height, 1.0);
        let bounds = shapes.compute_bounds(sphere, Quat::IDENTITY);
        assert_eq!(bounds.max, Vec3::splat(0.5));
        shapes.remove(sphere, &mut pool);
        let recycled = shapes.add(Sphere { radius: 2.0 }, &mut pool);
        assert_eq!(recycled.index(), sphere.index());
        shapes.dispose(&mut pool);
        pool.clear();
    }
}
