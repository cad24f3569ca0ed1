//! Bridges typed per-kind constraint functions to the solver's untyped type
//! batches.
//!
//! The per-kind functions are monomorphized into the bundle loops through
//! the generic processors; the solver only sees `dyn TypeProcessor` at batch
//! granularity, so no virtual dispatch survives into the inner loops.

use crate::physics::bodies::Bodies;
use crate::physics::body_properties::{BodyInertiaWide, BodyVelocityWide};
use crate::physics::constraint_location::ConstraintLocation;
use crate::physics::constraints::body_references::{OneBodyReferences, TwoBodyReferences};
use crate::physics::constraints::type_batch::TypeBatch;
use crate::physics::handles::ConstraintHandle;
use crate::utilities::bundle_indexing::BundleIndexing;
use crate::utilities::memory::buffer::Buffer;
use crate::utilities::memory::buffer_pool::BufferPool;
use crate::utilities::quaternion_wide::QuaternionWide;
use crate::utilities::vector3_wide::Vector3Wide;
use crate::utilities::wide::{copy_lane, LANE_WIDTH};
use std::marker::PhantomData;
use std::mem::size_of;

/// Most bodies any constraint kind can reference.
pub const MAXIMUM_BODIES_PER_CONSTRAINT: usize = 2;

/// Prestep, warm start, and solve kernels for a two-body constraint kind.
/// All functions operate on one bundle.
pub trait TwoBodyConstraintFunctions: 'static {
    type PrestepData: Copy + Default;
    type Projection: Copy + Default;
    type AccumulatedImpulses: Copy + Default;
    const TYPE_ID: i32;
    const CONSTRAINED_DEGREES_OF_FREEDOM: i32;

    /// Computes per-bundle solver coefficients: jacobians, softened
    /// effective masses, bias velocities, and gathered inertias.
    fn prestep(
        position_a: &Vector3Wide,
        orientation_a: &QuaternionWide,
        inertia_a: &BodyInertiaWide,
        position_b: &Vector3Wide,
        orientation_b: &QuaternionWide,
        inertia_b: &BodyInertiaWide,
        dt: f32,
        inverse_dt: f32,
        prestep: &Self::PrestepData,
    ) -> Self::Projection;

    /// Applies the previous frame's accumulated impulses.
    fn warm_start(
        projection: &Self::Projection,
        impulses: &Self::AccumulatedImpulses,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    );

    /// One velocity iteration.
    fn solve(
        projection: &Self::Projection,
        impulses: &mut Self::AccumulatedImpulses,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    );
}

/// Prestep, warm start, and solve kernels for a one-body constraint kind.
pub trait OneBodyConstraintFunctions: 'static {
    type PrestepData: Copy + Default;
    type Projection: Copy + Default;
    type AccumulatedImpulses: Copy + Default;
    const TYPE_ID: i32;
    const CONSTRAINED_DEGREES_OF_FREEDOM: i32;

    fn prestep(
        position_a: &Vector3Wide,
        orientation_a: &QuaternionWide,
        inertia_a: &BodyInertiaWide,
        dt: f32,
        inverse_dt: f32,
        prestep: &Self::PrestepData,
    ) -> Self::Projection;

    fn warm_start(
        projection: &Self::Projection,
        impulses: &Self::AccumulatedImpulses,
        wsv_a: &mut BodyVelocityWide,
    );

    fn solve(
        projection: &Self::Projection,
        impulses: &mut Self::AccumulatedImpulses,
        wsv_a: &mut BodyVelocityWide,
    );
}

/// The solver-facing interface of a constraint type's storage and kernels.
pub trait TypeProcessor {
    fn type_id(&self) -> i32;
    fn bodies_per_constraint(&self) -> i32;
    fn constrained_degrees_of_freedom(&self) -> i32;

    fn initialize(&self, type_batch: &mut TypeBatch, capacity: i32, pool: &mut BufferPool);

    /// Grows the type batch's storage to hold at least `capacity`
    /// constraints without further allocation; island activation reserves
    /// capacity in one prepass before copying.
    fn ensure_capacity(&self, type_batch: &mut TypeBatch, capacity: i32, pool: &mut BufferPool);

    /// Reserves a lane for a constraint. Body references are the encoded
    /// active-set indices (or handles in sleeping sets). Returns the index
    /// in the type batch.
    fn allocate(
        &self,
        type_batch: &mut TypeBatch,
        handle: ConstraintHandle,
        body_references: &[i32],
        pool: &mut BufferPool,
    ) -> i32;

    /// Removes the lane at `index`, swap-filling from the last lane. The
    /// moved constraint's location entry is repaired through
    /// `handle_to_constraint`.
    fn remove(
        &self,
        type_batch: &mut TypeBatch,
        index: i32,
        handle_to_constraint: &mut Buffer<ConstraintLocation>,
    );

    /// Reads the body references of one lane into `output`; returns how many
    /// bodies the constraint uses.
    fn get_body_references(&self, type_batch: &TypeBatch, index: i32, output: &mut [i32]) -> i32;

    /// Overwrites one body reference slot of one lane.
    fn set_body_reference(
        &self,
        type_batch: &mut TypeBatch,
        index: i32,
        body_index_in_constraint: i32,
        value: i32,
    );

    /// Copies one constraint's persistent lane state (references, prestep,
    /// accumulated impulses) into another type batch of the same type.
    /// Projections are per-step data and are not copied.
    fn copy_constraint_lane(
        &self,
        source: &TypeBatch,
        source_index: i32,
        target: &mut TypeBatch,
        target_index: i32,
    );

    /// The solve-path methods take shared references: concurrent workers
    /// process disjoint bundle ranges of one type batch, and all writes go
    /// through the buffers' shared pointers.
    fn prestep(
        &self,
        type_batch: &TypeBatch,
        bodies: &Bodies,
        dt: f32,
        inverse_dt: f32,
        start_bundle: i32,
        end_bundle: i32,
    );

    fn warm_start(
        &self,
        type_batch: &TypeBatch,
        bodies: &Bodies,
        start_bundle: i32,
        end_bundle: i32,
    );

    fn solve(
        &self,
        type_batch: &TypeBatch,
        bodies: &Bodies,
        start_bundle: i32,
        end_bundle: i32,
    );

    fn scale_accumulated_impulses(&self, type_batch: &mut TypeBatch, scale: f32);
}

#[inline(always)]
fn bundle_capacity_for(constraint_capacity: i32) -> i32 {
    BundleIndexing::get_bundle_count(constraint_capacity.max(1))
}

fn initialize_storage(
    type_batch: &mut TypeBatch,
    type_id: i32,
    capacity: i32,
    pool: &mut BufferPool,
    references_size: usize,
    prestep_size: usize,
    projection_size: usize,
    impulses_size: usize,
) {
    debug_assert!(!type_batch.allocated());
    let bundles = bundle_capacity_for(capacity);
    type_batch.type_id = type_id;
    type_batch.constraint_count = 0;
    type_batch.body_references = pool.take_at_least(bundles * references_size as i32);
    type_batch.prestep_data = pool.take_at_least(bundles * prestep_size as i32);
    type_batch.projections = pool.take_at_least(bundles * projection_size as i32);
    type_batch.accumulated_impulses = pool.take_at_least(bundles * impulses_size as i32);
    type_batch.index_to_handle = pool.take_at_least(bundles * LANE_WIDTH as i32);
}

#[allow(clippy::too_many_arguments)]
fn ensure_lane_capacity(
    type_batch: &mut TypeBatch,
    pool: &mut BufferPool,
    references_size: usize,
    prestep_size: usize,
    projection_size: usize,
    impulses_size: usize,
    target_constraint_capacity: i32,
) {
    let needed_bundles = BundleIndexing::get_bundle_count(target_constraint_capacity);
    // Buffers round capacities up independently; the usable bundle capacity
    // is whatever the tightest buffer allows.
    let old_bundles = (type_batch.body_references.len() / references_size as i32)
        .min(type_batch.prestep_data.len() / prestep_size as i32)
        .min(type_batch.projections.len() / projection_size as i32)
        .min(type_batch.accumulated_impulses.len() / impulses_size as i32)
        .min(type_batch.index_to_handle.len() / LANE_WIDTH as i32);
    if needed_bundles <= old_bundles {
        return;
    }
    let target_bundles = (old_bundles * 2).max(needed_bundles);
    let used_bundles = type_batch.bundle_count();
    pool.resize_to_at_least(
        &mut type_batch.body_references,
        target_bundles * references_size as i32,
        used_bundles * references_size as i32,
    );
    pool.resize_to_at_least(
        &mut type_batch.prestep_data,
        target_bundles * prestep_size as i32,
        used_bundles * prestep_size as i32,
    );
    pool.resize_to_at_least(
        &mut type_batch.projections,
        target_bundles * projection_size as i32,
        0,
    );
    pool.resize_to_at_least(
        &mut type_batch.accumulated_impulses,
        target_bundles * impulses_size as i32,
        used_bundles * impulses_size as i32,
    );
    pool.resize_to_at_least(
        &mut type_batch.index_to_handle,
        target_bundles * LANE_WIDTH as i32,
        type_batch.constraint_count,
    );
}

/// Zeroes one lane of a wide structure.
#[inline(always)]
unsafe fn zero_lane<T>(target: *mut T, lane: usize) {
    let group_count = size_of::<T>() / (LANE_WIDTH * 4);
    let target = target as *mut [u32; LANE_WIDTH];
    for group in 0..group_count {
        (*target.add(group))[lane] = 0;
    }
}

/// Moves the last lane of the batch into `index` and repairs the moved
/// constraint's location. Generic over the persistent bundle types.
unsafe fn remove_lane<TReferences: Copy, TPrestep: Copy, TImpulses: Copy>(
    type_batch: &mut TypeBatch,
    index: i32,
    handle_to_constraint: &mut Buffer<ConstraintLocation>,
) {
    debug_assert!(index >= 0 && index < type_batch.constraint_count);
    let last = type_batch.constraint_count - 1;
    if index < last {
        let (source_bundle, source_inner) = BundleIndexing::get_bundle_indices(last);
        let (target_bundle, target_inner) = BundleIndexing::get_bundle_indices(index);
        let references = type_batch.body_references.as_mut_ptr() as *mut TReferences;
        copy_lane(
            references.add(source_bundle as usize) as *const TReferences,
            source_inner as usize,
            references.add(target_bundle as usize),
            target_inner as usize,
        );
        let prestep = type_batch.prestep_data.as_mut_ptr() as *mut TPrestep;
        copy_lane(
            prestep.add(source_bundle as usize) as *const TPrestep,
            source_inner as usize,
            prestep.add(target_bundle as usize),
            target_inner as usize,
        );
        let impulses = type_batch.accumulated_impulses.as_mut_ptr() as *mut TImpulses;
        copy_lane(
            impulses.add(source_bundle as usize) as *const TImpulses,
            source_inner as usize,
            impulses.add(target_bundle as usize),
            target_inner as usize,
        );
        let moved_handle = *type_batch.index_to_handle.get(last);
        *type_batch.index_to_handle.get_mut(index) = moved_handle;
        handle_to_constraint
            .get_mut(moved_handle.0)
            .index_in_type_batch = index;
    }
    type_batch.constraint_count -= 1;
}

// --- two-body processor ---

pub struct TwoBodyTypeProcessor<F: TwoBodyConstraintFunctions> {
    _marker: PhantomData<fn() -> F>,
}

impl<F: TwoBodyConstraintFunctions> Default for TwoBodyTypeProcessor<F> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<F: TwoBodyConstraintFunctions> TypeProcessor for TwoBodyTypeProcessor<F> {
    fn type_id(&self) -> i32 {
        F::TYPE_ID
    }

    fn bodies_per_constraint(&self) -> i32 {
        2
    }

    fn constrained_degrees_of_freedom(&self) -> i32 {
        F::CONSTRAINED_DEGREES_OF_FREEDOM
    }

    fn initialize(&self, type_batch: &mut TypeBatch, capacity: i32, pool: &mut BufferPool) {
        initialize_storage(
            type_batch,
            F::TYPE_ID,
            capacity,
            pool,
            size_of::<TwoBodyReferences>(),
            size_of::<F::PrestepData>(),
            size_of::<F::Projection>(),
            size_of::<F::AccumulatedImpulses>(),
        );
    }

    fn ensure_capacity(&self, type_batch: &mut TypeBatch, capacity: i32, pool: &mut BufferPool) {
        ensure_lane_capacity(
            type_batch,
            pool,
            size_of::<TwoBodyReferences>(),
            size_of::<F::PrestepData>(),
            size_of::<F::Projection>(),
            size_of::<F::AccumulatedImpulses>(),
            capacity,
        );
    }

    fn allocate(
        &self,
        type_batch: &mut TypeBatch,
        handle: ConstraintHandle,
        body_references: &[i32],
        pool: &mut BufferPool,
    ) -> i32 {
        debug_assert!(body_references.len() == 2);
        debug_assert!(type_batch.type_id == F::TYPE_ID);
        ensure_lane_capacity(
            type_batch,
            pool,
            size_of::<TwoBodyReferences>(),
            size_of::<F::PrestepData>(),
            size_of::<F::Projection>(),
            size_of::<F::AccumulatedImpulses>(),
            type_batch.constraint_count + 1,
        );
        let index = type_batch.constraint_count;
        type_batch.constraint_count += 1;
        let (bundle, inner) = BundleIndexing::get_bundle_indices(index);
        unsafe {
            let references = (type_batch.body_references.as_mut_ptr()
                as *mut TwoBodyReferences)
                .add(bundle as usize);
            (*references).index_a.write_slot(body_references[0], inner as usize);
            (*references).index_b.write_slot(body_references[1], inner as usize);
            let impulses = (type_batch.accumulated_impulses.as_mut_ptr()
                as *mut F::AccumulatedImpulses)
                .add(bundle as usize);
            zero_lane(impulses, inner as usize);
        }
        *type_batch.index_to_handle.get_mut(index) = handle;
        index
    }

    fn remove(
        &self,
        type_batch: &mut TypeBatch,
        index: i32,
        handle_to_constraint: &mut Buffer<ConstraintLocation>,
    ) {
        unsafe {
            remove_lane::<TwoBodyReferences, F::PrestepData, F::AccumulatedImpulses>(
                type_batch,
                index,
                handle_to_constraint,
            );
        }
    }

    fn get_body_references(&self, type_batch: &TypeBatch, index: i32, output: &mut [i32]) -> i32 {
        let (bundle, inner) = BundleIndexing::get_bundle_indices(index);
        unsafe {
            let references = (type_batch.body_references.as_ptr() as *const TwoBodyReferences)
                .add(bundle as usize);
            output[0] = (*references).index_a.read_slot(inner as usize);
            output[1] = (*references).index_b.read_slot(inner as usize);
        }
        2
    }

    fn set_body_reference(
        &self,
        type_batch: &mut TypeBatch,
        index: i32,
        body_index_in_constraint: i32,
        value: i32,
    ) {
        let (bundle, inner) = BundleIndexing::get_bundle_indices(index);
        unsafe {
            let references = (type_batch.body_references.as_mut_ptr()
                as *mut TwoBodyReferences)
                .add(bundle as usize);
            if body_index_in_constraint == 0 {
                (*references).index_a.write_slot(value, inner as usize);
            } else {
                (*references).index_b.write_slot(value, inner as usize);
            }
        }
    }

    fn copy_constraint_lane(
        &self,
        source: &TypeBatch,
        source_index: i32,
        target: &mut TypeBatch,
        target_index: i32,
    ) {
        debug_assert!(source.type_id == target.type_id);
        let (source_bundle, source_inner) = BundleIndexing::get_bundle_indices(source_index);
        let (target_bundle, target_inner) = BundleIndexing::get_bundle_indices(target_index);
        unsafe {
            copy_lane(
                (source.body_references.as_ptr() as *const TwoBodyReferences)
                    .add(source_bundle as usize),
                source_inner as usize,
                (target.body_references.shared_mut_ptr() as *mut TwoBodyReferences)
                    .add(target_bundle as usize),
                target_inner as usize,
            );
            copy_lane(
                (source.prestep_data.as_ptr() as *const F::PrestepData)
                    .add(source_bundle as usize),
                source_inner as usize,
                (target.prestep_data.shared_mut_ptr() as *mut F::PrestepData)
                    .add(target_bundle as usize),
                target_inner as usize,
            );
            copy_lane(
                (source.accumulated_impulses.as_ptr() as *const F::AccumulatedImpulses)
                    .add(source_bundle as usize),
                source_inner as usize,
                (target.accumulated_impulses.shared_mut_ptr() as *mut F::AccumulatedImpulses)
                    .add(target_bundle as usize),
                target_inner as usize,
            );
        }
    }

    fn prestep(
        &self,
        type_batch: &TypeBatch,
        bodies: &Bodies,
        dt: f32,
        inverse_dt: f32,
        start_bundle: i32,
        end_bundle: i32,
    ) {
        let references = type_batch.body_references.as_ptr() as *const TwoBodyReferences;
        let presteps = type_batch.prestep_data.as_ptr() as *const F::PrestepData;
        let projections = type_batch.projections.shared_mut_ptr() as *mut F::Projection;
        for bundle in start_bundle..end_bundle {
            let count_in_bundle =
                (type_batch.constraint_count - bundle * LANE_WIDTH as i32).min(LANE_WIDTH as i32);
            unsafe {
                let bundle_references = &*references.add(bundle as usize);
                let mut position_a = Vector3Wide::default();
                let mut orientation_a = QuaternionWide::default();
                let mut velocity_a = BodyVelocityWide::default();
                let mut inertia_a = BodyInertiaWide::default();
                let mut position_b = Vector3Wide::default();
                let mut orientation_b = QuaternionWide::default();
                let mut velocity_b = BodyVelocityWide::default();
                let mut inertia_b = BodyInertiaWide::default();
                bodies.gather_state(
                    &bundle_references.index_a,
                    count_in_bundle,
                    &mut position_a,
                    &mut orientation_a,
                    &mut velocity_a,
                    &mut inertia_a,
                );
                bodies.gather_state(
                    &bundle_references.index_b,
                    count_in_bundle,
                    &mut position_b,
                    &mut orientation_b,
                    &mut velocity_b,
                    &mut inertia_b,
                );
                *projections.add(bundle as usize) = F::prestep(
                    &position_a,
                    &orientation_a,
                    &inertia_a,
                    &position_b,
                    &orientation_b,
                    &inertia_b,
                    dt,
                    inverse_dt,
                    &*presteps.add(bundle as usize),
                );
            }
        }
    }

    fn warm_start(
        &self,
        type_batch: &TypeBatch,
        bodies: &Bodies,
        start_bundle: i32,
        end_bundle: i32,
    ) {
        let references = type_batch.body_references.as_ptr() as *const TwoBodyReferences;
        let projections = type_batch.projections.as_ptr() as *const F::Projection;
        let impulses = type_batch.accumulated_impulses.as_ptr() as *const F::AccumulatedImpulses;
        for bundle in start_bundle..end_bundle {
            let count_in_bundle =
                (type_batch.constraint_count - bundle * LANE_WIDTH as i32).min(LANE_WIDTH as i32);
            unsafe {
                let bundle_references = &*references.add(bundle as usize);
                let mut wsv_a = BodyVelocityWide::default();
                let mut wsv_b = BodyVelocityWide::default();
                bodies.gather_velocities(&bundle_references.index_a, count_in_bundle, &mut wsv_a);
                bodies.gather_velocities(&bundle_references.index_b, count_in_bundle, &mut wsv_b);
                F::warm_start(
                    &*projections.add(bundle as usize),
                    &*impulses.add(bundle as usize),
                    &mut wsv_a,
                    &mut wsv_b,
                );
                bodies.scatter_velocities(&bundle_references.index_a, count_in_bundle, &wsv_a);
                bodies.scatter_velocities(&bundle_references.index_b, count_in_bundle, &wsv_b);
            }
        }
    }

    fn solve(
        &self,
        type_batch: &TypeBatch,
        bodies: &Bodies,
        start_bundle: i32,
        end_bundle: i32,
    ) {
        let references = type_batch.body_references.as_ptr() as *const TwoBodyReferences;
        let projections = type_batch.projections.as_ptr() as *const F::Projection;
        let impulses =
            type_batch.accumulated_impulses.shared_mut_ptr() as *mut F::AccumulatedImpulses;
        for bundle in start_bundle..end_bundle {
            let count_in_bundle =
                (type_batch.constraint_count - bundle * LANE_WIDTH as i32).min(LANE_WIDTH as i32);
            unsafe {
                let bundle_references = &*references.add(bundle as usize);
                let mut wsv_a = BodyVelocityWide::default();
                let mut wsv_b = BodyVelocityWide::default();
                bodies.gather_velocities(&bundle_references.index_a, count_in_bundle, &mut wsv_a);
                bodies.gather_velocities(&bundle_references.index_b, count_in_bundle, &mut wsv_b);
                F::solve(
                    &*projections.add(bundle as usize),
                    &mut *impulses.add(bundle as usize),
                    &mut wsv_a,
                    &mut wsv_b,
                );
                bodies.scatter_velocities(&bundle_references.index_a, count_in_bundle, &wsv_a);
                bodies.scatter_velocities(&bundle_references.index_b, count_in_bundle, &wsv_b);
            }
        }
    }

    fn scale_accumulated_impulses(&self, type_batch: &mut TypeBatch, scale: f32) {
        scale_impulses_raw(type_batch, scale);
    }
}

// --- one-body processor ---

pub struct OneBodyTypeProcessor<F: OneBodyConstraintFunctions> {
    _marker: PhantomData<fn() -> F>,
}

impl<F: OneBodyConstraintFunctions> Default for OneBodyTypeProcessor<F> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<F: OneBodyConstraintFunctions> TypeProcessor for OneBodyTypeProcessor<F> {
    fn type_id(&self) -> i32 {
        F::TYPE_ID
    }

    fn bodies_per_constraint(&self) -> i32 {
        1
    }

    fn constrained_degrees_of_freedom(&self) -> i32 {
        F::CONSTRAINED_DEGREES_OF_FREEDOM
    }

    fn initialize(&self, type_batch: &mut TypeBatch, capacity: i32, pool: &mut BufferPool) {
        initialize_storage(
            type_batch,
            F::TYPE_ID,
            capacity,
            pool,
            size_of::<OneBodyReferences>(),
            size_of::<F::PrestepData>(),
            size_of::<F::Projection>(),
            size_of::<F::AccumulatedImpulses>(),
        );
    }

    fn ensure_capacity(&self, type_batch: &mut TypeBatch, capacity: i32, pool: &mut BufferPool) {
        ensure_lane_capacity(
            type_batch,
            pool,
            size_of::<OneBodyReferences>(),
            size_of::<F::PrestepData>(),
            size_of::<F::Projection>(),
            size_of::<F::AccumulatedImpulses>(),
            capacity,
        );
    }

    fn allocate(
        &self,
        type_batch: &mut TypeBatch,
        handle: ConstraintHandle,
        body_references: &[i32],
        pool: &mut BufferPool,
    ) -> i32 {
        debug_assert!(body_references.len() == 1);
        ensure_lane_capacity(
            type_batch,
            pool,
            size_of::<OneBodyReferences>(),
            size_of::<F::PrestepData>(),
            size_of::<F::Projection>(),
            size_of::<F::AccumulatedImpulses>(),
            type_batch.constraint_count + 1,
        );
        let index = type_batch.constraint_count;
        type_batch.constraint_count += 1;
        let (bundle, inner) = BundleIndexing::get_bundle_indices(index);
        unsafe {
            let references = (type_batch.body_references.as_mut_ptr() as *mut OneBodyReferences)
                .add(bundle as usize);
            (*references).index_a.write_slot(body_references[0], inner as usize);
            let impulses = (type_batch.accumulated_impulses.as_mut_ptr()
                as *mut F::AccumulatedImpulses)
                .add(bundle as usize);
            zero_lane(impulses, inner as usize);
        }
        *type_batch.index_to_handle.get_mut(index) = handle;
        index
    }

    fn remove(
        &self,
        type_batch: &mut TypeBatch,
        index: i32,
        handle_to_constraint: &mut Buffer<ConstraintLocation>,
    ) {
        unsafe {
            remove_lane::<OneBodyReferences, F::PrestepData, F::AccumulatedImpulses>(
                type_batch,
                index,
                handle_to_constraint,
            );
        }
    }

    fn get_body_references(&self, type_batch: &TypeBatch, index: i32, output: &mut [i32]) -> i32 {
        let (bundle, inner) = BundleIndexing::get_bundle_indices(index);
        unsafe {
            let references =
                (type_batch.body_references.as_ptr() as *const OneBodyReferences).add(bundle as usize);
            output[0] = (*references).index_a.read_slot(inner as usize);
        }
        1
    }

    fn set_body_reference(
        &self,
        type_batch: &mut TypeBatch,
        index: i32,
        body_index_in_constraint: i32,
        value: i32,
    ) {
        debug_assert!(body_index_in_constraint == 0);
        let (bundle, inner) = BundleIndexing::get_bundle_indices(index);
        unsafe {
            let references = (type_batch.body_references.as_mut_ptr() as *mut OneBodyReferences)
                .add(bundle as usize);
            (*references).index_a.write_slot(value, inner as usize);
        }
    }

    fn copy_constraint_lane(
        &self,
        source: &TypeBatch,
        source_index: i32,
        target: &mut TypeBatch,
        target_index: i32,
    ) {
        debug_assert!(source.type_id == target.type_id);
        let (source_bundle, source_inner) = BundleIndexing::get_bundle_indices(source_index);
        let (target_bundle, target_inner) = BundleIndexing::get_bundle_indices(target_index);
        unsafe {
            copy_lane(
                (source.body_references.as_ptr() as *const OneBodyReferences)
                    .add(source_bundle as usize),
                source_inner as usize,
                (target.body_references.shared_mut_ptr() as *mut OneBodyReferences)
                    .add(target_bundle as usize),
                target_inner as usize,
            );
            copy_lane(
                (source.prestep_data.as_ptr() as *const F::PrestepData)
                    .add(source_bundle as usize),
                source_inner as usize,
                (target.prestep_data.shared_mut_ptr() as *mut F::PrestepData)
                    .add(target_bundle as usize),
                target_inner as usize,
            );
            copy_lane(
                (source.accumulated_impulses.as_ptr() as *const F::AccumulatedImpulses)
                    .add(source_bundle as usize),
                source_inner as usize,
                (target.accumulated_impulses.shared_mut_ptr() as *mut F::AccumulatedImpulses)
                    .add(target_bundle as usize),
                target_inner as usize,
            );
        }
    }

    fn prestep(
        &self,
        type_batch: &TypeBatch,
        bodies: &Bodies,
        dt: f32,
        inverse_dt: f32,
        start_bundle: i32,
        end_bundle: i32,
    ) {
        let references = type_batch.body_references.as_ptr() as *const OneBodyReferences;
        let presteps = type_batch.prestep_data.as_ptr() as *const F::PrestepData;
        let projections = type_batch.projections.shared_mut_ptr() as *mut F::Projection;
        for bundle in start_bundle..end_bundle {
            let count_in_bundle =
                (type_batch.constraint_count - bundle * LANE_WIDTH as i32).min(LANE_WIDTH as i32);
            unsafe {
                let bundle_references = &*references.add(bundle as usize);
                let mut position_a = Vector3Wide::default();
                let mut orientation_a = QuaternionWide::default();
                let mut velocity_a = BodyVelocityWide::default();
                let mut inertia_a = BodyInertiaWide::default();
                bodies.gather_state(
                    &bundle_references.index_a,
                    count_in_bundle,
                    &mut position_a,
                    &mut orientation_a,
                    &mut velocity_a,
                    &mut inertia_a,
                );
                *projections.add(bundle as usize) = F::prestep(
                    &position_a,
                    &orientation_a,
                    &inertia_a,
                    dt,
                    inverse_dt,
                    &*presteps.add(bundle as usize),
                );
            }
        }
    }

    fn warm_start(
        &self,
        type_batch: &TypeBatch,
        bodies: &Bodies,
        start_bundle: i32,
        end_bundle: i32,
    ) {
        let references = type_batch.body_references.as_ptr() as *const OneBodyReferences;
        let projections = type_batch.projections.as_ptr() as *const F::Projection;
        let impulses = type_batch.accumulated_impulses.as_ptr() as *const F::AccumulatedImpulses;
        for bundle in start_bundle..end_bundle {
            let count_in_bundle =
                (type_batch.constraint_count - bundle * LANE_WIDTH as i32).min(LANE_WIDTH as i32);
            unsafe {
                let bundle_references = &*references.add(bundle as usize);
                let mut wsv_a = BodyVelocityWide::default();
                bodies.gather_velocities(&bundle_references.index_a, count_in_bundle, &mut wsv_a);
                F::warm_start(
                    &*projections.add(bundle as usize),
                    &*impulses.add(bundle as usize),
                    &mut wsv_a,
                );
                bodies.scatter_velocities(&bundle_references.index_a, count_in_bundle, &wsv_a);
            }
        }
    }

    fn solve(
        &self,
        type_batch: &TypeBatch,
        bodies: &Bodies,
        start_bundle: i32,
        end_bundle: i32,
    ) {
        let references = type_batch.body_references.as_ptr() as *const OneBodyReferences;
        let projections = type_batch.projections.as_ptr() as *const F::Projection;
        let impulses =
            type_batch.accumulated_impulses.shared_mut_ptr() as *mut F::AccumulatedImpulses;
        for bundle in start_bundle..end_bundle {
            let count_in_bundle =
                (type_batch.constraint_count - bundle * LANE_WIDTH as i32).min(LANE_WIDTH as i32);
            unsafe {
                let bundle_references = &*references.add(bundle as usize);
                let mut wsv_a = BodyVelocityWide::default();
                bodies.gather_velocities(&bundle_references.index_a, count_in_bundle, &mut wsv_a);
                F::solve(
                    &*projections.add(bundle as usize),
                    &mut *impulses.add(bundle as usize),
                    &mut wsv_a,
                );
                bodies.scatter_velocities(&bundle_references.index_a, count_in_bundle, &wsv_a);
            }
        }
    }

    fn scale_accumulated_impulses(&self, type_batch: &mut TypeBatch, scale: f32) {
        scale_impulses_raw(type_batch, scale);
    }
}

fn scale_impulses_raw(type_batch: &mut TypeBatch, scale: f32) {
    let float_count = type_batch.accumulated_impulses.len() / size_of::<f32>() as i32;
    let floats = type_batch.accumulated_impulses.as_mut_ptr() as *mut f32;
    for i in 0..float_count {
        unsafe {
            *floats.add(i as usize) *= scale;
        }
    }
}

/// A typed description that can be written into and read out of a type
/// batch lane.
pub trait ConstraintDescription: Copy {
    const TYPE_ID: i32;
    const BODIES_PER_CONSTRAINT: i32;

    fn create_type_processor() -> Box<dyn TypeProcessor + Send + Sync>;

    /// Writes the description into a lane of the type batch's prestep data.
    ///
    /// # Safety
    /// The type batch's prestep layout must match this description's kind.
    unsafe fn apply_description(&self, type_batch: &mut TypeBatch, bundle_index: i32, inner_index: i32);

    /// Reads a lane back out as a description.
    ///
    /// # Safety
    /// The type batch's prestep layout must match this description's kind.
    unsafe fn build_description(type_batch: &TypeBatch, bundle_index: i32, inner_index: i32) -> Self;
}

/// Marker for descriptions connecting two bodies.
pub trait TwoBodyConstraintDescription: ConstraintDescription {}

/// Marker for descriptions connecting one body.
pub trait OneBodyConstraintDescription: ConstraintDescription {}
