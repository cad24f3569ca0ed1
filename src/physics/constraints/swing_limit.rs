//! Swing limit: inequality bounding the angle between an axis on each body.

use crate::physics::body_properties::{BodyInertiaWide, BodyVelocityWide};
use crate::physics::constraints::spring_settings::{SpringSettings, SpringSettingsWide};
use crate::physics::constraints::type_batch::TypeBatch;
use crate::physics::constraints::type_ids;
use crate::physics::constraints::type_processor::{
    ConstraintDescription, TwoBodyConstraintDescription, TwoBodyConstraintFunctions,
    TwoBodyTypeProcessor, TypeProcessor,
};
use crate::utilities::quaternion_wide::QuaternionWide;
use crate::utilities::symmetric3x3_wide::Symmetric3x3Wide;
use crate::utilities::vector3_wide::Vector3Wide;
use crate::utilities::wide::WideFloat;
use glam::Vec3;

#[derive(Clone, Copy, Debug)]
pub struct SwingLimit {
    pub local_axis_a: Vec3,
    pub local_axis_b: Vec3,
    /// Largest permitted angle between the world axes.
    pub maximum_swing_angle: f32,
    pub spring_settings: SpringSettings,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct SwingLimitPrestep {
    pub local_axis_a: Vector3Wide,
    pub local_axis_b: Vector3Wide,
    /// cos(maximum swing angle); the constraint operates on dot products.
    pub minimum_dot: WideFloat,
    pub spring_settings: SpringSettingsWide,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct SwingLimitProjection {
    pub inertia_a: BodyInertiaWide,
    pub inertia_b: BodyInertiaWide,
    /// Unnormalized jacobian a x b; d(dot)/dt = (wa - wb) . jacobian.
    pub jacobian: Vector3Wide,
    pub bias_velocity: WideFloat,
    pub effective_mass: WideFloat,
    pub softness_impulse_scale: WideFloat,
}

pub struct SwingLimitFunctions;

impl SwingLimitFunctions {
    #[inline(always)]
    fn apply_impulse(
        projection: &SwingLimitProjection,
        amount: WideFloat,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        let world_impulse = projection.jacobian.scale(amount);
        wsv_a.angular = wsv_a.angular
            + projection
                .inertia_a
                .inverse_inertia_tensor
                .transform(&world_impulse);
        wsv_b.angular = wsv_b.angular
            - projection
                .inertia_b
                .inverse_inertia_tensor
                .transform(&world_impulse);
    }
}

impl TwoBodyConstraintFunctions for SwingLimitFunctions {
    type PrestepData = SwingLimitPrestep;
    type Projection = SwingLimitProjection;
    type AccumulatedImpulses = WideFloat;
    const TYPE_ID: i32 = type_ids::SWING_LIMIT;
    const CONSTRAINED_DEGREES_OF_FREEDOM: i32 = 1;

    fn prestep(
        _position_a: &Vector3Wide,
        orientation_a: &QuaternionWide,
        inertia_a: &BodyInertiaWide,
        _position_b: &Vector3Wide,
        orientation_b: &QuaternionWide,
        inertia_b: &BodyInertiaWide,
        dt: f32,
        _inverse_dt: f32,
        prestep: &SwingLimitPrestep,
    ) -> SwingLimitProjection {
        let axis_a = orientation_a.transform(&prestep.local_axis_a);
        let axis_b = orientation_b.transform(&prestep.local_axis_b);
        let springiness = prestep.spring_settings.compute_springiness(dt);
        let jacobian = axis_a.cross(&axis_b);
        let combined_inertia = inertia_a
            .inverse_inertia_tensor
            .add(&inertia_b.inverse_inertia_tensor);
        let inverse_effective_mass =
            Symmetric3x3Wide::vector_sandwich(&jacobian, &combined_inertia);
        // Parallel axes leave nothing to push against.
        let degenerate = inverse_effective_mass.less_than(WideFloat::splat(1e-10));
        let effective_mass = degenerate.select(
            WideFloat::ZERO,
            springiness.effective_mass_cfm_scale / inverse_effective_mass,
        );
        // Positive violation when the axes have swung past the limit;
        // negative inside the limit acts speculatively.
        let violation = prestep.minimum_dot - axis_a.dot(&axis_b);
        SwingLimitProjection {
            inertia_a: *inertia_a,
            inertia_b: *inertia_b,
            jacobian,
            bias_velocity: violation * springiness.position_error_to_velocity,
            effective_mass,
            softness_impulse_scale: springiness.softness_impulse_scale,
        }
    }

    fn warm_start(
        projection: &SwingLimitProjection,
        impulses: &WideFloat,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        Self::apply_impulse(projection, *impulses, wsv_a, wsv_b);
    }

    fn solve(
        projection: &SwingLimitProjection,
        impulses: &mut WideFloat,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        let velocity_error = (wsv_a.angular - wsv_b.angular).dot(&projection.jacobian);
        let corrective = (projection.bias_velocity - velocity_error) * projection.effective_mass
            - *impulses * projection.softness_impulse_scale;
        let previous = *impulses;
        *impulses = (*impulses + corrective).max(WideFloat::ZERO);
        Self::apply_impulse(projection, *impulses - previous, wsv_a, wsv_b);
    }
}

impl ConstraintDescription for SwingLimit {
    const TYPE_ID: i32 = type_ids::SWING_LIMIT;
    const BODIES_PER_CONSTRAINT: i32 = 2;

    fn create_type_processor() -> Box<dyn TypeProcessor + Send + Sync> {
        Box::new(TwoBodyTypeProcessor::<SwingLimitFunctions>::default())
    }

    unsafe fn apply_description(
        &self,
        type_batch: &mut TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) {
        debug_assert!(type_batch.type_id == Self::TYPE_ID);
        debug_assert!(self.maximum_swing_angle >= 0.0);
        let bundle = &mut *(type_batch.prestep_data.shared_mut_ptr() as *mut SwingLimitPrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        bundle.local_axis_a.write_slot(self.local_axis_a, lane);
        bundle.local_axis_b.write_slot(self.local_axis_b, lane);
        bundle
            .minimum_dot
            .write_slot(self.maximum_swing_angle.cos(), lane);
        bundle.spring_settings.write_slot(&self.spring_settings, lane);
    }

    unsafe fn build_description(
        type_batch: &TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) -> Self {
        let bundle = &*(type_batch.prestep_data.as_ptr() as *const SwingLimitPrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        SwingLimit {
            local_axis_a: bundle.local_axis_a.read_slot(lane),
            local_axis_b: bundle.local_axis_b.read_slot(lane),
            maximum_swing_angle: bundle.minimum_dot.read_slot(lane).clamp(-1.0, 1.0).acos(),
            spring_settings: bundle.spring_settings.read_slot(lane),
        }
    }
}

impl TwoBodyConstraintDescription for SwingLimit {}
