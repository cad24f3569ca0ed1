//! Twist limit: keeps the relative twist angle within an interval.

use crate::physics::body_properties::{BodyInertiaWide, BodyVelocityWide};
use crate::physics::constraints::spring_settings::{SpringSettings, SpringSettingsWide};
use crate::physics::constraints::twist_servo::{
    apply_twist_impulse, compute_twist_effective_mass, measure_twist,
};
use crate::physics::constraints::type_batch::TypeBatch;
use crate::physics::constraints::type_ids;
use crate::physics::constraints::type_processor::{
    ConstraintDescription, TwoBodyConstraintDescription, TwoBodyConstraintFunctions,
    TwoBodyTypeProcessor, TypeProcessor,
};
use crate::utilities::quaternion_wide::QuaternionWide;
use crate::utilities::vector3_wide::Vector3Wide;
use crate::utilities::wide::WideFloat;
use glam::Quat;

#[derive(Clone, Copy, Debug)]
pub struct TwistLimit {
    pub local_basis_a: Quat,
    pub local_basis_b: Quat,
    pub minimum_angle: f32,
    pub maximum_angle: f32,
    pub spring_settings: SpringSettings,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct TwistLimitPrestep {
    pub local_basis_a: QuaternionWide,
    pub local_basis_b: QuaternionWide,
    pub minimum_angle: WideFloat,
    pub maximum_angle: WideFloat,
    pub spring_settings: SpringSettingsWide,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct TwistLimitProjection {
    pub inertia_a: BodyInertiaWide,
    pub inertia_b: BodyInertiaWide,
    /// Twist axis flipped toward whichever bound is nearer, so the
    /// inequality always clamps the impulse at zero from below.
    pub jacobian: Vector3Wide,
    pub bias_velocity: WideFloat,
    pub effective_mass: WideFloat,
    pub softness_impulse_scale: WideFloat,
}

pub struct TwistLimitFunctions;

impl TwoBodyConstraintFunctions for TwistLimitFunctions {
    type PrestepData = TwistLimitPrestep;
    type Projection = TwistLimitProjection;
    type AccumulatedImpulses = WideFloat;
    const TYPE_ID: i32 = type_ids::TWIST_LIMIT;
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
        prestep: &TwistLimitPrestep,
    ) -> TwistLimitProjection {
        let twist = measure_twist(
            orientation_a,
            orientation_b,
            &prestep.local_basis_a,
            &prestep.local_basis_b,
        );
        let springiness = prestep.spring_settings.compute_springiness(dt);
        // Work against the nearer bound. Violation is negative while inside
        // the interval, which makes the limit speculative there: impulses
        // only appear when the twist rate would cross the bound this step.
        let midpoint = (prestep.minimum_angle + prestep.maximum_angle) * WideFloat::splat(0.5);
        let use_maximum = twist.angle.greater_than(midpoint);
        let violation = use_maximum.select(
            twist.angle - prestep.maximum_angle,
            prestep.minimum_angle - twist.angle,
        );
        let direction = use_maximum.select(WideFloat::ONE, WideFloat::splat(-1.0));
        let jacobian = twist.axis.scale(direction);
        TwistLimitProjection {
            inertia_a: *inertia_a,
            inertia_b: *inertia_b,
            jacobian,
            bias_velocity: violation * springiness.position_error_to_velocity,
            effective_mass: compute_twist_effective_mass(
                &twist.axis,
                inertia_a,
                inertia_b,
                springiness.effective_mass_cfm_scale,
            ),
            softness_impulse_scale: springiness.softness_impulse_scale,
        }
    }

    fn warm_start(
        projection: &TwistLimitProjection,
        impulses: &WideFloat,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        apply_twist_impulse(
            &projection.jacobian,
            &projection.inertia_a,
            &projection.inertia_b,
            *impulses,
            wsv_a,
            wsv_b,
        );
    }

    fn solve(
        projection: &TwistLimitProjection,
        impulses: &mut WideFloat,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        let velocity_error = (wsv_a.angular - wsv_b.angular).dot(&projection.jacobian);
        let corrective = (projection.bias_velocity - velocity_error) * projection.effective_mass
            - *impulses * projection.softness_impulse_scale;
        let previous = *impulses;
        *impulses = (*impulses + corrective).max(WideFloat::ZERO);
        apply_twist_impulse(
            &projection.jacobian,
            &projection.inertia_a,
            &projection.inertia_b,
            *impulses - previous,
            wsv_a,
            wsv_b,
        );
    }
}

impl ConstraintDescription for TwistLimit {
    const TYPE_ID: i32 = type_ids::TWIST_LIMIT;
    const BODIES_PER_CONSTRAINT: i32 = 2;

    fn create_type_processor() -> Box<dyn TypeProcessor + Send + Sync> {
        Box::new(TwoBodyTypeProcessor::<TwistLimitFunctions>::default())
    }

    unsafe fn apply_description(
        &self,
        type_batch: &mut TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) {
        debug_assert!(type_batch.type_id == Self::TYPE_ID);
        debug_assert!(self.minimum_angle <= self.maximum_angle);
        let bundle = &mut *(type_batch.prestep_data.shared_mut_ptr() as *mut TwistLimitPrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        bundle.local_basis_a.write_slot(self.local_basis_a, lane);
        bundle.local_basis_b.write_slot(self.local_basis_b, lane);
        bundle.minimum_angle.write_slot(self.minimum_angle, lane);
        bundle.maximum_angle.write_slot(self.maximum_angle, lane);
        bundle.spring_settings.write_slot(&self.spring_settings, lane);
    }

    unsafe fn build_description(
        type_batch: &TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) -> Self {
        let bundle = &*(type_batch.prestep_data.as_ptr() as *const TwistLimitPrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        TwistLimit {
            local_basis_a: bundle.local_basis_a.read_slot(lane),
            local_basis_b: bundle.local_basis_b.read_slot(lane),
            minimum_angle: bundle.minimum_angle.read_slot(lane),
            maximum_angle: bundle.maximum_angle.read_slot(lane),
            spring_settings: bundle.spring_settings.read_slot(lane),
        }
    }
}

impl TwoBodyConstraintDescription for TwistLimit {}
