//! Grab servo: pulls a point on a body toward a world target. The classic
//! mouse-grab tool constraint.

use crate::physics::body_properties::{BodyInertiaWide, BodyVelocityWide};
use crate::physics::constraints::servo_settings::{ServoSettings, ServoSettingsWide};
use crate::physics::constraints::spring_settings::{SpringSettings, SpringSettingsWide};
use crate::physics::constraints::type_batch::TypeBatch;
use crate::physics::constraints::type_ids;
use crate::physics::constraints::type_processor::{
    ConstraintDescription, OneBodyConstraintDescription, OneBodyConstraintFunctions,
    OneBodyTypeProcessor, TypeProcessor,
};
use crate::utilities::quaternion_wide::QuaternionWide;
use crate::utilities::symmetric3x3_wide::Symmetric3x3Wide;
use crate::utilities::vector3_wide::Vector3Wide;
use crate::utilities::wide::WideFloat;
use glam::Vec3;

#[derive(Clone, Copy, Debug)]
pub struct GrabServo {
    /// Grabbed point in the body's local space.
    pub local_offset: Vec3,
    /// World space target the point is pulled toward.
    pub target: Vec3,
    pub spring_settings: SpringSettings,
    pub servo_settings: ServoSettings,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct GrabServoPrestep {
    pub local_offset: Vector3Wide,
    pub target: Vector3Wide,
    pub spring_settings: SpringSettingsWide,
    pub servo_settings: ServoSettingsWide,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct GrabServoProjection {
    pub inertia_a: BodyInertiaWide,
    pub offset: Vector3Wide,
    pub bias_velocity: Vector3Wide,
    pub effective_mass: Symmetric3x3Wide,
    pub softness_impulse_scale: WideFloat,
    pub maximum_impulse: WideFloat,
}

#[inline(always)]
fn apply_grab_impulse(
    projection: &GrabServoProjection,
    impulse: &Vector3Wide,
    wsv_a: &mut BodyVelocityWide,
) {
    wsv_a.linear = wsv_a.linear + impulse.scale(projection.inertia_a.inverse_mass);
    wsv_a.angular = wsv_a.angular
        + projection
            .inertia_a
            .inverse_inertia_tensor
            .transform(&projection.offset.cross(impulse));
}

pub struct GrabServoFunctions;

impl OneBodyConstraintFunctions for GrabServoFunctions {
    type PrestepData = GrabServoPrestep;
    type Projection = GrabServoProjection;
    type AccumulatedImpulses = Vector3Wide;
    const TYPE_ID: i32 = type_ids::GRAB_SERVO;
    const CONSTRAINED_DEGREES_OF_FREEDOM: i32 = 3;

    fn prestep(
        position_a: &Vector3Wide,
        orientation_a: &QuaternionWide,
        inertia_a: &BodyInertiaWide,
        dt: f32,
        _inverse_dt: f32,
        prestep: &GrabServoPrestep,
    ) -> GrabServoProjection {
        let offset = orientation_a.transform(&prestep.local_offset);
        let anchor = *position_a + offset;
        let error = prestep.target - anchor;
        let springiness = prestep.spring_settings.compute_springiness(dt);
        let distance = error.length();
        let speed = prestep
            .servo_settings
            .compute_clamped_bias_velocity(distance, springiness.position_error_to_velocity);
        let direction = error.normalize_guarded(1e-10);
        let angular = Symmetric3x3Wide::skew_sandwich(&offset, &inertia_a.inverse_inertia_tensor);
        let effective_mass = angular
            .add_to_diagonal(inertia_a.inverse_mass)
            .invert()
            .scale(springiness.effective_mass_cfm_scale);
        GrabServoProjection {
            inertia_a: *inertia_a,
            offset,
            bias_velocity: direction.scale(speed),
            effective_mass,
            softness_impulse_scale: springiness.softness_impulse_scale,
            maximum_impulse: prestep.servo_settings.maximum_impulse(dt),
        }
    }

    fn warm_start(
        projection: &GrabServoProjection,
        impulses: &Vector3Wide,
        wsv_a: &mut BodyVelocityWide,
    ) {
        apply_grab_impulse(projection, impulses, wsv_a);
    }

    fn solve(
        projection: &GrabServoProjection,
        impulses: &mut Vector3Wide,
        wsv_a: &mut BodyVelocityWide,
    ) {
        let anchor_velocity = wsv_a.linear + wsv_a.angular.cross(&projection.offset);
        let corrective = projection
            .effective_mass
            .transform(&(projection.bias_velocity - anchor_velocity))
            - impulses.scale(projection.softness_impulse_scale);
        let previous = *impulses;
        *impulses = (*impulses + corrective).clamp_length(projection.maximum_impulse);
        apply_grab_impulse(projection, &(*impulses - previous), wsv_a);
    }
}

impl ConstraintDescription for GrabServo {
    const TYPE_ID: i32 = type_ids::GRAB_SERVO;
    const BODIES_PER_CONSTRAINT: i32 = 1;

    fn create_type_processor() -> Box<dyn TypeProcessor + Send + Sync> {
        Box::new(OneBodyTypeProcessor::<GrabServoFunctions>::default())
    }

    unsafe fn apply_description(
        &self,
        type_batch: &mut TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) {
        debug_assert!(type_batch.type_id == Self::TYPE_ID);
        let bundle = &mut *(type_batch.prestep_data.shared_mut_ptr() as *mut GrabServoPrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        bundle.local_offset.write_slot(self.local_offset, lane);
        bundle.target.write_slot(self.target, lane);
        bundle.spring_settings.write_slot(&self.spring_settings, lane);
        bundle.servo_settings.write_slot(&self.servo_settings, lane);
    }

    unsafe fn build_description(
        type_batch: &TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) -> Self {
        let bundle = &*(type_batch.prestep_data.as_ptr() as *const GrabServoPrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        GrabServo {
            local_offset: bundle.local_offset.read_slot(lane),
            target: bundle.target.read_slot(lane),
            spring_settings: bundle.spring_settings.read_slot(lane),
            servo_settings: bundle.servo_settings.read_slot(lane),
        }
    }
}

impl OneBodyConstraintDescription for GrabServo {}
