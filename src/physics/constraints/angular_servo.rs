//! One-body angular servo: drives a body's orientation toward a target.

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
use glam::Quat;

#[derive(Clone, Copy, Debug)]
pub struct OneBodyAngularServo {
    pub target_orientation: Quat,
    pub spring_settings: SpringSettings,
    pub servo_settings: ServoSettings,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct OneBodyAngularServoPrestep {
    pub target_orientation: QuaternionWide,
    pub spring_settings: SpringSettingsWide,
    pub servo_settings: ServoSettingsWide,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct OneBodyAngularServoProjection {
    pub inertia_a: BodyInertiaWide,
    pub bias_velocity: Vector3Wide,
    pub effective_mass: Symmetric3x3Wide,
    pub softness_impulse_scale: WideFloat,
    pub maximum_impulse: WideFloat,
}

pub struct OneBodyAngularServoFunctions;

impl OneBodyConstraintFunctions for OneBodyAngularServoFunctions {
    type PrestepData = OneBodyAngularServoPrestep;
    type Projection = OneBodyAngularServoProjection;
    type AccumulatedImpulses = Vector3Wide;
    const TYPE_ID: i32 = type_ids::ONE_BODY_ANGULAR_SERVO;
    const CONSTRAINED_DEGREES_OF_FREEDOM: i32 = 3;

    fn prestep(
        _position_a: &Vector3Wide,
        orientation_a: &QuaternionWide,
        inertia_a: &BodyInertiaWide,
        dt: f32,
        _inverse_dt: f32,
        prestep: &OneBodyAngularServoPrestep,
    ) -> OneBodyAngularServoProjection {
        // World-frame rotation carrying the current orientation to the
        // target, flipped to the shortest arc.
        let error_rotation = orientation_a
            .conjugate()
            .concatenate(&prestep.target_orientation);
        let flip = error_rotation.w.less_than(WideFloat::ZERO);
        let sign = flip.select(WideFloat::splat(-1.0), WideFloat::ONE);
        let error_xyz = Vector3Wide {
            x: error_rotation.x * sign,
            y: error_rotation.y * sign,
            z: error_rotation.z * sign,
        };
        let error_w = error_rotation.w * sign;
        let xyz_length = error_xyz.length();
        let angle = WideFloat::splat(2.0) * xyz_length.atan2(error_w);
        let axis = error_xyz.normalize_guarded(1e-10);

        let springiness = prestep.spring_settings.compute_springiness(dt);
        let speed = prestep
            .servo_settings
            .compute_clamped_bias_velocity(angle, springiness.position_error_to_velocity);
        let effective_mass = inertia_a
            .inverse_inertia_tensor
            .invert()
            .scale(springiness.effective_mass_cfm_scale);
        OneBodyAngularServoProjection {
            inertia_a: *inertia_a,
            bias_velocity: axis.scale(speed),
            effective_mass,
            softness_impulse_scale: springiness.softness_impulse_scale,
            maximum_impulse: prestep.servo_settings.maximum_impulse(dt),
        }
    }

    fn warm_start(
        projection: &OneBodyAngularServoProjection,
        impulses: &Vector3Wide,
        wsv_a: &mut BodyVelocityWide,
    ) {
        wsv_a.angular = wsv_a.angular
            + projection
                .inertia_a
                .inverse_inertia_tensor
                .transform(impulses);
    }

    fn solve(
        projection: &OneBodyAngularServoProjection,
        impulses: &mut Vector3Wide,
        wsv_a: &mut BodyVelocityWide,
    ) {
        let corrective = projection
            .effective_mass
            .transform(&(projection.bias_velocity - wsv_a.angular))
            - impulses.scale(projection.softness_impulse_scale);
        let previous = *impulses;
        *impulses = (*impulses + corrective).clamp_length(projection.maximum_impulse);
        wsv_a.angular = wsv_a.angular
            + projection
                .inertia_a
                .inverse_inertia_tensor
                .transform(&(*impulses - previous));
    }
}

impl ConstraintDescription for OneBodyAngularServo {
    const TYPE_ID: i32 = type_ids::ONE_BODY_ANGULAR_SERVO;
    const BODIES_PER_CONSTRAINT: i32 = 1;

    fn create_type_processor() -> Box<dyn TypeProcessor + Send + Sync> {
        Box::new(OneBodyTypeProcessor::<OneBodyAngularServoFunctions>::default())
    }

    unsafe fn apply_description(
        &self,
        type_batch: &mut TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) {
        debug_assert!(type_batch.type_id == Self::TYPE_ID);
        let bundle = &mut *(type_batch.prestep_data.shared_mut_ptr()
            as *mut OneBodyAngularServoPrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        bundle
            .target_orientation
            .write_slot(self.target_orientation, lane);
        bundle.spring_settings.write_slot(&self.spring_settings, lane);
        bundle.servo_settings.write_slot(&self.servo_settings, lane);
    }

    unsafe fn build_description(
        type_batch: &TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) -> Self {
        let bundle = &*(type_batch.prestep_data.as_ptr() as *const OneBodyAngularServoPrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        OneBodyAngularServo {
            target_orientation: bundle.target_orientation.read_slot(lane),
            spring_settings: bundle.spring_settings.read_slot(lane),
            servo_settings: bundle.servo_settings.read_slot(lane),
        }
    }
}

impl OneBodyConstraintDescription for OneBodyAngularServo {}
