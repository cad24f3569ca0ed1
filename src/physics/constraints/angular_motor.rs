//! One-body angular motor: drives a body's angular velocity toward a
//! target.

use crate::physics::body_properties::{BodyInertiaWide, BodyVelocityWide};
use crate::physics::constraints::servo_settings::{MotorSettings, MotorSettingsWide};
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
pub struct OneBodyAngularMotor {
    pub target_velocity: Vec3,
    pub motor_settings: MotorSettings,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct OneBodyAngularMotorPrestep {
    pub target_velocity: Vector3Wide,
    pub motor_settings: MotorSettingsWide,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct OneBodyAngularMotorProjection {
    pub inertia_a: BodyInertiaWide,
    pub target_velocity: Vector3Wide,
    pub effective_mass: Symmetric3x3Wide,
    pub softness_impulse_scale: WideFloat,
    pub maximum_impulse: WideFloat,
}

pub struct OneBodyAngularMotorFunctions;

impl OneBodyConstraintFunctions for OneBodyAngularMotorFunctions {
    type PrestepData = OneBodyAngularMotorPrestep;
    type Projection = OneBodyAngularMotorProjection;
    type AccumulatedImpulses = Vector3Wide;
    const TYPE_ID: i32 = type_ids::ONE_BODY_ANGULAR_MOTOR;
    const CONSTRAINED_DEGREES_OF_FREEDOM: i32 = 3;

    fn prestep(
        _position_a: &Vector3Wide,
        _orientation_a: &QuaternionWide,
        inertia_a: &BodyInertiaWide,
        dt: f32,
        inverse_dt: f32,
        prestep: &OneBodyAngularMotorPrestep,
    ) -> OneBodyAngularMotorProjection {
        let (effective_mass_cfm_scale, softness_impulse_scale) =
            prestep.motor_settings.compute_softness(inverse_dt);
        OneBodyAngularMotorProjection {
            inertia_a: *inertia_a,
            target_velocity: prestep.target_velocity,
            effective_mass: inertia_a
                .inverse_inertia_tensor
                .invert()
                .scale(effective_mass_cfm_scale),
            softness_impulse_scale,
            maximum_impulse: prestep.motor_settings.maximum_impulse(dt),
        }
    }

    fn warm_start(
        projection: &OneBodyAngularMotorProjection,
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
        projection: &OneBodyAngularMotorProjection,
        impulses: &mut Vector3Wide,
        wsv_a: &mut BodyVelocityWide,
    ) {
        let corrective = projection
            .effective_mass
            .transform(&(projection.target_velocity - wsv_a.angular))
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

impl ConstraintDescription for OneBodyAngularMotor {
    const TYPE_ID: i32 = type_ids::ONE_BODY_ANGULAR_MOTOR;
    const BODIES_PER_CONSTRAINT: i32 = 1;

    fn create_type_processor() -> Box<dyn TypeProcessor + Send + Sync> {
        Box::new(OneBodyTypeProcessor::<OneBodyAngularMotorFunctions>::default())
    }

    unsafe fn apply_description(
        &self,
        type_batch: &mut TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) {
        debug_assert!(type_batch.type_id == Self::TYPE_ID);
        let bundle = &mut *(type_batch.prestep_data.shared_mut_ptr()
            as *mut OneBodyAngularMotorPrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        bundle.target_velocity.write_slot(self.target_velocity, lane);
        bundle.motor_settings.write_slot(&self.motor_settings, lane);
    }

    unsafe fn build_description(
        type_batch: &TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) -> Self {
        let bundle = &*(type_batch.prestep_data.as_ptr() as *const OneBodyAngularMotorPrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        OneBodyAngularMotor {
            target_velocity: bundle.target_velocity.read_slot(lane),
            motor_settings: bundle.motor_settings.read_slot(lane),
        }
    }
}

impl OneBodyConstraintDescription for OneBodyAngularMotor {}
