//! Twist motor: drives the relative twist rate about an axis toward a
//! target velocity.

use crate::physics::body_properties::{BodyInertiaWide, BodyVelocityWide};
use crate::physics::constraints::servo_settings::{MotorSettings, MotorSettingsWide};
use crate::physics::constraints::twist_servo::{apply_twist_impulse, compute_twist_effective_mass};
use crate::physics::constraints::type_batch::TypeBatch;
use crate::physics::constraints::type_ids;
use crate::physics::constraints::type_processor::{
    ConstraintDescription, TwoBodyConstraintDescription, TwoBodyConstraintFunctions,
    TwoBodyTypeProcessor, TypeProcessor,
};
use crate::utilities::quaternion_wide::QuaternionWide;
use crate::utilities::vector3_wide::Vector3Wide;
use crate::utilities::wide::WideFloat;
use glam::Vec3;

#[derive(Clone, Copy, Debug)]
pub struct TwistMotor {
    /// Twist axis in A's local space.
    pub local_axis_a: Vec3,
    /// Target twist rate of B relative to A about the axis.
    pub target_velocity: f32,
    pub motor_settings: MotorSettings,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct TwistMotorPrestep {
    pub local_axis_a: Vector3Wide,
    pub target_velocity: WideFloat,
    pub motor_settings: MotorSettingsWide,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct TwistMotorProjection {
    pub inertia_a: BodyInertiaWide,
    pub inertia_b: BodyInertiaWide,
    pub axis: Vector3Wide,
    pub bias_velocity: WideFloat,
    pub effective_mass: WideFloat,
    pub softness_impulse_scale: WideFloat,
    pub maximum_impulse: WideFloat,
}

pub struct TwistMotorFunctions;

impl TwoBodyConstraintFunctions for TwistMotorFunctions {
    type PrestepData = TwistMotorPrestep;
    type Projection = TwistMotorProjection;
    type AccumulatedImpulses = WideFloat;
    const TYPE_ID: i32 = type_ids::TWIST_MOTOR;
    const CONSTRAINED_DEGREES_OF_FREEDOM: i32 = 1;

    fn prestep(
        _position_a: &Vector3Wide,
        orientation_a: &QuaternionWide,
        inertia_a: &BodyInertiaWide,
        _position_b: &Vector3Wide,
        _orientation_b: &QuaternionWide,
        inertia_b: &BodyInertiaWide,
        dt: f32,
        inverse_dt: f32,
        prestep: &TwistMotorPrestep,
    ) -> TwistMotorProjection {
        let axis = orientation_a.transform(&prestep.local_axis_a);
        let (effective_mass_cfm_scale, softness_impulse_scale) =
            prestep.motor_settings.compute_softness(inverse_dt);
        // The constraint velocity (wa - wb) . axis is the negated twist rate
        // of B relative to A.
        TwistMotorProjection {
            inertia_a: *inertia_a,
            inertia_b: *inertia_b,
            axis,
            bias_velocity: -prestep.target_velocity,
            effective_mass: compute_twist_effective_mass(
                &axis,
                inertia_a,
                inertia_b,
                effective_mass_cfm_scale,
            ),
            softness_impulse_scale,
            maximum_impulse: prestep.motor_settings.maximum_impulse(dt),
        }
    }

    fn warm_start(
        projection: &TwistMotorProjection,
        impulses: &WideFloat,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        apply_twist_impulse(
            &projection.axis,
            &projection.inertia_a,
            &projection.inertia_b,
            *impulses,
            wsv_a,
            wsv_b,
        );
    }

    fn solve(
        projection: &TwistMotorProjection,
        impulses: &mut WideFloat,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        let velocity_error = (wsv_a.angular - wsv_b.angular).dot(&projection.axis);
        let corrective = (projection.bias_velocity - velocity_error) * projection.effective_mass
            - *impulses * projection.softness_impulse_scale;
        let previous = *impulses;
        *impulses = (*impulses + corrective)
            .clamp(-projection.maximum_impulse, projection.maximum_impulse);
        apply_twist_impulse(
            &projection.axis,
            &projection.inertia_a,
            &projection.inertia_b,
            *impulses - previous,
            wsv_a,
            wsv_b,
        );
    }
}

impl ConstraintDescription for TwistMotor {
    const TYPE_ID: i32 = type_ids::TWIST_MOTOR;
    const BODIES_PER_CONSTRAINT: i32 = 2;

    fn create_type_processor() -> Box<dyn TypeProcessor + Send + Sync> {
        Box::new(TwoBodyTypeProcessor::<TwistMotorFunctions>::default())
    }

    unsafe fn apply_description(
        &self,
        type_batch: &mut TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) {
        debug_assert!(type_batch.type_id == Self::TYPE_ID);
        let bundle = &mut *(type_batch.prestep_data.shared_mut_ptr() as *mut TwistMotorPrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        bundle.local_axis_a.write_slot(self.local_axis_a, lane);
        bundle.target_velocity.write_slot(self.target_velocity, lane);
        bundle.motor_settings.write_slot(&self.motor_settings, lane);
    }

    unsafe fn build_description(
        type_batch: &TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) -> Self {
        let bundle = &*(type_batch.prestep_data.as_ptr() as *const TwistMotorPrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        TwistMotor {
            local_axis_a: bundle.local_axis_a.read_slot(lane),
            target_velocity: bundle.target_velocity.read_slot(lane),
            motor_settings: bundle.motor_settings.read_slot(lane),
        }
    }
}

impl TwoBodyConstraintDescription for TwistMotor {}
