//! Twist servo: drives the relative rotation about a twist axis toward a
//! target angle.

use crate::physics::body_properties::{BodyInertiaWide, BodyVelocityWide};
use crate::physics::constraints::servo_settings::{ServoSettings, ServoSettingsWide};
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
use glam::{Quat, Vec3};

/// Relative twist measurement shared by the twist constraint family.
pub(crate) struct TwistState {
    /// World twist axis (A's basis Z). The jacobian of the twist velocity:
    /// d(angle)/dt = (wb - wa) . axis.
    pub axis: Vector3Wide,
    /// Signed angle from A's reference direction to B's about the axis.
    pub angle: WideFloat,
}

/// Measures the twist of B's basis relative to A's. Bases map local Z to the
/// twist axis and local X to the angle reference direction.
#[inline(always)]
pub(crate) fn measure_twist(
    orientation_a: &QuaternionWide,
    orientation_b: &QuaternionWide,
    local_basis_a: &QuaternionWide,
    local_basis_b: &QuaternionWide,
) -> TwistState {
    let basis_a = local_basis_a.concatenate(orientation_a);
    let basis_b = local_basis_b.concatenate(orientation_b);
    let axis = basis_a.transform(&Vector3Wide::broadcast(Vec3::Z));
    let reference_a = basis_a.transform(&Vector3Wide::broadcast(Vec3::X));
    let reference_b = basis_b.transform(&Vector3Wide::broadcast(Vec3::X));
    // Project B's reference onto the plane perpendicular to the axis and
    // measure the signed angle from A's reference.
    let sin = reference_a.cross(&reference_b).dot(&axis);
    let cos = reference_a.dot(&reference_b);
    TwistState {
        axis,
        angle: sin.atan2(cos),
    }
}

/// Effective mass of a one-DOF angular constraint along `axis`.
#[inline(always)]
pub(crate) fn compute_twist_effective_mass(
    axis: &Vector3Wide,
    inertia_a: &BodyInertiaWide,
    inertia_b: &BodyInertiaWide,
    effective_mass_cfm_scale: WideFloat,
) -> WideFloat {
    let combined = inertia_a
        .inverse_inertia_tensor
        .add(&inertia_b.inverse_inertia_tensor);
    let inverse = Symmetric3x3Wide::vector_sandwich(axis, &combined);
    // Two locked-inertia bodies are a valid state; just emit zero impulses.
    let degenerate = inverse.less_than(WideFloat::splat(1e-12));
    degenerate.select(WideFloat::ZERO, effective_mass_cfm_scale / inverse)
}

/// Applies a scalar angular impulse along a shared jacobian axis: positive
/// values spin A forward and B backward.
#[inline(always)]
pub(crate) fn apply_twist_impulse(
    axis: &Vector3Wide,
    inertia_a: &BodyInertiaWide,
    inertia_b: &BodyInertiaWide,
    amount: WideFloat,
    wsv_a: &mut BodyVelocityWide,
    wsv_b: &mut BodyVelocityWide,
) {
    let world_impulse = axis.scale(amount);
    wsv_a.angular = wsv_a.angular
        + inertia_a
            .inverse_inertia_tensor
            .transform(&world_impulse);
    wsv_b.angular = wsv_b.angular
        - inertia_b
            .inverse_inertia_tensor
            .transform(&world_impulse);
}

#[derive(Clone, Copy, Debug)]
pub struct TwistServo {
    /// Rotation mapping local Z to the twist axis and local X to the angle
    /// reference on A.
    pub local_basis_a: Quat,
    pub local_basis_b: Quat,
    pub target_angle: f32,
    pub spring_settings: SpringSettings,
    pub servo_settings: ServoSettings,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct TwistServoPrestep {
    pub local_basis_a: QuaternionWide,
    pub local_basis_b: QuaternionWide,
    pub target_angle: WideFloat,
    pub spring_settings: SpringSettingsWide,
    pub servo_settings: ServoSettingsWide,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct TwistServoProjection {
    pub inertia_a: BodyInertiaWide,
    pub inertia_b: BodyInertiaWide,
    pub axis: Vector3Wide,
    pub bias_velocity: WideFloat,
    pub effective_mass: WideFloat,
    pub softness_impulse_scale: WideFloat,
    pub maximum_impulse: WideFloat,
}

pub struct TwistServoFunctions;

impl TwoBodyConstraintFunctions for TwistServoFunctions {
    type PrestepData = TwistServoPrestep;
    type Projection = TwistServoProjection;
    type AccumulatedImpulses = WideFloat;
    const TYPE_ID: i32 = type_ids::TWIST_SERVO;
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
        prestep: &TwistServoPrestep,
    ) -> TwistServoProjection {
        let twist = measure_twist(
            orientation_a,
            orientation_b,
            &prestep.local_basis_a,
            &prestep.local_basis_b,
        );
        let springiness = prestep.spring_settings.compute_springiness(dt);
        // The constraint space velocity (wa - wb) . axis reduces the angle;
        // a positive error therefore asks for positive bias.
        let error = twist.angle - prestep.target_angle;
        let bias_velocity = prestep
            .servo_settings
            .compute_clamped_bias_velocity(error, springiness.position_error_to_velocity);
        TwistServoProjection {
            inertia_a: *inertia_a,
            inertia_b: *inertia_b,
            axis: twist.axis,
            bias_velocity,
            effective_mass: compute_twist_effective_mass(
                &twist.axis,
                inertia_a,
                inertia_b,
                springiness.effective_mass_cfm_scale,
            ),
            softness_impulse_scale: springiness.softness_impulse_scale,
            maximum_impulse: prestep.servo_settings.maximum_impulse(dt),
        }
    }

    fn warm_start(
        projection: &TwistServoProjection,
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
        projection: &TwistServoProjection,
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

impl ConstraintDescription for TwistServo {
    const TYPE_ID: i32 = type_ids::TWIST_SERVO;
    const BODIES_PER_CONSTRAINT: i32 = 2;

    fn create_type_processor() -> Box<dyn TypeProcessor + Send + Sync> {
        Box::new(TwoBodyTypeProcessor::<TwistServoFunctions>::default())
    }

    unsafe fn apply_description(
        &self,
        type_batch: &mut TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) {
        debug_assert!(type_batch.type_id == Self::TYPE_ID);
        let bundle = &mut *(type_batch.prestep_data.shared_mut_ptr() as *mut TwistServoPrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        bundle.local_basis_a.write_slot(self.local_basis_a, lane);
        bundle.local_basis_b.write_slot(self.local_basis_b, lane);
        bundle.target_angle.write_slot(self.target_angle, lane);
        bundle.spring_settings.write_slot(&self.spring_settings, lane);
        bundle.servo_settings.write_slot(&self.servo_settings, lane);
    }

    unsafe fn build_description(
        type_batch: &TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) -> Self {
        let bundle = &*(type_batch.prestep_data.as_ptr() as *const TwistServoPrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        TwistServo {
            local_basis_a: bundle.local_basis_a.read_slot(lane),
            local_basis_b: bundle.local_basis_b.read_slot(lane),
            target_angle: bundle.target_angle.read_slot(lane),
            spring_settings: bundle.spring_settings.read_slot(lane),
            servo_settings: bundle.servo_settings.read_slot(lane),
        }
    }
}

impl TwoBodyConstraintDescription for TwistServo {}
