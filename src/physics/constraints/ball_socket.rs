//! Ball socket: constrains a point on one body to a point on another.

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
pub struct BallSocket {
    /// Attachment offset in A's local space.
    pub local_offset_a: Vec3,
    /// Attachment offset in B's local space.
    pub local_offset_b: Vec3,
    pub spring_settings: SpringSettings,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct BallSocketPrestep {
    pub local_offset_a: Vector3Wide,
    pub local_offset_b: Vector3Wide,
    pub spring_settings: SpringSettingsWide,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct BallSocketProjection {
    pub inertia_a: BodyInertiaWide,
    pub inertia_b: BodyInertiaWide,
    pub offset_a: Vector3Wide,
    pub offset_b: Vector3Wide,
    pub bias_velocity: Vector3Wide,
    pub effective_mass: Symmetric3x3Wide,
    pub softness_impulse_scale: WideFloat,
}

/// Applies a linear impulse at offset anchors to both bodies.
#[inline(always)]
pub fn apply_anchor_impulse(
    inertia_a: &BodyInertiaWide,
    inertia_b: &BodyInertiaWide,
    offset_a: &Vector3Wide,
    offset_b: &Vector3Wide,
    impulse: &Vector3Wide,
    wsv_a: &mut BodyVelocityWide,
    wsv_b: &mut BodyVelocityWide,
) {
    wsv_a.linear = wsv_a.linear + impulse.scale(inertia_a.inverse_mass);
    wsv_a.angular = wsv_a.angular
        + inertia_a
            .inverse_inertia_tensor
            .transform(&offset_a.cross(impulse));
    wsv_b.linear = wsv_b.linear - impulse.scale(inertia_b.inverse_mass);
    wsv_b.angular = wsv_b.angular
        - inertia_b
            .inverse_inertia_tensor
            .transform(&offset_b.cross(impulse));
}

/// Inverse effective mass of an anchor constraint:
/// (1/ma + 1/mb)I + skew(ra) Ia^-1 skew(ra)^T + skew(rb) Ib^-1 skew(rb)^T.
#[inline(always)]
pub fn compute_anchor_effective_mass(
    inertia_a: &BodyInertiaWide,
    inertia_b: &BodyInertiaWide,
    offset_a: &Vector3Wide,
    offset_b: &Vector3Wide,
    effective_mass_cfm_scale: WideFloat,
) -> Symmetric3x3Wide {
    let angular_a = Symmetric3x3Wide::skew_sandwich(offset_a, &inertia_a.inverse_inertia_tensor);
    let angular_b = Symmetric3x3Wide::skew_sandwich(offset_b, &inertia_b.inverse_inertia_tensor);
    let inverse = angular_a
        .add(&angular_b)
        .add_to_diagonal(inertia_a.inverse_mass + inertia_b.inverse_mass);
    inverse.invert().scale(effective_mass_cfm_scale)
}

/// Velocity of A's anchor relative to B's anchor.
#[inline(always)]
pub fn compute_anchor_velocity_error(
    offset_a: &Vector3Wide,
    offset_b: &Vector3Wide,
    wsv_a: &BodyVelocityWide,
    wsv_b: &BodyVelocityWide,
) -> Vector3Wide {
    (wsv_a.linear + wsv_a.angular.cross(offset_a)) - (wsv_b.linear + wsv_b.angular.cross(offset_b))
}

pub struct BallSocketFunctions;

impl TwoBodyConstraintFunctions for BallSocketFunctions {
    type PrestepData = BallSocketPrestep;
    type Projection = BallSocketProjection;
    type AccumulatedImpulses = Vector3Wide;
    const TYPE_ID: i32 = type_ids::BALL_SOCKET;
    const CONSTRAINED_DEGREES_OF_FREEDOM: i32 = 3;

    fn prestep(
        position_a: &Vector3Wide,
        orientation_a: &QuaternionWide,
        inertia_a: &BodyInertiaWide,
        position_b: &Vector3Wide,
        orientation_b: &QuaternionWide,
        inertia_b: &BodyInertiaWide,
        dt: f32,
        _inverse_dt: f32,
        prestep: &BallSocketPrestep,
    ) -> BallSocketProjection {
        let offset_a = orientation_a.transform(&prestep.local_offset_a);
        let offset_b = orientation_b.transform(&prestep.local_offset_b);
        let springiness = prestep.spring_settings.compute_springiness(dt);
        let effective_mass = compute_anchor_effective_mass(
            inertia_a,
            inertia_b,
            &offset_a,
            &offset_b,
            springiness.effective_mass_cfm_scale,
        );
        // Bias counteracts separation between the anchors.
        let error = (*position_b + offset_b) - (*position_a + offset_a);
        BallSocketProjection {
            inertia_a: *inertia_a,
            inertia_b: *inertia_b,
            offset_a,
            offset_b,
            bias_velocity: error.scale(springiness.position_error_to_velocity),
            effective_mass,
            softness_impulse_scale: springiness.softness_impulse_scale,
        }
    }

    fn warm_start(
        projection: &BallSocketProjection,
        impulses: &Vector3Wide,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        apply_anchor_impulse(
            &projection.inertia_a,
            &projection.inertia_b,
            &projection.offset_a,
            &projection.offset_b,
            impulses,
            wsv_a,
            wsv_b,
        );
    }

    fn solve(
        projection: &BallSocketProjection,
        impulses: &mut Vector3Wide,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        let velocity_error = compute_anchor_velocity_error(
            &projection.offset_a,
            &projection.offset_b,
            wsv_a,
            wsv_b,
        );
        let corrective = projection
            .effective_mass
            .transform(&(projection.bias_velocity - velocity_error))
            - impulses.scale(projection.softness_impulse_scale);
        *impulses = *impulses + corrective;
        apply_anchor_impulse(
            &projection.inertia_a,
            &projection.inertia_b,
            &projection.offset_a,
            &projection.offset_b,
            &corrective,
            wsv_a,
            wsv_b,
        );
    }
}

impl ConstraintDescription for BallSocket {
    const TYPE_ID: i32 = type_ids::BALL_SOCKET;
    const BODIES_PER_CONSTRAINT: i32 = 2;

    fn create_type_processor() -> Box<dyn TypeProcessor + Send + Sync> {
        Box::new(TwoBodyTypeProcessor::<BallSocketFunctions>::default())
    }

    unsafe fn apply_description(
        &self,
        type_batch: &mut TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) {
        debug_assert!(type_batch.type_id == Self::TYPE_ID);
        let bundle = &mut *(type_batch.prestep_data.shared_mut_ptr() as *mut BallSocketPrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        bundle.local_offset_a.write_slot(self.local_offset_a, lane);
        bundle.local_offset_b.write_slot(self.local_offset_b, lane);
        bundle.spring_settings.write_slot(&self.spring_settings, lane);
    }

    unsafe fn build_description(
        type_batch: &TypeBatch,
        bundle_index: i32,
        inner_index: i32,
    ) -> Self {
        let bundle = &*(type_batch.prestep_data.as_ptr() as *const BallSocketPrestep)
            .add(bundle_index as usize);
        let lane = inner_index as usize;
        BallSocket {
            local_offset_a: bundle.local_offset_a.read_slot(lane),
            local_offset_b: bundle.local_offset_b.read_slot(lane),
            spring_settings: bundle.spring_settings.read_slot(lane),
        }
    }
}

impl TwoBodyConstraintDescription for BallSocket {}
