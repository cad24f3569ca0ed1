//! Pieces shared by the contact constraint families.

use crate::physics::body_properties::{BodyInertiaWide, BodyVelocityWide};
use crate::physics::constraints::ball_socket::{
    apply_anchor_impulse, compute_anchor_velocity_error,
};
use crate::physics::constraints::spring_settings::{SpringSettings, SpringSettingsWide};
use crate::utilities::symmetric2x2_wide::Symmetric2x2Wide;
use crate::utilities::symmetric3x3_wide::Symmetric3x3Wide;
use crate::utilities::vector2_wide::Vector2Wide;
use crate::utilities::vector3_wide::Vector3Wide;
use crate::utilities::wide::WideFloat;

/// Surface properties chosen by the narrow phase callbacks for one pair.
#[derive(Clone, Copy, Debug)]
pub struct PairMaterialProperties {
    pub friction_coefficient: f32,
    /// Cap on the velocity the penetration bias may request.
    pub maximum_recovery_velocity: f32,
    pub spring_settings: SpringSettings,
}

impl Default for PairMaterialProperties {
    fn default() -> Self {
        Self {
            friction_coefficient: 1.0,
            maximum_recovery_velocity: 2.0,
            spring_settings: SpringSettings::new(30.0, 1.0),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct MaterialPropertiesWide {
    pub friction_coefficient: WideFloat,
    pub spring_settings: SpringSettingsWide,
    pub maximum_recovery_velocity: WideFloat,
}

impl MaterialPropertiesWide {
    #[inline(always)]
    pub fn write_slot(&mut self, material: &PairMaterialProperties, lane: usize) {
        self.friction_coefficient
            .write_slot(material.friction_coefficient, lane);
        self.spring_settings
            .write_slot(&material.spring_settings, lane);
        self.maximum_recovery_velocity
            .write_slot(material.maximum_recovery_velocity, lane);
    }

    #[inline(always)]
    pub fn read_slot(&self, lane: usize) -> PairMaterialProperties {
        PairMaterialProperties {
            friction_coefficient: self.friction_coefficient.read_slot(lane),
            spring_settings: self.spring_settings.read_slot(lane),
            maximum_recovery_velocity: self.maximum_recovery_velocity.read_slot(lane),
        }
    }
}

/// Cached solver state for one penetration limit.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct PenetrationProjection {
    pub offset_a: Vector3Wide,
    pub offset_b: Vector3Wide,
    pub effective_mass: WideFloat,
    pub bias_velocity: WideFloat,
    /// Distance from the manifold center; scales this contact's
    /// contribution to the twist friction bound.
    pub lever_arm: WideFloat,
}

pub struct PenetrationLimit;

impl PenetrationLimit {
    /// Effective mass of a contact along its normal.
    #[inline(always)]
    pub fn compute_effective_mass(
        normal: &Vector3Wide,
        offset_a: &Vector3Wide,
        offset_b: &Vector3Wide,
        inertia_a: &BodyInertiaWide,
        inertia_b: &BodyInertiaWide,
        effective_mass_cfm_scale: WideFloat,
    ) -> WideFloat {
        let angular_a = offset_a.cross(normal);
        let angular_b = offset_b.cross(normal);
        // dot(n, n) == 1, so the linear contribution is just the inverse
        // masses.
        let inverse = inertia_a.inverse_mass
            + inertia_b.inverse_mass
            + Symmetric3x3Wide::vector_sandwich(&angular_a, &inertia_a.inverse_inertia_tensor)
            + Symmetric3x3Wide::vector_sandwich(&angular_b, &inertia_b.inverse_inertia_tensor);
        effective_mass_cfm_scale / inverse
    }

    /// Bias velocity for a depth. Negative depths are speculative: the bias
    /// permits approach up to the moment surfaces would touch.
    #[inline(always)]
    pub fn compute_bias_velocity(
        depth: WideFloat,
        position_error_to_velocity: WideFloat,
        inverse_dt: f32,
        maximum_recovery_velocity: WideFloat,
    ) -> WideFloat {
        (depth * WideFloat::splat(inverse_dt))
            .min(depth * position_error_to_velocity)
            .min(maximum_recovery_velocity)
    }

    /// One iteration of a single penetration limit.
    #[inline(always)]
    #[allow(clippy::too_many_arguments)]
    pub fn solve(
        projection: &PenetrationProjection,
        normal: &Vector3Wide,
        inertia_a: &BodyInertiaWide,
        inertia_b: &BodyInertiaWide,
        softness_impulse_scale: WideFloat,
        accumulated_impulse: &mut WideFloat,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        let separation_velocity = compute_anchor_velocity_error(
            &projection.offset_a,
            &projection.offset_b,
            wsv_a,
            wsv_b,
        )
        .dot(normal);
        let corrective = (projection.bias_velocity - separation_velocity)
            * projection.effective_mass
            - *accumulated_impulse * softness_impulse_scale;
        let previous = *accumulated_impulse;
        *accumulated_impulse = (*accumulated_impulse + corrective).max(WideFloat::ZERO);
        let applied = *accumulated_impulse - previous;
        apply_anchor_impulse(
            inertia_a,
            inertia_b,
            &projection.offset_a,
            &projection.offset_b,
            &normal.scale(applied),
            wsv_a,
            wsv_b,
        );
    }
}

/// Two-direction tangent friction solved at the manifold center.
pub struct TangentFriction;

impl TangentFriction {
    /// Inverse effective mass of the tangent plane constraint at the given
    /// anchors, inverted and returned.
    #[inline(always)]
    pub fn compute_effective_mass(
        tangent_x: &Vector3Wide,
        tangent_y: &Vector3Wide,
        offset_a: &Vector3Wide,
        offset_b: &Vector3Wide,
        inertia_a: &BodyInertiaWide,
        inertia_b: &BodyInertiaWide,
    ) -> Symmetric2x2Wide {
        let anchor_inverse = Symmetric3x3Wide::skew_sandwich(offset_a, &inertia_a.inverse_inertia_tensor)
            .add(&Symmetric3x3Wide::skew_sandwich(
                offset_b,
                &inertia_b.inverse_inertia_tensor,
            ))
            .add_to_diagonal(inertia_a.inverse_mass + inertia_b.inverse_mass);
        let tangents = crate::utilities::matrix2x3_wide::Matrix2x3Wide {
            x: *tangent_x,
            y: *tangent_y,
        };
        // Restrict the anchor's inverse effective mass to the tangent plane.
        let mut inverse = Symmetric2x2Wide {
            xx: Symmetric3x3Wide::vector_sandwich_dual(&tangents.x, &anchor_inverse, &tangents.x),
            yx: Symmetric3x3Wide::vector_sandwich_dual(&tangents.y, &anchor_inverse, &tangents.x),
            yy: Symmetric3x3Wide::vector_sandwich_dual(&tangents.y, &anchor_inverse, &tangents.y),
        };
        // Guard against locked-inertia kinematic pairs.
        let degenerate = inverse.xx.less_than(WideFloat::splat(1e-12));
        inverse.xx = degenerate.select(WideFloat::ONE, inverse.xx);
        inverse.yy = degenerate.select(WideFloat::ONE, inverse.yy);
        let mut effective_mass = inverse.invert();
        effective_mass.xx = degenerate.select(WideFloat::ZERO, effective_mass.xx);
        effective_mass.yx = degenerate.select(WideFloat::ZERO, effective_mass.yx);
        effective_mass.yy = degenerate.select(WideFloat::ZERO, effective_mass.yy);
        effective_mass
    }

    #[inline(always)]
    pub fn apply_impulse(
        tangent_x: &Vector3Wide,
        tangent_y: &Vector3Wide,
        offset_a: &Vector3Wide,
        offset_b: &Vector3Wide,
        inertia_a: &BodyInertiaWide,
        inertia_b: &BodyInertiaWide,
        impulse: &Vector2Wide,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        let world_impulse = tangent_x.scale(impulse.x) + tangent_y.scale(impulse.y);
        apply_anchor_impulse(
            inertia_a,
            inertia_b,
            offset_a,
            offset_b,
            &world_impulse,
            wsv_a,
            wsv_b,
        );
    }

    /// One iteration. Friction targets zero relative velocity; the
    /// accumulated impulse is clamped to the cone radius supplied by the
    /// caller from the current penetration impulses.
    #[inline(always)]
    #[allow(clippy::too_many_arguments)]
    pub fn solve(
        tangent_x: &Vector3Wide,
        tangent_y: &Vector3Wide,
        offset_a: &Vector3Wide,
        offset_b: &Vector3Wide,
        inertia_a: &BodyInertiaWide,
        inertia_b: &BodyInertiaWide,
        effective_mass: &Symmetric2x2Wide,
        maximum_impulse: WideFloat,
        accumulated_impulse: &mut Vector2Wide,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        let relative_velocity =
            compute_anchor_velocity_error(offset_a, offset_b, wsv_a, wsv_b);
        let tangent_velocity = Vector2Wide {
            x: tangent_x.dot(&relative_velocity),
            y: tangent_y.dot(&relative_velocity),
        };
        let corrective = effective_mass.transform(&Vector2Wide {
            x: -tangent_velocity.x,
            y: -tangent_velocity.y,
        });
        let previous = *accumulated_impulse;
        let unclamped = *accumulated_impulse + corrective;
        let magnitude = unclamped.length().max(WideFloat::splat(1e-16));
        let scale = WideFloat::ONE.min(maximum_impulse / magnitude);
        *accumulated_impulse = unclamped.scale(scale);
        let applied = *accumulated_impulse - previous;
        Self::apply_impulse(
            tangent_x,
            tangent_y,
            offset_a,
            offset_b,
            inertia_a,
            inertia_b,
            &applied,
            wsv_a,
            wsv_b,
        );
    }
}

/// Scalar friction about the contact normal resisting manifold spin.
pub struct TwistFriction;

impl TwistFriction {
    #[inline(always)]
    pub fn compute_effective_mass(
        normal: &Vector3Wide,
        inertia_a: &BodyInertiaWide,
        inertia_b: &BodyInertiaWide,
    ) -> WideFloat {
        let inverse = Symmetric3x3Wide::vector_sandwich(normal, &inertia_a.inverse_inertia_tensor)
            + Symmetric3x3Wide::vector_sandwich(normal, &inertia_b.inverse_inertia_tensor);
        // Both bodies can have locked inertia; that's a valid state.
        let degenerate = inverse.less_than(WideFloat::splat(1e-12));
        degenerate.select(WideFloat::ZERO, WideFloat::ONE / inverse)
    }

    #[inline(always)]
    pub fn apply_impulse(
        normal: &Vector3Wide,
        inertia_a: &BodyInertiaWide,
        inertia_b: &BodyInertiaWide,
        amount: WideFloat,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        let world_impulse = normal.scale(amount);
        wsv_a.angular = wsv_a.angular
            + inertia_a
                .inverse_inertia_tensor
                .transform(&world_impulse);
        wsv_b.angular = wsv_b.angular
            - inertia_b
                .inverse_inertia_tensor
                .transform(&world_impulse);
    }

    #[inline(always)]
    pub fn solve(
        normal: &Vector3Wide,
        inertia_a: &BodyInertiaWide,
        inertia_b: &BodyInertiaWide,
        effective_mass: WideFloat,
        maximum_impulse: WideFloat,
        accumulated_impulse: &mut WideFloat,
        wsv_a: &mut BodyVelocityWide,
        wsv_b: &mut BodyVelocityWide,
    ) {
        let twist_velocity = (wsv_a.angular - wsv_b.angular).dot(normal);
        let corrective = -twist_velocity * effective_mass;
        let previous = *accumulated_impulse;
        *accumulated_impulse =
            (*accumulated_impulse + corrective).clamp(-maximum_impulse, maximum_impulse);
        Self::apply_impulse(
            normal,
            inertia_a,
            inertia_b,
            *accumulated_impulse - previous,
            wsv_a,
            wsv_b,
        );
    }
}
