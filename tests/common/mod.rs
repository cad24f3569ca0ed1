//! Shared fixtures for the integration scenarios: simple pair testers for
//! sphere and box shapes, plus gravity and material callbacks. The engine
//! core consumes testers through its registry; these are deliberately plain
//! reference implementations.

use glam::{Mat3, Vec3};
use impel::physics::contact_manifold::{ContactManifold, ConvexContact, ConvexContactManifold};
use impel::{
    BodyInertia, BodyVelocity, BoxShape, CollidablePair, CollidableReference, ContactTaskRegistry,
    NarrowPhaseCallbacks, PairMaterialProperties, PairTester, PoseIntegratorCallbacks, RigidPose,
    Shape, Sphere,
};

pub struct SpherePairTester;

impl PairTester for SpherePairTester {
    fn test(
        &self,
        shape_a: *const u8,
        pose_a: &RigidPose,
        shape_b: *const u8,
        pose_b: &RigidPose,
        speculative_margin: f32,
    ) -> Option<ContactManifold> {
        let sphere_a = unsafe { &*(shape_a as *const Sphere) };
        let sphere_b = unsafe { &*(shape_b as *const Sphere) };
        let offset_b = pose_b.position - pose_a.position;
        let distance = offset_b.length();
        let normal = if distance > 1e-8 {
            // Points from B toward A.
            -offset_b / distance
        } else {
            Vec3::Y
        };
        let depth = sphere_a.radius + sphere_b.radius - distance;
        if depth < -speculative_margin {
            return None;
        }
        let mut manifold = ConvexContactManifold {
            normal,
            offset_b,
            ..Default::default()
        };
        manifold.push(ConvexContact {
            offset: -normal * (sphere_a.radius - depth * 0.5),
            depth,
            feature_id: 0,
        });
        Some(ContactManifold::Convex(manifold))
    }
}

pub struct SphereBoxTester;

impl PairTester for SphereBoxTester {
    fn test(
        &self,
        shape_a: *const u8,
        pose_a: &RigidPose,
        shape_b: *const u8,
        pose_b: &RigidPose,
        speculative_margin: f32,
    ) -> Option<ContactManifold> {
        let sphere = unsafe { &*(shape_a as *const Sphere) };
        let box_shape = unsafe { &*(shape_b as *const BoxShape) };
        let half = Vec3::new(
            box_shape.half_width,
            box_shape.half_height,
            box_shape.half_length,
        );
        // Work in the box's local frame.
        let local_center = pose_b.orientation.inverse() * (pose_a.position - pose_b.position);
        let clamped = local_center.clamp(-half, half);
        let offset = local_center - clamped;
        let distance = offset.length();
        let (local_normal, depth) = if distance > 1e-8 {
            // Sphere center outside the box.
            (offset / distance, sphere.radius - distance)
        } else {
            // Center inside; push out along the least-penetrated face.
            let face_distances = half - local_center.abs();
            let (axis, penetration) = if face_distances.x <= face_distances.y
                && face_distances.x <= face_distances.z
            {
                (Vec3::X * local_center.x.signum(), face_distances.x)
            } else if face_distances.y <= face_distances.z {
                (Vec3::Y * local_center.y.signum(), face_distances.y)
            } else {
                (Vec3::Z * local_center.z.signum(), face_distances.z)
            };
            (axis, sphere.radius + penetration)
        };
        if depth < -speculative_margin {
            return None;
        }
        let normal = pose_b.orientation * local_normal;
        let surface_point = pose_b.orientation * clamped + pose_b.position;
        let mut manifold = ConvexContactManifold {
            normal,
            offset_b: pose_b.position - pose_a.position,
            ..Default::default()
        };
        manifold.push(ConvexContact {
            offset: surface_point - pose_a.position,
            depth,
            feature_id: 0,
        });
        Some(ContactManifold::Convex(manifold))
    }
}

/// Face-based box pair tester: finds the least-overlapping face axis and
/// emits the incident face's vertices as the manifold. Edge-edge cases are
/// not represented; resting and sliding face contact is what the scenarios
/// need.
pub struct BoxPairTester;

impl PairTester for BoxPairTester {
    fn test(
        &self,
        shape_a: *const u8,
        pose_a: &RigidPose,
        shape_b: *const u8,
        pose_b: &RigidPose,
        speculative_margin: f32,
    ) -> Option<ContactManifold> {
        let box_a = unsafe { &*(shape_a as *const BoxShape) };
        let box_b = unsafe { &*(shape_b as *const BoxShape) };
        let half_a = Vec3::new(box_a.half_width, box_a.half_height, box_a.half_length);
        let half_b = Vec3::new(box_b.half_width, box_b.half_height, box_b.half_length);
        let rotation_a = Mat3::from_quat(pose_a.orientation);
        let rotation_b = Mat3::from_quat(pose_b.orientation);
        let axes_a = [rotation_a.x_axis, rotation_a.y_axis, rotation_a.z_axis];
        let axes_b = [rotation_b.x_axis, rotation_b.y_axis, rotation_b.z_axis];
        let center_offset = pose_b.position - pose_a.position;

        let project = |axis: Vec3, axes: &[Vec3; 3], half: Vec3| -> f32 {
            axis.dot(axes[0]).abs() * half.x
                + axis.dot(axes[1]).abs() * half.y
                + axis.dot(axes[2]).abs() * half.z
        };

        // Least-overlap face axis over both boxes' faces.
        let mut best_separation = f32::MIN;
        let mut best_axis = Vec3::Y;
        let mut best_owner_is_a = true;
        for (owner_is_a, axes) in [(true, &axes_a), (false, &axes_b)] {
            for axis in axes.iter() {
                let radius_sum =
                    project(*axis, &axes_a, half_a) + project(*axis, &axes_b, half_b);
                let separation = axis.dot(center_offset).abs() - radius_sum;
                if separation > speculative_margin {
                    return None;
                }
                if separation > best_separation {
                    best_separation = separation;
                    best_axis = *axis;
                    best_owner_is_a = owner_is_a;
                }
            }
        }
        // Calibrate to point from B toward A.
        let normal = if best_axis.dot(center_offset) > 0.0 {
            -best_axis
        } else {
            best_axis
        };

        // Incident face: the face of the non-owning box whose outward
        // normal points most directly at the owning box.
        let (incident_axes, incident_half, incident_center, incident_toward) = if best_owner_is_a {
            (&axes_b, half_b, pose_b.position, normal)
        } else {
            (&axes_a, half_a, pose_a.position, -normal)
        };
        let mut incident_axis_index = 0;
        let mut incident_sign = 1.0;
        let mut most_aligned = f32::MIN;
        for (index, axis) in incident_axes.iter().enumerate() {
            let alignment = axis.dot(incident_toward);
            if alignment.abs() > most_aligned {
                most_aligned = alignment.abs();
                incident_axis_index = index;
                incident_sign = alignment.signum();
            }
        }
        let incident_half_values = [incident_half.x, incident_half.y, incident_half.z];
        let face_normal_axis = incident_axes[incident_axis_index] * incident_sign;
        let face_center =
            incident_center + face_normal_axis * incident_half_values[incident_axis_index];
        let tangent_index_0 = (incident_axis_index + 1) % 3;
        let tangent_index_1 = (incident_axis_index + 2) % 3;
        let tangent_0 = incident_axes[tangent_index_0] * incident_half_values[tangent_index_0];
        let tangent_1 = incident_axes[tangent_index_1] * incident_half_values[tangent_index_1];
        let mut polygon: Vec<Vec3> = vec![
            face_center + tangent_0 + tangent_1,
            face_center + tangent_0 - tangent_1,
            face_center - tangent_0 - tangent_1,
            face_center - tangent_0 + tangent_1,
        ];

        // Clip against the reference face's side planes so contacts stay
        // within the overlap footprint.
        let (reference_axes, reference_half, reference_center, reference_support) =
            if best_owner_is_a {
                (
                    &axes_a,
                    half_a,
                    pose_a.position,
                    project(normal, &axes_a, half_a),
                )
            } else {
                (
                    &axes_b,
                    half_b,
                    pose_b.position,
                    project(normal, &axes_b, half_b),
                )
            };
        let reference_half_values = [reference_half.x, reference_half.y, reference_half.z];
        let mut reference_face_axis = 0;
        let mut best_alignment = f32::MIN;
        for (index, axis) in reference_axes.iter().enumerate() {
            if axis.dot(normal).abs() > best_alignment {
                best_alignment = axis.dot(normal).abs();
                reference_face_axis = index;
            }
        }
        for side_index in 0..3 {
            if side_index == reference_face_axis {
                continue;
            }
            let side_axis = reference_axes[side_index];
            let extent = reference_half_values[side_index];
            for plane_sign in [1.0f32, -1.0] {
                let plane_normal = side_axis * plane_sign;
                let plane_offset = plane_normal.dot(reference_center) + extent;
                let mut clipped = Vec::with_capacity(polygon.len() + 1);
                for i in 0..polygon.len() {
                    let current = polygon[i];
                    let next = polygon[(i + 1) % polygon.len()];
                    let current_distance = plane_normal.dot(current) - plane_offset;
                    let next_distance = plane_normal.dot(next) - plane_offset;
                    if current_distance <= 0.0 {
                        clipped.push(current);
                    }
                    if (current_distance <= 0.0) != (next_distance <= 0.0) {
                        let t = current_distance / (current_distance - next_distance);
                        clipped.push(current + (next - current) * t);
                    }
                }
                polygon = clipped;
                if polygon.is_empty() {
                    return None;
                }
            }
        }

        let mut manifold = ConvexContactManifold {
            normal,
            offset_b: center_offset,
            ..Default::default()
        };
        // Keep up to four of the deepest surviving points.
        let mut scored: Vec<(f32, Vec3, i32)> = polygon
            .iter()
            .enumerate()
            .map(|(vertex_id, &vertex)| {
                let along_normal = (vertex - reference_center).dot(normal);
                let depth = if best_owner_is_a {
                    // The reference face of A faces -normal.
                    reference_support + along_normal
                } else {
                    reference_support - along_normal
                };
                (depth, vertex, vertex_id as i32)
            })
            .filter(|&(depth, _, _)| depth >= -speculative_margin)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
        for &(depth, vertex, vertex_id) in scored.iter().take(4) {
            manifold.push(ConvexContact {
                offset: vertex - pose_a.position,
                depth,
                feature_id: vertex_id
                    | ((incident_axis_index as i32) << 4)
                    | ((best_owner_is_a as i32) << 8),
            });
        }
        if manifold.count == 0 {
            return None;
        }
        Some(ContactManifold::Convex(manifold))
    }
}

pub fn build_registry() -> ContactTaskRegistry {
    let mut registry = ContactTaskRegistry::new(4);
    registry.register(
        Sphere::TYPE_ID,
        Sphere::TYPE_ID,
        std::sync::Arc::new(SpherePairTester),
    );
    registry.register(
        Sphere::TYPE_ID,
        BoxShape::TYPE_ID,
        std::sync::Arc::new(SphereBoxTester),
    );
    registry.register(
        BoxShape::TYPE_ID,
        BoxShape::TYPE_ID,
        std::sync::Arc::new(BoxPairTester),
    );
    registry
}

pub struct DemoNarrowPhaseCallbacks {
    pub material: PairMaterialProperties,
}

impl Default for DemoNarrowPhaseCallbacks {
    fn default() -> Self {
        Self {
            material: PairMaterialProperties::default(),
        }
    }
}

impl NarrowPhaseCallbacks for DemoNarrowPhaseCallbacks {
    fn allow_contact_generation(
        &self,
        _worker_index: i32,
        _a: CollidableReference,
        _b: CollidableReference,
    ) -> bool {
        true
    }

    fn configure_contact_manifold(
        &self,
        _worker_index: i32,
        _pair: &CollidablePair,
        _manifold: &mut ContactManifold,
    ) -> Option<PairMaterialProperties> {
        Some(self.material)
    }
}

pub struct GravityCallbacks {
    pub gravity: Vec3,
    gravity_dt: Vec3,
}

impl GravityCallbacks {
    pub fn new(gravity: Vec3) -> Self {
        Self {
            gravity,
            gravity_dt: Vec3::ZERO,
        }
    }
}

impl PoseIntegratorCallbacks for GravityCallbacks {
    fn prepare_for_integration(&mut self, dt: f32) {
        self.gravity_dt = self.gravity * dt;
    }

    fn integrate_velocity(
        &self,
        _body_index: i32,
        _pose: &RigidPose,
        local_inertia: &BodyInertia,
        _worker_index: i32,
        velocity: &mut BodyVelocity,
    ) {
        if local_inertia.inverse_mass > 0.0 {
            velocity.linear += self.gravity_dt;
        }
    }
}

