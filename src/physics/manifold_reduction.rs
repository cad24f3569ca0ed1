//! Nonconvex manifold reduction: most-constraining subset selection.
//!
//! Child testers of compound shapes can hand back far more contacts than
//! the solver wants per manifold. Reduction keeps the subset that most
//! constrains an idealized unit-mass body, which preserves stacks and edges
//! far better than depth sorting alone.

use crate::physics::contact_manifold::{
    ContactManifold, ConvexContactManifold, NonconvexContact, NonconvexContactManifold,
};
use glam::Vec3;

/// Fixed direction used to seed the selection with an extreme contact. The
/// specific values only matter in that they are unit length and avoid the
/// coordinate axes, so ties on axis-aligned geometry break the same way
/// every frame.
const EXTREMITY_AXIS: Vec3 = Vec3::new(0.484123426, 0.363092548, 0.796202064);

/// Multiplier applied to speculative candidates' scores; real contacts
/// should win unless the speculative one is much more constraining.
const SPECULATIVE_SCORE_SCALE: f32 = 0.2;

/// Jacobian of one contact acting on a unit-mass, unit-inertia body.
#[derive(Clone, Copy)]
struct ContactJacobian([f32; 6]);

impl ContactJacobian {
    fn new(contact: &NonconvexContact) -> Self {
        let angular = contact.offset.cross(contact.normal);
        Self([
            contact.normal.x,
            contact.normal.y,
            contact.normal.z,
            angular.x,
            angular.y,
            angular.z,
        ])
    }

    fn dot(&self, other: &Self) -> f32 {
        let mut sum = 0.0;
        for i in 0..6 {
            sum += self.0[i] * other.0[i];
        }
        sum
    }

    fn subtract_scaled(&mut self, other: &Self, scale: f32) {
        for i in 0..6 {
            self.0[i] -= other.0[i] * scale;
        }
    }

    fn length_squared(&self) -> f32 {
        self.dot(self)
    }

    fn normalize(&mut self) -> bool {
        let length_squared = self.length_squared();
        if length_squared < 1e-10 {
            return false;
        }
        let inverse = 1.0 / length_squared.sqrt();
        for value in self.0.iter_mut() {
            *value *= inverse;
        }
        true
    }
}

/// Reduces a candidate contact list down to at most `maximum_count`
/// contacts by greedy most-constraining selection.
pub fn reduce_candidates(
    candidates: &[NonconvexContact],
    maximum_count: usize,
    reduced: &mut NonconvexContactManifold,
) {
    reduced.count = 0;
    if candidates.len() <= maximum_count {
        for contact in candidates {
            reduced.push(*contact);
        }
        return;
    }
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    // Seed with the most extreme deep contact. Non-speculative contacts are
    // strongly preferred; the tiny index bias keeps frame-to-frame selection
    // stable when scores tie exactly.
    let mut best_score = f32::MIN;
    let mut best_slot = 0;
    for (slot, &candidate_index) in remaining.iter().enumerate() {
        let contact = &candidates[candidate_index];
        let extent = contact.offset.dot(EXTREMITY_AXIS);
        let mut score = if contact.depth >= 0.0 {
            contact.depth + extent.abs()
        } else {
            contact.depth
        };
        score -= candidate_index as f32 * 1e-6;
        if score > best_score {
            best_score = score;
            best_slot = slot;
        }
    }
    let seed_index = remaining.swap_remove(best_slot);
    reduced.push(candidates[seed_index]);

    // Orthonormalized jacobians of everything chosen so far; a candidate's
    // residual against this basis is the impulse an idealized unit-mass
    // solve could still extract from it.
    let mut basis: Vec<ContactJacobian> = Vec::with_capacity(maximum_count);
    let mut seed_jacobian = ContactJacobian::new(&candidates[seed_index]);
    if seed_jacobian.normalize() {
        basis.push(seed_jacobian);
    }

    while reduced.count < maximum_count as i32 && !remaining.is_empty() {
        let mut best_score = f32::MIN;
        let mut best_slot = usize::MAX;
        for (slot, &candidate_index) in remaining.iter().enumerate() {
            let contact = &candidates[candidate_index];
            let mut residual = ContactJacobian::new(contact);
            for basis_jacobian in &basis {
                let projection = residual.dot(basis_jacobian);
                residual.subtract_scaled(basis_jacobian, projection);
            }
            let mut score = residual.length_squared();
            if contact.depth < 0.0 {
                score *= SPECULATIVE_SCORE_SCALE;
            }
            score -= candidate_index as f32 * 1e-6;
            if score > best_score {
                best_score = score;
                best_slot = slot;
            }
        }
        let chosen_index = remaining.swap_remove(best_slot);
        reduced.push(candidates[chosen_index]);
        let mut jacobian = ContactJacobian::new(&candidates[chosen_index]);
        for basis_jacobian in &basis {
            let projection = jacobian.dot(basis_jacobian);
            jacobian.subtract_scaled(basis_jacobian, projection);
        }
        if jacobian.normalize() {
            basis.push(jacobian);
        }
    }
}

/// Accumulates convex manifolds produced by child pair tests (compound and
/// mesh testers) and flushes them into a single reduced manifold.
pub struct NonconvexReduction {
    candidates: Vec<NonconvexContact>,
    populated_children: i32,
    last_child_offset_b: Vec3,
    last_child_manifold: ConvexContactManifold,
}

impl NonconvexReduction {
    /// Contact count above which a flush reduces rather than passing
    /// everything through.
    pub const MAXIMUM_REDUCED_CONTACTS: usize = 4;

    pub fn new() -> Self {
        Self {
            candidates: Vec::new(),
            populated_children: 0,
            last_child_offset_b: Vec3::ZERO,
            last_child_manifold: ConvexContactManifold::default(),
        }
    }

    /// Adds one child's convex manifold. `offset_a` positions the child
    /// relative to the parent of shape A; feature ids are mixed with the
    /// child indices so compound parts cannot collide in id space.
    pub fn add_child(
        &mut self,
        manifold: &ConvexContactManifold,
        offset_a: Vec3,
        child_index_a: i32,
        child_index_b: i32,
    ) {
        if manifold.count == 0 {
            return;
        }
        self.populated_children += 1;
        self.last_child_offset_b = manifold.offset_b + offset_a;
        self.last_child_manifold = *manifold;
        for i in 0..manifold.count {
            let contact = &manifold.contacts[i as usize];
            self.candidates.push(NonconvexContact {
                offset: contact.offset + offset_a,
                normal: manifold.normal,
                depth: contact.depth,
                feature_id: contact.feature_id ^ ((child_index_a << 8) ^ (child_index_b << 16)),
            });
        }
    }

    /// Produces the final manifold. A single populated child passes through
    /// as convex; multiple children reduce into a nonconvex manifold.
    pub fn flush(&mut self) -> Option<ContactManifold> {
        if self.populated_children == 0 {
            return None;
        }
        if self.populated_children == 1 {
            let mut manifold = self.last_child_manifold;
            manifold.offset_b = self.last_child_offset_b;
            // Contacts were pushed into parent space with mixed ids; copy
            // them back out of the candidate list.
            for (i, candidate) in self.candidates.iter().enumerate() {
                manifold.contacts[i].offset = candidate.offset;
                manifold.contacts[i].feature_id = candidate.feature_id;
            }
            return Some(ContactManifold::Convex(manifold));
        }
        let mut reduced = NonconvexContactManifold {
            offset_b: self.last_child_offset_b,
            ..Default::default()
        };
        reduce_candidates(
            &self.candidates,
            Self::MAXIMUM_REDUCED_CONTACTS,
            &mut reduced,
        );
        Some(ContactManifold::Nonconvex(reduced))
    }
}

impl Default for NonconvexReduction {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(offset: Vec3, normal: Vec3, depth: f32, feature_id: i32) -> NonconvexContact {
        NonconvexContact {
            offset,
            normal,
            depth,
            feature_id,
        }
    }

    #[test]
    fn passthrough_below_the_limit() {
        let candidates = [
            contact(Vec3::X, Vec3::Y, 0.1, 1),
            contact(Vec3::Z, Vec3::Y, 0.2, 2),
        ];
        let mut reduced = NonconvexContactManifold::default();
        reduce_candidates(&candidates, 4, &mut reduced);
        assert_eq!(reduced.count, 2);
    }

    #[test]
    fn reduction_keeps_spread_out_support() {
        // Eight coplanar contacts on a square rim plus clustered middle
        // contacts; reduction should keep corner-ish support, not four
        // near-duplicates.
        let mut candidates = Vec::new();
        for (i, corner) in [
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(-1.0, 0.0, 1.0),
        ]
        .iter()
        .enumerate()
        {
            candidates.push(contact(*corner, Vec3::Y, 0.05, i as i32));
        }
        for i in 0..4 {
            candidates.push(contact(
                Vec3::new(0.01 * i as f32, 0.0, 0.0),
                Vec3::Y,
                0.05,
                100 + i,
            ));
        }
        let mut reduced = NonconvexContactManifold::default();
        reduce_candidates(&candidates, 4, &mut reduced);
        assert_eq!(reduced.count, 4);
        // The bounding extent of the chosen contacts should span the rim.
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for i in 0..4 {
            min = min.min(reduced.contacts[i].offset);
            max = max.max(reduced.contacts[i].offset);
        }
        assert!(max.x - min.x > 1.5);
        assert!(max.z - min.z > 1.5);
    }

    #[test]
    fn speculative_contacts_lose_to_real_ones() {
        let corners = [
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(-1.0, 0.0, 1.0),
        ];
        let mut candidates = Vec::new();
        for (i, corner) in corners.iter().enumerate() {
            candidates.push(contact(*corner, Vec3::Y, 0.1, i as i32));
        }
        // Speculative twins of the same geometry must always lose to their
        // real counterparts.
        for (i, corner) in corners.iter().enumerate() {
            candidates.push(contact(*corner, Vec3::Y, -0.05, 10 + i as i32));
        }
        let mut reduced = NonconvexContactManifold::default();
        reduce_candidates(&candidates, 4, &mut reduced);
        let real_count = (0..reduced.count)
            .filter(|&i| reduced.contacts[i as usize].depth >= 0.0)
            .count();
        assert_eq!(real_count, 4, "speculative twins should never displace real contacts");
    }

    #[test]
    fn child_indices_are_mixed_into_feature_ids() {
        let mut child = ConvexContactManifold {
            normal: Vec3::Y,
            ..Default::default()
        };
        child.push(crate::physics::contact_manifold::ConvexContact {
            offset: Vec3::ZERO,
            depth: 0.1,
            feature_id: 7,
        });
        let mut reduction = NonconvexReduction::new();
        reduction.add_child(&child, Vec3::ZERO, 1, 0);
        reduction.add_child(&child, Vec3::X, 2, 0);
        let flushed = reduction.flush().unwrap();
        match flushed {
            ContactManifold::Nonconvex(manifold) => {
                assert_eq!(manifold.count, 2);
                assert_ne!(
                    manifold.contacts[0].feature_id,
                    manifold.contacts[1].feature_id
                );
            }
            ContactManifold::Convex(_) => panic!("two children must produce nonconvex"),
        }
    }
}
