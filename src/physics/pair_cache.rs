//! Persistent collidable pair -> contact constraint mapping, carrying
//! warm start impulses across frames and across sleep cycles.

use crate::physics::collidable::CollidablePair;
use crate::physics::constraints::type_batch::TypeBatch;
use crate::physics::constraints::type_ids;
use crate::physics::contact_manifold::ContactManifold;
use crate::physics::handles::ConstraintHandle;
use crate::utilities::bundle_indexing::BundleIndexing;
use crate::utilities::collections::pair_map::PairMap;
use crate::utilities::collections::quick_list::QuickList;
use crate::utilities::memory::buffer_pool::BufferPool;
use crate::utilities::wide::LANE_WIDTH;
use glam::Vec2;

/// Cached state for one collidable pair's contact constraint.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PairCacheEntry {
    pub constraint_handle: ConstraintHandle,
    pub contact_count: u8,
    /// Cleared by the freshness sweep each frame; pairs the narrow phase
    /// didn't refresh lose their constraint.
    pub touched: bool,
    pub feature_ids: [i32; 8],
}

impl PairCacheEntry {
    pub fn new(constraint_handle: ConstraintHandle, manifold: &ContactManifold) -> Self {
        let mut entry = Self {
            constraint_handle,
            contact_count: manifold.count() as u8,
            touched: true,
            feature_ids: [0; 8],
        };
        for i in 0..manifold.count() {
            entry.feature_ids[i as usize] = manifold.feature_id(i);
        }
        entry
    }
}

/// Scalar image of one contact constraint's accumulated impulses, used to
/// ferry warm start data between constraint lanes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContactImpulses {
    pub penetration: [f32; 8],
    /// Per contact for nonconvex types; slot 0 holds the manifold-wide
    /// tangent impulse for convex types.
    pub tangent: [Vec2; 8],
    pub twist: f32,
}

/// Word offsets into a contact type's accumulated impulse bundle. One word
/// is one wide float.
struct ContactImpulseLayout {
    contact_count: i32,
    convex: bool,
    words_per_bundle: i32,
}

impl ContactImpulseLayout {
    fn for_type(type_id: i32) -> Self {
        debug_assert!(type_ids::is_contact_type(type_id));
        if type_id < type_ids::CONTACT_NONCONVEX_ONE_BODY_BASE {
            let contact_count = if type_id >= type_ids::CONTACT_CONVEX_TWO_BODY_BASE {
                type_id - type_ids::CONTACT_CONVEX_TWO_BODY_BASE + 1
            } else {
                type_id - type_ids::CONTACT_CONVEX_ONE_BODY_BASE + 1
            };
            Self {
                contact_count,
                convex: true,
                words_per_bundle: 3 + contact_count,
            }
        } else {
            let contact_count = if type_id >= type_ids::CONTACT_NONCONVEX_TWO_BODY_BASE {
                type_id - type_ids::CONTACT_NONCONVEX_TWO_BODY_BASE + 2
            } else {
                type_id - type_ids::CONTACT_NONCONVEX_ONE_BODY_BASE + 2
            };
            Self {
                contact_count,
                convex: false,
                words_per_bundle: 3 * contact_count,
            }
        }
    }
}

/// Reads a contact constraint's accumulated impulses out of its lane.
pub unsafe fn gather_contact_impulses(
    type_batch: &TypeBatch,
    index_in_type_batch: i32,
) -> ContactImpulses {
    let layout = ContactImpulseLayout::for_type(type_batch.type_id);
    let (bundle, inner) = BundleIndexing::get_bundle_indices(index_in_type_batch);
    let base = (type_batch.accumulated_impulses.as_ptr() as *const f32)
        .add((bundle * layout.words_per_bundle * LANE_WIDTH as i32 + inner) as usize);
    let read = |word: i32| *base.add((word * LANE_WIDTH as i32) as usize);
    let mut impulses = ContactImpulses::default();
    if layout.convex {
        impulses.tangent[0] = Vec2::new(read(0), read(1));
        for i in 0..layout.contact_count {
            impulses.penetration[i as usize] = read(2 + i);
        }
        impulses.twist = read(2 + layout.contact_count);
    } else {
        for i in 0..layout.contact_count {
            impulses.penetration[i as usize] = read(3 * i);
            impulses.tangent[i as usize] = Vec2::new(read(3 * i + 1), read(3 * i + 2));
        }
    }
    impulses
}

/// Writes accumulated impulses into a contact constraint's lane.
pub unsafe fn scatter_contact_impulses(
    type_batch: &mut TypeBatch,
    index_in_type_batch: i32,
    impulses: &ContactImpulses,
) {
    let layout = ContactImpulseLayout::for_type(type_batch.type_id);
    let (bundle, inner) = BundleIndexing::get_bundle_indices(index_in_type_batch);
    let base = (type_batch.accumulated_impulses.as_mut_ptr() as *mut f32)
        .add((bundle * layout.words_per_bundle * LANE_WIDTH as i32 + inner) as usize);
    let mut write = |word: i32, value: f32| *base.add((word * LANE_WIDTH as i32) as usize) = value;
    if layout.convex {
        write(0, impulses.tangent[0].x);
        write(1, impulses.tangent[0].y);
        for i in 0..layout.contact_count {
            write(2 + i, impulses.penetration[i as usize]);
        }
        write(2 + layout.contact_count, impulses.twist);
    } else {
        for i in 0..layout.contact_count {
            write(3 * i, impulses.penetration[i as usize]);
            write(3 * i + 1, impulses.tangent[i as usize].x);
            write(3 * i + 2, impulses.tangent[i as usize].y);
        }
    }
}

/// Builds the warm start impulses for a new manifold from the previous
/// frame's cached entry, matching contacts by feature id. Unmatched old
/// impulse is discarded unless redistribution is enabled, in which case the
/// unmatched normal impulse budget is spread uniformly.
pub fn match_warm_start_impulses(
    old_entry: &PairCacheEntry,
    old_impulses: &ContactImpulses,
    manifold: &ContactManifold,
    redistribute_unmatched: bool,
) -> ContactImpulses {
    let mut result = ContactImpulses::default();
    let new_count = manifold.count();
    let old_count = old_entry.contact_count as i32;
    let mut any_matched = false;
    let mut matched_old = [false; 8];
    for new_index in 0..new_count {
        let feature_id = manifold.feature_id(new_index);
        for old_index in 0..old_count {
            if old_entry.feature_ids[old_index as usize] == feature_id {
                result.penetration[new_index as usize] =
                    old_impulses.penetration[old_index as usize];
                result.tangent[new_index as usize] = old_impulses.tangent[old_index as usize];
                matched_old[old_index as usize] = true;
                any_matched = true;
                break;
            }
        }
    }
    match manifold {
        ContactManifold::Convex(_) => {
            // Convex friction is manifold-wide; carry it when the manifold
            // demonstrably persisted.
            if any_matched {
                result.tangent[0] = old_impulses.tangent[0];
                result.twist = old_impulses.twist;
            } else {
                result.tangent[0] = Vec2::ZERO;
            }
        }
        ContactManifold::Nonconvex(_) => {}
    }
    if redistribute_unmatched && new_count > 0 {
        let mut unmatched_total = 0.0;
        for old_index in 0..old_count {
            if !matched_old[old_index as usize] {
                unmatched_total += old_impulses.penetration[old_index as usize];
            }
        }
        if unmatched_total > 0.0 {
            let share = unmatched_total / new_count as f32;
            for new_index in 0..new_count {
                result.penetration[new_index as usize] += share;
            }
        }
    }
    result
}

/// Pair cache entries for one sleeping island.
pub struct InactivePairCacheSet {
    pub pairs: QuickList<(CollidablePair, PairCacheEntry)>,
}

pub struct PairCache {
    pub mapping: PairMap<PairCacheEntry>,
    /// Indexed by set id; slot 0 is unused.
    pub inactive_sets: Vec<Option<InactivePairCacheSet>>,
    /// Constraint handle -> owning pair, so external constraint removal can
    /// find and drop the cache entry.
    constraint_to_pair: Vec<Option<CollidablePair>>,
    /// Discarding unmatched warm start impulse is the default tradeoff;
    /// redistribution can improve transient stability at the cost of
    /// occasionally over-energizing reshaped manifolds.
    pub redistribute_unmatched_impulses: bool,
}

impl PairCache {
    pub fn new(initial_pair_capacity: i32, pool: &mut BufferPool) -> Self {
        Self {
            mapping: PairMap::with_capacity(initial_pair_capacity, pool),
            inactive_sets: Vec::new(),
            constraint_to_pair: Vec::new(),
            redistribute_unmatched_impulses: false,
        }
    }

    fn record_constraint(&mut self, handle: ConstraintHandle, pair: CollidablePair) {
        let index = handle.0 as usize;
        if index >= self.constraint_to_pair.len() {
            self.constraint_to_pair.resize(index + 1, None);
        }
        self.constraint_to_pair[index] = Some(pair);
    }

    /// Removes the mapping entry owning a contact constraint, if any.
    pub fn remove_by_constraint(&mut self, handle: ConstraintHandle) {
        let index = handle.0 as usize;
        if index < self.constraint_to_pair.len() {
            if let Some(pair) = self.constraint_to_pair[index].take() {
                self.mapping.remove(pair.packed_key());
            }
        }
    }

    #[inline(always)]
    pub fn get(&self, pair: CollidablePair) -> Option<&PairCacheEntry> {
        self.mapping.get(pair.packed_key())
    }

    #[inline(always)]
    pub fn get_mut(&mut self, pair: CollidablePair) -> Option<&mut PairCacheEntry> {
        self.mapping.get_mut(pair.packed_key())
    }

    pub fn add(&mut self, pair: CollidablePair, entry: PairCacheEntry, pool: &mut BufferPool) {
        self.record_constraint(entry.constraint_handle, pair);
        self.mapping.add(pair.packed_key(), entry, pool);
    }

    pub fn remove(&mut self, pair: CollidablePair) {
        if let Some(entry) = self.mapping.get(pair.packed_key()) {
            let index = entry.constraint_handle.0 as usize;
            if index < self.constraint_to_pair.len() {
                self.constraint_to_pair[index] = None;
            }
        }
        self.mapping.remove(pair.packed_key());
    }

    /// Moves every mapping entry whose pair involves one of the given body
    /// handles into a new inactive set. Contact constraints connect bodies
    /// within one island, so an entry's bodies are either all in the island
    /// or the pair involves a static.
    pub fn migrate_to_inactive_set(
        &mut self,
        set_index: i32,
        island_contains: impl Fn(crate::physics::collidable::CollidableReference) -> bool,
        pool: &mut BufferPool,
    ) {
        let mut pairs = QuickList::with_capacity(8, pool);
        let mut index = 0;
        while index < self.mapping.count {
            let key = *self.mapping.keys.get(index);
            let pair = CollidablePair {
                a: crate::physics::collidable::CollidableReference {
                    packed: (key >> 32) as u32,
                },
                b: crate::physics::collidable::CollidableReference {
                    packed: key as u32,
                },
            };
            if island_contains(pair.a) || island_contains(pair.b) {
                let entry = *self.mapping.values.get(index);
                pairs.add((pair, entry), pool);
                self.mapping.remove(key);
                // The removal swap-filled this index; revisit it.
            } else {
                index += 1;
            }
        }
        if self.inactive_sets.len() <= set_index as usize {
            self.inactive_sets.resize_with(set_index as usize + 1, || None);
        }
        debug_assert!(self.inactive_sets[set_index as usize].is_none());
        self.inactive_sets[set_index as usize] = Some(InactivePairCacheSet { pairs });
    }

    /// Returns an inactive set's entries to the mapping; part of island
    /// activation's sequential phase.
    pub fn activate_set(&mut self, set_index: i32, pool: &mut BufferPool) {
        if (set_index as usize) < self.inactive_sets.len() {
            if let Some(mut set) = self.inactive_sets[set_index as usize].take() {
                for i in 0..set.pairs.count {
                    let (pair, mut entry) = *set.pairs.get(i);
                    entry.touched = true;
                    self.mapping.add(pair.packed_key(), entry, pool);
                }
                set.pairs.dispose(pool);
            }
        }
    }

    pub fn dispose(&mut self, pool: &mut BufferPool) {
        self.mapping.dispose(pool);
        for set in self.inactive_sets.iter_mut() {
            if let Some(set) = set.as_mut() {
                set.pairs.dispose(pool);
            }
        }
        self.inactive_sets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::contact_manifold::{ConvexContact, ConvexContactManifold};
    use glam::Vec3;

    fn manifold_with_features(features: &[i32]) -> ContactManifold {
        let mut manifold = ConvexContactManifold {
            normal: Vec3::Y,
            ..Default::default()
        };
        for &feature_id in features {
            manifold.push(ConvexContact {
                offset: Vec3::ZERO,
                depth: 0.0,
                feature_id,
            });
        }
        ContactManifold::Convex(manifold)
    }

    #[test]
    fn matched_features_inherit_impulses_and_new_features_start_at_zero() {
        let old_manifold = manifold_with_features(&[10, 20, 30]);
        let old_entry = PairCacheEntry::new(ConstraintHandle(0), &old_manifold);
        let mut old_impulses = ContactImpulses::default();
        old_impulses.penetration[0] = 1.0;
        old_impulses.penetration[1] = 2.0;
        old_impulses.penetration[2] = 3.0;
        old_impulses.twist = 0.25;

        // Feature 20 persists in a different slot; feature 40 is new.
        let new_manifold = manifold_with_features(&[20, 40]);
        let matched = match_warm_start_impulses(&old_entry, &old_impulses, &new_manifold, false);
        assert_eq!(matched.penetration[0], 2.0);
        assert_eq!(matched.penetration[1], 0.0);
        // Friction carried because the manifold persisted.
        assert_eq!(matched.twist, 0.25);
    }

    #[test]
    fn fully_new_manifold_starts_cold() {
        let old_manifold = manifold_with_features(&[1, 2]);
        let old_entry = PairCacheEntry::new(ConstraintHandle(0), &old_manifold);
        let mut old_impulses = ContactImpulses::default();
        old_impulses.penetration[0] = 5.0;
        old_impulses.twist = 1.0;
        let new_manifold = manifold_with_features(&[3, 4]);
        let matched = match_warm_start_impulses(&old_entry, &old_impulses, &new_manifold, false);
        assert_eq!(matched.penetration[0], 0.0);
        assert_eq!(matched.twist, 0.0);
    }

    #[test]
    fn redistribution_spreads_unmatched_normal_impulse() {
        let old_manifold = manifold_with_features(&[1, 2]);
        let old_entry = PairCacheEntry::new(ConstraintHandle(0), &old_manifold);
        let mut old_impulses = ContactImpulses::default();
        old_impulses.penetration[0] = 4.0;
        old_impulses.penetration[1] = 2.0;
        // Feature 1 survives; feature 2's impulse would be discarded.
        let new_manifold = manifold_with_features(&[1, 5]);
        let matched = match_warm_start_impulses(&old_entry, &old_impulses, &new_manifold, true);
        assert_eq!(matched.penetration[0], 4.0 + 1.0);
        assert_eq!(matched.penetration[1], 1.0);
    }
}
