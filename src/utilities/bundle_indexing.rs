//! Mapping between flat constraint indices and (bundle, inner lane) slots.

use super::wide::LANE_WIDTH;

pub struct BundleIndexing;

impl BundleIndexing {
    #[inline(always)]
    pub fn get_bundle_indices(index: i32) -> (i32, i32) {
        debug_assert!(index >= 0);
        (
            index >> LANE_WIDTH.trailing_zeros(),
            index & (LANE_WIDTH as i32 - 1),
        )
    }

    #[inline(always)]
    pub fn get_bundle_count(element_count: i32) -> i32 {
        (element_count + LANE_WIDTH as i32 - 1) >> LANE_WIDTH.trailing_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_indices() {
        for index in 0..64 {
            let (bundle, inner) = BundleIndexing::get_bundle_indices(index);
            assert_eq!(bundle * LANE_WIDTH as i32 + inner, index);
            assert!(inner < LANE_WIDTH as i32);
        }
        assert_eq!(BundleIndexing::get_bundle_count(0), 0);
        assert_eq!(BundleIndexing::get_bundle_count(1), 1);
        assert_eq!(BundleIndexing::get_bundle_count(LANE_WIDTH as i32), 1);
        assert_eq!(BundleIndexing::get_bundle_count(LANE_WIDTH as i32 + 1), 2);
    }
}
