//! Body reference bundles stored per type batch.
//!
//! Active constraints store active-set body indices; sleeping constraints
//! store body handles instead, translated on wake.

use crate::utilities::wide::WideInt;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct OneBodyReferences {
    pub index_a: WideInt,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct TwoBodyReferences {
    pub index_a: WideInt,
    pub index_b: WideInt,
}
