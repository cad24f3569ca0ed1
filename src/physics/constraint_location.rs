//! Handle to constraint memory mapping.

/// Where a constraint currently lives. A negative set index marks an unused
/// handle slot.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ConstraintLocation {
    pub set_index: i32,
    pub batch_index: i32,
    pub type_id: i32,
    pub index_in_type_batch: i32,
}

impl Default for ConstraintLocation {
    fn default() -> Self {
        Self {
            set_index: -1,
            batch_index: -1,
            type_id: -1,
            index_in_type_batch: -1,
        }
    }
}
