//! Stable entity handles.
//!
//! Handles survive the memory moves that set migration and swap-removal
//! cause; raw (set, index) locations do not.

use std::fmt;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct BodyHandle(pub i32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct StaticHandle(pub i32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ConstraintHandle(pub i32);

impl fmt::Display for BodyHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BodyHandle<{}>", self.0)
    }
}

impl fmt::Display for StaticHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "StaticHandle<{}>", self.0)
    }
}

impl fmt::Display for ConstraintHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ConstraintHandle<{}>", self.0)
    }
}
