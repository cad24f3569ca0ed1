//! Wide two-component vectors, used by tangent friction and angular
//! alignment constraints.

use super::wide::WideFloat;
use std::ops::{Add, Sub};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Vector2Wide {
    pub x: WideFloat,
    pub y: WideFloat,
}

impl Vector2Wide {
    pub const ZERO: Vector2Wide = Vector2Wide {
        x: WideFloat::ZERO,
        y: WideFloat::ZERO,
    };

    #[inline(always)]
    pub fn scale(&self, scalar: WideFloat) -> Self {
        Self {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    #[inline(always)]
    pub fn dot(&self, other: &Self) -> WideFloat {
        self.x * other.x + self.y * other.y
    }

    #[inline(always)]
    pub fn length(&self) -> WideFloat {
        self.dot(self).sqrt()
    }
}

impl Add for Vector2Wide {
    type Output = Self;
    #[inline(always)]
    fn add(self, other: Self) -> Self {
        Self {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

impl Sub for Vector2Wide {
    type Output = Self;
    #[inline(always)]
    fn sub(self, other: Self) -> Self {
        Self {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }
}
