use crate::core::math;

use std::fmt;
use std::fmt::Display;
use std::ops::{Add, Sub, Mul, Div, Neg, Index};

#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct Vec {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec {
    pub fn new(x: f32, y: f32, z: f32) -> Vec {
        Vec {x: x, y: y, z: z}
    }

    pub fn zero() -> Vec {
        Vec::new(0.0, 0.0, 0.0)
    }

    pub fn one() -> Vec {
        Vec::new(1.0, 1.0, 1.0)
    }

    pub fn splat(k: f32) -> Vec {
        Vec::new(k, k, k)
    }

    pub fn comp_div(&self, other: &Vec) -> Vec {
        Vec::new(self.x / other.x, self.y / other.y, self.z / other.z)
    }

    pub fn comp_min(&self, other: &Vec) -> Vec {
        Vec::new(f32::min(self.x, other.x), f32::min(self.y, other.y), f32::min(self.z, other.z))
    }

    pub fn comp_max(&self, other: &Vec) -> Vec {
        Vec::new(f32::max(self.x, other.x), f32::max(self.y, other.y), f32::max(self.z, other.z))
    }

    pub fn cross(&self, other: &Vec) -> Vec {
        Vec::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x)
    }

    pub fn dot(&self, other: &Vec) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn magnitude(&self) -> f32 {
        f32::sqrt(self.dot(self))
    }

    /// Returns the unit-length vector, or zero if the magnitude is zero.
    pub fn normalized(&self) -> Vec {
        let length = self.magnitude();
        if length > 0.0 {
            Vec::new(self.x / length, self.y / length, self.z / length)
        }
        else {
            Vec::zero()
        }
    }

    pub fn is_exactly_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    /// Determines whether a vec's magnitude is zero, within a small epsilon.
    pub fn is_nearly_zero(&self) -> bool {
        math::is_nearly_zero(self.dot(self))
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn lerp(&self, other: &Vec, a: f32) -> Vec {
        Vec::new(
            math::lerp(self.x, other.x, a),
            math::lerp(self.y, other.y, a),
            math::lerp(self.z, other.z, a))
    }

    /// Packs the vector into a device float4 with the given w.
    pub fn to_float4(&self, w: f32) -> [f32; 4] {
        [self.x, self.y, self.z, w]
    }
}

impl Display for Vec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl Index<usize> for Vec {
    type Output = f32;

    fn index(&self, index: usize) -> &f32 {
        match index {
            0 => &self.x,
            1 => &self.y,
            _ => &self.z
        }
    }
}

impl Add for Vec {
    type Output = Vec;
    fn add(self, rhs: Vec) -> Vec {
        Vec::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec {
    type Output = Vec;
    fn sub(self, rhs: Vec) -> Vec {
        Vec::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec {
    type Output = Vec;
    fn mul(self, rhs: f32) -> Vec {
        Vec::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Mul<Vec> for f32 {
    type Output = Vec;
    fn mul(self, rhs: Vec) -> Vec { rhs * self }
}

impl Div<f32> for Vec {
    type Output = Vec;
    fn div(self, rhs: f32) -> Vec {
        Vec::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

impl Neg for Vec {
    type Output = Vec;
    fn neg(self) -> Vec {
        Vec::new(-self.x, -self.y, -self.z)
    }
}

/// Two-component parametric coordinate, used for patch-space UVs.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Vec2 {
        Vec2 {x: x, y: y}
    }

    pub fn zero() -> Vec2 {
        Vec2::new(0.0, 0.0)
    }

    pub fn lerp(&self, other: &Vec2, a: f32) -> Vec2 {
        Vec2::new(math::lerp(self.x, other.x, a), math::lerp(self.y, other.y, a))
    }

    /// Bit pattern of both components; equal keys mean bit-identical coordinates.
    pub fn bits(&self) -> (u32, u32) {
        (self.x.to_bits(), self.y.to_bits())
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl Display for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cross_follows_right_hand_rule() {
        let x = Vec::new(1.0, 0.0, 0.0);
        let y = Vec::new(0.0, 1.0, 0.0);
        assert_eq!(x.cross(&y), Vec::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn normalizing_zero_stays_zero() {
        assert!(Vec::zero().normalized().is_exactly_zero());
        assert_relative_eq!(Vec::new(3.0, 4.0, 0.0).normalized().magnitude(), 1.0);
    }
}
