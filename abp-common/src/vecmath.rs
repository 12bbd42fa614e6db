use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// A 2D vector of `f64`, used for both positions and velocities.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    /// Creates a new Vec2.
    pub const fn new(x: f64, y: f64) -> Self {
        Vec2 { x, y }
    }

    /// Creates a zero vector.
    pub const fn zero() -> Self {
        Vec2 { x: 0.0, y: 0.0 }
    }

    /// Calculates the squared length (magnitude) of the vector.
    pub fn length_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    /// Calculates the length (magnitude) of the vector.
    pub fn length(&self) -> f64 {
        self.length_squared().sqrt()
    }

    /// Returns the unit vector pointing along `self`.
    /// A zero (or vanishingly short) vector yields the zero vector instead of NaN.
    pub fn unit_or_zero(&self) -> Self {
        let len_sq = self.length_squared();
        if len_sq > 1e-24 {
            let inv_len = 1.0 / len_sq.sqrt();
            Vec2 { x: self.x * inv_len, y: self.y * inv_len }
        } else {
            Vec2::zero()
        }
    }

    /// The vector rotated by +π/2.
    pub fn normal(&self) -> Self {
        Vec2 { x: -self.y, y: self.x }
    }

    /// Component-wise (Hadamard) product.
    pub fn hadamard(&self, other: Vec2) -> Self {
        Vec2 { x: self.x * other.x, y: self.y * other.y }
    }

    /// Calculates the squared distance to another vector (point).
    pub fn distance_squared(&self, other: Vec2) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Calculates the distance to another vector (point).
    pub fn distance(&self, other: Vec2) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Distance to the vertical line `x = vertical`.
    pub fn distance_to_vertical(&self, vertical: f64) -> f64 {
        (self.x - vertical).abs()
    }

    /// Distance to the horizontal line `y = horizontal`.
    pub fn distance_to_horizontal(&self, horizontal: f64) -> f64 {
        (self.y - horizontal).abs()
    }

    /// Wraps the point into the periodic rectangle `[0, width) × [0, height)`.
    ///
    /// Works for points any number of periods away. The upper bound is never
    /// returned, even when `rem_euclid` rounds a tiny negative value up to it.
    pub fn wrapped(&self, width: f64, height: f64) -> Self {
        Vec2 {
            x: wrap_coordinate(self.x, width),
            y: wrap_coordinate(self.y, height),
        }
    }

    /// Whether the point lies inside `[0, width) × [0, height)`.
    pub fn is_inside(&self, width: f64, height: f64) -> bool {
        self.x >= 0.0 && self.x < width && self.y >= 0.0 && self.y < height
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[inline]
fn wrap_coordinate(value: f64, period: f64) -> f64 {
    let wrapped = value.rem_euclid(period);
    if wrapped >= period { wrapped - period } else { wrapped }
}

impl fmt::Display for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6} {:.6}", self.x, self.y)
    }
}

// Implement standard operators for convenience
impl Add for Vec2 {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self { x: self.x + other.x, y: self.y + other.y }
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, other: Self) {
        self.x += other.x;
        self.y += other.y;
    }
}

impl Sub for Vec2 {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self { x: self.x - other.x, y: self.y - other.y }
    }
}

impl SubAssign for Vec2 {
    fn sub_assign(&mut self, other: Self) {
        self.x -= other.x;
        self.y -= other.y;
    }
}

impl Neg for Vec2 {
    type Output = Self;
    fn neg(self) -> Self {
        Self { x: -self.x, y: -self.y }
    }
}

impl Mul<f64> for Vec2 {
    type Output = Self;
    fn mul(self, scalar: f64) -> Self {
        Self { x: self.x * scalar, y: self.y * scalar }
    }
}

impl Mul<Vec2> for f64 {
    type Output = Vec2;
    fn mul(self, v: Vec2) -> Vec2 {
        Vec2 { x: v.x * self, y: v.y * self }
    }
}

impl Div<f64> for Vec2 {
    type Output = Self;
    fn div(self, scalar: f64) -> Self {
        Self { x: self.x / scalar, y: self.y / scalar }
    }
}
