//! Integer point types.
//!
//! This module provides the Point and Point3 types with integer micrometre
//! coordinates, the fundamental value types of the planner.

use crate::{scale, unscale, Coord, CoordF};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// A 2D point (or vector) with integer micrometre coordinates.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: Coord,
    pub y: Coord,
}

impl Point {
    /// Create a new point.
    #[inline]
    pub const fn new(x: Coord, y: Coord) -> Self {
        Self { x, y }
    }

    /// Create a point at the origin.
    #[inline]
    pub const fn zero() -> Self {
        Self { x: 0, y: 0 }
    }

    /// Create a point from millimetre coordinates.
    #[inline]
    pub fn new_scale(x: CoordF, y: CoordF) -> Self {
        Self {
            x: scale(x),
            y: scale(y),
        }
    }

    /// Squared Euclidean length of this vector.
    ///
    /// Widened to i128 so that coordinates anywhere on a realistic build
    /// volume cannot overflow.
    #[inline]
    pub fn length_squared(&self) -> i128 {
        self.x as i128 * self.x as i128 + self.y as i128 * self.y as i128
    }

    /// Euclidean length of this vector in micrometres, saturating to i64.
    #[inline]
    pub fn length(&self) -> Coord {
        let len = (self.length_squared() as f64).sqrt();
        if len >= i64::MAX as f64 {
            i64::MAX
        } else {
            len as Coord
        }
    }

    /// Euclidean length of this vector in millimetres.
    #[inline]
    pub fn length_mm(&self) -> CoordF {
        unscale(self.length())
    }

    /// Manhattan length of this vector (|x| + |y|) in micrometres.
    #[inline]
    pub fn manhattan_length(&self) -> Coord {
        self.x.abs().saturating_add(self.y.abs())
    }

    /// Check whether this vector is strictly shorter than `len`.
    ///
    /// Compares squared lengths, avoiding the square root.
    #[inline]
    pub fn shorter_than(&self, len: Coord) -> bool {
        self.length_squared() < len as i128 * len as i128
    }

    /// Check whether this vector is strictly longer than `len`.
    ///
    /// Compares squared lengths, avoiding the square root.
    #[inline]
    pub fn longer_than(&self, len: Coord) -> bool {
        self.length_squared() > len as i128 * len as i128
    }

    /// Squared distance to another point.
    #[inline]
    pub fn distance_squared(&self, other: &Point) -> i128 {
        (*other - *self).length_squared()
    }

    /// Distance to another point in micrometres.
    #[inline]
    pub fn distance(&self, other: &Point) -> Coord {
        (*other - *self).length()
    }

    /// Attach a Z coordinate, producing a 3D point.
    #[inline]
    pub const fn with_z(&self, z: Coord) -> Point3 {
        Point3 {
            x: self.x,
            y: self.y,
            z,
        }
    }
}

impl Add for Point {
    type Output = Point;

    #[inline]
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Point {
    #[inline]
    fn add_assign(&mut self, rhs: Point) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Point {
    type Output = Point;

    #[inline]
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Point {
    #[inline]
    fn sub_assign(&mut self, rhs: Point) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Neg for Point {
    type Output = Point;

    #[inline]
    fn neg(self) -> Point {
        Point::new(-self.x, -self.y)
    }
}

impl Mul<Coord> for Point {
    type Output = Point;

    #[inline]
    fn mul(self, rhs: Coord) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

impl fmt::Debug for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A 3D point with integer micrometre coordinates.
///
/// Z carries the layer height of the point; planar operations ignore it.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point3 {
    pub x: Coord,
    pub y: Coord,
    pub z: Coord,
}

impl Point3 {
    /// Create a new 3D point.
    #[inline]
    pub const fn new(x: Coord, y: Coord, z: Coord) -> Self {
        Self { x, y, z }
    }

    /// Project onto the XY plane.
    #[inline]
    pub const fn xy(&self) -> Point {
        Point {
            x: self.x,
            y: self.y,
        }
    }
}

impl fmt::Debug for Point3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Type alias for a collection of points.
pub type Points = Vec<Point>;
