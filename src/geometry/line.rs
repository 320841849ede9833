//! Line segment type.
//!
//! This module provides the Line type representing a segment between two
//! points, plus the integer segment-intersection test the router relies on.

use super::Point;
use crate::Coord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A line segment defined by two endpoints.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Line {
    pub a: Point,
    pub b: Point,
}

impl Line {
    /// Create a new line segment from two points.
    #[inline]
    pub const fn new(a: Point, b: Point) -> Self {
        Self { a, b }
    }

    /// Get the direction vector (b - a).
    #[inline]
    pub fn direction(&self) -> Point {
        self.b - self.a
    }

    /// Get the midpoint of the line segment.
    #[inline]
    pub fn midpoint(&self) -> Point {
        Point::new((self.a.x + self.b.x) / 2, (self.a.y + self.b.y) / 2)
    }

    /// Get the squared length of the line segment.
    #[inline]
    pub fn length_squared(&self) -> i128 {
        self.a.distance_squared(&self.b)
    }

    /// Get the length of the line segment in micrometres.
    #[inline]
    pub fn length(&self) -> Coord {
        self.a.distance(&self.b)
    }

    /// Check if two line segments intersect.
    ///
    /// Uses the cross product method; endpoints count as intersecting.
    /// Collinear overlapping segments report no intersection.
    pub fn intersects(&self, other: &Line) -> bool {
        let d1 = self.direction();
        let d2 = other.direction();

        // Cross product of directions
        let cross = d1.x as i128 * d2.y as i128 - d1.y as i128 * d2.x as i128;

        // Parallel lines (including collinear)
        if cross == 0 {
            return false;
        }

        // Vector from self.a to other.a
        let dx = other.a.x - self.a.x;
        let dy = other.a.y - self.a.y;

        // Parameters for the intersection point: t along self, u along other.
        // We need 0 <= t_num/cross <= 1 and 0 <= u_num/cross <= 1, accounting
        // for the sign of cross.
        let t_num = dx as i128 * d2.y as i128 - dy as i128 * d2.x as i128;
        let u_num = dx as i128 * d1.y as i128 - dy as i128 * d1.x as i128;

        if cross > 0 {
            t_num >= 0 && t_num <= cross && u_num >= 0 && u_num <= cross
        } else {
            t_num <= 0 && t_num >= cross && u_num <= 0 && u_num >= cross
        }
    }
}

impl fmt::Debug for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line({:?} -> {:?})", self.a, self.b)
    }
}
