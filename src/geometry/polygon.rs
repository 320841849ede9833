//! Polygon type for layer outlines and tool paths.
//!
//! A polygon here is an ordered point sequence. Whether it is walked as a
//! closed loop or an open path is a property of the path configuration that
//! consumes it, not of the data, so the arclength reported by [`Polygon::length`]
//! is that of the open chain of stored points.

use super::{lerp, Point};
use crate::Coord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, Index};

/// An ordered sequence of points forming an outline or path.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Polygon {
    points: Vec<Point>,
}

impl Polygon {
    /// Create a new empty polygon.
    #[inline]
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Create a polygon from a vector of points.
    #[inline]
    pub fn from_points(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Get the points of this polygon.
    #[inline]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Get the number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the polygon is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Add a point to the polygon.
    #[inline]
    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    /// Get the first point, panicking if empty.
    #[inline]
    pub fn first_point(&self) -> Point {
        self.points[0]
    }

    /// Get the last point, panicking if empty.
    #[inline]
    pub fn last_point(&self) -> Point {
        self.points[self.points.len() - 1]
    }

    /// Arclength of the stored point chain in micrometres.
    ///
    /// The implied closing segment from last back to first is not included;
    /// closed-loop walks store the repeated start point explicitly.
    pub fn length(&self) -> Coord {
        if self.points.len() < 2 {
            return 0;
        }

        let mut total = 0i64;
        for i in 0..(self.points.len() - 1) {
            total = total.saturating_add(self.points[i].distance(&self.points[i + 1]));
        }
        total
    }

    /// Check whether a point lies inside the polygon, treating the stored
    /// points as a closed ring.
    ///
    /// Even-odd ray cast with i128 arithmetic; points exactly on an edge may
    /// report either side.
    pub fn contains(&self, p: &Point) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }

        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = self.points[i];
            let b = self.points[j];

            if (a.y > p.y) != (b.y > p.y) {
                // p.x < x-intersection of the edge at height p.y, kept in
                // integer form: compare (p.x - a.x) * den against num with
                // den = b.y - a.y (non-zero on this branch).
                let num = (b.x - a.x) as i128 * (p.y - a.y) as i128;
                let den = (b.y - a.y) as i128;
                let lhs = (p.x - a.x) as i128 * den;
                let crosses = if den > 0 { lhs < num } else { lhs > num };
                if crosses {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Return a copy of the polygon shortened by `distance` from the tail.
    ///
    /// The final point is interpolated along the last surviving segment.
    /// Trimming by zero is the identity; trimming by the full arclength or
    /// more yields an empty polygon.
    pub fn trimmed(&self, distance: Coord) -> Polygon {
        if distance <= 0 {
            return self.clone();
        }

        let target = self.length() - distance;
        if target <= 0 || self.points.len() < 2 {
            return Polygon::new();
        }

        let mut result = vec![self.points[0]];
        let mut walked: Coord = 0;

        for i in 1..self.points.len() {
            let seg = self.points[i - 1].distance(&self.points[i]);
            if walked + seg >= target {
                let remain = target - walked;
                if remain > 0 {
                    let t = remain as f64 / seg as f64;
                    result.push(lerp(self.points[i - 1], self.points[i], t));
                }
                return Polygon::from_points(result);
            }
            walked += seg;
            result.push(self.points[i]);
        }

        Polygon::from_points(result)
    }
}

impl fmt::Debug for Polygon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Polygon({} points)", self.points.len())
    }
}

impl Deref for Polygon {
    type Target = [Point];

    fn deref(&self) -> &Self::Target {
        &self.points
    }
}

impl Index<usize> for Polygon {
    type Output = Point;

    fn index(&self, index: usize) -> &Self::Output {
        &self.points[index]
    }
}

impl From<Vec<Point>> for Polygon {
    fn from(points: Vec<Point>) -> Self {
        Self::from_points(points)
    }
}

impl FromIterator<Point> for Polygon {
    fn from_iter<I: IntoIterator<Item = Point>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Polygon {
    type Item = &'a Point;
    type IntoIter = std::slice::Iter<'a, Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Type alias for a collection of polygons (an island: outline plus holes).
pub type Polygons = Vec<Polygon>;

/// Check whether a point lies inside a polygon set.
///
/// Even-odd across the whole set, so holes subtract from the outline that
/// encloses them.
pub fn point_inside_polygons(polygons: &[Polygon], p: Point) -> bool {
    let mut inside = false;
    for polygon in polygons {
        if polygon.contains(&p) {
            inside = !inside;
        }
    }
    inside
}
