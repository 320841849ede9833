//! Polygon order optimization.
//!
//! This module decides in which order a set of polygons is printed and at
//! which vertex each one starts, so that the travel between the end of one
//! polygon and the start of the next stays short.
//!
//! # Overview
//!
//! A greedy nearest-candidate heuristic: from the current position, pick the
//! unvisited polygon whose best start vertex is closest, move there, and
//! repeat. Closed loops may start at any vertex (the walk returns to it);
//! open paths start at one of their two ends, choosing the end decides the
//! print direction. Ties break deterministically on the lower polygon index,
//! then the lower start index, so results are reproducible across runs.
//!
//! When a router is supplied, polygons whose chosen start cannot be reached
//! from the current position are deferred until only unreachable ones remain;
//! those are then appended in plain greedy order.

use crate::geometry::{Point, Polygon};
use crate::route::{RouteResult, Router};

/// Result of order optimization.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolygonOrder {
    /// Traversal order as indices into the input polygon list.
    pub order: Vec<usize>,

    /// Chosen start vertex per polygon, indexed by input position.
    pub start_index: Vec<usize>,
}

/// Greedy travel-minimizing polygon ordering.
pub struct OrderOptimizer<'a> {
    start: Point,
    closed_loop: bool,
    polygons: Vec<&'a Polygon>,
}

impl<'a> OrderOptimizer<'a> {
    /// Create an optimizer starting from `start`.
    ///
    /// `closed_loop` states how the polygons will be walked: closed loops may
    /// seam at any vertex, open paths only at their two ends.
    pub fn new(start: Point, closed_loop: bool) -> Self {
        Self {
            start,
            closed_loop,
            polygons: Vec::new(),
        }
    }

    /// Add one polygon to the set being ordered.
    pub fn add(&mut self, polygon: &'a Polygon) {
        self.polygons.push(polygon);
    }

    /// Add a slice of polygons in input order.
    pub fn add_all(&mut self, polygons: &'a [Polygon]) {
        for polygon in polygons {
            self.polygons.push(polygon);
        }
    }

    /// Number of polygons added so far.
    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    /// Check if no polygons were added.
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Compute the traversal order and per-polygon start vertices.
    ///
    /// Runs in roughly quadratic time over the polygon count; exactness is
    /// not a goal, deterministic short travels are.
    pub fn solve(&self, router: Option<&Router>, layer_index: usize) -> PolygonOrder {
        let n = self.polygons.len();
        let mut result = PolygonOrder {
            order: Vec::with_capacity(n),
            start_index: vec![0; n],
        };

        let mut visited = vec![false; n];
        let mut current = self.start;

        while result.order.len() < n {
            let pick = self
                .pick_nearest(&visited, current, router, layer_index)
                // Only unreachable polygons remain; order them by distance alone.
                .or_else(|| self.pick_nearest(&visited, current, None, layer_index));

            let Some((idx, start)) = pick else {
                break;
            };

            visited[idx] = true;
            result.order.push(idx);
            result.start_index[idx] = start;
            current = self.end_point(self.polygons[idx], start);
        }

        result
    }

    /// Find the unvisited polygon with the nearest usable start vertex.
    fn pick_nearest(
        &self,
        visited: &[bool],
        current: Point,
        router: Option<&Router>,
        layer_index: usize,
    ) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize, i128)> = None;

        for (idx, polygon) in self.polygons.iter().enumerate() {
            if visited[idx] || polygon.is_empty() {
                continue;
            }

            let (start, dist2) = self.best_start(polygon, current);

            if let Some(r) = router {
                if r.route(current, polygon[start], layer_index) == RouteResult::NoPath {
                    continue;
                }
            }

            // Strict < keeps the lower polygon index on ties.
            if best.map_or(true, |(_, _, d)| dist2 < d) {
                best = Some((idx, start, dist2));
            }
        }

        // Degenerate empty polygons are dropped from the order entirely.
        best.map(|(idx, start, _)| (idx, start))
    }

    /// Best start vertex of one polygon seen from `from`.
    fn best_start(&self, polygon: &Polygon, from: Point) -> (usize, i128) {
        if self.closed_loop {
            let mut best = (0, from.distance_squared(&polygon[0]));
            for (i, p) in polygon.points().iter().enumerate().skip(1) {
                let d = from.distance_squared(p);
                if d < best.1 {
                    best = (i, d);
                }
            }
            best
        } else {
            // Open paths print end to end; the start index picks the end.
            let head = from.distance_squared(&polygon[0]);
            let last = polygon.len() - 1;
            let tail = from.distance_squared(&polygon[last]);
            if tail < head {
                (last, tail)
            } else {
                (0, head)
            }
        }
    }

    /// Where the head ends up after walking `polygon` from `start`.
    fn end_point(&self, polygon: &Polygon, start: usize) -> Point {
        if self.closed_loop {
            // Closed traversal returns to its start vertex.
            polygon[start]
        } else if start == 0 {
            polygon[polygon.len() - 1]
        } else {
            polygon[(start + 1) % polygon.len()]
        }
    }
}
