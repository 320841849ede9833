//! Inside-boundary travel routing.
//!
//! This module finds travel paths that stay inside a set of boundary
//! polygons, so the nozzle does not drag across printed perimeters. Given two
//! points it either reports that the straight segment already stays inside,
//! returns a sequence of interior waypoints connecting them, or reports that
//! no fully-interior route exists.
//!
//! # Overview
//!
//! A [`Router`] is built once per boundary (typically once per layer) and
//! caches a visibility graph: the candidate waypoints are the boundary
//! vertices pulled slightly toward the interior along the corner bisector,
//! and two waypoints are connected when the segment between them crosses no
//! boundary edge. Queries run Dijkstra over that graph with deterministic
//! tie-breaking, so repeated queries give identical routes.
//!
//! The planner treats a routing failure as a retraction hint, never as an
//! error.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;

use crate::geometry::{point_inside_polygons, Line, Point, Polygon, Polygons};

/// How far boundary vertices are pulled toward the interior when they become
/// route waypoints (micrometres). Keeps waypoints strictly inside so the
/// segments between them clear the boundary they hug.
const WAYPOINT_INSET_UM: f64 = 50.0;

static NEXT_ROUTER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity token for a [`Router`] instance.
///
/// Held by the planner as a diagnostic trace of the last boundary it routed
/// against; it cannot be turned back into a router.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RouterId(u64);

/// Outcome of a routing query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteResult {
    /// The straight segment stays inside; no waypoints needed.
    Direct,
    /// Interior waypoints connecting the endpoints, exclusive of both.
    Interior(Vec<Point>),
    /// No fully-interior route was found.
    NoPath,
}

/// Routes travel moves through the interior of a polygon set.
pub struct Router {
    id: RouterId,
    /// Boundary edges of every polygon, including the closing segment.
    boundary_edges: Vec<Line>,
    /// Interior waypoint candidates.
    nodes: Vec<Point>,
    /// Visibility adjacency: `(neighbor index, segment length)`.
    adjacency: Vec<Vec<(usize, u64)>>,
}

impl Router {
    /// Build a router over the given boundary.
    ///
    /// The polygons are treated as closed rings forming one region with
    /// even-odd semantics (outline plus holes). Construction precomputes the
    /// visibility graph; queries only search it.
    pub fn new(boundary: Polygons) -> Self {
        let boundary_edges = collect_edges(&boundary);
        let nodes = collect_waypoint_nodes(&boundary);

        let mut adjacency = vec![Vec::new(); nodes.len()];
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                let segment = Line::new(nodes[i], nodes[j]);
                if !segment_crosses_any(&boundary_edges, &segment) {
                    let cost = segment.length() as u64;
                    adjacency[i].push((j, cost));
                    adjacency[j].push((i, cost));
                }
            }
        }

        Self {
            id: RouterId(NEXT_ROUTER_ID.fetch_add(1, Ordering::Relaxed)),
            boundary_edges,
            nodes,
            adjacency,
        }
    }

    /// Identity token of this router.
    #[inline]
    pub fn id(&self) -> RouterId {
        self.id
    }

    /// Find a route from `from` to `to` that stays inside the boundary.
    ///
    /// `layer_index` is carried for diagnostics only.
    pub fn route(&self, from: Point, to: Point, layer_index: usize) -> RouteResult {
        let direct = Line::new(from, to);
        if !segment_crosses_any(&self.boundary_edges, &direct) {
            return RouteResult::Direct;
        }

        match self.search(from, to) {
            Some(waypoints) => {
                trace!(
                    "layer {}: routed {:?} -> {:?} via {} waypoints",
                    layer_index,
                    from,
                    to,
                    waypoints.len()
                );
                RouteResult::Interior(waypoints)
            }
            None => {
                trace!("layer {}: no interior route {:?} -> {:?}", layer_index, from, to);
                RouteResult::NoPath
            }
        }
    }

    /// Dijkstra over the visibility graph with `from` and `to` attached by
    /// visibility. Ties break on the lower node index, keeping results
    /// deterministic.
    fn search(&self, from: Point, to: Point) -> Option<Vec<Point>> {
        let n = self.nodes.len();
        if n == 0 {
            return None;
        }

        // Which nodes can reach `to` directly, and at what cost.
        let mut exit_cost: Vec<Option<u64>> = vec![None; n];
        for (i, node) in self.nodes.iter().enumerate() {
            let segment = Line::new(*node, to);
            if !segment_crosses_any(&self.boundary_edges, &segment) {
                exit_cost[i] = Some(segment.length() as u64);
            }
        }

        // Virtual target lives at index n.
        let mut dist: Vec<Option<u64>> = vec![None; n + 1];
        let mut prev: Vec<usize> = vec![usize::MAX; n + 1];
        let mut heap: BinaryHeap<Reverse<(u64, usize)>> = BinaryHeap::new();

        for (i, node) in self.nodes.iter().enumerate() {
            let segment = Line::new(from, *node);
            if !segment_crosses_any(&self.boundary_edges, &segment) {
                let cost = segment.length() as u64;
                if dist[i].map_or(true, |d| cost < d) {
                    dist[i] = Some(cost);
                    heap.push(Reverse((cost, i)));
                }
            }
        }

        while let Some(Reverse((cost, i))) = heap.pop() {
            if dist[i] != Some(cost) {
                continue; // stale entry
            }
            if i == n {
                break;
            }

            let neighbors = self.adjacency[i]
                .iter()
                .copied()
                .chain(exit_cost[i].map(|c| (n, c)));
            for (j, edge_cost) in neighbors {
                let next = cost + edge_cost;
                if dist[j].map_or(true, |d| next < d) {
                    dist[j] = Some(next);
                    prev[j] = i;
                    heap.push(Reverse((next, j)));
                }
            }
        }

        dist[n]?;

        let mut waypoints = Vec::new();
        let mut i = prev[n];
        while i != usize::MAX {
            waypoints.push(self.nodes[i]);
            i = prev[i];
        }
        waypoints.reverse();
        debug_assert!(!waypoints.is_empty());
        Some(waypoints)
    }
}

/// Collect every boundary edge, closing each ring.
fn collect_edges(boundary: &[Polygon]) -> Vec<Line> {
    let mut edges = Vec::new();
    for polygon in boundary {
        let n = polygon.len();
        if n < 2 {
            continue;
        }
        for i in 0..n {
            edges.push(Line::new(polygon[i], polygon[(i + 1) % n]));
        }
    }
    edges
}

/// Check whether a segment intersects any boundary edge.
fn segment_crosses_any(edges: &[Line], segment: &Line) -> bool {
    edges.iter().any(|edge| segment.intersects(edge))
}

/// Compute the interior waypoint candidates: each boundary vertex nudged
/// inward along its corner bisector. Candidates that land outside the region
/// (or whose bisector is degenerate in both directions) are discarded.
fn collect_waypoint_nodes(boundary: &[Polygon]) -> Vec<Point> {
    let mut nodes = Vec::new();
    for polygon in boundary {
        let n = polygon.len();
        if n < 3 {
            continue;
        }
        for i in 0..n {
            let prev = polygon[(i + n - 1) % n];
            let v = polygon[i];
            let next = polygon[(i + 1) % n];

            if let Some(node) = inset_vertex(boundary, prev, v, next) {
                nodes.push(node);
            }
        }
    }
    nodes
}

/// Nudge vertex `v` along the bisector of its two edges, picking whichever
/// direction lands inside the region.
fn inset_vertex(boundary: &[Polygon], prev: Point, v: Point, next: Point) -> Option<Point> {
    let da = normalized(prev - v)?;
    let db = normalized(next - v)?;

    let mut bis = (da.0 + db.0, da.1 + db.1);
    let norm = (bis.0 * bis.0 + bis.1 * bis.1).sqrt();
    if norm < 1e-9 {
        // Straight-through vertex: fall back to the edge normal.
        bis = (-db.1, db.0);
    } else {
        bis = (bis.0 / norm, bis.1 / norm);
    }

    for direction in [bis, (-bis.0, -bis.1)] {
        let candidate = Point::new(
            v.x + (direction.0 * WAYPOINT_INSET_UM).round() as i64,
            v.y + (direction.1 * WAYPOINT_INSET_UM).round() as i64,
        );
        if point_inside_polygons(boundary, candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Unit direction of an integer vector, or None for the zero vector.
fn normalized(v: Point) -> Option<(f64, f64)> {
    let len = (v.length_squared() as f64).sqrt();
    if len < 1e-9 {
        return None;
    }
    Some((v.x as f64 / len, v.y as f64 / len))
}
