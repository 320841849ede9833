//! The per-layer planning queue.
//!
//! This module owns the ordered list of [`PathRecord`]s for one layer. It
//! accepts extrusion, polygon, travel, fan and tool-change operations, folds
//! consecutive compatible moves into shared records, promotes retractions on
//! long or boundary-crossing travels, and applies the post-layer adjustments
//! (minimum-layer-time slowdown, fan floor) before handing the sealed queue
//! to the emitter.
//!
//! # Lifecycle
//!
//! One [`LayerPlanner`] instance corresponds to one layer at one Z. It is
//! strictly single-threaded: ingest operations, call
//! [`finalize_layer`](LayerPlanner::finalize_layer), then
//! [`emit`](LayerPlanner::emit), which consumes the planner.

mod record;

pub use record::{PathPoint, PathRecord, Retraction};

use log::debug;

use crate::config::{ConfigId, ConfigRegistry, PlannerSettings};
use crate::emit::{Emitter, Sink};
use crate::geometry::{Point, Polygon};
use crate::order::OrderOptimizer;
use crate::route::{RouteResult, Router, RouterId};
use crate::{unscale, Coord, CoordF, Error, Result};

/// Plans the machine actions of a single layer.
pub struct LayerPlanner<'a> {
    configs: &'a ConfigRegistry,
    travel_config: ConfigId,
    router: Option<&'a Router>,
    /// Diagnostic token of the last non-null router; never routed through.
    last_valid_router: Option<RouterId>,

    paths: Vec<PathRecord>,
    current_extruder: usize,
    initial_extruder: usize,

    /// Head position when this layer began.
    start_position: Point,
    /// Last point written to the queue (not the machine position, which may
    /// lag behind for coalesced or trimmed emissions).
    last_position: Point,

    layer_index: usize,
    layer_z: Coord,

    force_retraction: bool,
    can_append_travel: bool,
    /// Indices of queued fan records, for the post-layer fan floor.
    queued_fan_records: Vec<usize>,

    retract_min_um: Coord,
    perimeter_overlap_ratio: CoordF,
    layer_time_seconds: CoordF,
}

impl<'a> LayerPlanner<'a> {
    /// Create a planner for one layer.
    ///
    /// `travel_config` must be a registered travel config (line width 0);
    /// the settings must pass validation. The start position and extruder
    /// default to the origin and extruder 0; use the builder methods when the
    /// head is somewhere else.
    pub fn new(
        configs: &'a ConfigRegistry,
        travel_config: ConfigId,
        settings: &PlannerSettings,
        layer_index: usize,
        layer_z: Coord,
    ) -> Result<Self> {
        settings.validate()?;
        if !configs.get(travel_config).is_travel() {
            return Err(Error::ConfigConflict(format!(
                "travel config '{}' has non-zero line width",
                configs.get(travel_config).comment_tag
            )));
        }

        Ok(Self {
            configs,
            travel_config,
            router: None,
            last_valid_router: None,
            paths: Vec::new(),
            current_extruder: 0,
            initial_extruder: 0,
            start_position: Point::zero(),
            last_position: Point::zero(),
            layer_index,
            layer_z,
            force_retraction: false,
            can_append_travel: true,
            queued_fan_records: Vec::new(),
            retract_min_um: settings.retract_min_um,
            perimeter_overlap_ratio: settings.perimeter_overlap_ratio,
            layer_time_seconds: 0.0,
        })
    }

    /// Builder method: set the head position at layer start.
    pub fn with_start_position(mut self, position: Point) -> Self {
        self.start_position = position;
        self.last_position = position;
        self
    }

    /// Builder method: set the extruder active at layer start.
    pub fn with_extruder(mut self, extruder: usize) -> Self {
        self.current_extruder = extruder;
        self.initial_extruder = extruder;
        self
    }

    /// Builder method: route travels inside the given boundary.
    pub fn with_router(mut self, router: &'a Router) -> Self {
        self.set_router(Some(router));
        self
    }

    /// Set or clear the travel router.
    ///
    /// Setting a non-null router also stamps [`last_valid_router`]; clearing
    /// the router leaves the stamp in place as a diagnostic trace.
    pub fn set_router(&mut self, router: Option<&'a Router>) {
        if let Some(r) = router {
            self.last_valid_router = Some(r.id());
        }
        self.router = router;
    }

    /// Identity of the last non-null router this planner was given.
    pub fn last_valid_router(&self) -> Option<RouterId> {
        self.last_valid_router
    }

    /// Last point written to the queue.
    pub fn last_position(&self) -> Point {
        self.last_position
    }

    /// The queued records, in execution order.
    pub fn records(&self) -> &[PathRecord] {
        &self.paths
    }

    /// Estimated layer time in seconds; valid after
    /// [`finalize_layer`](Self::finalize_layer).
    pub fn layer_time_seconds(&self) -> CoordF {
        self.layer_time_seconds
    }

    /// Switch the active extruder for subsequently queued records.
    pub fn set_extruder(&mut self, extruder: usize) {
        if extruder != self.current_extruder {
            self.current_extruder = extruder;
            self.seal_tail();
        }
    }

    /// Whether queueing for `extruder` would require a tool change.
    pub fn tool_change_required(&self, extruder: usize) -> bool {
        extruder != self.current_extruder
    }

    /// Demand a forced retraction on the next travel. Extrusion moves do not
    /// consume the flag.
    pub fn force_retract(&mut self) {
        self.force_retraction = true;
    }

    /// Queue one extrusion move to `dest` under `config`.
    ///
    /// Folds into the tail record when it was queued under the same config
    /// and is still open. Extrusion never retracts.
    pub fn queue_extrusion(&mut self, dest: Point, config: ConfigId) -> Result<()> {
        self.require_extrusion(config)?;
        let z = self.layer_z;
        let record = self.record_for(config);
        record.push_point(PathPoint::new(dest.with_z(z), 0));
        self.last_position = dest;
        Ok(())
    }

    /// Queue a whole polygon starting at `start_index`.
    ///
    /// Closed-loop configs walk all the way around and, for more than two
    /// points, back to the start vertex, physically closing the loop. Open
    /// configs print end to end; a non-zero start index walks the indices
    /// `n−1..1` modulo `n` from the start, i.e. reversed.
    pub fn queue_polygon(
        &mut self,
        polygon: &Polygon,
        start_index: usize,
        config: ConfigId,
    ) -> Result<()> {
        self.require_extrusion(config)?;
        if polygon.is_empty() {
            return Err(Error::InvalidInput("queue_polygon: empty polygon".into()));
        }
        if start_index >= polygon.len() {
            return Err(Error::InvalidInput(format!(
                "queue_polygon: start index {} out of range for {} points",
                start_index,
                polygon.len()
            )));
        }

        let (closed_loop, spiralize) = {
            let c = self.configs.get(config);
            (c.closed_loop, c.spiralize)
        };
        let n = polygon.len();
        let start = polygon[start_index];

        if !spiralize && start != self.last_position {
            self.queue_travel(start);
        }

        if closed_loop {
            for k in 1..n {
                self.queue_extrusion(polygon[(start_index + k) % n], config)?;
            }
            if n > 2 {
                self.queue_extrusion(start, config)?;
            }
        } else if start_index == 0 {
            for k in 1..n {
                self.queue_extrusion(polygon[k], config)?;
            }
        } else {
            for k in (1..n).rev() {
                self.queue_extrusion(polygon[(start_index + k) % n], config)?;
            }
        }
        Ok(())
    }

    /// Queue several polygons in input order, each from its first vertex.
    pub fn queue_polygons(&mut self, polygons: &[Polygon], config: ConfigId) -> Result<()> {
        for polygon in polygons {
            self.queue_polygon(polygon, 0, config)?;
        }
        Ok(())
    }

    /// Order the polygons for short travels, then queue them.
    ///
    /// Returns `false` iff the input is empty.
    pub fn queue_polygons_by_optimizer(
        &mut self,
        polygons: &[Polygon],
        router: Option<&Router>,
        config: ConfigId,
    ) -> Result<bool> {
        if polygons.is_empty() {
            return Ok(false);
        }
        self.require_extrusion(config)?;

        let closed_loop = self.configs.get(config).closed_loop;
        let mut optimizer = OrderOptimizer::new(self.last_position, closed_loop);
        optimizer.add_all(polygons);
        let plan = optimizer.solve(router, self.layer_index);

        for idx in plan.order {
            self.queue_polygon(&polygons[idx], plan.start_index[idx], config)?;
        }
        Ok(true)
    }

    /// Queue a travel move to `dest`, folding into an open tail travel.
    pub fn queue_travel(&mut self, dest: Point) {
        self.queue_travel_inner(dest, false);
    }

    /// Queue a travel move that must open its own record; the next travel
    /// will not fold into it either.
    pub fn queue_travel_unique(&mut self, dest: Point) {
        self.queue_travel_inner(dest, true);
    }

    fn queue_travel_inner(&mut self, dest: Point, force_unique: bool) {
        let reuse_tail = !force_unique
            && self.can_append_travel
            && self.paths.last().is_some_and(|tail| {
                !tail.is_done()
                    && tail.config() == self.travel_config
                    && tail.extruder() == self.current_extruder
            });
        if !reuse_tail {
            let speed = self.configs.get(self.travel_config).speed_mm_s;
            self.paths
                .push(PathRecord::new(self.travel_config, self.current_extruder, speed));
        }
        self.can_append_travel = !force_unique;
        let idx = self.paths.len() - 1;

        if self.force_retraction {
            self.paths[idx].request_retraction(Retraction::Forced);
            self.force_retraction = false;
        }

        if let Some(router) = self.router {
            match router.route(self.last_position, dest, self.layer_index) {
                RouteResult::Interior(waypoints) => {
                    let mut routed_len: Coord = 0;
                    let mut prev = self.last_position;
                    for w in &waypoints {
                        routed_len = routed_len.saturating_add(prev.distance(w));
                        prev = *w;
                    }
                    routed_len = routed_len.saturating_add(prev.distance(&dest));

                    for w in waypoints {
                        self.paths[idx].push_point(PathPoint::new(w.with_z(self.layer_z), 0));
                    }
                    if routed_len > self.retract_min_um {
                        self.paths[idx].request_retraction(Retraction::Requested);
                    }
                }
                RouteResult::NoPath => {
                    // Crossing an uncombable gap: retract even for fairly
                    // short hops.
                    if (dest - self.last_position).longer_than(self.retract_min_um / 10) {
                        self.paths[idx].request_retraction(Retraction::Requested);
                    }
                }
                RouteResult::Direct => {}
            }
        }

        if (dest - self.last_position).longer_than(self.retract_min_um) {
            self.paths[idx].request_retraction(Retraction::Requested);
        }

        self.paths[idx].push_point(PathPoint::new(dest.with_z(self.layer_z), 0));
        self.last_position = dest;
    }

    /// Queue a fan override taking effect at this point of the layer.
    ///
    /// Fan records are ordinary records with no points; they participate in
    /// order but produce no motion. The post-layer fan floor raises them but
    /// never lowers them.
    pub fn queue_fan(&mut self, percent: i32, config: ConfigId) {
        let speed = self.configs.get(config).speed_mm_s;
        let mut record = PathRecord::new(config, self.current_extruder, speed);
        record.set_fan_percent(percent.clamp(0, 100));
        record.seal();
        self.queued_fan_records.push(self.paths.len());
        self.paths.push(record);
    }

    /// Apply the post-layer global adjustments.
    ///
    /// First the minimum-layer-time slowdown: when the layer would finish in
    /// less than `min_layer_time_s`, extrusion records (except bridges) are
    /// slowed so the extrusion stretches over the remaining time budget, but
    /// never below `min_print_speed`. Then the cooling fan floor of every
    /// queued fan record is raised to match the (re-estimated) layer time.
    ///
    /// Record count and order are preserved.
    pub fn finalize_layer(&mut self, settings: &PlannerSettings) {
        let (travel_time, extrude_time) = self.compute_times();
        let total = travel_time + extrude_time;

        if total < settings.min_layer_time_s && extrude_time > 0.0 {
            let ratio =
                (extrude_time / (settings.min_layer_time_s - travel_time)).min(1.0);
            debug!(
                "layer {}: {:.2}s below minimum {:.2}s, extrusion speed ratio {:.3}",
                self.layer_index, total, settings.min_layer_time_s, ratio
            );

            let configs = self.configs;
            for record in &mut self.paths {
                let config = configs.get(record.config());
                if config.is_travel() || config.is_bridge() {
                    continue;
                }
                record.set_speed(settings.min_print_speed.max(config.speed_mm_s * ratio));
            }
        }

        let (travel_time, extrude_time) = self.compute_times();
        self.layer_time_seconds = travel_time + extrude_time;

        let floor = self.layer_fan_percent(settings);
        for &idx in &self.queued_fan_records {
            self.paths[idx].fold_fan_floor(floor);
        }
    }

    /// Drain the queue into `sink`. Terminal: the planner is consumed.
    ///
    /// An empty plan emits nothing and succeeds.
    pub fn emit<S: Sink>(self, sink: &mut S, layer_thickness: Coord) -> Result<()> {
        if self.paths.is_empty() {
            return Ok(());
        }
        Emitter::new(
            self.configs,
            self.travel_config,
            self.perimeter_overlap_ratio,
            layer_thickness,
        )
        .emit(self.paths, self.start_position, self.initial_extruder, sink)
    }

    /// Split the plan's kinematic time into (travel, extrude) seconds.
    ///
    /// The implicit first point of each record is approximated by threading
    /// the start position forward through the queue.
    fn compute_times(&self) -> (CoordF, CoordF) {
        let mut travel = 0.0;
        let mut extrude = 0.0;
        let mut pos = self.start_position;

        for record in &self.paths {
            let is_travel = self.configs.get(record.config()).is_travel();
            for point in record.points() {
                let seconds = unscale(pos.distance(&point.xy())) / record.speed_mm_s();
                if is_travel {
                    travel += seconds;
                } else {
                    extrude += seconds;
                }
                pos = point.xy();
            }
        }
        (travel, extrude)
    }

    /// The cooling fan floor for this layer: 0 above the ramp,
    /// `fan_max_percent` at or below the fast threshold, interpolated
    /// between.
    fn layer_fan_percent(&self, settings: &PlannerSettings) -> i32 {
        if self.layer_index < settings.first_layer_allow_fan {
            return 0;
        }
        let min_fan_time = settings
            .min_fan_speed_layer_time
            .max(settings.max_fan_speed_layer_time);
        if self.layer_time_seconds >= min_fan_time {
            return 0;
        }
        if settings.max_fan_speed_layer_time >= min_fan_time {
            return settings.fan_max_percent;
        }

        let deficit = (min_fan_time - self.layer_time_seconds).max(0.0);
        let span = (min_fan_time - settings.max_fan_speed_layer_time).max(0.0);
        let ratio = if span > 0.0 { (deficit / span).min(1.0) } else { 0.0 };
        settings.fan_min_percent
            + (ratio * (settings.fan_max_percent - settings.fan_min_percent) as CoordF) as i32
    }

    /// Reject configs that cannot extrude.
    fn require_extrusion(&self, config: ConfigId) -> Result<()> {
        if self.configs.get(config).is_travel() {
            return Err(Error::ConfigConflict(format!(
                "extrusion queued under zero-width config '{}'",
                self.configs.get(config).comment_tag
            )));
        }
        Ok(())
    }

    fn seal_tail(&mut self) {
        if let Some(tail) = self.paths.last_mut() {
            tail.seal();
        }
    }

    /// Fold an extrusion point into the tail record, or open a new one.
    fn record_for(&mut self, config: ConfigId) -> &mut PathRecord {
        let reuse = self.paths.last().is_some_and(|tail| {
            !tail.is_done()
                && tail.config() == config
                && tail.extruder() == self.current_extruder
        });
        if !reuse {
            let speed = self.configs.get(config).speed_mm_s;
            self.paths
                .push(PathRecord::new(config, self.current_extruder, speed));
        }
        let idx = self.paths.len() - 1;
        &mut self.paths[idx]
    }
}
