//! Emission of sealed path records to an output sink.
//!
//! This module walks the planner's record queue in order and drives a
//! [`Sink`] with retractions, tool switches, type comments, fan commands and
//! moves. Three emission modes exist per record:
//! - runs of tiny consecutive extrusions are coalesced into volume-preserving
//!   midpoint moves,
//! - the last spiralizing record of a layer ramps Z continuously along its
//!   arclength (vase mode),
//! - everything else is emitted point by point, with closed perimeter walls
//!   optionally trimmed at the seam.
//!
//! Once a record has been emitted it is never touched again; the emitter
//! consumes the queue.

use crate::config::{ConfigId, ConfigRegistry, PathConfig};
use crate::geometry::{Point, Point3, Polygon};
use crate::plan::{PathPoint, PathRecord};
use crate::{unscale, Coord, CoordF, Result};

/// The output surface the emitter writes to.
///
/// Implementations map these calls onto a machine dialect; the emitter makes
/// no assumption about it. Errors are forwarded to the caller unchanged.
pub trait Sink {
    /// Switch to another extruder.
    fn switch_extruder(&mut self, extruder: usize) -> Result<()>;

    /// Retract the filament before an upcoming move.
    ///
    /// `estimated_move_time_s` is the kinematic estimate of the move about to
    /// happen; `forced` retractions must not be skipped.
    fn write_retraction(&mut self, estimated_move_time_s: CoordF, forced: bool) -> Result<()>;

    /// Write a comment line.
    fn write_comment(&mut self, comment: &str) -> Result<()>;

    /// Set the part cooling fan, 0..=100 percent.
    fn write_fan(&mut self, percent: i32) -> Result<()>;

    /// Move to `point` at `speed_mm_s`, extruding a line of `line_width_um`
    /// (0 means travel).
    fn write_move(&mut self, point: Point3, speed_mm_s: CoordF, line_width_um: Coord)
        -> Result<()>;

    /// The layer is complete; fold its time into the running totals.
    fn update_layer_print_time(&mut self) -> Result<()>;
}

/// Walks a sealed record queue and drives a [`Sink`].
pub struct Emitter<'a> {
    configs: &'a ConfigRegistry,
    travel_config: ConfigId,
    perimeter_overlap_ratio: CoordF,
    layer_thickness: Coord,
}

impl<'a> Emitter<'a> {
    /// Create an emitter for one layer.
    pub fn new(
        configs: &'a ConfigRegistry,
        travel_config: ConfigId,
        perimeter_overlap_ratio: CoordF,
        layer_thickness: Coord,
    ) -> Self {
        Self {
            configs,
            travel_config,
            perimeter_overlap_ratio,
            layer_thickness,
        }
    }

    /// Emit the whole queue, starting with the head at `start_position` and
    /// `start_extruder` active.
    pub fn emit<S: Sink>(
        &self,
        records: Vec<PathRecord>,
        start_position: Point,
        start_extruder: usize,
        sink: &mut S,
    ) -> Result<()> {
        let mut pos = start_position;
        let mut extruder = start_extruder;
        let mut last_emitted_config: Option<ConfigId> = None;

        let mut n = 0;
        while n < records.len() {
            let record = &records[n];
            let config = self.configs.get(record.config());

            // A tool switch supersedes the retraction for this step.
            if record.extruder() != extruder {
                extruder = record.extruder();
                sink.switch_extruder(extruder)?;
            } else if record.retract().is_some() {
                let estimated = if config.is_travel() {
                    let approach = match record.first_xy() {
                        Some(first) => pos.distance(&first),
                        None => 0,
                    };
                    unscale(approach.saturating_add(record.length_um())) / record.speed_mm_s()
                } else {
                    0.0
                };
                sink.write_retraction(estimated, record.retract().is_forced())?;
            }

            if record.config() != self.travel_config
                && last_emitted_config != Some(record.config())
            {
                sink.write_comment(&format!("TYPE:{}", config.comment_tag))?;
                last_emitted_config = Some(record.config());
            }

            if record.fan_percent() != -1 {
                sink.write_fan(record.fan_percent())?;
            }

            // Mode (a): coalesce a run of tiny consecutive extrusions.
            if !config.is_travel() && record.is_single_hop_near(pos, config.line_width_um * 2) {
                let run_end = self.scan_small_move_run(&records, n);
                if run_end > n + 2 {
                    pos = self.emit_coalesced_run(&records, n, run_end, pos, sink)?;
                    n = run_end;
                    continue;
                }
            }

            // Mode (b): spiral Z ramp, only for the last spiralizing record.
            if config.spiralize {
                let later_spiral = records[n + 1..]
                    .iter()
                    .any(|r| self.configs.get(r.config()).spiralize);
                if !later_spiral && self.emit_spiral(record, config, pos, sink)? {
                    pos = record.last_xy().unwrap_or(pos);
                    n += 1;
                    continue;
                }
            }

            // Mode (c): normal emission, with perimeter overlap trim on
            // closed walls.
            let loop_start = pos;
            let trim_dist =
                (config.line_width_um as CoordF * (1.0 - self.perimeter_overlap_ratio)) as Coord;
            let trim = config.is_perimeter_wall()
                && trim_dist > 0
                && record.last_xy() == Some(loop_start);

            if trim {
                let seam_z = record.points().first().map_or(0, |p| p.position.z);
                for point in trim_tail(record.points(), trim_dist) {
                    sink.write_move(
                        point.position,
                        record.speed_mm_s(),
                        effective_width(&point, config),
                    )?;
                    pos = point.xy();
                }
                self.close_trimmed_loop(loop_start.with_z(seam_z), record.speed_mm_s(), sink)?;
                pos = loop_start;
            } else {
                for point in record.points() {
                    sink.write_move(
                        point.position,
                        record.speed_mm_s(),
                        effective_width(point, config),
                    )?;
                    pos = point.xy();
                }
            }

            n += 1;
        }

        sink.update_layer_print_time()
    }

    /// Find the end (exclusive) of a run of single-point records, each within
    /// twice its own line width of the previous point. A trailing travel is
    /// excluded from the run.
    fn scan_small_move_run(&self, records: &[PathRecord], n: usize) -> usize {
        let mut i = n + 1;
        while i < records.len() {
            let prev_point = records[i - 1].points()[0].xy();
            let config = self.configs.get(records[i].config());
            if !records[i].is_single_hop_near(prev_point, config.line_width_um * 2) {
                break;
            }
            i += 1;
        }
        if i > n + 1 && records[i - 1].config() == self.travel_config {
            i -= 1;
        }
        i
    }

    /// Replace the run `records[n..run_end]` with midpoint moves, scaling the
    /// line width so each pair deposits the same volume over the new length.
    /// The final run point is emitted as-is, so the head lands exactly where
    /// the uncoalesced run would have left it.
    fn emit_coalesced_run<S: Sink>(
        &self,
        records: &[PathRecord],
        n: usize,
        run_end: usize,
        start: Point,
        sink: &mut S,
    ) -> Result<Point> {
        let head = &records[n];
        let width = self.configs.get(head.config()).line_width_um;
        let speed = head.speed_mm_s();

        let mut pos = start;
        let mut p0 = start;
        let mut x = n;
        while x < run_end - 1 {
            let a = records[x].points()[0];
            let b = records[x + 1].points()[0];

            let old_len = p0.distance(&a.xy());
            let mid = Point::new((a.xy().x + b.xy().x) / 2, (a.xy().y + b.xy().y) / 2);
            let new_len = pos.distance(&mid);
            if new_len > 0 {
                sink.write_move(
                    mid.with_z(a.position.z),
                    speed,
                    width * old_len / new_len,
                )?;
                pos = mid;
            }
            p0 = b.xy();
            x += 2;
        }

        let last = &records[run_end - 1];
        let last_config = self.configs.get(last.config());
        let last_point = last.points()[0];
        sink.write_move(
            last_point.position,
            last.speed_mm_s(),
            effective_width(&last_point, last_config),
        )?;
        Ok(last_point.xy())
    }

    /// Emit a record with Z ramped along its arclength from the stored layer
    /// height to one layer thickness above it. Returns false for degenerate
    /// zero-length records, which fall back to normal emission.
    fn emit_spiral<S: Sink>(
        &self,
        record: &PathRecord,
        config: &PathConfig,
        start: Point,
        sink: &mut S,
    ) -> Result<bool> {
        let mut total: Coord = 0;
        let mut p = start;
        for point in record.points() {
            total = total.saturating_add(p.distance(&point.xy()));
            p = point.xy();
        }
        if total == 0 {
            return Ok(false);
        }

        let mut walked: Coord = 0;
        let mut p = start;
        for point in record.points() {
            walked = walked.saturating_add(p.distance(&point.xy()));
            p = point.xy();

            let z = point.position.z + (self.layer_thickness * walked + total / 2) / total;
            sink.write_move(
                Point3::new(point.position.x, point.position.y, z),
                record.speed_mm_s(),
                effective_width(point, config),
            )?;
        }
        Ok(true)
    }

    /// Return the head to the seam after a trimmed perimeter.
    ///
    /// A retract-while-moving wipe would slot in here; for now the head just
    /// glides back without extruding.
    fn close_trimmed_loop<S: Sink>(&self, seam: Point3, speed: CoordF, sink: &mut S) -> Result<()> {
        sink.write_move(seam, speed, 0)
    }
}

/// Pick the width a point is extruded with: its own override, or the config's.
#[inline]
fn effective_width(point: &PathPoint, config: &PathConfig) -> Coord {
    if point.width_um != 0 {
        point.width_um
    } else {
        config.line_width_um
    }
}

/// Shorten a record's point chain by `distance` from the tail, interpolating
/// the final point along the last surviving segment. The widths and layer
/// heights ride along by index.
fn trim_tail(points: &[PathPoint], distance: Coord) -> Vec<PathPoint> {
    let polygon: Polygon = points.iter().map(PathPoint::xy).collect();
    let trimmed = polygon.trimmed(distance);

    trimmed
        .points()
        .iter()
        .enumerate()
        .map(|(i, p)| PathPoint::new(p.with_z(points[i].position.z), points[i].width_um))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PathConfig, PlannerSettings, TAG_WALL_INNER};
    use crate::geometry::Point3;
    use crate::plan::{LayerPlanner, PathRecord};
    use crate::ConfigRegistry;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Extruder(usize),
        Retract { forced: bool },
        Comment(String),
        Fan(i32),
        Move {
            point: Point3,
            width: Coord,
        },
        LayerTime,
    }

    /// Records sink calls for inspection; retraction estimates are captured
    /// separately so events stay comparable.
    #[derive(Default)]
    struct TestSink {
        events: Vec<Event>,
        retract_estimates: Vec<CoordF>,
    }

    impl Sink for TestSink {
        fn switch_extruder(&mut self, extruder: usize) -> Result<()> {
            self.events.push(Event::Extruder(extruder));
            Ok(())
        }

        fn write_retraction(&mut self, estimated_move_time_s: CoordF, forced: bool) -> Result<()> {
            self.retract_estimates.push(estimated_move_time_s);
            self.events.push(Event::Retract { forced });
            Ok(())
        }

        fn write_comment(&mut self, comment: &str) -> Result<()> {
            self.events.push(Event::Comment(comment.to_string()));
            Ok(())
        }

        fn write_fan(&mut self, percent: i32) -> Result<()> {
            self.events.push(Event::Fan(percent));
            Ok(())
        }

        fn write_move(
            &mut self,
            point: Point3,
            _speed_mm_s: CoordF,
            line_width_um: Coord,
        ) -> Result<()> {
            self.events.push(Event::Move {
                point,
                width: line_width_um,
            });
            Ok(())
        }

        fn update_layer_print_time(&mut self) -> Result<()> {
            self.events.push(Event::LayerTime);
            Ok(())
        }
    }

    fn registry_with_travel() -> (ConfigRegistry, ConfigId) {
        let mut configs = ConfigRegistry::new();
        let travel = configs.register(PathConfig::travel(150.0)).unwrap();
        (configs, travel)
    }

    fn mv(x: Coord, y: Coord, z: Coord, width: Coord) -> Event {
        Event::Move {
            point: Point3::new(x, y, z),
            width,
        }
    }

    #[test]
    fn test_rectangle_emission_sequence() {
        let (mut configs, travel) = registry_with_travel();
        let wall = configs
            .register(PathConfig::new(30.0, 400, TAG_WALL_INNER).with_closed_loop(true))
            .unwrap();
        // Large threshold: the short approach travel must not retract.
        let settings = PlannerSettings::default().with_retract_min(50_000);

        let mut planner = LayerPlanner::new(&configs, travel, &settings, 1, 200)
            .unwrap()
            .with_start_position(Point::new(-5_000, 0));
        let square = Polygon::from_points(vec![
            Point::new(0, 0),
            Point::new(10_000, 0),
            Point::new(10_000, 10_000),
            Point::new(0, 10_000),
        ]);
        planner.queue_polygon(&square, 0, wall).unwrap();

        let mut sink = TestSink::default();
        planner.emit(&mut sink, 200).unwrap();

        assert_eq!(
            sink.events,
            vec![
                mv(0, 0, 200, 0),
                Event::Comment("TYPE:WALL-INNER".into()),
                mv(10_000, 0, 200, 400),
                mv(10_000, 10_000, 200, 400),
                mv(0, 10_000, 200, 400),
                mv(0, 0, 200, 400),
                Event::LayerTime,
            ]
        );
    }

    #[test]
    fn test_empty_plan_emits_nothing() {
        let (configs, travel) = registry_with_travel();
        let settings = PlannerSettings::default();
        let planner = LayerPlanner::new(&configs, travel, &settings, 0, 200).unwrap();

        let mut sink = TestSink::default();
        planner.emit(&mut sink, 200).unwrap();
        assert!(sink.events.is_empty());
    }

    #[test]
    fn test_retraction_with_estimated_move_time() {
        let (configs, travel) = registry_with_travel();
        let settings = PlannerSettings::default().with_retract_min(2_000);

        let mut planner = LayerPlanner::new(&configs, travel, &settings, 0, 200).unwrap();
        planner.queue_travel(Point::new(15_000, 0));

        let mut sink = TestSink::default();
        planner.emit(&mut sink, 200).unwrap();

        assert_eq!(
            sink.events,
            vec![
                Event::Retract { forced: false },
                mv(15_000, 0, 200, 0),
                Event::LayerTime,
            ]
        );
        // 15mm at 150 mm/s.
        assert!((sink.retract_estimates[0] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_tool_switch_supersedes_retraction() {
        let (mut configs, travel) = registry_with_travel();
        let fill = configs.register(PathConfig::new(60.0, 400, "FILL")).unwrap();
        let settings = PlannerSettings::default().with_retract_min(1_000);

        let mut planner = LayerPlanner::new(&configs, travel, &settings, 0, 200).unwrap();
        planner.set_extruder(1);
        planner.force_retract();
        planner.queue_travel(Point::new(20_000, 0));
        planner.queue_extrusion(Point::new(21_000, 0), fill).unwrap();

        let mut sink = TestSink::default();
        planner.emit(&mut sink, 200).unwrap();

        // The forced retraction on the travel is superseded by the switch.
        assert_eq!(sink.events[0], Event::Extruder(1));
        assert!(!sink.events.contains(&Event::Retract { forced: true }));
    }

    #[test]
    fn test_fan_record_produces_no_motion() {
        let (configs, travel) = registry_with_travel();
        let settings = PlannerSettings::default();

        let mut planner = LayerPlanner::new(&configs, travel, &settings, 0, 200).unwrap();
        planner.queue_fan(85, travel);

        let mut sink = TestSink::default();
        planner.emit(&mut sink, 200).unwrap();
        assert_eq!(sink.events, vec![Event::Fan(85), Event::LayerTime]);
    }

    #[test]
    fn test_small_move_coalescing_preserves_endpoint_and_volume() {
        let (mut configs, travel) = registry_with_travel();
        // Alternating configs force three separate single-point records.
        let a = configs.register(PathConfig::new(60.0, 400, "FILL")).unwrap();
        let b = configs.register(PathConfig::new(60.0, 400, "FILL")).unwrap();
        let settings = PlannerSettings::default();

        let mut planner = LayerPlanner::new(&configs, travel, &settings, 0, 200).unwrap();
        planner.queue_extrusion(Point::new(500, 0), a).unwrap();
        planner.queue_extrusion(Point::new(1_000, 0), b).unwrap();
        planner.queue_extrusion(Point::new(1_500, 0), a).unwrap();
        assert_eq!(planner.records().len(), 3);

        let mut sink = TestSink::default();
        planner.emit(&mut sink, 200).unwrap();

        // Pair (500,0)+(1000,0) merges to (750,0), width 400×500/750.
        assert_eq!(
            sink.events,
            vec![
                Event::Comment("TYPE:FILL".into()),
                mv(750, 0, 200, 266),
                mv(1_500, 0, 200, 400),
                Event::LayerTime,
            ]
        );
    }

    #[test]
    fn test_short_run_is_not_coalesced() {
        let (mut configs, travel) = registry_with_travel();
        let a = configs.register(PathConfig::new(60.0, 400, "FILL")).unwrap();
        let b = configs.register(PathConfig::new(60.0, 400, "FILL")).unwrap();
        let settings = PlannerSettings::default();

        let mut planner = LayerPlanner::new(&configs, travel, &settings, 0, 200).unwrap();
        planner.queue_extrusion(Point::new(500, 0), a).unwrap();
        planner.queue_extrusion(Point::new(1_000, 0), b).unwrap();

        let mut sink = TestSink::default();
        planner.emit(&mut sink, 200).unwrap();

        // Two records is below the coalescing threshold; both emit normally.
        let moves: Vec<&Event> = sink
            .events
            .iter()
            .filter(|e| matches!(e, Event::Move { .. }))
            .collect();
        assert_eq!(moves, vec![&mv(500, 0, 200, 400), &mv(1_000, 0, 200, 400)]);
    }

    #[test]
    fn test_spiral_ramp_z_values() {
        let (mut configs, travel) = registry_with_travel();
        let vase = configs
            .register(
                PathConfig::new(30.0, 400, TAG_WALL_INNER)
                    .with_closed_loop(true)
                    .with_spiralize(true),
            )
            .unwrap();

        // Three equally spaced points, 30mm of path, base Z 200.
        let mut record = PathRecord::new(vase, 0, 30.0);
        record.push_point(PathPoint::new(Point3::new(10_000, 0, 200), 0));
        record.push_point(PathPoint::new(Point3::new(20_000, 0, 200), 0));
        record.push_point(PathPoint::new(Point3::new(30_000, 0, 200), 0));

        let emitter = Emitter::new(&configs, travel, 1.0, 200);
        let mut sink = TestSink::default();
        emitter
            .emit(vec![record], Point::zero(), 0, &mut sink)
            .unwrap();

        let zs: Vec<Coord> = sink
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Move { point, .. } => Some(point.z),
                _ => None,
            })
            .collect();
        assert_eq!(zs, vec![267, 333, 400]);

        // Monotone ramp ending exactly one layer thickness up.
        assert!(zs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_only_last_spiral_record_ramps() {
        let (mut configs, travel) = registry_with_travel();
        let vase = configs
            .register(PathConfig::new(30.0, 400, "WALL-OUTER").with_spiralize(true))
            .unwrap();

        let mut first = PathRecord::new(vase, 0, 30.0);
        first.push_point(PathPoint::new(Point3::new(10_000, 0, 200), 0));
        let mut second = PathRecord::new(vase, 0, 30.0);
        second.push_point(PathPoint::new(Point3::new(20_000, 0, 200), 0));

        let emitter = Emitter::new(&configs, travel, 1.0, 200);
        let mut sink = TestSink::default();
        emitter
            .emit(vec![first, second], Point::zero(), 0, &mut sink)
            .unwrap();

        let zs: Vec<Coord> = sink
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Move { point, .. } => Some(point.z),
                _ => None,
            })
            .collect();
        // The earlier record stays flat; only the last one ramps.
        assert_eq!(zs, vec![200, 400]);
    }

    #[test]
    fn test_perimeter_overlap_trim_and_seam_return() {
        let (mut configs, travel) = registry_with_travel();
        let wall = configs
            .register(PathConfig::new(30.0, 400, TAG_WALL_INNER).with_closed_loop(true))
            .unwrap();

        // Closed square loop starting and ending at the origin.
        let mut record = PathRecord::new(wall, 0, 30.0);
        for (x, y) in [(10_000, 0), (10_000, 10_000), (0, 10_000), (0, 0)] {
            record.push_point(PathPoint::new(Point3::new(x, y, 200), 0));
        }

        // Overlap ratio 0.5 trims 200 microns off the tail.
        let emitter = Emitter::new(&configs, travel, 0.5, 200);
        let mut sink = TestSink::default();
        emitter
            .emit(vec![record], Point::zero(), 0, &mut sink)
            .unwrap();

        assert_eq!(
            sink.events,
            vec![
                Event::Comment("TYPE:WALL-INNER".into()),
                mv(10_000, 0, 200, 400),
                mv(10_000, 10_000, 200, 400),
                mv(0, 10_000, 200, 400),
                mv(0, 200, 200, 400),
                // Zero-width glide back onto the seam.
                mv(0, 0, 200, 0),
                Event::LayerTime,
            ]
        );
    }

    #[test]
    fn test_open_wall_is_not_trimmed() {
        let (mut configs, travel) = registry_with_travel();
        let wall = configs
            .register(PathConfig::new(30.0, 400, TAG_WALL_INNER).with_closed_loop(true))
            .unwrap();

        // The record does not end at its start, so no trim applies.
        let mut record = PathRecord::new(wall, 0, 30.0);
        record.push_point(PathPoint::new(Point3::new(10_000, 0, 200), 0));
        record.push_point(PathPoint::new(Point3::new(10_000, 10_000, 200), 0));

        let emitter = Emitter::new(&configs, travel, 0.5, 200);
        let mut sink = TestSink::default();
        emitter
            .emit(vec![record], Point::zero(), 0, &mut sink)
            .unwrap();

        let widths: Vec<Coord> = sink
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Move { width, .. } => Some(*width),
                _ => None,
            })
            .collect();
        assert_eq!(widths, vec![400, 400]);
    }
}
