//! G-code serialization sink.
//!
//! This module provides [`GCodeWriter`], the default [`Sink`] implementation:
//! it maps the emitter's calls onto RepRap-flavor G-code written to any
//! [`std::io::Write`]. Extrusion amounts are computed from the
//! rounded-rectangle cross-section of the deposited line, retraction is a
//! firmware-visible negative E move, and print time is tracked kinematically
//! (length ÷ speed) per layer and in total.

use std::f64::consts::PI;
use std::io::Write;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::emit::Sink;
use crate::geometry::Point3;
use crate::{unscale, Coord, CoordF, Result};

/// Machine-side parameters of the G-code writer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GCodeWriterConfig {
    /// Layer height (mm), the height of every deposited line.
    pub layer_height_mm: CoordF,

    /// Filament diameter (mm) feeding the extruder.
    pub filament_diameter_mm: CoordF,

    /// Retraction length (mm of filament).
    pub retract_length_mm: CoordF,

    /// Retraction feed rate (mm/s).
    pub retract_speed_mm_s: CoordF,
}

impl Default for GCodeWriterConfig {
    fn default() -> Self {
        Self {
            layer_height_mm: 0.2,
            filament_diameter_mm: 1.75,
            retract_length_mm: 1.0,
            retract_speed_mm_s: 40.0,
        }
    }
}

/// Serializes planner output as G-code.
pub struct GCodeWriter<W: Write> {
    out: W,
    config: GCodeWriterConfig,
    position: Option<Point3>,
    /// Absolute E axis position (mm of filament).
    e_position: CoordF,
    retracted: bool,
    layer_time_s: CoordF,
    last_layer_time_s: CoordF,
    total_time_s: CoordF,
}

impl<W: Write> GCodeWriter<W> {
    /// Create a writer over `out`.
    pub fn new(out: W, config: GCodeWriterConfig) -> Self {
        Self {
            out,
            config,
            position: None,
            e_position: 0.0,
            retracted: false,
            layer_time_s: 0.0,
            last_layer_time_s: 0.0,
            total_time_s: 0.0,
        }
    }

    /// Consume the writer and return the underlying output.
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Kinematic time of the last completed layer (s).
    pub fn layer_time_s(&self) -> CoordF {
        self.last_layer_time_s
    }

    /// Kinematic time of everything written so far (s).
    pub fn total_time_s(&self) -> CoordF {
        self.total_time_s + self.layer_time_s
    }

    /// Cross-section of a deposited line (mm²): a rectangle with
    /// semicircular ends, `h × (w − h × (1 − π/4))`.
    fn cross_section_area(&self, width_mm: CoordF) -> CoordF {
        let h = self.config.layer_height_mm;
        h * (width_mm - h * (1.0 - 0.25 * PI))
    }

    /// Cross-section of the filament (mm²).
    fn filament_area(&self) -> CoordF {
        let r = self.config.filament_diameter_mm / 2.0;
        PI * r * r
    }

    /// Move the E axis to `target` at the retraction feed rate.
    fn write_e_move(&mut self, target: CoordF) -> Result<()> {
        let feed = self.config.retract_speed_mm_s * 60.0;
        writeln!(self.out, "G1 F{:.0} E{:.5}", feed, target)?;
        if self.config.retract_speed_mm_s > 0.0 {
            self.layer_time_s +=
                (target - self.e_position).abs() / self.config.retract_speed_mm_s;
        }
        self.e_position = target;
        Ok(())
    }

    /// Push the retracted filament back before extruding again.
    fn prime_if_retracted(&mut self) -> Result<()> {
        if self.retracted {
            self.write_e_move(self.e_position + self.config.retract_length_mm)?;
            self.retracted = false;
        }
        Ok(())
    }
}

impl<W: Write> Sink for GCodeWriter<W> {
    fn switch_extruder(&mut self, extruder: usize) -> Result<()> {
        // Park the filament before handing over to another extruder.
        if !self.retracted {
            self.write_e_move(self.e_position - self.config.retract_length_mm)?;
            self.retracted = true;
        }
        writeln!(self.out, "T{}", extruder)?;
        Ok(())
    }

    fn write_retraction(&mut self, estimated_move_time_s: CoordF, forced: bool) -> Result<()> {
        if self.retracted && !forced {
            return Ok(());
        }
        trace!("retraction before an estimated {estimated_move_time_s:.2}s move");
        self.write_e_move(self.e_position - self.config.retract_length_mm)?;
        self.retracted = true;
        Ok(())
    }

    fn write_comment(&mut self, comment: &str) -> Result<()> {
        writeln!(self.out, ";{}", comment)?;
        Ok(())
    }

    fn write_fan(&mut self, percent: i32) -> Result<()> {
        if percent <= 0 {
            writeln!(self.out, "M107")?;
        } else {
            writeln!(self.out, "M106 S{}", percent.clamp(0, 100) * 255 / 100)?;
        }
        Ok(())
    }

    fn write_move(
        &mut self,
        point: Point3,
        speed_mm_s: CoordF,
        line_width_um: Coord,
    ) -> Result<()> {
        let length_mm = match self.position {
            Some(p) => unscale(p.xy().distance(&point.xy())),
            None => 0.0,
        };

        let mut cmd = if line_width_um == 0 {
            String::from("G0")
        } else {
            self.prime_if_retracted()?;
            String::from("G1")
        };

        cmd.push_str(&format!(" X{:.3}", unscale(point.x)));
        cmd.push_str(&format!(" Y{:.3}", unscale(point.y)));
        if self.position.map_or(true, |p| p.z != point.z) {
            cmd.push_str(&format!(" Z{:.3}", unscale(point.z)));
        }

        if line_width_um != 0 {
            let volume = length_mm * self.cross_section_area(unscale(line_width_um));
            self.e_position += volume / self.filament_area();
            cmd.push_str(&format!(" E{:.5}", self.e_position));
        }

        cmd.push_str(&format!(" F{:.0}", speed_mm_s * 60.0));
        writeln!(self.out, "{}", cmd)?;

        if speed_mm_s > 0.0 {
            self.layer_time_s += length_mm / speed_mm_s;
        }
        self.position = Some(point);
        Ok(())
    }

    fn update_layer_print_time(&mut self) -> Result<()> {
        self.total_time_s += self.layer_time_s;
        self.last_layer_time_s = self.layer_time_s;
        self.layer_time_s = 0.0;
        writeln!(self.out, ";TIME_ELAPSED:{:.2}", self.total_time_s)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_writer() -> GCodeWriter<Vec<u8>> {
        GCodeWriter::new(Vec::new(), GCodeWriterConfig::default())
    }

    fn lines(writer: GCodeWriter<Vec<u8>>) -> Vec<String> {
        String::from_utf8(writer.into_inner())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// E value of one 10mm line at width 0.4 / height 0.2 / 1.75 filament.
    fn e_for_10mm() -> CoordF {
        let area = 0.2 * (0.4 - 0.2 * (1.0 - 0.25 * PI));
        10.0 * area / (PI * 0.875 * 0.875)
    }

    #[test]
    fn test_travel_and_extrusion_moves() {
        let mut writer = make_writer();
        writer
            .write_move(Point3::new(10_000, 0, 200), 150.0, 0)
            .unwrap();
        writer
            .write_move(Point3::new(20_000, 0, 200), 30.0, 400)
            .unwrap();

        let out = lines(writer);
        // First move carries Z; the second stays on the layer and drops it.
        assert_eq!(out[0], "G0 X10.000 Y0.000 Z0.200 F9000");
        assert_eq!(out[1], format!("G1 X20.000 Y0.000 E{:.5} F1800", e_for_10mm()));
    }

    #[test]
    fn test_extrusion_accumulates_e() {
        let mut writer = make_writer();
        writer.write_move(Point3::new(0, 0, 200), 150.0, 0).unwrap();
        writer
            .write_move(Point3::new(10_000, 0, 200), 30.0, 400)
            .unwrap();
        writer
            .write_move(Point3::new(20_000, 0, 200), 30.0, 400)
            .unwrap();

        let out = lines(writer);
        assert!(out[1].contains(&format!("E{:.5}", e_for_10mm())));
        assert!(out[2].contains(&format!("E{:.5}", 2.0 * e_for_10mm())));
    }

    #[test]
    fn test_retraction_and_prime() {
        let mut writer = make_writer();
        writer.write_move(Point3::new(0, 0, 200), 150.0, 0).unwrap();
        writer.write_retraction(0.1, false).unwrap();
        // Already retracted: a second request is a no-op unless forced.
        writer.write_retraction(0.1, false).unwrap();
        writer
            .write_move(Point3::new(10_000, 0, 200), 30.0, 400)
            .unwrap();

        let out = lines(writer);
        assert_eq!(out[1], "G1 F2400 E-1.00000");
        // Prime back to zero before the extrusion.
        assert_eq!(out[2], "G1 F2400 E0.00000");
        assert!(out[3].starts_with("G1 X10.000"));
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_forced_retraction_always_writes() {
        let mut writer = make_writer();
        writer.write_retraction(0.0, false).unwrap();
        writer.write_retraction(0.0, true).unwrap();

        let out = lines(writer);
        assert_eq!(out, vec!["G1 F2400 E-1.00000", "G1 F2400 E-2.00000"]);
    }

    #[test]
    fn test_extruder_switch_parks_filament() {
        let mut writer = make_writer();
        writer.switch_extruder(1).unwrap();

        let out = lines(writer);
        assert_eq!(out, vec!["G1 F2400 E-1.00000", "T1"]);
    }

    #[test]
    fn test_fan_commands() {
        let mut writer = make_writer();
        writer.write_fan(100).unwrap();
        writer.write_fan(60).unwrap();
        writer.write_fan(0).unwrap();

        let out = lines(writer);
        assert_eq!(out, vec!["M106 S255", "M106 S153", "M107"]);
    }

    #[test]
    fn test_comment() {
        let mut writer = make_writer();
        writer.write_comment("TYPE:WALL-OUTER").unwrap();
        assert_eq!(lines(writer), vec![";TYPE:WALL-OUTER"]);
    }

    #[test]
    fn test_planner_to_gcode_round_trip() {
        use crate::config::{PathConfig, PlannerSettings, TAG_WALL_OUTER};
        use crate::geometry::{Point, Polygon};
        use crate::plan::LayerPlanner;
        use crate::ConfigRegistry;

        let mut configs = ConfigRegistry::new();
        let settings = PlannerSettings::default();
        let travel = configs
            .register(PathConfig::travel(settings.travel_speed))
            .unwrap();
        let wall = configs
            .register(PathConfig::new(30.0, 400, TAG_WALL_OUTER).with_closed_loop(true))
            .unwrap();

        let mut planner = LayerPlanner::new(&configs, travel, &settings, 1, 200)
            .unwrap()
            .with_start_position(Point::new(-20_000, 0));
        let square = Polygon::from_points(vec![
            Point::new(0, 0),
            Point::new(10_000, 0),
            Point::new(10_000, 10_000),
            Point::new(0, 10_000),
        ]);
        planner.queue_polygon(&square, 0, wall).unwrap();
        planner.finalize_layer(&settings);

        let mut writer = make_writer();
        planner.emit(&mut writer, 200).unwrap();

        let text = String::from_utf8(writer.into_inner()).unwrap();
        // The long approach travel retracts, the wall is typed and extruded,
        // and the layer closes with a time stamp.
        assert!(text.contains("E-1.00000"));
        assert!(text.contains(";TYPE:WALL-OUTER"));
        assert!(text.contains("G0 X0.000 Y0.000"));
        assert!(text.lines().filter(|l| l.starts_with("G1 X")).count() >= 4);
        assert!(text.trim_end().lines().last().unwrap().starts_with(";TIME_ELAPSED:"));
    }

    #[test]
    fn test_layer_time_tracking() {
        let mut writer = make_writer();
        writer.write_move(Point3::new(0, 0, 200), 150.0, 0).unwrap();
        // 15mm travel at 150 mm/s, then 10mm extrusion at 30 mm/s.
        writer
            .write_move(Point3::new(15_000, 0, 200), 150.0, 0)
            .unwrap();
        writer
            .write_move(Point3::new(25_000, 0, 200), 30.0, 400)
            .unwrap();
        writer.update_layer_print_time().unwrap();

        assert!((writer.layer_time_s() - (0.1 + 1.0 / 3.0)).abs() < 1e-9);
        assert!((writer.total_time_s() - writer.layer_time_s()).abs() < 1e-9);

        let out = lines(writer);
        assert_eq!(out.last().unwrap(), ";TIME_ELAPSED:0.43");
    }
}
