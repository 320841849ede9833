//! Path configuration types.
//!
//! This module provides the per-role extrusion profiles ([`PathConfig`]), the
//! per-layer registry that gives them identity ([`ConfigRegistry`]), and the
//! machine/material settings view the planner consumes ([`PlannerSettings`]).
//!
//! Configs are compared by identity, never structurally: the planner folds
//! consecutive moves into one record only when they were queued under the
//! same [`ConfigId`]. Two configs with identical fields but different roles
//! must not fold, so the registry hands out indices and equality lives there.

use crate::{Coord, CoordF, Error, Result};
use serde::{Deserialize, Serialize};

/// Comment tag of the travel config the planner builds for itself.
pub const TAG_TRAVEL: &str = "travel";

/// Comment tag excluding a path from minimum-layer-time slowdown.
pub const TAG_BRIDGE: &str = "BRIDGE";

/// Comment tag of outer perimeter walls, eligible for overlap trimming.
pub const TAG_WALL_OUTER: &str = "WALL-OUTER";

/// Comment tag of inner perimeter walls, eligible for overlap trimming.
pub const TAG_WALL_INNER: &str = "WALL-INNER";

/// A named bundle of parameters governing one kind of path.
///
/// Immutable once registered; the planner reads it but never writes it.
/// A `line_width_um` of zero marks a travel config (no material deposited).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PathConfig {
    /// Target speed (mm/s).
    pub speed_mm_s: CoordF,

    /// Extrusion width (micrometres); 0 means travel.
    pub line_width_um: Coord,

    /// Free-text tag written as a `TYPE:` comment. A few reserved values
    /// carry semantics: [`TAG_TRAVEL`], [`TAG_BRIDGE`], [`TAG_WALL_OUTER`],
    /// [`TAG_WALL_INNER`].
    pub comment_tag: String,

    /// Whether polygons queued under this config are walked as closed loops.
    pub closed_loop: bool,

    /// Whether this config takes part in spiral (vase mode) Z ramping.
    pub spiralize: bool,
}

impl PathConfig {
    /// Create a new extrusion config.
    pub fn new(speed_mm_s: CoordF, line_width_um: Coord, comment_tag: impl Into<String>) -> Self {
        Self {
            speed_mm_s,
            line_width_um,
            comment_tag: comment_tag.into(),
            closed_loop: false,
            spiralize: false,
        }
    }

    /// Create the travel config used by the planner itself.
    pub fn travel(speed_mm_s: CoordF) -> Self {
        Self::new(speed_mm_s, 0, TAG_TRAVEL)
    }

    /// Builder method: walk polygons as closed loops.
    pub fn with_closed_loop(mut self, closed_loop: bool) -> Self {
        self.closed_loop = closed_loop;
        self
    }

    /// Builder method: enable spiral Z ramping.
    pub fn with_spiralize(mut self, spiralize: bool) -> Self {
        self.spiralize = spiralize;
        self
    }

    /// Whether this config describes non-depositing motion.
    #[inline]
    pub fn is_travel(&self) -> bool {
        self.line_width_um == 0
    }

    /// Whether this config is exempt from minimum-layer-time slowdown.
    #[inline]
    pub fn is_bridge(&self) -> bool {
        self.comment_tag == TAG_BRIDGE
    }

    /// Whether this config is a perimeter wall eligible for overlap trimming.
    #[inline]
    pub fn is_perimeter_wall(&self) -> bool {
        self.comment_tag == TAG_WALL_OUTER || self.comment_tag == TAG_WALL_INNER
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.speed_mm_s.is_finite() || self.speed_mm_s <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "config '{}': speed must be finite and positive, got {}",
                self.comment_tag, self.speed_mm_s
            )));
        }
        if self.line_width_um < 0 {
            return Err(Error::InvalidInput(format!(
                "config '{}': line width must be non-negative, got {}",
                self.comment_tag, self.line_width_um
            )));
        }
        Ok(())
    }
}

/// Identity handle for a registered [`PathConfig`].
///
/// Records fold only when queued under the same id; the id is the equality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigId(usize);

/// Per-layer table of path configurations.
///
/// Read-only once planning starts; the planner and emitter borrow it.
#[derive(Debug, Default)]
pub struct ConfigRegistry {
    configs: Vec<PathConfig>,
}

impl ConfigRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a config, returning its identity handle.
    pub fn register(&mut self, config: PathConfig) -> Result<ConfigId> {
        config.validate()?;
        let id = ConfigId(self.configs.len());
        self.configs.push(config);
        Ok(id)
    }

    /// Look up a registered config.
    #[inline]
    pub fn get(&self, id: ConfigId) -> &PathConfig {
        &self.configs[id.0]
    }

    /// Number of registered configs.
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

/// The machine/material settings view consumed by the planner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlannerSettings {
    /// Minimum time one layer must take (s); shorter layers are slowed down.
    pub min_layer_time_s: CoordF,

    /// Floor for slowed-down extrusion speeds (mm/s).
    pub min_print_speed: CoordF,

    /// Layer time (s) below which the fan starts ramping up.
    pub min_fan_speed_layer_time: CoordF,

    /// Layer time (s) at or below which the fan runs at `fan_max_percent`.
    pub max_fan_speed_layer_time: CoordF,

    /// Fan percentage at the slow end of the ramp.
    pub fan_min_percent: i32,

    /// Fan percentage at the fast end of the ramp.
    pub fan_max_percent: i32,

    /// Layers below this index never get a fan floor.
    pub first_layer_allow_fan: usize,

    /// Travel distance (micrometres) above which a retraction is requested.
    pub retract_min_um: Coord,

    /// Perimeter seam overlap ratio in [0, 1]; the emitter trims
    /// `line_width × (1 − ratio)` from the tail of closed walls.
    pub perimeter_overlap_ratio: CoordF,

    /// Travel move speed (mm/s).
    pub travel_speed: CoordF,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            min_layer_time_s: 5.0,
            min_print_speed: 10.0,
            min_fan_speed_layer_time: 60.0,
            max_fan_speed_layer_time: 15.0,
            fan_min_percent: 35,
            fan_max_percent: 100,
            first_layer_allow_fan: 2,
            retract_min_um: 1_500,
            perimeter_overlap_ratio: 1.0,
            travel_speed: 150.0,
        }
    }
}

impl PlannerSettings {
    /// Create settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the minimum layer time.
    pub fn with_min_layer_time(mut self, seconds: CoordF) -> Self {
        self.min_layer_time_s = seconds;
        self
    }

    /// Builder method: set the minimum print speed.
    pub fn with_min_print_speed(mut self, speed: CoordF) -> Self {
        self.min_print_speed = speed;
        self
    }

    /// Builder method: set the retraction distance threshold.
    pub fn with_retract_min(mut self, um: Coord) -> Self {
        self.retract_min_um = um;
        self
    }

    /// Builder method: set the perimeter overlap ratio.
    pub fn with_perimeter_overlap(mut self, ratio: CoordF) -> Self {
        self.perimeter_overlap_ratio = ratio;
        self
    }

    /// Builder method: set the fan ramp bounds.
    pub fn with_fan_range(mut self, min_percent: i32, max_percent: i32) -> Self {
        self.fan_min_percent = min_percent;
        self.fan_max_percent = max_percent;
        self
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("min_layer_time_s", self.min_layer_time_s),
            ("min_print_speed", self.min_print_speed),
            ("min_fan_speed_layer_time", self.min_fan_speed_layer_time),
            ("max_fan_speed_layer_time", self.max_fan_speed_layer_time),
            ("travel_speed", self.travel_speed),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if self.travel_speed <= 0.0 {
            return Err(Error::InvalidInput(
                "travel_speed must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.perimeter_overlap_ratio) {
            return Err(Error::InvalidInput(format!(
                "perimeter_overlap_ratio must be in [0, 1], got {}",
                self.perimeter_overlap_ratio
            )));
        }
        if self.retract_min_um < 0 {
            return Err(Error::InvalidInput(format!(
                "retract_min_um must be non-negative, got {}",
                self.retract_min_um
            )));
        }
        for (name, value) in [
            ("fan_min_percent", self.fan_min_percent),
            ("fan_max_percent", self.fan_max_percent),
        ] {
            if !(0..=100).contains(&value) {
                return Err(Error::InvalidInput(format!(
                    "{name} must be in 0..=100, got {value}"
                )));
            }
        }
        if self.fan_min_percent > self.fan_max_percent {
            return Err(Error::InvalidInput(format!(
                "fan_min_percent ({}) must not exceed fan_max_percent ({})",
                self.fan_min_percent, self.fan_max_percent
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_travel_config() {
        let travel = PathConfig::travel(150.0);
        assert!(travel.is_travel());
        assert_eq!(travel.comment_tag, TAG_TRAVEL);
        assert_eq!(travel.line_width_um, 0);
        assert!(!travel.closed_loop);
    }

    #[test]
    fn test_reserved_tags() {
        assert!(PathConfig::new(40.0, 400, TAG_BRIDGE).is_bridge());
        assert!(PathConfig::new(30.0, 400, TAG_WALL_OUTER).is_perimeter_wall());
        assert!(PathConfig::new(40.0, 400, TAG_WALL_INNER).is_perimeter_wall());
        assert!(!PathConfig::new(60.0, 400, "FILL").is_perimeter_wall());
    }

    #[test]
    fn test_config_validation() {
        assert!(PathConfig::new(60.0, 400, "FILL").validate().is_ok());
        assert!(PathConfig::new(0.0, 400, "FILL").validate().is_err());
        assert!(PathConfig::new(f64::NAN, 400, "FILL").validate().is_err());
        assert!(PathConfig::new(60.0, -1, "FILL").validate().is_err());
    }

    #[test]
    fn test_registry_identity() {
        let mut registry = ConfigRegistry::new();
        let a = registry.register(PathConfig::new(60.0, 400, "FILL")).unwrap();
        let b = registry.register(PathConfig::new(60.0, 400, "FILL")).unwrap();

        // Structurally equal configs keep distinct identities.
        assert_eq!(registry.get(a), registry.get(b));
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registry_rejects_invalid() {
        let mut registry = ConfigRegistry::new();
        assert!(registry.register(PathConfig::new(-5.0, 400, "FILL")).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_settings_validation() {
        assert!(PlannerSettings::default().validate().is_ok());

        let bad_overlap = PlannerSettings::default().with_perimeter_overlap(1.5);
        assert!(bad_overlap.validate().is_err());

        let bad_fan = PlannerSettings::default().with_fan_range(80, 40);
        assert!(bad_fan.validate().is_err());

        let mut bad_speed = PlannerSettings::default();
        bad_speed.min_print_speed = f64::INFINITY;
        assert!(bad_speed.validate().is_err());
    }

    #[test]
    fn test_settings_json_round_trip() {
        let settings = PlannerSettings::default()
            .with_min_layer_time(12.0)
            .with_retract_min(2_000);

        let json = serde_json::to_string(&settings).unwrap();
        let back: PlannerSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }
}
