//! # Layerplan
//!
//! A layer path planner for 3D-printing G-code generation.
//!
//! Given the geometry of one sliced layer (outlines, insets, infill, support,
//! skirt) and a machine/material profile, the planner produces an ordered
//! sequence of machine actions — travel, extrusion, retraction, fan and tool
//! changes — annotated with speed and extrusion width, ready to be serialized
//! by an output sink:
//! - Integer micrometre geometry primitives
//! - Inside-boundary routing of travel moves around printed perimeters
//! - Polygon order optimization to minimize travel
//! - A per-layer planning queue with retraction promotion and seam handling
//! - Minimum-layer-time speed scaling and fan floor enforcement
//! - Emission with small-move coalescing, spiral Z ramping and perimeter
//!   overlap trimming
//!
//! ## Example
//!
//! ```rust,ignore
//! use layerplan::{ConfigRegistry, LayerPlanner, PathConfig, PlannerSettings};
//!
//! let mut configs = ConfigRegistry::new();
//! let travel = configs.register(PathConfig::travel(150.0))?;
//! let wall = configs.register(PathConfig::new(30.0, 400, "WALL-OUTER").with_closed_loop(true))?;
//!
//! let settings = PlannerSettings::default();
//! let mut planner = LayerPlanner::new(&configs, travel, &settings, 1, 400)?;
//! planner.queue_polygon(&outline, 0, wall)?;
//! planner.finalize_layer(&settings);
//! planner.emit(&mut sink, 200)?;
//! ```

// Core modules
pub mod config;
pub mod emit;
pub mod gcode;
pub mod geometry;
pub mod order;
pub mod plan;
pub mod route;

// Re-export commonly used types
pub use config::{
    ConfigId, ConfigRegistry, PathConfig, PlannerSettings, TAG_BRIDGE, TAG_TRAVEL, TAG_WALL_INNER,
    TAG_WALL_OUTER,
};
pub use emit::{Emitter, Sink};
pub use gcode::{GCodeWriter, GCodeWriterConfig};
pub use geometry::{point_inside_polygons, Line, Point, Point3, Polygon, Polygons};
pub use order::{OrderOptimizer, PolygonOrder};
pub use plan::{LayerPlanner, PathPoint, PathRecord, Retraction};
pub use route::{RouteResult, Router, RouterId};

/// Coordinate type used throughout the planner.
/// Using i64 for integer coordinates in micrometres to avoid floating-point issues.
pub type Coord = i64;

/// Floating-point coordinate type for unscaled (millimetre) values.
pub type CoordF = f64;

/// Scaling factor: coordinates are stored as integer micrometres.
/// 1 unit = 1 micrometre, so 1mm = 1_000 units.
pub const SCALING_FACTOR: f64 = 1_000.0;

/// Scale a millimetre value to integer micrometres.
#[inline]
pub fn scale(v: CoordF) -> Coord {
    (v * SCALING_FACTOR).round() as Coord
}

/// Unscale integer micrometres to millimetres.
#[inline]
pub fn unscale(v: Coord) -> CoordF {
    v as CoordF / SCALING_FACTOR
}

/// Result type used throughout the planner.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for planner operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("config conflict: {0}")]
    ConfigConflict(String),

    #[error("sink error: {0}")]
    Sink(String),
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
