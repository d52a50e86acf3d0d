//! Data models for the aggregate packing run.
//!
//! - `AggregateClass`: one ellipsoidal size class with its target volume fraction
//! - `Container`: the box the aggregates are dropped into
//!
//! Derived class fields (`volume`, `count`) are written once by the planner
//! before any spawning starts and are read-only afterwards.

use rapier3d_f64::prelude::SharedShape;
use serde::Serialize;
use utoipa::ToSchema;

use crate::types::{Collidable, Dimensions, Point3, validation};

/// Validation error for model data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),
    #[error("Invalid volume fraction: {0}")]
    InvalidFraction(String),
    #[error("Invalid sample count: {0}")]
    InvalidSampleCount(String),
}

/// Minimum number of surface samples that can span a volume.
pub const MIN_NUM_CUTS: usize = 4;

/// One row of the input distribution.
///
/// # Fields
/// * `id` - Unique identifier of the class
/// * `a`, `b`, `c` - Semi-axes of the ellipsoid
/// * `max_volume_friction` - Target fraction (0, 1] of the container volume
/// * `num_cuts` - Number of surface samples for the representative hull
/// * `volume` - Nominal ellipsoid volume, derived by the planner
/// * `count` - Target instance count, derived by the planner
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct AggregateClass {
    pub id: String,
    pub a: f64,
    pub b: f64,
    pub c: f64,
    #[serde(rename = "maxVolumeFriction")]
    pub max_volume_friction: f64,
    #[serde(rename = "numCuts")]
    pub num_cuts: usize,
    pub(crate) volume: Option<f64>,
    pub(crate) count: Option<usize>,
}

impl AggregateClass {
    /// Creates a class record without derived fields.
    ///
    /// No validation happens here: malformed classes are tolerated and
    /// excluded at plan time. Use [`AggregateClass::validate`] to check them.
    pub fn new(
        id: impl Into<String>,
        (a, b, c): (f64, f64, f64),
        max_volume_friction: f64,
        num_cuts: usize,
    ) -> Self {
        Self {
            id: id.into(),
            a,
            b,
            c,
            max_volume_friction,
            num_cuts,
            volume: None,
            count: None,
        }
    }

    /// Checks every field a spawn depends on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate_positive(self.a, "Semi-axis a")
            .and_then(|_| validation::validate_positive(self.b, "Semi-axis b"))
            .and_then(|_| validation::validate_positive(self.c, "Semi-axis c"))
            .map_err(ValidationError::InvalidDimension)?;
        validation::validate_fraction(self.max_volume_friction, "maxVolumeFriction")
            .map_err(ValidationError::InvalidFraction)?;
        if self.num_cuts < MIN_NUM_CUTS {
            return Err(ValidationError::InvalidSampleCount(format!(
                "numCuts must be at least {}, got: {}",
                MIN_NUM_CUTS, self.num_cuts
            )));
        }
        Ok(())
    }

    /// Semi-axes as a tuple.
    #[inline]
    pub fn semi_axes(&self) -> (f64, f64, f64) {
        (self.a, self.b, self.c)
    }

    /// Nominal ellipsoid volume, `None` until planned or when undefined.
    #[inline]
    pub fn volume(&self) -> Option<f64> {
        self.volume
    }

    /// Target instance count, `None` until planned or when undefined.
    #[inline]
    pub fn count(&self) -> Option<usize> {
        self.count
    }
}

/// Ellipsoid volume `(4/3)·π·a·b·c`, or `None` if it is not a positive finite number.
pub fn ellipsoid_volume(a: f64, b: f64, c: f64) -> Option<f64> {
    let volume = 4.0 / 3.0 * std::f64::consts::PI * a * b * c;
    (volume.is_finite() && volume > 0.0 && a > 0.0 && b > 0.0 && c > 0.0).then_some(volume)
}

/// Wall slab of the container.
#[derive(Clone, Debug, PartialEq)]
pub struct Wall {
    pub id: &'static str,
    pub center: (f64, f64, f64),
    pub half_extents: (f64, f64, f64),
}

impl Wall {
    #[inline]
    pub fn center(&self) -> Point3 {
        let (x, y, z) = self.center;
        Point3::new(x, y, z)
    }
}

impl Collidable for Wall {
    fn collision_shape(&self) -> SharedShape {
        let (hx, hy, hz) = self.half_extents;
        SharedShape::cuboid(hx, hy, hz)
    }
}

/// The open-top box the aggregates are packed into.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, ToSchema)]
pub struct Container {
    pub dims: Dimensions,
}

impl Container {
    /// Wall thickness of the static container boundary.
    pub const WALL_THICKNESS: f64 = 1.0;

    /// Creates a new empty container with validation.
    pub fn new(dims: Dimensions) -> Result<Self, ValidationError> {
        validation::validate_positive(dims.width, "Container width")
            .and_then(|_| validation::validate_positive(dims.height, "Container height"))
            .and_then(|_| validation::validate_positive(dims.depth, "Container depth"))
            .map_err(ValidationError::InvalidDimension)?;
        Ok(Self { dims })
    }

    /// Interior volume; the denominator of the packed volume fraction.
    #[inline]
    pub fn volume(&self) -> f64 {
        self.dims.volume()
    }

    /// The five static walls, outside the interior, `wall_height` tall.
    ///
    /// The top stays open so the spawn column above the container can drain
    /// into it.
    pub fn walls(&self, wall_height: f64) -> Vec<Wall> {
        let Dimensions { width, depth, .. } = self.dims;
        let t = Self::WALL_THICKNESS;
        let h = wall_height;

        vec![
            Wall {
                id: "x-",
                center: (-t / 2.0, h / 2.0, depth / 2.0),
                half_extents: (t / 2.0, h / 2.0, depth / 2.0),
            },
            Wall {
                id: "x+",
                center: (width + t / 2.0, h / 2.0, depth / 2.0),
                half_extents: (t / 2.0, h / 2.0, depth / 2.0),
            },
            Wall {
                id: "y-",
                center: (width / 2.0, -t / 2.0, depth / 2.0),
                half_extents: (width / 2.0, t / 2.0, depth / 2.0),
            },
            Wall {
                id: "z-",
                center: (width / 2.0, h / 2.0, -t / 2.0),
                half_extents: (width / 2.0, h / 2.0, t / 2.0),
            },
            Wall {
                id: "z+",
                center: (width / 2.0, h / 2.0, depth + t / 2.0),
                half_extents: (width / 2.0, h / 2.0, t / 2.0),
            },
        ]
    }
}
