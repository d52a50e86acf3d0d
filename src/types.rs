//! Common types and traits for the packing core.
//!
//! Geometry uses the nalgebra types re-exported by the physics engine so that
//! shapes built here can be handed to the engine without conversion.

use rapier3d_f64::prelude::{Isometry, Point, SharedShape};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Scalar type used throughout the packing core.
pub type Real = f64;

/// A point in container space (x = width, y = height, z = depth).
pub type Point3 = Point<Real>;

/// Global numerical tolerance for floating-point comparisons.
pub const EPSILON_GENERAL: f64 = 1e-6;

/// Extents of an axis-aligned box (the container).
///
/// `y` is the vertical axis, gravity points towards negative `y`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
    pub depth: f64,
}

impl Dimensions {
    #[inline]
    pub const fn new(width: f64, height: f64, depth: f64) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Volume of the box.
    #[inline]
    pub fn volume(&self) -> f64 {
        self.width * self.height * self.depth
    }
}

/// Something the viewer or the exporter can draw as a triangle mesh.
pub trait Renderable {
    /// Vertices in the shape's local frame.
    fn local_vertices(&self) -> &[Point3];

    /// Triangles as indices into [`Renderable::local_vertices`].
    fn triangles(&self) -> &[[u32; 3]];

    /// Vertices after applying `pose`.
    fn world_vertices(&self, pose: &Isometry<Real>) -> Vec<Point3> {
        self.local_vertices().iter().map(|p| pose * p).collect()
    }
}

/// Something the physics backend can turn into a collider.
pub trait Collidable {
    /// Collision shape in the local frame.
    fn collision_shape(&self) -> SharedShape;

    /// Initial orientation applied on top of the spawn translation.
    fn initial_pose(&self) -> Isometry<Real> {
        Isometry::identity()
    }
}

/// Validation helpers shared by the model and the configuration.
pub mod validation {
    /// Validates a single strictly positive, finite value.
    ///
    /// # Returns
    /// `Ok(())` for valid values, otherwise error text
    pub fn validate_positive(value: f64, name: &str) -> Result<(), String> {
        if value.is_nan() {
            return Err(format!("{} must not be NaN", name));
        }
        if value.is_infinite() {
            return Err(format!("{} must not be infinite", name));
        }
        if value <= 0.0 {
            return Err(format!("{} must be positive, got: {}", name, value));
        }
        Ok(())
    }

    /// Validates a fraction in the half-open interval (0, 1].
    pub fn validate_fraction(value: f64, name: &str) -> Result<(), String> {
        validate_positive(value, name)?;
        if value > 1.0 {
            return Err(format!("{} must not exceed 1, got: {}", name, value));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapier3d_f64::prelude::Vector;

    struct Tetrahedron {
        vertices: Vec<Point3>,
        triangles: Vec<[u32; 3]>,
    }

    impl Renderable for Tetrahedron {
        fn local_vertices(&self) -> &[Point3] {
            &self.vertices
        }

        fn triangles(&self) -> &[[u32; 3]] {
            &self.triangles
        }
    }

    #[test]
    fn test_dimensions_volume() {
        let dims = Dimensions::new(10.0, 20.0, 30.0);
        assert!((dims.volume() - 6000.0).abs() < EPSILON_GENERAL);
    }

    #[test]
    fn test_world_vertices_apply_translation() {
        let shape = Tetrahedron {
            vertices: vec![
                Point3::origin(),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
            triangles: vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        };
        let pose = Isometry::translation(1.0, 2.0, 3.0);
        let moved = shape.world_vertices(&pose);

        assert_eq!(moved.len(), 4);
        let delta: Vector<Real> = moved[1] - shape.vertices[1];
        assert!((delta - Vector::new(1.0, 2.0, 3.0)).norm() < EPSILON_GENERAL);
    }

    #[test]
    fn test_validation_positive() {
        assert!(validation::validate_positive(10.0, "Width").is_ok());
        assert!(validation::validate_positive(0.0, "Width").is_err());
        assert!(validation::validate_positive(-1.0, "Width").is_err());
        assert!(validation::validate_positive(f64::NAN, "Width").is_err());
        assert!(validation::validate_positive(f64::INFINITY, "Width").is_err());
    }

    #[test]
    fn test_validation_fraction() {
        assert!(validation::validate_fraction(1.0, "vf_max").is_ok());
        assert!(validation::validate_fraction(0.25, "vf_max").is_ok());
        assert!(validation::validate_fraction(0.0, "vf_max").is_err());
        assert!(validation::validate_fraction(1.5, "vf_max").is_err());
    }
}
