//! Convex-hull aggregate shapes.
//!
//! An aggregate instance is the convex hull of `numCuts` random points on its
//! class ellipsoid, randomly oriented. The hull is computed by parry; this
//! module only rejects point clouds the hull routine cannot turn into a solid.

use std::fmt;

use rand::Rng;
use rapier3d_f64::parry::transformation::convex_hull;
use rapier3d_f64::prelude::{Isometry, Rotation, SharedShape, Translation};
use serde::Serialize;
use utoipa::ToSchema;

use crate::model::{AggregateClass, MIN_NUM_CUTS};
use crate::sampler::sample_on_ellipsoid;
use crate::types::{Collidable, Point3, Real, Renderable};

/// Relative tolerance below which a point cloud counts as flat.
const DEGENERACY_TOLERANCE: f64 = 1e-9;

/// Unique identifier of a built shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, ToSchema)]
#[serde(transparent)]
pub struct ShapeId(pub u64);

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shape-{}", self.0)
    }
}

/// Why a hull could not be built.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShapeError {
    #[error("class '{class_id}' needs at least {min} samples, got {count}", min = MIN_NUM_CUTS)]
    TooFewPoints { class_id: String, count: usize },
    #[error("class '{class_id}' has invalid semi-axes ({a}, {b}, {c})")]
    InvalidSemiAxes {
        class_id: String,
        a: f64,
        b: f64,
        c: f64,
    },
    #[error("sample points of class '{class_id}' are {kind}")]
    Degenerate {
        class_id: String,
        kind: &'static str,
    },
    #[error("hull of class '{0}' is not a valid convex mesh")]
    InvalidHull(String),
}

/// Geometry of one aggregate instance.
///
/// Vertices are in the local frame centered on the ellipsoid origin;
/// `rotation` is applied when the instance is placed.
#[derive(Clone)]
pub struct ShapeGeometry {
    id: ShapeId,
    class_id: String,
    vertices: Vec<Point3>,
    triangles: Vec<[u32; 3]>,
    rotation: Rotation<Real>,
    shape: SharedShape,
}

impl fmt::Debug for ShapeGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapeGeometry")
            .field("id", &self.id)
            .field("class_id", &self.class_id)
            .field("vertices", &self.vertices.len())
            .field("triangles", &self.triangles.len())
            .finish()
    }
}

impl ShapeGeometry {
    pub fn id(&self) -> ShapeId {
        self.id
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    /// Serializable mesh for the viewer.
    pub fn to_payload(&self) -> GeometryPayload {
        GeometryPayload {
            id: self.id,
            class_id: self.class_id.clone(),
            vertices: self.vertices.iter().map(|p| [p.x, p.y, p.z]).collect(),
            triangles: self.triangles.clone(),
        }
    }
}

impl Renderable for ShapeGeometry {
    fn local_vertices(&self) -> &[Point3] {
        &self.vertices
    }

    fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }
}

impl Collidable for ShapeGeometry {
    fn collision_shape(&self) -> SharedShape {
        self.shape.clone()
    }

    fn initial_pose(&self) -> Isometry<Real> {
        Isometry::from_parts(Translation::identity(), self.rotation)
    }
}

/// Local mesh of a shape as sent to the browser.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct GeometryPayload {
    pub id: ShapeId,
    pub class_id: String,
    pub vertices: Vec<[f64; 3]>,
    pub triangles: Vec<[u32; 3]>,
}

/// Builds hull shapes for aggregate classes and hands out unique ids.
#[derive(Debug, Default)]
pub struct AggregateShapeBuilder {
    next_id: u64,
}

impl AggregateShapeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples the class ellipsoid, hulls the samples and orients the result.
    ///
    /// A failure only concerns this one instance; the builder stays usable
    /// and no id is consumed.
    pub fn build<R: Rng + ?Sized>(
        &mut self,
        class: &AggregateClass,
        rng: &mut R,
    ) -> Result<ShapeGeometry, ShapeError> {
        let (a, b, c) = class.semi_axes();
        if ![a, b, c].iter().all(|v| v.is_finite() && *v > 0.0) {
            return Err(ShapeError::InvalidSemiAxes {
                class_id: class.id.clone(),
                a,
                b,
                c,
            });
        }
        if class.num_cuts < MIN_NUM_CUTS {
            return Err(ShapeError::TooFewPoints {
                class_id: class.id.clone(),
                count: class.num_cuts,
            });
        }

        let points: Vec<Point3> = (0..class.num_cuts)
            .map(|_| sample_on_ellipsoid(rng, a, b, c))
            .collect();
        let rotation = random_rotation(rng);

        self.hull(&class.id, &points, rotation)
    }

    /// Builds a shape from an explicit point cloud.
    pub fn hull(
        &mut self,
        class_id: &str,
        points: &[Point3],
        rotation: Rotation<Real>,
    ) -> Result<ShapeGeometry, ShapeError> {
        if points.len() < MIN_NUM_CUTS {
            return Err(ShapeError::TooFewPoints {
                class_id: class_id.to_string(),
                count: points.len(),
            });
        }
        if let Some(kind) = degeneracy(points) {
            return Err(ShapeError::Degenerate {
                class_id: class_id.to_string(),
                kind,
            });
        }

        let (vertices, triangles) = convex_hull(points);
        if vertices.len() < MIN_NUM_CUTS || mesh_volume(&vertices, &triangles) <= 0.0 {
            return Err(ShapeError::Degenerate {
                class_id: class_id.to_string(),
                kind: "coplanar",
            });
        }
        let shape = SharedShape::convex_mesh(vertices.clone(), &triangles)
            .ok_or_else(|| ShapeError::InvalidHull(class_id.to_string()))?;

        let id = ShapeId(self.next_id);
        self.next_id += 1;

        Ok(ShapeGeometry {
            id,
            class_id: class_id.to_string(),
            vertices,
            triangles,
            rotation,
            shape,
        })
    }
}

/// Three independent angles uniform in `[0°, 360°)`.
///
/// The rotation is roll about x, then pitch about y, then yaw about z, all
/// about the fixed axes (intrinsic z-y'-x'').
pub fn random_rotation<R: Rng + ?Sized>(rng: &mut R) -> Rotation<Real> {
    let mut angle = || rng.gen_range(0.0_f64..360.0).to_radians();
    let roll = angle();
    let pitch = angle();
    let yaw = angle();
    Rotation::from_euler_angles(roll, pitch, yaw)
}

/// True geometric volume of a placed instance.
///
/// Depends only on the mesh and the pose, so repeated calls on an unmodified
/// instance return the same value.
pub fn calculate_volume<S: Renderable + ?Sized>(shape: &S, pose: &Isometry<Real>) -> f64 {
    mesh_volume(&shape.world_vertices(pose), shape.triangles())
}

/// Volume enclosed by a closed triangle mesh (sum of signed tetrahedra).
fn mesh_volume(vertices: &[Point3], triangles: &[[u32; 3]]) -> f64 {
    let six_volume: f64 = triangles
        .iter()
        .map(|[i, j, k]| {
            let v0 = vertices[*i as usize].coords;
            let v1 = vertices[*j as usize].coords;
            let v2 = vertices[*k as usize].coords;
            v0.dot(&v1.cross(&v2))
        })
        .sum();
    (six_volume / 6.0).abs()
}

/// Returns what is wrong with a point cloud that cannot span a volume.
fn degeneracy(points: &[Point3]) -> Option<&'static str> {
    if points.iter().any(|p| !p.coords.iter().all(|v| v.is_finite())) {
        return Some("not finite");
    }

    let origin = points[0];
    let scale = points
        .iter()
        .map(|p| (p - origin).norm())
        .fold(0.0_f64, f64::max);
    if scale <= 0.0 {
        return Some("coincident");
    }

    let farthest = points
        .iter()
        .max_by(|p, q| (*p - origin).norm().total_cmp(&(*q - origin).norm()))?;
    let axis = farthest - origin;

    let spread = |p: &Point3| axis.cross(&(p - origin)).norm();
    let side = points.iter().max_by(|p, q| spread(*p).total_cmp(&spread(*q)))?;
    if spread(side) <= DEGENERACY_TOLERANCE * scale * scale {
        return Some("collinear");
    }

    let normal = axis.cross(&(side - origin));
    let height = points
        .iter()
        .map(|p| normal.dot(&(p - origin)).abs())
        .fold(0.0_f64, f64::max);
    if height <= DEGENERACY_TOLERANCE * scale * scale * scale {
        return Some("coplanar");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ellipsoid_volume;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rapier3d_f64::prelude::Vector;

    fn cube_points() -> Vec<Point3> {
        let mut points = Vec::new();
        for x in [-1.0, 1.0] {
            for y in [-1.0, 1.0] {
                for z in [-1.0, 1.0] {
                    points.push(Point3::new(x, y, z));
                }
            }
        }
        points
    }

    #[test]
    fn cube_hull_has_cube_volume() {
        let mut builder = AggregateShapeBuilder::new();
        let shape = builder
            .hull("cube", &cube_points(), Rotation::identity())
            .unwrap();

        assert_eq!(shape.local_vertices().len(), 8);
        let volume = calculate_volume(&shape, &Isometry::identity());
        assert!((volume - 8.0).abs() < 1e-9);
    }

    #[test]
    fn volume_is_independent_of_pose_and_repeatable() {
        let mut builder = AggregateShapeBuilder::new();
        let shape = builder
            .hull("cube", &cube_points(), Rotation::identity())
            .unwrap();
        let pose = Isometry::new(
            Vector::new(4.0, 5.0, 6.0),
            Vector::new(0.3, 1.1, -0.7),
        );

        let first = calculate_volume(&shape, &pose);
        let second = calculate_volume(&shape, &pose);
        assert_eq!(first, second);
        assert!((first - 8.0).abs() < 1e-9);
    }

    #[test]
    fn built_hull_approximates_ellipsoid_from_inside() {
        let mut rng = StdRng::seed_from_u64(3);
        let class = AggregateClass::new("A", (3.0, 2.0, 1.0), 0.5, 400);
        let mut builder = AggregateShapeBuilder::new();
        let shape = builder.build(&class, &mut rng).unwrap();

        let nominal = ellipsoid_volume(3.0, 2.0, 1.0).unwrap();
        let volume = calculate_volume(&shape, &shape.initial_pose());
        assert!(volume < nominal);
        assert!(volume > 0.8 * nominal, "hull volume {} too small", volume);
        assert_eq!(shape.class_id(), "A");
    }

    #[test]
    fn ids_are_unique() {
        let mut rng = StdRng::seed_from_u64(5);
        let class = AggregateClass::new("A", (1.0, 1.0, 1.0), 0.5, 20);
        let mut builder = AggregateShapeBuilder::new();

        let first = builder.build(&class, &mut rng).unwrap();
        let second = builder.build(&class, &mut rng).unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn too_few_points_fail() {
        let mut rng = StdRng::seed_from_u64(5);
        let class = AggregateClass::new("A", (1.0, 1.0, 1.0), 0.5, 3);
        let err = AggregateShapeBuilder::new()
            .build(&class, &mut rng)
            .unwrap_err();
        assert!(matches!(err, ShapeError::TooFewPoints { count: 3, .. }));
    }

    #[test]
    fn invalid_semi_axes_fail() {
        let mut rng = StdRng::seed_from_u64(5);
        let class = AggregateClass::new("A", (f64::NAN, 1.0, 1.0), 0.5, 10);
        let err = AggregateShapeBuilder::new()
            .build(&class, &mut rng)
            .unwrap_err();
        assert!(matches!(err, ShapeError::InvalidSemiAxes { .. }));
    }

    #[test]
    fn coplanar_points_fail_without_consuming_an_id() {
        let mut builder = AggregateShapeBuilder::new();
        let flat = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.5, 0.2, 0.0),
        ];
        let err = builder.hull("flat", &flat, Rotation::identity()).unwrap_err();
        assert!(matches!(
            err,
            ShapeError::Degenerate {
                kind: "coplanar",
                ..
            }
        ));

        let collinear: Vec<_> = (0..5).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        let err = builder
            .hull("line", &collinear, Rotation::identity())
            .unwrap_err();
        assert!(matches!(
            err,
            ShapeError::Degenerate {
                kind: "collinear",
                ..
            }
        ));

        let shape = builder
            .hull("cube", &cube_points(), Rotation::identity())
            .unwrap();
        assert_eq!(shape.id(), ShapeId(0));
    }

    #[test]
    fn random_rotation_is_a_proper_rotation() {
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..20 {
            let rotation = random_rotation(&mut rng);
            assert!((rotation.into_inner().norm() - 1.0).abs() < 1e-12);
        }
    }
}
