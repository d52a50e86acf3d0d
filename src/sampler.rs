//! Random surface points on an ellipsoid.

use std::f64::consts::PI;

use rand::Rng;

use crate::types::Point3;

/// Draws a point on the surface of the ellipsoid with semi-axes `a`, `b`, `c`.
///
/// The azimuth is uniform in `[0, 2π)` and the polar angle is `asin(2u - 1)`
/// with `u` uniform in `[0, 1)`. This is uniform over the parametrization,
/// not over surface area. It is area-uniform for a sphere only; a stretched
/// ellipsoid keeps the density of the unit sphere it was scaled from.
pub fn sample_on_ellipsoid<R: Rng + ?Sized>(rng: &mut R, a: f64, b: f64, c: f64) -> Point3 {
    let azimuthal_angle = rng.gen_range(0.0_f64..2.0 * PI);
    let sin_polar_angle = 2.0 * rng.gen_range(0.0_f64..1.0) - 1.0;
    let polar_angle = sin_polar_angle.asin();

    Point3::new(
        a * polar_angle.cos() * azimuthal_angle.cos(),
        b * polar_angle.cos() * azimuthal_angle.sin(),
        c * sin_polar_angle,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn surface_residual(p: &Point3, a: f64, b: f64, c: f64) -> f64 {
        (p.x / a).powi(2) + (p.y / b).powi(2) + (p.z / c).powi(2) - 1.0
    }

    #[test]
    fn samples_lie_on_the_surface() {
        let mut rng = StdRng::seed_from_u64(7);
        for &(a, b, c) in &[(1.0, 1.0, 1.0), (3.0, 0.5, 1.2), (0.01, 20.0, 4.0)] {
            for _ in 0..500 {
                let p = sample_on_ellipsoid(&mut rng, a, b, c);
                assert!(p.coords.iter().all(|v| v.is_finite()));
                assert!(
                    surface_residual(&p, a, b, c).abs() < 1e-9,
                    "point {:?} is off the ({}, {}, {}) ellipsoid",
                    p,
                    a,
                    b,
                    c
                );
            }
        }
    }

    #[test]
    fn samples_cover_both_hemispheres() {
        let mut rng = StdRng::seed_from_u64(11);
        let points: Vec<_> = (0..200)
            .map(|_| sample_on_ellipsoid(&mut rng, 2.0, 2.0, 2.0))
            .collect();

        assert!(points.iter().any(|p| p.z > 1.0));
        assert!(points.iter().any(|p| p.z < -1.0));
        assert!(points.iter().any(|p| p.x > 1.0));
        assert!(points.iter().any(|p| p.x < -1.0));
    }
}
