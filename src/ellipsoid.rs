use crate::{Llh, Point3, Vector3};
use uom::si::angle::radian;
use uom::si::f64::{Angle, Length};
use uom::si::length::meter;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Convergence threshold of the surface projection, in radii-scaled units.
const SURFACE_PROJECTION_EPSILON: f64 = 1e-12;

/// Newton converges in a handful of steps away from the centre and needs a few dozen deep inside
/// the ellipsoid; this only stops pathological inputs from spinning forever.
const MAX_SURFACE_PROJECTION_STEPS: usize = 128;

/// A triaxial reference ellipsoid centred at the [`Ecef`](crate::systems::Ecef) origin.
///
/// Longitude, latitude and height are always relative to one of these. Most users want
/// [`Ellipsoid::WGS84`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ellipsoid {
    /// Semi-axis lengths along ECEF X, Y, and Z, in metres.
    radii: [f64; 3],
}

impl Ellipsoid {
    /// The [World Geodetic System '84][wgs84] ellipsoid.
    ///
    /// Semi-major axis 6 378 137 m, inverse flattening 298.257 223 563
    /// (<https://nsgreg.nga.mil/doc/view?i=4085> table 3.1).
    ///
    /// [wgs84]: https://en.wikipedia.org/wiki/World_Geodetic_System#WGS_84
    pub const WGS84: Self = Self {
        radii: [6_378_137.0, 6_378_137.0, 6_356_752.314_245_179],
    };

    /// Constructs an ellipsoid from its semi-axis lengths in metres.
    ///
    /// Returns `None` unless all three radii are finite and strictly positive.
    #[must_use]
    pub fn new(x: f64, y: f64, z: f64) -> Option<Self> {
        let radii = [x, y, z];
        radii
            .iter()
            .all(|r| r.is_finite() && *r > 0.)
            .then_some(Self { radii })
    }

    /// Returns the semi-axis lengths in metres.
    #[must_use]
    pub fn radii(&self) -> Vector3 {
        Vector3::from(self.radii)
    }

    fn one_over_radii(&self) -> Vector3 {
        self.radii().map(|r| 1. / r)
    }

    fn one_over_radii_squared(&self) -> Vector3 {
        self.radii().map(|r| 1. / (r * r))
    }

    /// Returns the unit normal of the ellipsoid surface that passes through `position`.
    ///
    /// Returns `None` at the centre, where no normal is defined.
    #[must_use]
    pub fn geodetic_surface_normal(&self, position: &Point3) -> Option<Vector3> {
        position
            .coords
            .component_mul(&self.one_over_radii_squared())
            .try_normalize(0.)
    }

    /// Returns the unit surface normal at the given longitude and latitude.
    #[must_use]
    pub fn geodetic_surface_normal_at(&self, position: &Llh) -> Vector3 {
        let lambda = position.longitude.get::<radian>();
        let phi = position.latitude.get::<radian>();
        let cos_phi = phi.cos();
        Vector3::new(cos_phi * lambda.cos(), cos_phi * lambda.sin(), phi.sin())
    }

    /// Converts longitude, latitude, and height to ECEF.
    ///
    /// This is exact and defined for every real input: the surface point is found by scaling the
    /// surface normal by the radii, and the height is then added along that normal.
    ///
    /// See <https://en.wikipedia.org/wiki/Geographic_coordinate_conversion#From_geodetic_to_ECEF_coordinates>.
    #[must_use]
    pub fn longitude_latitude_height_to_ecef(&self, position: &Llh) -> Point3 {
        let normal = self.geodetic_surface_normal_at(position);
        let radii = self.radii();
        let k = radii.component_mul(&radii).component_mul(&normal);
        let gamma = normal.dot(&k).sqrt();
        let surface = k / gamma;
        Point3::from(surface + normal * position.height().get::<meter>())
    }

    /// Projects `position` along the surface normal onto the surface of the ellipsoid.
    ///
    /// The result is the surface point whose normal passes through `position`, for any point
    /// other than the centre. Returns `None` for the exact centre and non-finite input.
    #[must_use]
    pub fn scale_to_geodetic_surface(&self, position: &Point3) -> Option<Point3> {
        let p = position.coords;
        if !p.iter().all(|c| c.is_finite()) {
            return None;
        }

        let radii = self.radii();
        let one_over_radii = self.one_over_radii();
        let one_over_radii_squared = self.one_over_radii_squared();

        let x2 = (p.x * one_over_radii.x).powi(2);
        let y2 = (p.y * one_over_radii.y).powi(2);
        let z2 = (p.z * one_over_radii.z).powi(2);

        let squared_norm = x2 + y2 + z2;
        let ratio = (1. / squared_norm).sqrt();
        if !ratio.is_finite() {
            // the centre itself
            return None;
        }

        // the surface point is p / (1 + lambda / r^2) per axis. on (pole, inf) the residual below
        // is convex and strictly decreasing, so its single root there is the surface point in
        // p's own octant.
        let pole = [(x2, radii.x), (y2, radii.y), (z2, radii.z)]
            .into_iter()
            .filter(|(c2, _)| *c2 > 0.)
            .map(|(_, r)| -(r * r))
            .fold(f64::NEG_INFINITY, f64::max);

        // start from the radial intersection
        let intersection = p * ratio;
        let gradient = intersection.component_mul(&one_over_radii_squared) * 2.;
        let mut lambda = ((1. - ratio) * p.norm()) / (0.5 * gradient.norm());
        if lambda.is_nan() || lambda <= pole {
            lambda = 0.5 * pole;
        }

        let mut multipliers = Vector3::repeat(1.);
        for _ in 0..MAX_SURFACE_PROJECTION_STEPS {
            multipliers = one_over_radii_squared.map(|o| 1. / (1. + lambda * o));
            let m2 = multipliers.component_mul(&multipliers);
            let m3 = m2.component_mul(&multipliers);

            let func = x2 * m2.x + y2 * m2.y + z2 * m2.z - 1.;
            if func.abs() <= SURFACE_PROJECTION_EPSILON {
                break;
            }

            let derivative = -2.
                * (x2 * m3.x * one_over_radii_squared.x
                    + y2 * m3.y * one_over_radii_squared.y
                    + z2 * m3.z * one_over_radii_squared.z);
            let next = lambda - func / derivative;
            if !next.is_finite() {
                return None;
            }
            // a step from the far side of the root can jump past the pole
            lambda = if next > pole {
                next
            } else {
                0.5 * (lambda + pole)
            };
        }

        Some(Point3::from(p.component_mul(&multipliers)))
    }

    /// Converts an ECEF position into longitude, latitude, and height.
    ///
    /// Returns `None` for the exact centre of the ellipsoid (and for non-finite input), where
    /// latitude is undefined. Callers must guard against that case.
    #[must_use]
    pub fn ecef_to_longitude_latitude_height(&self, position: &Point3) -> Option<Llh> {
        let surface = self.scale_to_geodetic_surface(position)?;
        let normal = self.geodetic_surface_normal(&surface)?;

        let longitude = normal.y.atan2(normal.x);
        let latitude = normal.z.clamp(-1., 1.).asin();
        let height = (position - surface).dot(&normal);

        Some(
            Llh::builder()
                .longitude(Angle::new::<radian>(longitude))
                .latitude(Angle::new::<radian>(latitude))?
                .height(Length::new::<meter>(height))
                .build(),
        )
    }
}

impl Default for Ellipsoid {
    fn default() -> Self {
        Self::WGS84
    }
}

#[cfg(test)]
mod tests {
    use super::Ellipsoid;
    use crate::{Llh, Point3, Vector3};
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use quickcheck::quickcheck;
    use rstest::rstest;

    /// An ECEF point anywhere from a hundredth of the radius up to twenty times it, in any
    /// direction.
    #[derive(Clone, Debug)]
    struct ShellPoint(Point3);

    impl quickcheck::Arbitrary for ShellPoint {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            // quickcheck will give us awkward f64 values -- we ignore those
            let mut finite = || loop {
                match f64::arbitrary(g) {
                    f if f == 0. => break 0.,
                    f if f.is_normal() => break f,
                    _ => {}
                }
            };
            let direction = loop {
                let v = Vector3::new(finite(), finite(), finite()).map(|c| c.rem_euclid(2.) - 1.);
                if let Some(v) = v.try_normalize(1e-3) {
                    break v;
                }
            };
            let radius = Ellipsoid::WGS84.radii().x * (0.01 + finite().rem_euclid(19.99));
            ShellPoint(Point3::from(direction * radius))
        }
    }

    quickcheck! {
        fn ecef_round_trips_through_llh(point: ShellPoint) -> bool {
            let ShellPoint(p) = point;
            let llh = Ellipsoid::WGS84
                .ecef_to_longitude_latitude_height(&p)
                .expect("not the centre");
            let back = Ellipsoid::WGS84.longitude_latitude_height_to_ecef(&llh);
            (back - p).norm() <= 1e-7 * p.coords.norm()
        }
    }

    fn try_llh_matches_nav_types(lon: f64, lat: f64, height: f64) {
        let llh = Llh::from_degrees(lon, lat, height).expect("lat in [-90,90]");
        let ecef = Ellipsoid::WGS84.longitude_latitude_height_to_ecef(&llh);

        let location = nav_types::WGS84::from_degrees_and_meters(lat, lon, height);
        let expected = nav_types::ECEF::from(location);
        assert_abs_diff_eq!(
            ecef,
            Point3::new(expected.x(), expected.y(), expected.z()),
            epsilon = 1e-3
        );

        let back = Ellipsoid::WGS84
            .ecef_to_longitude_latitude_height(&ecef)
            .expect("not the centre");
        assert_abs_diff_eq!(back, llh, epsilon = 1e-7);
    }

    // also, stress test known problematic things
    #[rstest]
    #[case(0., 0., 1000.)]
    #[case(0., 90., 1000.)]
    #[case(0., -90., 1000.)]
    #[case(90., 90., 1000.)]
    #[case(180., 90., 1000.)]
    #[case(-90., -90., 1000.)]
    #[case(0., 89.999999, 1000.)]
    #[case(180., -89.999999, 1000.)]
    #[case(-179.99999, 89.999999, 1000.)]
    #[case(45., 45., 1000.)]
    #[case(7.8211606, 47.9948211, -300.)]
    #[case(-29.160550, 84.883074, 400_000.)]
    fn hard_llh_to_ecef(#[case] lon: f64, #[case] lat: f64, #[case] height: f64) {
        try_llh_matches_nav_types(lon, lat, height);
    }

    #[test]
    fn known_llh_to_ecef() {
        for ((lon, lat, height), (x, y, z)) in [
            ((0., 0., 0.), (6378137., 0., 0.)),
            (
                // Mt. Fuji
                (138.7280, 35.3619, 2294.0),
                (-3915138.118709466, 3436144.354064903, 3672011.028417511),
            ),
            (
                (19.880389, -27.270950, 3000.),
                (5337604.33, 1930119.71, -2906308.35),
            ),
        ] {
            let llh = Llh::from_degrees(lon, lat, height).unwrap();
            let ecef = Ellipsoid::WGS84.longitude_latitude_height_to_ecef(&llh);
            assert_abs_diff_eq!(ecef, Point3::new(x, y, z), epsilon = 5e-2);
        }
    }

    #[test]
    fn centre_has_no_geodetic_position() {
        assert_eq!(
            Ellipsoid::WGS84.ecef_to_longitude_latitude_height(&Point3::origin()),
            None
        );
        assert_eq!(
            Ellipsoid::WGS84.geodetic_surface_normal(&Point3::origin()),
            None
        );
        assert_eq!(
            Ellipsoid::WGS84
                .ecef_to_longitude_latitude_height(&Point3::new(f64::NAN, 0., 0.)),
            None
        );
    }

    #[rstest]
    #[case(0.3)]
    #[case(0.2)]
    #[case(0.1)]
    #[case(0.01)]
    fn deep_points_round_trip_through_llh(#[case] fraction: f64) {
        let p = Point3::from(
            Vector3::new(0.6, 0.3, 0.74) * fraction * Ellipsoid::WGS84.radii().x,
        );
        let llh = Ellipsoid::WGS84
            .ecef_to_longitude_latitude_height(&p)
            .expect("not the centre");
        let back = Ellipsoid::WGS84.longitude_latitude_height_to_ecef(&llh);
        assert_relative_eq!(back, p, max_relative = 1e-7);
        assert!(llh.height().get::<uom::si::length::meter>() < 0.);
    }

    #[rstest]
    #[case(Point3::new(10_000., 0., 0.))]
    #[case(Point3::new(0., 0., -10_000.))]
    #[case(Point3::new(3_000., -4_000., 0.))]
    fn points_on_the_axes_near_the_centre_round_trip(#[case] p: Point3) {
        let llh = Ellipsoid::WGS84
            .ecef_to_longitude_latitude_height(&p)
            .expect("not the centre");
        let back = Ellipsoid::WGS84.longitude_latitude_height_to_ecef(&llh);
        assert_abs_diff_eq!(back, p, epsilon = 1e-7 * p.coords.norm());
    }

    #[test]
    fn points_below_the_surface_have_negative_height() {
        let llh = Ellipsoid::WGS84
            .ecef_to_longitude_latitude_height(&Point3::new(6_000_000., 0., 0.))
            .unwrap();
        assert_relative_eq!(llh.to_degrees()[2], 6_000_000. - 6_378_137., epsilon = 1e-6);
    }

    #[test]
    fn sphere_normals_are_radial() {
        let sphere = Ellipsoid::new(10., 10., 10.).unwrap();
        let normal = sphere
            .geodetic_surface_normal(&Point3::new(3., 4., 0.))
            .unwrap();
        assert_relative_eq!(normal, Vector3::new(0.6, 0.8, 0.));
    }

    #[rstest]
    #[case(0., 1., 1.)]
    #[case(-1., 1., 1.)]
    #[case(f64::INFINITY, 1., 1.)]
    #[case(1., f64::NAN, 1.)]
    fn rejects_degenerate_radii(#[case] x: f64, #[case] y: f64, #[case] z: f64) {
        assert_eq!(Ellipsoid::new(x, y, z), None);
    }
}
