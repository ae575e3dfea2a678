//! Image plane to ground plane projection.
//!
//! A fixed 4-point perspective transform maps pixels of a calibrated road
//! quadrilateral onto a metric bird's-eye rectangle. The mapper is immutable:
//! recalibration means constructing a new one, so it can be shared across
//! threads without locking.

use nalgebra as na;

use crate::error::Error;

/// Relative tolerance used for collinearity and singularity checks.
const DEGENERACY_EPS: f64 = 1e-9;
const MIN_DETERMINANT: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct GroundPlaneMapper {
    homography: na::Matrix3<f64>,
}

impl GroundPlaneMapper {
    /// `source` are image points ordered top-left, top-right, bottom-right,
    /// bottom-left; `target` are the matching ground points in meters.
    pub fn new(source: [[f64; 2]; 4], target: [[f64; 2]; 4]) -> Result<Self, Error> {
        check_quad("source", &source)?;
        check_quad("target", &target)?;

        let homography = perspective_transform(&source, &target)?;

        Ok(Self { homography })
    }

    #[inline]
    pub fn homography(&self) -> &na::Matrix3<f64> {
        &self.homography
    }

    /// Projects an image point onto the ground plane. Points on the horizon
    /// line of the calibration map to non-finite coordinates.
    #[inline]
    pub fn map_to_ground(&self, point: na::Point2<f64>) -> na::Point2<f64> {
        let p = self.homography * na::Vector3::new(point.x, point.y, 1.0);

        na::Point2::new(p.x / p.z, p.y / p.z)
    }

    #[inline]
    pub fn map_pixel(&self, x: i32, y: i32) -> na::Point2<f64> {
        self.map_to_ground(na::Point2::new(x as f64, y as f64))
    }
}

fn check_quad(name: &str, pts: &[[f64; 2]; 4]) -> Result<(), Error> {
    if pts.iter().flatten().any(|v| !v.is_finite()) {
        return Err(Error::DegenerateCalibration(format!(
            "{} points must be finite",
            name
        )));
    }

    let (min, max) = pts.iter().fold(
        ([f64::MAX; 2], [f64::MIN; 2]),
        |(min, max), p| {
            (
                [min[0].min(p[0]), min[1].min(p[1])],
                [max[0].max(p[0]), max[1].max(p[1])],
            )
        },
    );
    let extent = (max[0] - min[0]).max(max[1] - min[1]);
    if extent <= 0.0 {
        return Err(Error::DegenerateCalibration(format!(
            "{} points coincide",
            name
        )));
    }

    // Any three collinear corners leave the transform underdetermined.
    for skip in 0..4 {
        let tri: Vec<&[f64; 2]> = (0..4).filter(|&i| i != skip).map(|i| &pts[i]).collect();
        let cross = (tri[1][0] - tri[0][0]) * (tri[2][1] - tri[0][1])
            - (tri[1][1] - tri[0][1]) * (tri[2][0] - tri[0][0]);

        if cross.abs() <= DEGENERACY_EPS * extent * extent {
            return Err(Error::DegenerateCalibration(format!(
                "{} points contain three collinear corners",
                name
            )));
        }
    }

    Ok(())
}

/// Solves the 8 unknowns of `H` (with `h33 = 1`) from four exact
/// correspondences `dst ~ H * src`.
fn perspective_transform(
    src: &[[f64; 2]; 4],
    dst: &[[f64; 2]; 4],
) -> Result<na::Matrix3<f64>, Error> {
    let mut a = na::SMatrix::<f64, 8, 8>::zeros();
    let mut b = na::SVector::<f64, 8>::zeros();

    for i in 0..4 {
        let [x, y] = src[i];
        let [u, v] = dst[i];

        a[(i, 0)] = x;
        a[(i, 1)] = y;
        a[(i, 2)] = 1.0;
        a[(i, 6)] = -x * u;
        a[(i, 7)] = -y * u;
        b[i] = u;

        a[(i + 4, 3)] = x;
        a[(i + 4, 4)] = y;
        a[(i + 4, 5)] = 1.0;
        a[(i + 4, 6)] = -x * v;
        a[(i + 4, 7)] = -y * v;
        b[i + 4] = v;
    }

    let h = a
        .lu()
        .solve(&b)
        .ok_or_else(|| Error::DegenerateCalibration("perspective system is singular".into()))?;

    let m = na::Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);

    if !m.iter().all(|v| v.is_finite()) || m.determinant().abs() < MIN_DETERMINANT {
        return Err(Error::DegenerateCalibration(
            "homography determinant is near zero".into(),
        ));
    }

    Ok(m)
}
