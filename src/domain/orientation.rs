//! Orientation Math
//!
//! Quaternion to Euler angle and gravity vector conversions used by the core
//! sample decoder. No filtering or drift correction happens here.

use serde::{Deserialize, Serialize};

/// Fixed-point divisor of the quaternion components on the wire.
pub const QUATERNION_DIVISOR: f64 = 16384.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn scale(self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }
}

/// Euler angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EulerAngles {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl EulerAngles {
    /// Angles mapped to `[-1, 1]`.
    pub fn normalized(self) -> Self {
        Self {
            x: self.x / 180.0,
            y: self.y / 180.0,
            z: self.z / 180.0,
        }
    }
}

/// Unit quaternion. Field order follows the public (x, y, z, w) convention.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z, w }
    }

    /// Build from the four fixed-point words as they appear on the wire (w, x, y, z).
    pub fn from_fixed_point(w: i16, x: i16, y: i16, z: i16) -> Self {
        Self::new(
            w as f64 / QUATERNION_DIVISOR,
            x as f64 / QUATERNION_DIVISOR,
            y as f64 / QUATERNION_DIVISOR,
            z as f64 / QUATERNION_DIVISOR,
        )
    }

    /// Re-label the wire components into the sensor's body axes.
    ///
    /// The firmware reports (w, x, y, z) but its body frame expects
    /// `w <- y, x <- z, y <- w, z <- x`.
    pub fn to_device_axes(self) -> Self {
        Self::new(self.y, self.z, self.w, self.x)
    }
}

/// Euler decomposition of a quaternion already expressed in device axes.
///
/// Returns `(-theta, phi, -psi)` with `phi` flipped by [`corrected_phi`].
/// The sensor's rest pose (wire `z = 1`) decodes to `(0, 0, 0)`.
pub fn euler_angles(q: Quaternion) -> EulerAngles {
    let Quaternion { w, x, y, z } = q;

    let theta = (-2.0 * (x * z - w * y)).clamp(-1.0, 1.0).asin().to_degrees();
    let phi = (2.0 * (y * z + w * x))
        .atan2(w * w - x * x - y * y + z * z)
        .to_degrees();
    let psi = (2.0 * (x * y + w * z))
        .atan2(w * w + x * x - y * y - z * z)
        .to_degrees();

    EulerAngles {
        x: -theta,
        y: corrected_phi(phi),
        z: -psi,
    }
}

/// Fold `phi` around the +/-180 degree axis the firmware mounts the sensor on.
pub fn corrected_phi(phi: f64) -> f64 {
    if phi > 0.0 {
        180.0 - phi
    } else {
        -180.0 - phi
    }
}

/// Gravity direction in the sensor frame for a wire-order quaternion.
pub fn gravity(q: Quaternion) -> Vector3 {
    let Quaternion { w, x, y, z } = q;
    Vector3 {
        x: -2.0 * (w * x + y * z),
        y: 2.0 * (x * z - w * y),
        z: w * w - x * x - y * y + z * z,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn wire_euler(w: f64, x: f64, y: f64, z: f64) -> EulerAngles {
        euler_angles(Quaternion::new(w, x, y, z).to_device_axes())
    }

    #[test]
    fn test_rest_pose() {
        let euler = wire_euler(0.0, 0.0, 0.0, 1.0);
        assert!(euler.x.abs() < EPS);
        assert!(euler.y.abs() < EPS);
        assert!(euler.z.abs() < EPS);

        let g = gravity(Quaternion::new(0.0, 0.0, 0.0, 1.0));
        assert!(g.x.abs() < EPS);
        assert!(g.y.abs() < EPS);
        assert!((g.z - 1.0).abs() < EPS);
    }

    #[test]
    fn test_identity_quaternion() {
        // roll and pitch are level, yaw sits on the half turn
        let euler = wire_euler(1.0, 0.0, 0.0, 0.0);
        assert!(euler.x.abs() < EPS);
        assert!(euler.y.abs() < EPS);
        assert!((euler.z.abs() - 180.0).abs() < EPS);

        let g = gravity(Quaternion::IDENTITY);
        assert!(g.x.abs() < EPS);
        assert!(g.y.abs() < EPS);
        assert!((g.z - 1.0).abs() < EPS);
    }

    #[test]
    fn test_roll_is_folded() {
        // rest pose tilted 10 degrees about the device x axis
        let half = 5.0_f64.to_radians();
        let euler = wire_euler(0.0, 0.0, -half.sin(), half.cos());
        assert!(euler.x.abs() < 1e-6);
        assert!((euler.y.abs() - 10.0).abs() < 1e-6);
        assert!(euler.z.abs() < 1e-6);
    }

    #[test]
    fn test_device_axes_permutation() {
        let q = Quaternion::new(1.0, 2.0, 3.0, 4.0).to_device_axes();
        assert_eq!(q, Quaternion::new(3.0, 4.0, 1.0, 2.0));
    }

    #[test]
    fn test_fixed_point() {
        let q = Quaternion::from_fixed_point(16384, -8192, 0, 4096);
        assert_eq!(q.w, 1.0);
        assert_eq!(q.x, -0.5);
        assert_eq!(q.z, 0.25);
    }

    #[test]
    fn test_corrected_phi() {
        assert_eq!(corrected_phi(170.0), 10.0);
        assert_eq!(corrected_phi(-170.0), -10.0);
        assert_eq!(corrected_phi(0.0), -180.0);
    }

    #[test]
    fn test_normalized_euler() {
        let n = EulerAngles { x: 90.0, y: -180.0, z: 45.0 }.normalized();
        assert_eq!(n.x, 0.5);
        assert_eq!(n.y, -1.0);
        assert_eq!(n.z, 0.25);
    }
}
