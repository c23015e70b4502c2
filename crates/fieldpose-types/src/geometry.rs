//! Planar and spatial rigid-body geometry in the field frame.
//!
//! Lengths are metres, angles radians.  The 2-D types follow the usual FRC
//! conventions: +X points down-field away from the blue driver station, +Y to
//! the left, and headings are measured counter-clockwise from +X.
//!
//! # Example
//!
//! ```rust
//! use fieldpose_types::geometry::{Pose2d, Rotation2d, Transform2d, Translation2d};
//!
//! let tag = Pose2d::new(4.0, 2.0, Rotation2d::from_degrees(180.0));
//! // Stand half a metre in front of the tag, facing it.
//! let approach = Transform2d::new(Translation2d::new(0.5, 0.0), Rotation2d::from_degrees(180.0));
//! let aim = tag.transform_by(approach);
//! assert!((aim.x() - 3.5).abs() < 1e-9);
//! assert!(aim.heading().wrapped().radians().abs() < 1e-9);
//! ```

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Wrap an angle into `(-π, π]`.
pub fn wrap_angle(radians: f64) -> f64 {
    let wrapped = (radians + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI { wrapped + 2.0 * PI } else { wrapped }
}

// ────────────────────────────────────────────────────────────────────────────
// 2-D primitives
// ────────────────────────────────────────────────────────────────────────────

/// A 2-D translation vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Translation2d {
    pub x: f64,
    pub y: f64,
}

impl Translation2d {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Build a vector of length `norm` pointing along `angle`.
    pub fn from_polar(norm: f64, angle: Rotation2d) -> Self {
        Self::new(norm * angle.cos(), norm * angle.sin())
    }

    pub fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Euclidean distance to `other`.
    pub fn distance(self, other: Self) -> f64 {
        self.minus(other).norm()
    }

    /// Direction of this vector; `None` for the zero vector.
    pub fn angle(self) -> Option<Rotation2d> {
        if self.norm() < 1e-12 {
            None
        } else {
            Some(Rotation2d::new(self.y.atan2(self.x)))
        }
    }

    pub fn plus(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }

    pub fn minus(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }

    pub fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }

    pub fn scale(self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }

    /// Rotate counter-clockwise by `rotation`.
    pub fn rotate_by(self, rotation: Rotation2d) -> Self {
        let (s, c) = (rotation.sin(), rotation.cos());
        Self::new(self.x * c - self.y * s, self.x * s + self.y * c)
    }
}

/// A planar rotation (heading).
///
/// The stored angle is not wrapped; use [`Rotation2d::wrapped`] when a
/// canonical `(-π, π]` value is needed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotation2d {
    radians: f64,
}

impl Rotation2d {
    pub fn new(radians: f64) -> Self {
        Self { radians }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_degrees(degrees: f64) -> Self {
        Self::new(degrees.to_radians())
    }

    pub fn radians(self) -> f64 {
        self.radians
    }

    pub fn degrees(self) -> f64 {
        self.radians.to_degrees()
    }

    pub fn cos(self) -> f64 {
        self.radians.cos()
    }

    pub fn sin(self) -> f64 {
        self.radians.sin()
    }

    /// Same rotation expressed in `(-π, π]`.
    pub fn wrapped(self) -> Self {
        Self::new(wrap_angle(self.radians))
    }

    pub fn plus(self, rhs: Self) -> Self {
        Self::new(self.radians + rhs.radians)
    }

    pub fn minus(self, rhs: Self) -> Self {
        Self::new(self.radians - rhs.radians)
    }

    pub fn neg(self) -> Self {
        Self::new(-self.radians)
    }

    /// Shortest signed angular distance from `self` to `other`, in `(-π, π]`.
    pub fn delta_to(self, other: Self) -> f64 {
        wrap_angle(other.radians - self.radians)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform2d / Twist2d / Pose2d
// ────────────────────────────────────────────────────────────────────────────

/// A rigid displacement between two planar frames.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform2d {
    pub translation: Translation2d,
    pub rotation: Rotation2d,
}

impl Transform2d {
    pub fn new(translation: Translation2d, rotation: Rotation2d) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::default()
    }

    /// The transform that maps `from` onto `to`, expressed in `from`'s frame.
    pub fn between(from: Pose2d, to: Pose2d) -> Self {
        Self::new(
            to.translation
                .minus(from.translation)
                .rotate_by(from.rotation.neg()),
            to.rotation.minus(from.rotation),
        )
    }

    pub fn inverse(self) -> Self {
        let rotation = self.rotation.neg();
        Self::new(self.translation.neg().rotate_by(rotation), rotation)
    }

    /// `self` applied first, then `other` (expressed in the frame `self`
    /// lands in).
    pub fn compose(self, other: Self) -> Self {
        Self::new(
            self.translation
                .plus(other.translation.rotate_by(self.rotation)),
            self.rotation.plus(other.rotation),
        )
    }
}

/// A constant-curvature motion increment in the robot's frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Twist2d {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
}

impl Twist2d {
    pub fn new(dx: f64, dy: f64, dtheta: f64) -> Self {
        Self { dx, dy, dtheta }
    }

    pub fn scale(self, factor: f64) -> Self {
        Self::new(self.dx * factor, self.dy * factor, self.dtheta * factor)
    }
}

/// Position and heading of the robot (or any object) in the field frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose2d {
    pub translation: Translation2d,
    pub rotation: Rotation2d,
}

impl Pose2d {
    pub fn new(x: f64, y: f64, heading: Rotation2d) -> Self {
        Self {
            translation: Translation2d::new(x, y),
            rotation: heading,
        }
    }

    pub fn origin() -> Self {
        Self::default()
    }

    pub fn x(&self) -> f64 {
        self.translation.x
    }

    pub fn y(&self) -> f64 {
        self.translation.y
    }

    pub fn heading(&self) -> Rotation2d {
        self.rotation
    }

    /// Apply `transform` in this pose's own frame.
    pub fn transform_by(self, transform: Transform2d) -> Self {
        Self {
            translation: self
                .translation
                .plus(transform.translation.rotate_by(self.rotation)),
            rotation: self.rotation.plus(transform.rotation),
        }
    }

    /// Express `self` relative to `origin`.
    pub fn relative_to(self, origin: Self) -> Transform2d {
        Transform2d::between(origin, self)
    }

    /// Integrate a constant-curvature twist starting at this pose.
    pub fn exp(self, twist: Twist2d) -> Self {
        let Twist2d { dx, dy, dtheta } = twist;
        let (sin_t, cos_t) = (dtheta.sin(), dtheta.cos());
        let (s, c) = if dtheta.abs() < 1e-9 {
            (1.0 - dtheta * dtheta / 6.0, 0.5 * dtheta)
        } else {
            (sin_t / dtheta, (1.0 - cos_t) / dtheta)
        };
        let step = Transform2d::new(
            Translation2d::new(dx * s - dy * c, dx * c + dy * s),
            Rotation2d::new(dtheta),
        );
        self.transform_by(step)
    }

    /// The twist that carries this pose onto `end` (inverse of [`exp`]).
    ///
    /// [`exp`]: Pose2d::exp
    pub fn log(self, end: Self) -> Twist2d {
        let t = end.relative_to(self);
        let dtheta = wrap_angle(t.rotation.radians());
        let half = dtheta / 2.0;
        let cos_minus_one = dtheta.cos() - 1.0;
        let half_by_tan = if cos_minus_one.abs() < 1e-9 {
            1.0 - dtheta * dtheta / 12.0
        } else {
            -(half * dtheta.sin()) / cos_minus_one
        };
        let (tx, ty) = (t.translation.x, t.translation.y);
        Twist2d::new(
            tx * half_by_tan + ty * half,
            ty * half_by_tan - tx * half,
            dtheta,
        )
    }

    /// Interpolate along the twist between `self` and `end`; `t` is clamped
    /// to `[0, 1]`.
    pub fn interpolate(self, end: Self, t: f64) -> Self {
        if t <= 0.0 {
            return self;
        }
        if t >= 1.0 {
            return end;
        }
        self.exp(self.log(end).scale(t))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// 3-D primitives
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D translation vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }

    pub fn scale(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }
}

/// Orientation of a camera or marker, stored `w` first as in the WPILib
/// layout JSON.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    /// Components as read from a layout file; not normalised here.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Extrinsic roll (X), pitch (Y), yaw (Z) angles in radians.
    pub fn from_euler(roll: f64, pitch: f64, yaw: f64) -> Self {
        let (sr, cr) = (roll / 2.0).sin_cos();
        let (sp, cp) = (pitch / 2.0).sin_cos();
        let (sy, cy) = (yaw / 2.0).sin_cos();
        Self::new(
            cr * cp * cy + sr * sp * sy,
            sr * cp * cy - cr * sp * sy,
            cr * sp * cy + sr * cp * sy,
            cr * cp * sy - sr * sp * cy,
        )
    }

    pub fn from_yaw(yaw: f64) -> Self {
        Self::from_euler(0.0, 0.0, yaw)
    }

    pub fn roll(self) -> f64 {
        (2.0 * (self.w * self.x + self.y * self.z))
            .atan2(1.0 - 2.0 * (self.x * self.x + self.y * self.y))
    }

    pub fn pitch(self) -> f64 {
        (2.0 * (self.w * self.y - self.z * self.x))
            .clamp(-1.0, 1.0)
            .asin()
    }

    pub fn yaw(self) -> f64 {
        (2.0 * (self.w * self.z + self.x * self.y))
            .atan2(1.0 - 2.0 * (self.y * self.y + self.z * self.z))
    }

    /// `self` followed by `rhs` in the rotated frame, e.g. robot→camera
    /// then camera→marker.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Reverse rotation, assuming a unit quaternion.
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Express a vector given in the rotated frame in the parent frame.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let axis = Vec3::new(self.x, self.y, self.z);
        let t = axis.cross(v).scale(2.0);
        v.add(t.scale(self.w)).add(axis.cross(t))
    }
}

/// Placement of one body relative to another, such as a camera on the
/// robot (`robot_to_camera`) or a marker seen from a camera
/// (`camera_to_marker`).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform3d {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3d {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::default()
    }

    /// Chain placements: robot→camera composed with camera→marker gives
    /// robot→marker.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        Self::new(translated, self.rotation.mul(other.rotation))
    }

    /// camera→robot from robot→camera.
    pub fn inverse(self) -> Self {
        let rotation = self.rotation.conjugate();
        Self::new(rotation.rotate(self.translation.neg()), rotation)
    }
}

/// A pose in the 3-D field frame.  Only its planar projection is
/// authoritative for localisation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose3d {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Pose3d {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// Lift a planar pose onto the floor (z = 0, no roll or pitch).
    pub fn from_pose2d(pose: Pose2d) -> Self {
        Self::new(
            Vec3::new(pose.x(), pose.y(), 0.0),
            Quaternion::from_yaw(pose.heading().radians()),
        )
    }

    /// This pose viewed as the transform from the field origin.
    pub fn as_transform(self) -> Transform3d {
        Transform3d::new(self.translation, self.rotation)
    }

    pub fn transform_by(self, transform: Transform3d) -> Self {
        let t = self.as_transform().compose(transform);
        Self::new(t.translation, t.rotation)
    }

    /// Drop height, roll and pitch.
    pub fn to_pose2d(self) -> Pose2d {
        Pose2d::new(
            self.translation.x,
            self.translation.y,
            Rotation2d::new(self.rotation.yaw()),
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
