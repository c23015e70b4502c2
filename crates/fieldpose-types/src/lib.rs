//! `fieldpose-types` – values shared by every fieldpose crate.
//!
//! # Modules
//!
//! - [`geometry`] – planar poses, transforms and twists plus the 3-D
//!   [`Pose3d`][geometry::Pose3d] / [`Transform3d`][geometry::Transform3d]
//!   used for marker and camera placement.
//! - [`drive`] – [`ChassisVelocity`][drive::ChassisVelocity],
//!   [`ModuleState`][drive::ModuleState] and
//!   [`ModulePosition`][drive::ModulePosition].
//! - [`vision`] – detections, pose candidates and
//!   [`ConfidenceVector`][vision::ConfidenceVector].

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod drive;
pub mod geometry;
pub mod vision;

pub use drive::{ChassisVelocity, ModulePosition, ModuleState, VelocityFrame};
pub use geometry::{
    Pose2d, Pose3d, Quaternion, Rotation2d, Transform2d, Transform3d, Translation2d, Twist2d,
    Vec3,
};
pub use vision::{ConfidenceVector, DetectionBatch, MarkerObservation, VisionPoseCandidate};

/// Which side of the field the robot plays for.  Supplied by the host and
/// only changes between matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alliance {
    #[default]
    Blue,
    Red,
}

impl std::fmt::Display for Alliance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Alliance::Blue => write!(f, "blue"),
            Alliance::Red => write!(f, "red"),
        }
    }
}

impl std::str::FromStr for Alliance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blue" => Ok(Alliance::Blue),
            "red" => Ok(Alliance::Red),
            other => Err(format!("unknown alliance {other:?} (expected blue or red)")),
        }
    }
}

/// Errors raised by fieldpose.  Missing sensor data is never an error; it
/// surfaces as `None` or an empty collection instead.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PoseError {
    #[error("Field layout '{source_name}' unusable: {details}")]
    FieldLayout { source_name: String, details: String },

    #[error("Malformed marker registry: {0}")]
    MalformedRegistry(String),

    #[error("Expected {expected} swerve modules, got {actual}")]
    ModuleCount { expected: usize, actual: usize },

    #[error("Invalid drivetrain geometry: {0}")]
    InvalidGeometry(String),

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Background odometry owns the pose; stop it first")]
    OdometryRunning,

    #[error("Configuration error: {0}")]
    Config(String),
}
