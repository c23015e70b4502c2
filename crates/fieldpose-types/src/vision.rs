//! Fiducial detections and the pose candidates derived from them.

use serde::{Deserialize, Serialize};

use crate::geometry::{Pose3d, Transform3d};

/// One fiducial marker seen in one camera frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerObservation {
    pub marker_id: u32,
    /// Pose ambiguity reported by the detector, 0 (certain) to 1.
    pub ambiguity: f64,
    /// Horizontal angle to the marker centre, radians, left positive.
    pub yaw: f64,
    /// Vertical angle to the marker centre, radians, up positive.
    pub pitch: f64,
    /// Marker pose in the camera frame, when the detector solved one.
    pub camera_to_marker: Option<Transform3d>,
}

impl MarkerObservation {
    pub fn new(marker_id: u32) -> Self {
        Self {
            marker_id,
            ambiguity: 0.0,
            yaw: 0.0,
            pitch: 0.0,
            camera_to_marker: None,
        }
    }
}

/// Everything a camera reported for a single captured frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionBatch {
    /// Capture time in seconds on the host clock.
    pub capture_timestamp: f64,
    /// Markers in detection order.
    pub observations: Vec<MarkerObservation>,
    /// Field-frame camera pose solved across every marker in the frame, when
    /// the coprocessor produced one.
    pub multi_marker_camera_pose: Option<Pose3d>,
}

/// A robot pose solved from one detection batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionPoseCandidate {
    pub estimated_pose: Pose3d,
    /// Capture time of the frame, not the time it arrived.
    pub timestamp: f64,
    /// Markers that support the solution.
    pub markers: Vec<MarkerObservation>,
}

/// Per-axis standard deviations describing trust in a vision pose.
///
/// Larger values mean less trust.  A vector with any non-finite or
/// non-positive component is "infinitely uncertain" and must not be fused.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceVector {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl ConfidenceVector {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self { x, y, heading }
    }

    pub fn infinite() -> Self {
        Self::new(f64::INFINITY, f64::INFINITY, f64::INFINITY)
    }

    pub fn scale(self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor, self.heading * factor)
    }

    /// Every component positive and finite.
    pub fn is_finite(&self) -> bool {
        [self.x, self.y, self.heading]
            .iter()
            .all(|s| s.is_finite() && *s > 0.0)
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.x, self.y, self.heading]
    }
}

impl From<[f64; 3]> for ConfidenceVector {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}
