//! Camera-side seams: the detection source, the field marker map it is
//! solved against, and the black-box pose solve.

use fieldpose_types::{DetectionBatch, Pose3d, Transform3d, VisionPoseCandidate};

/// A networked fiducial camera.
///
/// Implementations must never block: when the coprocessor has nothing new,
/// [`Camera::unread_batches`] returns an empty vector.
pub trait Camera: Send {
    /// Stable identifier for this camera, e.g. `"front_left"`.
    fn name(&self) -> &str;

    /// Whether the camera is currently reachable.
    fn is_connected(&self) -> bool;

    /// Every detection batch produced since the previous call, in arrival
    /// order (not necessarily capture order).
    fn unread_batches(&mut self) -> Vec<DetectionBatch>;
}

/// Known field-frame marker poses.
pub trait MarkerLayout {
    fn marker_pose(&self, marker_id: u32) -> Option<Pose3d>;

    /// Every marker id in the layout.
    fn marker_ids(&self) -> Vec<u32>;
}

/// Turns one detection batch into a robot pose candidate.
pub trait PoseSolver: Send {
    /// `robot_to_camera` is the camera's extrinsic.  Returns `None` when the
    /// batch cannot be solved.
    fn solve(
        &mut self,
        batch: &DetectionBatch,
        robot_to_camera: &Transform3d,
        layout: &dyn MarkerLayout,
    ) -> Option<VisionPoseCandidate>;
}

/// Default solver: trust the coprocessor's multi-marker solution, otherwise
/// fall back to the single least ambiguous marker.
///
/// Every observation in the batch is reported as supporting the candidate;
/// the tracker decides how much the candidate is worth.
#[derive(Debug, Clone)]
pub struct CoprocessorSolver {
    /// Observations above this ambiguity are ignored by the fallback.
    pub max_ambiguity: f64,
}

impl Default for CoprocessorSolver {
    fn default() -> Self {
        Self { max_ambiguity: 0.2 }
    }
}

impl PoseSolver for CoprocessorSolver {
    fn solve(
        &mut self,
        batch: &DetectionBatch,
        robot_to_camera: &Transform3d,
        layout: &dyn MarkerLayout,
    ) -> Option<VisionPoseCandidate> {
        let camera_to_robot = robot_to_camera.inverse();
        let known = batch
            .observations
            .iter()
            .filter(|o| layout.marker_pose(o.marker_id).is_some())
            .count();

        let estimated_pose = match batch.multi_marker_camera_pose {
            Some(camera_pose) if known >= 2 => camera_pose.transform_by(camera_to_robot),
            _ => {
                let best = batch
                    .observations
                    .iter()
                    .filter(|o| o.ambiguity <= self.max_ambiguity)
                    .filter_map(|o| {
                        let marker = layout.marker_pose(o.marker_id)?;
                        let camera_to_marker = o.camera_to_marker?;
                        Some((o.ambiguity, marker, camera_to_marker))
                    })
                    .min_by(|a, b| a.0.total_cmp(&b.0))?;
                let (_, marker, camera_to_marker) = best;
                marker
                    .transform_by(camera_to_marker.inverse())
                    .transform_by(camera_to_robot)
            }
        };

        Some(VisionPoseCandidate {
            estimated_pose,
            timestamp: batch.capture_timestamp,
            markers: batch.observations.clone(),
        })
    }
}
