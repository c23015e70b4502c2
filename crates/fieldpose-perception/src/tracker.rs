//! Camera Target Tracker.
//!
//! One [`CameraTracker`] per physical camera.  Each poll drains the camera's
//! unread detection batches (oldest capture first), solves a robot pose
//! candidate per batch, grades it with a [`ConfidenceVector`], and records
//! which [`FieldTarget`]s are in view.
//!
//! Confidence follows a quadratic range penalty:
//!
//! ```text
//! zero known markers           → single-marker baseline, unusable
//! one marker, avg dist > limit → infinite (discarded)
//! otherwise                    → baseline × (1 + avg_dist² / 30)
//! ```

use std::sync::Arc;

use fieldpose_hal::{Camera, PoseSolver};
use fieldpose_types::{
    ConfidenceVector, MarkerObservation, Pose2d, Transform3d, VisionPoseCandidate,
};
use tracing::{debug, warn};

use crate::registry::{FieldTarget, TargetRegistry};

/// Tunables shared by every tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerSettings {
    pub single_tag_std_devs: ConfidenceVector,
    pub multi_tag_std_devs: ConfidenceVector,
    /// A lone marker farther than this (metres) is not trusted.
    pub max_single_tag_distance: f64,
    /// Minimum seconds between polls.
    pub poll_interval: f64,
    /// Seconds without a marker before visible targets are cleared.
    pub visibility_timeout: f64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            single_tag_std_devs: ConfidenceVector::new(4.0, 4.0, 8.0),
            multi_tag_std_devs: ConfidenceVector::new(0.5, 0.5, 1.0),
            max_single_tag_distance: 4.0,
            poll_interval: 0.015,
            visibility_timeout: 0.5,
        }
    }
}

/// A graded pose candidate from one camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraEstimate {
    pub camera: String,
    pub candidate: VisionPoseCandidate,
    pub confidence: ConfidenceVector,
    /// Markers that are in the field layout and back the candidate.
    pub known_markers: usize,
    /// Mean planar distance from the candidate to its known markers.
    pub average_distance: f64,
}

impl CameraEstimate {
    /// Whether the estimate may be fused at all.
    pub fn is_usable(&self) -> bool {
        self.known_markers > 0 && self.confidence.is_finite()
    }

    pub fn pose(&self) -> Pose2d {
        self.candidate.estimated_pose.to_pose2d()
    }

    pub fn timestamp(&self) -> f64 {
        self.candidate.timestamp
    }
}

pub struct CameraTracker {
    camera: Box<dyn Camera>,
    solver: Box<dyn PoseSolver>,
    robot_to_camera: Transform3d,
    registry: Arc<TargetRegistry>,
    settings: TrackerSettings,
    last_poll: Option<f64>,
    last_marker_seen: Option<f64>,
    was_connected: bool,
    markers: Vec<MarkerObservation>,
    visible: Vec<FieldTarget>,
    current_confidence: ConfidenceVector,
    latest: Option<CameraEstimate>,
    pending: Vec<CameraEstimate>,
}

impl CameraTracker {
    pub fn new(
        camera: Box<dyn Camera>,
        solver: Box<dyn PoseSolver>,
        robot_to_camera: Transform3d,
        registry: Arc<TargetRegistry>,
        settings: TrackerSettings,
    ) -> Self {
        let current_confidence = settings.single_tag_std_devs;
        Self {
            camera,
            solver,
            robot_to_camera,
            registry,
            settings,
            last_poll: None,
            last_marker_seen: None,
            was_connected: true,
            markers: Vec::new(),
            visible: Vec::new(),
            current_confidence,
            latest: None,
            pending: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.camera.name()
    }

    pub fn is_connected(&self) -> bool {
        self.camera.is_connected()
    }

    pub fn robot_to_camera(&self) -> Transform3d {
        self.robot_to_camera
    }

    /// Pull and process every unread batch.  `now` is the host clock in
    /// seconds.  Returns the number of batches processed; zero when the
    /// camera is disconnected or the previous poll was too recent.
    pub fn poll_latest(&mut self, now: f64) -> usize {
        if !self.camera.is_connected() {
            if self.was_connected {
                warn!(camera = %self.camera.name(), "camera disconnected; targets cleared");
            }
            self.was_connected = false;
            self.clear_view();
            return 0;
        }
        self.was_connected = true;

        if let Some(last) = self.last_poll {
            if now - last < self.settings.poll_interval {
                return 0;
            }
        }
        self.last_poll = Some(now);

        let mut batches = self.camera.unread_batches();
        batches.sort_by(|a, b| a.capture_timestamp.total_cmp(&b.capture_timestamp));

        for batch in &batches {
            self.markers = batch.observations.clone();
            self.visible = self.targets_in(&batch.observations);
            if !batch.observations.is_empty() {
                self.last_marker_seen = Some(batch.capture_timestamp);
            }

            let Some(candidate) =
                self.solver
                    .solve(batch, &self.robot_to_camera, self.registry.layout())
            else {
                self.current_confidence = self.settings.single_tag_std_devs;
                continue;
            };
            let estimate = self.grade(candidate);
            self.current_confidence = estimate.confidence;
            if estimate.is_usable() {
                self.pending.push(estimate.clone());
            } else {
                debug!(
                    camera = %self.camera.name(),
                    markers = estimate.known_markers,
                    avg_distance = estimate.average_distance,
                    "vision candidate discarded"
                );
            }
            self.latest = Some(estimate);
        }

        let expired = self
            .last_marker_seen
            .is_none_or(|seen| now - seen > self.settings.visibility_timeout);
        if batches.is_empty() && expired {
            self.clear_view();
        }

        batches.len()
    }

    /// Attach a [`ConfidenceVector`] to `candidate`.
    pub fn grade(&self, candidate: VisionPoseCandidate) -> CameraEstimate {
        let robot = candidate.estimated_pose.to_pose2d().translation;
        let distances: Vec<f64> = candidate
            .markers
            .iter()
            .filter_map(|m| self.registry.pose_for_marker(m.marker_id))
            .map(|p| p.to_pose2d().translation.distance(robot))
            .collect();

        let known_markers = distances.len();
        let average_distance = if known_markers == 0 {
            0.0
        } else {
            distances.iter().sum::<f64>() / known_markers as f64
        };

        let confidence = confidence_for(known_markers, average_distance, &self.settings);
        CameraEstimate {
            camera: self.camera.name().to_string(),
            candidate,
            confidence,
            known_markers,
            average_distance,
        }
    }

    /// Distinct targets behind `observations`, in first-seen order.
    fn targets_in(&self, observations: &[MarkerObservation]) -> Vec<FieldTarget> {
        let mut targets = Vec::new();
        for obs in observations {
            if let Some(t) = self.registry.target_for_marker(obs.marker_id) {
                if !targets.contains(&t) {
                    targets.push(t);
                }
            }
        }
        targets
    }

    fn clear_view(&mut self) {
        self.markers.clear();
        self.visible.clear();
    }

    /// Targets in view as of the last poll.
    pub fn visible_targets(&self) -> &[FieldTarget] {
        &self.visible
    }

    /// Markers of the most recent batch, in detection order.
    pub fn markers(&self) -> &[MarkerObservation] {
        &self.markers
    }

    pub fn current_confidence(&self) -> ConfidenceVector {
        self.current_confidence
    }

    /// The most recent graded estimate, usable or not.
    pub fn latest_estimate(&self) -> Option<&CameraEstimate> {
        self.latest.as_ref()
    }

    /// Drain usable estimates gathered since the last call.
    pub fn take_estimates(&mut self) -> Vec<CameraEstimate> {
        std::mem::take(&mut self.pending)
    }

    /// Horizontal range to `observation`'s marker from its height and the
    /// observed pitch.  `None` when the marker is unknown or the geometry is
    /// degenerate (level sight line or a non-positive range).
    pub fn pitch_range(&self, observation: &MarkerObservation) -> Option<f64> {
        let marker = self.registry.pose_for_marker(observation.marker_id)?;
        let height = marker.translation.z - self.robot_to_camera.translation.z;
        // Pitch about +Y tips the lens down; elevation is its negation.
        let elevation = -self.robot_to_camera.rotation.pitch() + observation.pitch;
        if elevation.abs() < 1e-6 {
            return None;
        }
        let range = height / elevation.tan();
        (range.is_finite() && range > 0.0).then_some(range)
    }
}

/// Per-axis standard deviations for a candidate backed by `known_markers`
/// markers at `average_distance` metres on average.
pub fn confidence_for(
    known_markers: usize,
    average_distance: f64,
    settings: &TrackerSettings,
) -> ConfidenceVector {
    match known_markers {
        0 => settings.single_tag_std_devs,
        1 if average_distance > settings.max_single_tag_distance => ConfidenceVector::infinite(),
        n => {
            let baseline = if n == 1 {
                settings.single_tag_std_devs
            } else {
                settings.multi_tag_std_devs
            };
            baseline.scale(1.0 + average_distance * average_distance / 30.0)
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FieldLayout;
    use fieldpose_hal::{CoprocessorSolver, MarkerLayout, SimCamera};
    use fieldpose_types::{DetectionBatch, Pose3d, Quaternion, Rotation2d, Vec3};
    use parking_lot::Mutex;

    fn registry() -> Arc<TargetRegistry> {
        Arc::new(TargetRegistry::with_defaults(FieldLayout::bundled().unwrap()).unwrap())
    }

    /// Camera double whose queue stays reachable from the test.
    #[derive(Clone)]
    struct SharedCamera {
        queue: Arc<Mutex<Vec<DetectionBatch>>>,
        connected: Arc<Mutex<bool>>,
    }

    impl SharedCamera {
        fn new() -> Self {
            Self {
                queue: Arc::new(Mutex::new(Vec::new())),
                connected: Arc::new(Mutex::new(true)),
            }
        }

        fn push(&self, batch: DetectionBatch) {
            self.queue.lock().push(batch);
        }
    }

    impl Camera for SharedCamera {
        fn name(&self) -> &str {
            "shared"
        }

        fn is_connected(&self) -> bool {
            *self.connected.lock()
        }

        fn unread_batches(&mut self) -> Vec<DetectionBatch> {
            std::mem::take(&mut *self.queue.lock())
        }
    }

    /// Solver double that records call order and echoes a fixed pose.
    struct EchoSolver {
        pose: Pose3d,
        seen: Arc<Mutex<Vec<f64>>>,
    }

    impl PoseSolver for EchoSolver {
        fn solve(
            &mut self,
            batch: &DetectionBatch,
            _robot_to_camera: &Transform3d,
            _layout: &dyn MarkerLayout,
        ) -> Option<VisionPoseCandidate> {
            self.seen.lock().push(batch.capture_timestamp);
            Some(VisionPoseCandidate {
                estimated_pose: self.pose,
                timestamp: batch.capture_timestamp,
                markers: batch.observations.clone(),
            })
        }
    }

    fn batch(ts: f64, ids: &[u32]) -> DetectionBatch {
        DetectionBatch {
            capture_timestamp: ts,
            observations: ids.iter().map(|id| MarkerObservation::new(*id)).collect(),
            multi_marker_camera_pose: None,
        }
    }

    fn echo_tracker(pose: Pose2d) -> (CameraTracker, SharedCamera, Arc<Mutex<Vec<f64>>>) {
        let cam = SharedCamera::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let solver = EchoSolver {
            pose: Pose3d::from_pose2d(pose),
            seen: seen.clone(),
        };
        let tracker = CameraTracker::new(
            Box::new(cam.clone()),
            Box::new(solver),
            Transform3d::identity(),
            registry(),
            TrackerSettings::default(),
        );
        (tracker, cam, seen)
    }

    #[test]
    fn confidence_is_infinite_for_one_far_marker() {
        let s = TrackerSettings::default();
        assert!(!confidence_for(1, 5.0, &s).is_finite());
        assert!(confidence_for(1, 4.0, &s).is_finite());
        assert!(confidence_for(2, 5.0, &s).is_finite());
    }

    #[test]
    fn confidence_for_two_markers_at_two_metres() {
        let s = TrackerSettings::default();
        let c = confidence_for(2, 2.0, &s);
        let factor = 1.0 + 4.0 / 30.0;
        assert!((c.x - 0.5 * factor).abs() < 1e-12);
        assert!((c.y - 0.5 * factor).abs() < 1e-12);
        assert!((c.heading - 1.0 * factor).abs() < 1e-12);
    }

    #[test]
    fn confidence_grows_with_distance() {
        let s = TrackerSettings::default();
        let mut prev = 0.0;
        for step in 0..=40 {
            let d = step as f64 * 0.1;
            for n in [1, 3] {
                let c = confidence_for(n, d, &s);
                assert!(c.x >= s.multi_tag_std_devs.x);
                if n == 3 {
                    assert!(c.x >= prev);
                    prev = c.x;
                }
            }
        }
    }

    #[test]
    fn zero_marker_candidate_is_unusable() {
        let (mut tracker, cam, _) = echo_tracker(Pose2d::origin());
        cam.push(batch(0.1, &[]));
        cam.push(batch(0.2, &[99])); // not in the layout
        assert_eq!(tracker.poll_latest(0.3), 2);
        assert!(tracker.take_estimates().is_empty());
        let latest = tracker.latest_estimate().unwrap();
        assert!(!latest.is_usable());
        assert_eq!(tracker.current_confidence(), TrackerSettings::default().single_tag_std_devs);
    }

    #[test]
    fn batches_are_processed_oldest_first() {
        let (mut tracker, cam, seen) = echo_tracker(Pose2d::new(4.0, 4.0, Rotation2d::zero()));
        cam.push(batch(0.30, &[18]));
        cam.push(batch(0.10, &[19, 20]));
        cam.push(batch(0.20, &[21]));
        tracker.poll_latest(1.0);
        assert_eq!(*seen.lock(), vec![0.10, 0.20, 0.30]);
        // Latest batch wins the view.
        assert_eq!(tracker.visible_targets(), &[FieldTarget::Reef]);
        let ts: Vec<f64> = tracker.take_estimates().iter().map(|e| e.timestamp()).collect();
        assert_eq!(ts, vec![0.10, 0.20, 0.30]);
    }

    #[test]
    fn polls_are_rate_limited() {
        let (mut tracker, cam, _) = echo_tracker(Pose2d::origin());
        cam.push(batch(0.0, &[18]));
        assert_eq!(tracker.poll_latest(1.000), 1);
        cam.push(batch(1.0, &[18]));
        assert_eq!(tracker.poll_latest(1.010), 0);
        assert_eq!(tracker.poll_latest(1.016), 1);
    }

    #[test]
    fn visible_targets_collapse_duplicates() {
        let (mut tracker, cam, _) = echo_tracker(Pose2d::new(4.5, 4.0, Rotation2d::zero()));
        cam.push(batch(0.0, &[17, 18, 3, 19]));
        tracker.poll_latest(0.0);
        assert_eq!(tracker.visible_targets(), &[FieldTarget::Reef, FieldTarget::Processor]);
        assert_eq!(tracker.markers().len(), 4);
    }

    #[test]
    fn disconnect_clears_view_without_error() {
        let (mut tracker, cam, _) = echo_tracker(Pose2d::origin());
        cam.push(batch(0.0, &[18]));
        tracker.poll_latest(0.0);
        assert!(!tracker.visible_targets().is_empty());

        *cam.connected.lock() = false;
        cam.push(batch(0.1, &[18]));
        assert_eq!(tracker.poll_latest(0.1), 0);
        assert!(tracker.visible_targets().is_empty());
        assert!(tracker.markers().is_empty());
    }

    #[test]
    fn visibility_times_out_without_fresh_frames() {
        let (mut tracker, cam, _) = echo_tracker(Pose2d::origin());
        cam.push(batch(1.0, &[18]));
        tracker.poll_latest(1.0);
        tracker.poll_latest(1.3);
        assert_eq!(tracker.visible_targets(), &[FieldTarget::Reef]);
        tracker.poll_latest(1.6);
        assert!(tracker.visible_targets().is_empty());
    }

    #[test]
    fn single_far_marker_is_discarded_near_one_is_kept() {
        // Robot 5 m in front of tag 18 (3.658, 4.026).
        let (mut tracker, cam, _) = echo_tracker(Pose2d::new(3.658 - 5.0, 4.026, Rotation2d::zero()));
        cam.push(batch(0.0, &[18]));
        tracker.poll_latest(0.0);
        assert!(tracker.take_estimates().is_empty());
        assert!(!tracker.current_confidence().is_finite());

        let (mut tracker, cam, _) = echo_tracker(Pose2d::new(3.658 - 2.0, 4.026, Rotation2d::zero()));
        cam.push(batch(0.0, &[18]));
        tracker.poll_latest(0.0);
        let est = tracker.take_estimates();
        assert_eq!(est.len(), 1);
        assert!((est[0].average_distance - 2.0).abs() < 1e-9);
        let expected = 4.0 * (1.0 + 4.0 / 30.0);
        assert!((est[0].confidence.x - expected).abs() < 1e-9);
    }

    #[test]
    fn sim_camera_pipeline_recovers_pose() {
        let reg = registry();
        let extrinsic = Transform3d::new(Vec3::new(0.3, 0.0, 0.25), Quaternion::identity());
        let robot = Pose2d::new(2.0, 4.0, Rotation2d::zero());
        let mut cam = SimCamera::new("front", extrinsic);
        assert!(cam.render(robot, 0.5, reg.layout()) >= 1);

        let mut tracker = CameraTracker::new(
            Box::new(cam),
            Box::new(CoprocessorSolver::default()),
            extrinsic,
            reg,
            TrackerSettings::default(),
        );
        tracker.poll_latest(0.5);
        let est = tracker.take_estimates();
        assert_eq!(est.len(), 1);
        assert!((est[0].pose().x() - 2.0).abs() < 1e-6);
        assert!((est[0].pose().y() - 4.0).abs() < 1e-6);
        assert!(tracker.visible_targets().contains(&FieldTarget::Reef));
    }

    #[test]
    fn unsolvable_batch_resets_confidence_to_baseline() {
        let reg = registry();
        let extrinsic = Transform3d::new(Vec3::new(0.3, 0.0, 0.25), Quaternion::identity());
        let mut sim = SimCamera::new("front", extrinsic);
        sim.render(Pose2d::new(2.0, 4.0, Rotation2d::zero()), 0.5, reg.layout());
        let cam = SharedCamera::new();
        for b in sim.unread_batches() {
            cam.push(b);
        }

        let mut tracker = CameraTracker::new(
            Box::new(cam.clone()),
            Box::new(CoprocessorSolver::default()),
            extrinsic,
            reg,
            TrackerSettings::default(),
        );
        let baseline = TrackerSettings::default().single_tag_std_devs;
        tracker.poll_latest(0.5);
        assert_eq!(tracker.take_estimates().len(), 1);
        assert_ne!(tracker.current_confidence(), baseline);

        cam.push(batch(0.6, &[]));
        assert_eq!(tracker.poll_latest(0.6), 1);
        assert!(tracker.take_estimates().is_empty());
        assert_eq!(tracker.current_confidence(), baseline);
    }

    #[test]
    fn pitch_range_matches_horizontal_distance() {
        let reg = registry();
        // Lens 0.2 m up, tilted 0.1 rad upward, looking straight at tag 18.
        let extrinsic = Transform3d::new(Vec3::new(0.0, 0.0, 0.2), Quaternion::from_euler(0.0, -0.1, 0.0));
        let robot = Pose2d::new(3.658 - 2.5, 4.026, Rotation2d::zero());
        let mut cam = SimCamera::new("front", extrinsic);
        cam.render(robot, 0.0, reg.layout());
        let obs = cam
            .unread_batches()
            .remove(0)
            .observations
            .into_iter()
            .find(|o| o.marker_id == 18)
            .unwrap();

        let tracker = CameraTracker::new(
            Box::new(SharedCamera::new()),
            Box::new(CoprocessorSolver::default()),
            extrinsic,
            reg,
            TrackerSettings::default(),
        );
        let range = tracker.pitch_range(&obs).unwrap();
        assert!((range - 2.5).abs() < 1e-6, "range {range}");

        assert!(tracker.pitch_range(&MarkerObservation::new(99)).is_none());
    }

    #[test]
    fn pitch_range_rejects_level_sight_line() {
        let tracker = CameraTracker::new(
            Box::new(SharedCamera::new()),
            Box::new(CoprocessorSolver::default()),
            Transform3d::identity(),
            registry(),
            TrackerSettings::default(),
        );
        assert!(tracker.pitch_range(&MarkerObservation::new(18)).is_none());
    }
}
