//! Vision Aggregator.
//!
//! Holds the [`CameraTracker`]s in priority order and answers target
//! questions across all of them: which target is nearest, which visible
//! marker stands for a target on our alliance, and where the robot has to
//! be to engage it.  Every query returns `None` when nothing resolves; that
//! is the common case, not an error.

use std::sync::Arc;

use fieldpose_types::{Alliance, MarkerObservation, Pose2d};
use serde::Serialize;

use crate::registry::{FieldTarget, TargetRegistry};
use crate::tracker::{CameraEstimate, CameraTracker};

/// Snapshot of what the vision system currently sees.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct VisionStatus {
    pub cameras: Vec<String>,
    pub connected: Vec<String>,
    pub with_targets: Vec<String>,
    pub visible_targets: Vec<FieldTarget>,
}

pub struct VisionAggregator {
    trackers: Vec<CameraTracker>,
    registry: Arc<TargetRegistry>,
}

impl VisionAggregator {
    /// `trackers` are consulted in the given order; earlier cameras win
    /// ties.
    pub fn new(registry: Arc<TargetRegistry>, trackers: Vec<CameraTracker>) -> Self {
        Self { trackers, registry }
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn trackers(&self) -> &[CameraTracker] {
        &self.trackers
    }

    /// Poll every tracker.  Returns the total number of batches processed.
    pub fn poll(&mut self, now: f64) -> usize {
        self.trackers.iter_mut().map(|t| t.poll_latest(now)).sum()
    }

    /// Usable estimates from every camera, oldest capture first.  Equal
    /// timestamps keep camera priority order.
    pub fn take_estimates(&mut self) -> Vec<CameraEstimate> {
        let mut all: Vec<CameraEstimate> = self
            .trackers
            .iter_mut()
            .flat_map(|t| t.take_estimates())
            .collect();
        all.sort_by(|a, b| a.timestamp().total_cmp(&b.timestamp()));
        all
    }

    /// Visible targets across cameras in priority order, duplicates removed.
    pub fn visible_targets(&self) -> Vec<FieldTarget> {
        let mut targets = Vec::new();
        for t in self.trackers.iter().flat_map(|t| t.visible_targets()) {
            if !targets.contains(t) {
                targets.push(*t);
            }
        }
        targets
    }

    /// The visible target whose aim pose is closest to `current`.  Targets
    /// with no alliance marker in view rank as infinitely far, so `None`
    /// only means nothing is visible.
    pub fn nearest_target(&self, current: Pose2d, alliance: Alliance) -> Option<FieldTarget> {
        let mut best: Option<(FieldTarget, f64)> = None;
        for target in self.visible_targets() {
            let distance = self
                .distance_to(target, alliance, current)
                .unwrap_or(f64::INFINITY);
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((target, distance));
            }
        }
        best.map(|(t, _)| t)
    }

    /// First marker, by camera priority then detection order, that
    /// represents `target` for `alliance`.
    pub fn closest_marker_for(
        &self,
        target: FieldTarget,
        alliance: Alliance,
    ) -> Option<&MarkerObservation> {
        let ids = self.registry.ids(target, alliance);
        self.trackers
            .iter()
            .flat_map(|t| t.markers())
            .find(|m| ids.contains(&m.marker_id))
    }

    /// Pose the robot should occupy to engage `target`.
    pub fn aim_pose(&self, target: FieldTarget, alliance: Alliance) -> Option<Pose2d> {
        let marker = self.closest_marker_for(target, alliance)?;
        let pose = self.registry.pose_for_marker(marker.marker_id)?;
        Some(pose.to_pose2d().transform_by(self.registry.approach_offset(target)))
    }

    pub fn distance_to(&self, target: FieldTarget, alliance: Alliance, current: Pose2d) -> Option<f64> {
        self.aim_pose(target, alliance)
            .map(|aim| aim.translation.distance(current.translation))
    }

    /// Aim pose for a specific detected marker, using the target it belongs
    /// to on either alliance.
    pub fn aim_pose_for_marker(&self, observation: &MarkerObservation) -> Option<Pose2d> {
        let target = self.registry.target_for_marker(observation.marker_id)?;
        let pose = self.registry.pose_for_marker(observation.marker_id)?;
        Some(pose.to_pose2d().transform_by(self.registry.approach_offset(target)))
    }

    pub fn distance_to_marker(&self, observation: &MarkerObservation, current: Pose2d) -> Option<f64> {
        self.aim_pose_for_marker(observation)
            .map(|aim| aim.translation.distance(current.translation))
    }

    pub fn status(&self) -> VisionStatus {
        VisionStatus {
            cameras: self.camera_names(|_| true),
            connected: self.camera_names(|t| t.is_connected()),
            with_targets: self.camera_names(|t| !t.visible_targets().is_empty()),
            visible_targets: self.visible_targets(),
        }
    }

    fn camera_names(&self, pred: impl Fn(&CameraTracker) -> bool) -> Vec<String> {
        self.trackers
            .iter()
            .filter(|t| pred(t))
            .map(|t| t.name().to_string())
            .collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FieldLayout;
    use crate::registry::{TargetSpec, default_targets};
    use crate::tracker::TrackerSettings;
    use fieldpose_hal::{CoprocessorSolver, SimCamera};
    use fieldpose_types::{
        DetectionBatch, Rotation2d, Transform2d, Transform3d, Translation2d,
    };

    fn registry_with(targets: Vec<(FieldTarget, TargetSpec)>) -> Arc<TargetRegistry> {
        Arc::new(TargetRegistry::new(FieldLayout::bundled().unwrap(), targets).unwrap())
    }

    fn tracker(name: &str, ids: &[u32], ts: f64, reg: &Arc<TargetRegistry>) -> CameraTracker {
        let mut cam = SimCamera::new(name, Transform3d::identity());
        cam.push_batch(DetectionBatch {
            capture_timestamp: ts,
            observations: ids.iter().map(|id| MarkerObservation::new(*id)).collect(),
            multi_marker_camera_pose: None,
        });
        CameraTracker::new(
            Box::new(cam),
            Box::new(CoprocessorSolver::default()),
            Transform3d::identity(),
            reg.clone(),
            TrackerSettings::default(),
        )
    }

    fn aggregator(cameras: &[(&str, Vec<u32>)]) -> VisionAggregator {
        let reg = registry_with(default_targets());
        let trackers = cameras
            .iter()
            .map(|(name, ids)| tracker(name, ids, 0.0, &reg))
            .collect();
        let mut agg = VisionAggregator::new(reg, trackers);
        agg.poll(0.0);
        agg
    }

    #[test]
    fn alliance_mismatch_is_not_a_match() {
        let agg = aggregator(&[("front", vec![12])]);
        assert!(agg.visible_targets().contains(&FieldTarget::CoralStation));
        assert!(agg.closest_marker_for(FieldTarget::CoralStation, Alliance::Blue).is_none());
        assert_eq!(
            agg.closest_marker_for(FieldTarget::CoralStation, Alliance::Red).map(|m| m.marker_id),
            Some(12)
        );
        assert!(agg.aim_pose(FieldTarget::CoralStation, Alliance::Blue).is_none());
        assert_eq!(
            agg.nearest_target(Pose2d::origin(), Alliance::Blue),
            Some(FieldTarget::CoralStation)
        );
    }

    #[test]
    fn resolvable_target_beats_unresolved_one() {
        // Marker 12 is red CoralStation, 18 is blue Reef.
        let agg = aggregator(&[("front", vec![12, 18])]);
        assert_eq!(
            agg.nearest_target(Pose2d::origin(), Alliance::Blue),
            Some(FieldTarget::Reef)
        );
        assert!(aggregator(&[("front", vec![])])
            .nearest_target(Pose2d::origin(), Alliance::Blue)
            .is_none());
    }

    #[test]
    fn closest_marker_scans_cameras_in_priority_order() {
        let agg = aggregator(&[("front", vec![3, 19]), ("back", vec![17])]);
        let m = agg.closest_marker_for(FieldTarget::Reef, Alliance::Blue).unwrap();
        assert_eq!(m.marker_id, 19);

        let agg = aggregator(&[("front", vec![3]), ("back", vec![22, 17])]);
        let m = agg.closest_marker_for(FieldTarget::Reef, Alliance::Blue).unwrap();
        assert_eq!(m.marker_id, 22);
    }

    #[test]
    fn aim_pose_composes_approach_offset() {
        let mut targets = default_targets();
        let approach = Transform2d::new(Translation2d::new(0.6, 0.0), Rotation2d::from_degrees(180.0));
        targets[3].1.approach = approach;
        let reg = registry_with(targets);
        let mut agg = VisionAggregator::new(reg.clone(), vec![tracker("front", &[18], 0.0, &reg)]);
        agg.poll(0.0);

        // Tag 18 faces -X, so the robot sits 0.6 m toward -X facing +X.
        let aim = agg.aim_pose(FieldTarget::Reef, Alliance::Blue).unwrap();
        assert!((aim.x() - (3.658 - 0.6)).abs() < 1e-6);
        assert!((aim.y() - 4.026).abs() < 1e-6);
        assert!(aim.heading().wrapped().radians().abs() < 1e-6);

        let current = Pose2d::new(1.0, 4.026, Rotation2d::zero());
        let d = agg.distance_to(FieldTarget::Reef, Alliance::Blue, current).unwrap();
        assert!((d - (3.058 - 1.0)).abs() < 1e-6);
    }

    #[test]
    fn aim_pose_round_trips_through_approach_for_every_target() {
        let mut targets = default_targets();
        for (i, (_, spec)) in targets.iter_mut().enumerate() {
            spec.approach = Transform2d::new(
                Translation2d::new(0.4 + i as f64 * 0.1, -0.2),
                Rotation2d::from_degrees(30.0 * i as f64),
            );
        }
        let reg = registry_with(targets);
        for target in FieldTarget::ALL {
            for alliance in [Alliance::Blue, Alliance::Red] {
                let ids = reg.ids(target, alliance).to_vec();
                let mut agg = VisionAggregator::new(reg.clone(), vec![tracker("cam", &ids, 0.0, &reg)]);
                agg.poll(0.0);
                let aim = agg.aim_pose(target, alliance).unwrap();
                let back = aim.transform_by(reg.approach_offset(target).inverse());
                let raw = reg.pose_for_marker(ids[0]).unwrap().to_pose2d();
                assert!(back.translation.distance(raw.translation) < 1e-9, "{target} {alliance}");
                assert!(back.heading().delta_to(raw.heading()).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn nearest_target_picks_smallest_aim_distance() {
        // Robot at the blue reef; processor (16) is far away.
        let agg = aggregator(&[("front", vec![16, 3]), ("back", vec![18])]);
        let current = Pose2d::new(3.0, 4.0, Rotation2d::zero());
        assert_eq!(agg.nearest_target(current, Alliance::Blue), Some(FieldTarget::Reef));
        // Standing next to tag 3, the processor wins.
        let current = Pose2d::new(11.5, 7.5, Rotation2d::zero());
        assert_eq!(agg.nearest_target(current, Alliance::Blue), Some(FieldTarget::Processor));
    }

    #[test]
    fn nearest_target_ties_go_to_camera_priority() {
        // Tags 4 and 5 both face +X at the same x; the approach offsets
        // land both aim poses on exactly (9.276, 0).
        let mut targets = default_targets();
        targets[1].1 = TargetSpec {
            approach: Transform2d::new(Translation2d::new(0.0, -1.915), Rotation2d::zero()),
            ..TargetSpec::new(vec![5], vec![16])
        };
        targets[2].1 = TargetSpec {
            approach: Transform2d::new(Translation2d::new(0.0, -6.138), Rotation2d::zero()),
            ..TargetSpec::new(vec![4], vec![15])
        };
        let reg = registry_with(targets);
        let current = Pose2d::new(3.0, 2.0, Rotation2d::zero());

        let trackers = vec![tracker("a", &[5], 0.0, &reg), tracker("b", &[4], 0.0, &reg)];
        let mut agg = VisionAggregator::new(reg.clone(), trackers);
        agg.poll(0.0);
        assert_eq!(
            agg.aim_pose(FieldTarget::Processor, Alliance::Blue),
            agg.aim_pose(FieldTarget::Barge, Alliance::Blue)
        );
        assert_eq!(agg.nearest_target(current, Alliance::Blue), Some(FieldTarget::Processor));

        let trackers = vec![tracker("a", &[4], 0.0, &reg), tracker("b", &[5], 0.0, &reg)];
        let mut agg = VisionAggregator::new(reg, trackers);
        agg.poll(0.0);
        assert_eq!(agg.nearest_target(current, Alliance::Blue), Some(FieldTarget::Barge));
    }

    #[test]
    fn marker_level_queries_ignore_alliance() {
        let agg = aggregator(&[("front", vec![7])]);
        let obs = MarkerObservation::new(7);
        let aim = agg.aim_pose_for_marker(&obs).unwrap();
        assert!((aim.x() - 13.891).abs() < 1e-9);
        let d = agg
            .distance_to_marker(&obs, Pose2d::new(13.891, 0.026, Rotation2d::zero()))
            .unwrap();
        assert!((d - 4.0).abs() < 1e-9);
        assert!(agg.aim_pose_for_marker(&MarkerObservation::new(99)).is_none());
    }

    #[test]
    fn nothing_visible_yields_none_everywhere() {
        let agg = aggregator(&[("front", vec![]), ("back", vec![])]);
        assert!(agg.visible_targets().is_empty());
        assert!(agg.nearest_target(Pose2d::origin(), Alliance::Red).is_none());
        assert!(agg.distance_to(FieldTarget::Reef, Alliance::Red, Pose2d::origin()).is_none());
    }

    #[test]
    fn status_lists_cameras_and_targets() {
        let agg = aggregator(&[("front", vec![18, 19]), ("back", vec![])]);
        let status = agg.status();
        assert_eq!(status.cameras, vec!["front", "back"]);
        assert_eq!(status.connected, vec!["front", "back"]);
        assert_eq!(status.with_targets, vec!["front"]);
        assert_eq!(status.visible_targets, vec![FieldTarget::Reef]);
    }

    #[test]
    fn estimates_merge_in_timestamp_order() {
        let reg = registry_with(default_targets());
        let mk = |name: &str, ts: f64| {
            let mut cam = SimCamera::new(name, Transform3d::identity());
            cam.render(Pose2d::new(2.0, 4.0, Rotation2d::zero()), ts, reg.layout());
            CameraTracker::new(
                Box::new(cam),
                Box::new(CoprocessorSolver::default()),
                Transform3d::identity(),
                reg.clone(),
                TrackerSettings::default(),
            )
        };
        let mut agg = VisionAggregator::new(reg.clone(), vec![mk("late", 0.30), mk("early", 0.10)]);
        agg.poll(0.5);
        let est = agg.take_estimates();
        let order: Vec<(&str, f64)> = est.iter().map(|e| (e.camera.as_str(), e.timestamp())).collect();
        assert_eq!(order, vec![("early", 0.10), ("late", 0.30)]);
        assert!(agg.take_estimates().is_empty());
    }
}
