//! Pose Estimator.
//!
//! Owns the authoritative robot pose.  Every control tick integrates swerve
//! odometry; in [`EstimatorMode::VisionCorrected`] camera estimates pull the
//! pose toward the vision solution with a per-axis Kalman gain
//!
//! ```text
//! k = q / (q + r)     q = σ_state²   r = σ_vision²
//! ```
//!
//! Vision frames arrive late.  Each correction is applied at its capture
//! time against a short odometry history, and odometry gathered since then
//! is replayed on top.  A correction that lands before earlier-accepted
//! later ones is inserted in order and the later ones are re-applied.
//!
//! # Example
//!
//! ```rust
//! use fieldpose_hal::SwerveKinematics;
//! use fieldpose_perception::estimator::{EstimatorSettings, PoseEstimator};
//! use fieldpose_types::{ModulePosition, Pose2d, Rotation2d, Translation2d};
//!
//! let kin = SwerveKinematics::new(
//!     vec![Translation2d::new(0.3, 0.3), Translation2d::new(0.3, -0.3),
//!          Translation2d::new(-0.3, 0.3), Translation2d::new(-0.3, -0.3)],
//!     3.0,
//! ).unwrap();
//! let mut est = PoseEstimator::new(kin, EstimatorSettings::default());
//! let start = vec![ModulePosition::default(); 4];
//! est.reset_pose(0.0, Pose2d::origin(), Rotation2d::zero(), &start).unwrap();
//!
//! let moved = vec![ModulePosition::new(0.02, Rotation2d::zero()); 4];
//! let pose = est.update(0.02, Rotation2d::zero(), &moved).unwrap();
//! assert!((pose.x() - 0.02).abs() < 1e-9);
//! ```

use std::collections::VecDeque;

use fieldpose_hal::SwerveKinematics;
use fieldpose_types::{
    ConfidenceVector, ModulePosition, Pose2d, PoseError, Rotation2d, Transform2d, Translation2d,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::tracker::CameraEstimate;

// ────────────────────────────────────────────────────────────────────────────
// Settings and outcomes
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorMode {
    #[default]
    OdometryOnly,
    VisionCorrected,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorSettings {
    /// Trust in odometry, per axis (x m, y m, heading rad).
    pub state_std_devs: ConfidenceVector,
    /// Corrections older than this (seconds) relative to the newest
    /// odometry sample are discarded.
    pub stale_window: f64,
    /// Seconds of odometry kept for late corrections.
    pub history_window: f64,
    pub mode: EstimatorMode,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            state_std_devs: ConfidenceVector::new(0.1, 0.1, 0.1),
            stale_window: 0.25,
            history_window: 1.5,
            mode: EstimatorMode::OdometryOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiscardReason {
    VisionDisabled,
    NoMarkers,
    InfiniteConfidence,
    /// Captured `age` seconds before the newest odometry sample.
    Stale { age: f64 },
    /// Captured before the last reset or before any odometry.
    PredatesHistory,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CorrectionOutcome {
    Applied,
    Discarded(DiscardReason),
}

impl CorrectionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CorrectionOutcome::Applied)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// History records
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct OdometrySample {
    timestamp: f64,
    pose: Pose2d,
}

/// An accepted vision measurement, kept so it can be re-applied.
#[derive(Debug, Clone, Copy)]
struct VisionMeasurement {
    timestamp: f64,
    pose: Pose2d,
    std_devs: ConfidenceVector,
}

/// Corrected pose and the odometry pose it was computed against, both at
/// the measurement's capture time.
#[derive(Debug, Clone, Copy)]
struct VisionUpdate {
    corrected: Pose2d,
    odometry: Pose2d,
}

impl VisionUpdate {
    /// Carry the correction forward to a later odometry pose.
    fn compensate(&self, odometry: Pose2d) -> Pose2d {
        self.corrected
            .transform_by(Transform2d::between(self.odometry, odometry))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PoseEstimator
// ────────────────────────────────────────────────────────────────────────────

pub struct PoseEstimator {
    kinematics: SwerveKinematics,
    settings: EstimatorSettings,
    odometry_active: bool,
    gyro_offset: Rotation2d,
    last_positions: Vec<ModulePosition>,
    last_heading: Rotation2d,
    odometry_pose: Pose2d,
    history: VecDeque<OdometrySample>,
    /// Sorted by timestamp; `updates[i]` belongs to `measurements[i]`.
    measurements: Vec<VisionMeasurement>,
    updates: Vec<VisionUpdate>,
    estimate: Pose2d,
    last_update: f64,
}

impl PoseEstimator {
    /// Estimator at the origin with zeroed module positions.  Call
    /// [`reset_pose`](Self::reset_pose) with real readings before use.
    pub fn new(kinematics: SwerveKinematics, settings: EstimatorSettings) -> Self {
        let n = kinematics.module_count();
        let mut history = VecDeque::new();
        history.push_back(OdometrySample {
            timestamp: 0.0,
            pose: Pose2d::origin(),
        });
        Self {
            kinematics,
            settings,
            odometry_active: true,
            gyro_offset: Rotation2d::zero(),
            last_positions: vec![ModulePosition::default(); n],
            last_heading: Rotation2d::zero(),
            odometry_pose: Pose2d::origin(),
            history,
            measurements: Vec::new(),
            updates: Vec::new(),
            estimate: Pose2d::origin(),
            last_update: 0.0,
        }
    }

    pub fn kinematics(&self) -> &SwerveKinematics {
        &self.kinematics
    }

    /// Current best estimate.
    pub fn pose(&self) -> Pose2d {
        self.estimate
    }

    /// Pure odometry, never touched by vision.
    pub fn odometry_pose(&self) -> Pose2d {
        self.odometry_pose
    }

    /// Host time of the last integration or reset.
    pub fn last_update(&self) -> f64 {
        self.last_update
    }

    pub fn mode(&self) -> EstimatorMode {
        self.settings.mode
    }

    pub fn set_mode(&mut self, mode: EstimatorMode) {
        if mode != self.settings.mode {
            info!(?mode, "estimator mode changed");
        }
        self.settings.mode = mode;
    }

    pub fn is_odometry_active(&self) -> bool {
        self.odometry_active
    }

    /// Suspend or resume tick-driven integration.  While suspended
    /// [`update`](Self::update) is a no-op but [`integrate`](Self::integrate)
    /// still works.
    pub fn set_odometry_active(&mut self, active: bool) {
        if active != self.odometry_active {
            info!(active, "odometry integration toggled");
        }
        self.odometry_active = active;
    }

    /// Hard overwrite.  `gyro` and `positions` are the raw readings at the
    /// moment of the reset; they become the new odometry baseline.  All
    /// vision correction state is dropped.
    pub fn reset_pose(
        &mut self,
        now: f64,
        pose: Pose2d,
        gyro: Rotation2d,
        positions: &[ModulePosition],
    ) -> Result<(), PoseError> {
        self.check_modules(positions)?;
        self.gyro_offset = pose.heading().minus(gyro);
        self.last_heading = pose.heading();
        self.last_positions = positions.to_vec();
        self.odometry_pose = pose;
        self.estimate = pose;
        self.last_update = now;
        self.history.clear();
        self.history.push_back(OdometrySample {
            timestamp: now,
            pose,
        });
        self.measurements.clear();
        self.updates.clear();
        info!(x = pose.x(), y = pose.y(), heading_deg = pose.heading().degrees(), "pose reset");
        Ok(())
    }

    /// Tick-driven integration; skipped while odometry is suspended.
    /// Returns the current estimate either way.
    pub fn update(
        &mut self,
        now: f64,
        gyro: Rotation2d,
        positions: &[ModulePosition],
    ) -> Result<Pose2d, PoseError> {
        if !self.odometry_active {
            return Ok(self.estimate);
        }
        self.integrate(now, gyro, positions)
    }

    /// Integrate one set of readings regardless of the suspend flag.
    pub fn integrate(
        &mut self,
        now: f64,
        gyro: Rotation2d,
        positions: &[ModulePosition],
    ) -> Result<Pose2d, PoseError> {
        self.check_modules(positions)?;
        let mut twist = self.kinematics.to_twist(&self.last_positions, positions)?;
        let heading = gyro.plus(self.gyro_offset);
        twist.dtheta = self.last_heading.delta_to(heading);

        let moved = self.odometry_pose.exp(twist);
        self.odometry_pose = Pose2d {
            translation: moved.translation,
            rotation: heading.wrapped(),
        };
        self.last_positions = positions.to_vec();
        self.last_heading = heading;
        self.last_update = now;

        // Out-of-order host time would corrupt the interpolation order.
        if self.history.back().is_none_or(|s| now >= s.timestamp) {
            self.history.push_back(OdometrySample {
                timestamp: now,
                pose: self.odometry_pose,
            });
        }
        self.trim_history(now);

        self.estimate = match self.updates.last() {
            Some(u) => u.compensate(self.odometry_pose),
            None => self.odometry_pose,
        };
        Ok(self.estimate)
    }

    /// Fuse a graded camera estimate.
    pub fn add_camera_estimate(&mut self, estimate: &CameraEstimate) -> CorrectionOutcome {
        if estimate.known_markers == 0 {
            return CorrectionOutcome::Discarded(DiscardReason::NoMarkers);
        }
        self.add_vision_measurement(estimate.pose(), estimate.timestamp(), estimate.confidence)
    }

    /// Fuse a vision pose captured at `timestamp` with per-axis standard
    /// deviations `std_devs`.
    pub fn add_vision_measurement(
        &mut self,
        pose: Pose2d,
        timestamp: f64,
        std_devs: ConfidenceVector,
    ) -> CorrectionOutcome {
        if self.settings.mode != EstimatorMode::VisionCorrected {
            return CorrectionOutcome::Discarded(DiscardReason::VisionDisabled);
        }
        if !std_devs.is_finite() {
            debug!(timestamp, "vision measurement with infinite uncertainty ignored");
            return CorrectionOutcome::Discarded(DiscardReason::InfiniteConfidence);
        }
        let (Some(oldest), Some(newest)) = (self.history.front(), self.history.back()) else {
            return CorrectionOutcome::Discarded(DiscardReason::PredatesHistory);
        };
        let age = newest.timestamp - timestamp;
        if age > self.settings.stale_window {
            warn!(age_s = age, timestamp, "stale vision correction discarded");
            return CorrectionOutcome::Discarded(DiscardReason::Stale { age });
        }
        if timestamp < oldest.timestamp {
            warn!(timestamp, "vision correction predates odometry history");
            return CorrectionOutcome::Discarded(DiscardReason::PredatesHistory);
        }

        let index = self
            .measurements
            .partition_point(|m| m.timestamp <= timestamp);
        self.measurements.insert(
            index,
            VisionMeasurement {
                timestamp,
                pose,
                std_devs,
            },
        );
        self.updates.truncate(index);
        for i in index..self.measurements.len() {
            let m = self.measurements[i];
            let update = self.correct(&m);
            self.updates.push(update);
        }

        if let Some(u) = self.updates.last() {
            self.estimate = u.compensate(self.odometry_pose);
        }
        CorrectionOutcome::Applied
    }

    /// Best estimate at a past `timestamp`, or `None` outside the history.
    pub fn sample_at(&self, timestamp: f64) -> Option<Pose2d> {
        let odometry = self.odometry_at(timestamp)?;
        Some(self.corrected_at(timestamp, odometry, self.updates.len()))
    }

    fn correct(&self, m: &VisionMeasurement) -> VisionUpdate {
        // `m` is already in `measurements`, so only updates before it count.
        let prior_count = self.updates.len();
        let odometry = self
            .odometry_at(m.timestamp)
            .unwrap_or(self.odometry_pose);
        let prior = self.corrected_at(m.timestamp, odometry, prior_count);

        let gain = kalman_gain(self.settings.state_std_devs, m.std_devs);
        let heading_error = prior.heading().delta_to(m.pose.heading());
        let corrected = Pose2d {
            translation: Translation2d::new(
                prior.x() + gain[0] * (m.pose.x() - prior.x()),
                prior.y() + gain[1] * (m.pose.y() - prior.y()),
            ),
            rotation: Rotation2d::new(prior.heading().radians() + gain[2] * heading_error).wrapped(),
        };
        debug!(
            timestamp = m.timestamp,
            gain_x = gain[0],
            gain_y = gain[1],
            gain_heading = gain[2],
            "vision correction applied"
        );
        VisionUpdate {
            corrected,
            odometry,
        }
    }

    /// Odometry pose at `timestamp` compensated by the latest of the first
    /// `upto` updates captured at or before it.
    fn corrected_at(&self, timestamp: f64, odometry: Pose2d, upto: usize) -> Pose2d {
        let count = self.measurements[..upto.min(self.measurements.len())]
            .partition_point(|m| m.timestamp <= timestamp);
        match count.checked_sub(1).and_then(|i| self.updates.get(i)) {
            Some(u) => u.compensate(odometry),
            None => odometry,
        }
    }

    /// Interpolated odometry pose.  Times past the newest sample clamp to it.
    fn odometry_at(&self, timestamp: f64) -> Option<Pose2d> {
        let first = self.history.front()?;
        if timestamp < first.timestamp {
            return None;
        }
        let after = self.history.partition_point(|s| s.timestamp <= timestamp);
        if after == self.history.len() {
            return self.history.back().map(|s| s.pose);
        }
        let a = self.history[after - 1];
        let b = self.history[after];
        let span = b.timestamp - a.timestamp;
        let t = if span > 0.0 {
            (timestamp - a.timestamp) / span
        } else {
            0.0
        };
        Some(a.pose.interpolate(b.pose, t))
    }

    fn trim_history(&mut self, now: f64) {
        let horizon = now - self.settings.history_window;
        while self.history.len() > 1 && self.history[1].timestamp <= horizon {
            self.history.pop_front();
        }
        // Keep the newest update at or before the horizon; it still
        // compensates everything after it.
        let Some(oldest) = self.history.front().map(|s| s.timestamp) else {
            return;
        };
        let keep_from = self
            .measurements
            .partition_point(|m| m.timestamp <= oldest)
            .saturating_sub(1);
        if keep_from > 0 {
            self.measurements.drain(..keep_from);
            self.updates.drain(..keep_from);
        }
    }

    fn check_modules(&self, positions: &[ModulePosition]) -> Result<(), PoseError> {
        let expected = self.kinematics.module_count();
        if positions.len() == expected {
            Ok(())
        } else {
            Err(PoseError::ModuleCount {
                expected,
                actual: positions.len(),
            })
        }
    }
}

/// Per-axis gain `q / (q + r)`; an axis with no odometry uncertainty
/// ignores vision entirely.
pub fn kalman_gain(state: ConfidenceVector, vision: ConfidenceVector) -> [f64; 3] {
    let q = state.as_array();
    let r = vision.as_array();
    let mut gain = [0.0; 3];
    for i in 0..3 {
        let (qq, rr) = (q[i] * q[i], r[i] * r[i]);
        gain[i] = if qq <= 0.0 { 0.0 } else { qq / (qq + rr) };
    }
    gain
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
