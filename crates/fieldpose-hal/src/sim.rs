//! In-process simulation drivers for headless testing without a robot.
//!
//! [`SimDrive`] integrates commanded module states into encoder distances, a
//! gyro and a ground-truth pose.  [`SimCamera`] renders synthetic marker
//! detections from that ground truth, so the full estimator stack can run in
//! CI pipelines and in the `fieldpose` demo binary.
//!
//! # Example
//!
//! ```rust
//! use fieldpose_hal::drive::DriveIo;
//! use fieldpose_hal::sim::SimDrive;
//! use fieldpose_hal::swerve::SwerveKinematics;
//! use fieldpose_types::{ModuleState, Rotation2d, Translation2d};
//!
//! let kin = SwerveKinematics::new(
//!     vec![Translation2d::new(0.3, 0.3), Translation2d::new(-0.3, -0.3),
//!          Translation2d::new(0.3, -0.3), Translation2d::new(-0.3, 0.3)],
//!     3.0,
//! ).unwrap();
//! let mut drive = SimDrive::new(kin);
//! drive.set_module_states(&[ModuleState::new(1.0, Rotation2d::zero()); 4]).unwrap();
//! drive.step(0.5);
//! assert!((drive.true_pose().x() - 0.5).abs() < 1e-9);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use fieldpose_types::{
    DetectionBatch, MarkerObservation, ModulePosition, ModuleState, Pose2d, Pose3d, PoseError,
    Rotation2d, Transform3d, Vec3,
};

use parking_lot::Mutex;

use crate::camera::{Camera, MarkerLayout};
use crate::drive::DriveIo;
use crate::swerve::SwerveKinematics;

// ────────────────────────────────────────────────────────────────────────────
// Simulated drivetrain
// ────────────────────────────────────────────────────────────────────────────

/// A perfect-traction swerve drivetrain.  Modules snap to their commanded
/// azimuth and speed; the gyro may be given a constant drift so odometry
/// diverges from ground truth the way a real one does.
pub struct SimDrive {
    kinematics: SwerveKinematics,
    positions: Vec<ModulePosition>,
    commanded: Vec<ModuleState>,
    gyro: f64,
    gyro_drift: f64,
    true_pose: Pose2d,
}

impl SimDrive {
    pub fn new(kinematics: SwerveKinematics) -> Self {
        let n = kinematics.module_count();
        Self {
            kinematics,
            positions: vec![ModulePosition::default(); n],
            commanded: vec![ModuleState::default(); n],
            gyro: 0.0,
            gyro_drift: 0.0,
            true_pose: Pose2d::origin(),
        }
    }

    /// Gyro drift in rad/s, added on every [`step`](Self::step).
    pub fn with_gyro_drift(mut self, rad_per_sec: f64) -> Self {
        self.gyro_drift = rad_per_sec;
        self
    }

    /// Place the robot on the field.  Encoders and gyro are untouched, as on
    /// a real robot.
    pub fn with_true_pose(mut self, pose: Pose2d) -> Self {
        self.true_pose = pose;
        self
    }

    pub fn true_pose(&self) -> Pose2d {
        self.true_pose
    }

    pub fn commanded(&self) -> &[ModuleState] {
        &self.commanded
    }

    /// Advance the simulation by `dt` seconds under the current command.
    pub fn step(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        let start = self.positions.clone();
        for (p, s) in self.positions.iter_mut().zip(&self.commanded) {
            p.distance += s.speed * dt;
            p.angle = s.angle;
        }
        if let Ok(twist) = self.kinematics.to_twist(&start, &self.positions) {
            self.true_pose = self.true_pose.exp(twist);
            self.gyro += twist.dtheta;
        }
        self.gyro += self.gyro_drift * dt;
    }
}

impl DriveIo for SimDrive {
    fn module_positions(&self) -> Vec<ModulePosition> {
        self.positions.clone()
    }

    fn gyro_heading(&self) -> Rotation2d {
        Rotation2d::new(self.gyro)
    }

    fn set_module_states(&mut self, states: &[ModuleState]) -> Result<(), PoseError> {
        if states.len() != self.positions.len() {
            return Err(PoseError::ModuleCount {
                expected: self.positions.len(),
                actual: states.len(),
            });
        }
        self.commanded = states.to_vec();
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated camera
// ────────────────────────────────────────────────────────────────────────────

/// A simulated fiducial camera.
///
/// Batches are either pushed verbatim (for scripted tests) or rendered from
/// a ground-truth robot pose with [`render`](Self::render).
pub struct SimCamera {
    name: String,
    connected: bool,
    robot_to_camera: Transform3d,
    max_range: f64,
    horizontal_fov: f64,
    pending: VecDeque<DetectionBatch>,
}

impl SimCamera {
    pub fn new(name: impl Into<String>, robot_to_camera: Transform3d) -> Self {
        Self {
            name: name.into(),
            connected: true,
            robot_to_camera,
            max_range: 6.0,
            horizontal_fov: 70f64.to_radians(),
            pending: VecDeque::new(),
        }
    }

    pub fn with_max_range(mut self, metres: f64) -> Self {
        self.max_range = metres;
        self
    }

    pub fn with_horizontal_fov(mut self, radians: f64) -> Self {
        self.horizontal_fov = radians;
        self
    }

    pub fn robot_to_camera(&self) -> Transform3d {
        self.robot_to_camera
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Queue a batch for the next [`Camera::unread_batches`] call.
    pub fn push_batch(&mut self, batch: DetectionBatch) {
        self.pending.push_back(batch);
    }

    /// Render what the camera would see from `robot_pose` and queue it.
    ///
    /// A marker is seen when it lies in front of the lens, inside the
    /// horizontal field of view and range, and faces the camera.  Two or
    /// more markers also produce a multi-marker camera pose.  Returns the
    /// number of markers seen.
    pub fn render(&mut self, robot_pose: Pose2d, timestamp: f64, layout: &dyn MarkerLayout) -> usize {
        let camera = Pose3d::from_pose2d(robot_pose).transform_by(self.robot_to_camera);
        let field_to_camera = camera.as_transform().inverse();

        let mut ids = layout.marker_ids();
        ids.sort_unstable();

        let mut observations = Vec::new();
        for id in ids {
            let Some(marker) = layout.marker_pose(id) else {
                continue;
            };
            let camera_to_marker = field_to_camera.compose(marker.as_transform());
            let t = camera_to_marker.translation;
            let range = (t.x * t.x + t.y * t.y + t.z * t.z).sqrt();
            let yaw = t.y.atan2(t.x);
            if t.x <= 0.0 || range > self.max_range || yaw.abs() > self.horizontal_fov / 2.0 {
                continue;
            }
            // Marker faces along its own +X axis.
            let normal = marker.rotation.rotate(Vec3::new(1.0, 0.0, 0.0));
            let to_camera = camera.translation.add(marker.translation.neg());
            if normal.x * to_camera.x + normal.y * to_camera.y + normal.z * to_camera.z <= 0.0 {
                continue;
            }
            observations.push(MarkerObservation {
                marker_id: id,
                ambiguity: 0.05,
                yaw,
                pitch: t.z.atan2(t.x.hypot(t.y)),
                camera_to_marker: Some(camera_to_marker),
            });
        }

        let seen = observations.len();
        self.pending.push_back(DetectionBatch {
            capture_timestamp: timestamp,
            multi_marker_camera_pose: (seen >= 2).then_some(camera),
            observations,
        });
        seen
    }
}

impl Camera for SimCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn unread_batches(&mut self) -> Vec<DetectionBatch> {
        if !self.connected {
            return Vec::new();
        }
        self.pending.drain(..).collect()
    }
}

/// A cloneable [`SimCamera`] handle.  One clone goes to a tracker, the
/// other stays with the simulation loop that renders into it.
#[derive(Clone)]
pub struct SharedSimCamera {
    name: String,
    inner: Arc<Mutex<SimCamera>>,
}

impl SharedSimCamera {
    pub fn new(camera: SimCamera) -> Self {
        Self {
            name: camera.name.clone(),
            inner: Arc::new(Mutex::new(camera)),
        }
    }

    pub fn robot_to_camera(&self) -> Transform3d {
        self.inner.lock().robot_to_camera()
    }

    pub fn set_connected(&self, connected: bool) {
        self.inner.lock().set_connected(connected);
    }

    pub fn push_batch(&self, batch: DetectionBatch) {
        self.inner.lock().push_batch(batch);
    }

    /// See [`SimCamera::render`].
    pub fn render(&self, robot_pose: Pose2d, timestamp: f64, layout: &dyn MarkerLayout) -> usize {
        self.inner.lock().render(robot_pose, timestamp, layout)
    }
}

impl Camera for SharedSimCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().is_connected()
    }

    fn unread_batches(&mut self) -> Vec<DetectionBatch> {
        self.inner.lock().unread_batches()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
