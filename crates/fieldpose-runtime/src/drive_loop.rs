//! [`DriveLoop`] – the fixed-period control tick.
//!
//! Each [`DriveLoop::on_tick`]:
//!
//! 1. reads module positions and the gyro from [`DriveIo`] and integrates
//!    them into the [`PoseEstimator`] (unless [`BackgroundOdometry`] owns
//!    integration),
//! 2. polls every camera without blocking,
//! 3. fuses the graded camera estimates in capture-time order.
//!
//! The estimator sits behind one mutex so an optional background
//! integrator can run on its own cadence; vision corrections and pose
//! reads take the same lock.  A pose reset is refused while the background
//! integrator is running.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use fieldpose_hal::{SimDrive, SwerveKinematics};
//! use fieldpose_perception::{EstimatorSettings, FieldLayout, PoseEstimator, TargetRegistry, VisionAggregator};
//! use fieldpose_runtime::drive_loop::{DriveLoop, SharedDrive};
//! use fieldpose_types::{Pose2d, Translation2d};
//!
//! let kin = SwerveKinematics::new(
//!     vec![Translation2d::new(0.3, 0.3), Translation2d::new(0.3, -0.3),
//!          Translation2d::new(-0.3, 0.3), Translation2d::new(-0.3, -0.3)],
//!     3.0,
//! ).unwrap();
//! let sim = Arc::new(Mutex::new(SimDrive::new(kin.clone())));
//! let drive: SharedDrive = sim.clone();
//! let registry = Arc::new(TargetRegistry::with_defaults(FieldLayout::bundled().unwrap()).unwrap());
//! let vision = VisionAggregator::new(registry, Vec::new());
//! let mut robot = DriveLoop::new(drive, PoseEstimator::new(kin, EstimatorSettings::default()), vision);
//!
//! robot.reset_pose(0.0, Pose2d::origin()).unwrap();
//! robot.drive(Translation2d::new(1.0, 0.0), 0.0, true).unwrap();
//! sim.lock().step(0.02);
//! let report = robot.on_tick(0.02).unwrap();
//! assert!((report.pose.x() - 0.02).abs() < 1e-9);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use fieldpose_hal::{Camera, CoprocessorSolver, DriveIo};
use fieldpose_perception::aggregator::{VisionAggregator, VisionStatus};
use fieldpose_perception::estimator::{CorrectionOutcome, EstimatorMode, PoseEstimator};
use fieldpose_perception::registry::{FieldTarget, TargetRegistry};
use fieldpose_perception::tracker::CameraTracker;
use fieldpose_types::{
    Alliance, ChassisVelocity, ModulePosition, ModuleState, Pose2d, PoseError, Rotation2d,
    Translation2d,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;

pub type SharedDrive = Arc<Mutex<dyn DriveIo>>;
pub type SharedEstimator = Arc<Mutex<PoseEstimator>>;

// ─────────────────────────────────────────────────────────────────────────────
// Clock
// ─────────────────────────────────────────────────────────────────────────────

/// Seconds since construction.  Clones share the epoch, so the tick and a
/// background integrator stamp odometry on the same timeline.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BackgroundOdometry
// ─────────────────────────────────────────────────────────────────────────────

/// Odometry integration on a dedicated thread.
///
/// The thread never holds the drive and estimator locks at the same time.
/// It exits on [`stop`](Self::stop), on drop, or after the first
/// integration error.
pub struct BackgroundOdometry {
    should_stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundOdometry {
    pub fn start(
        drive: SharedDrive,
        estimator: SharedEstimator,
        period: Duration,
        clock: MonotonicClock,
    ) -> Self {
        let should_stop = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&should_stop);
        info!(period_ms = period.as_millis() as u64, "background odometry started");

        let handle = thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                let (gyro, positions) = {
                    let d = drive.lock();
                    (d.gyro_heading(), d.module_positions())
                };
                let result = estimator.lock().update(clock.now(), gyro, &positions);
                if let Err(e) = result {
                    warn!(error = %e, "background odometry integration failed; stopping");
                    break;
                }
                thread::sleep(period);
            }
        });

        Self {
            should_stop,
            handle: Some(handle),
        }
    }

    /// True while the integration thread is alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("background odometry thread panicked");
            } else {
                info!("background odometry stopped");
            }
        }
    }
}

impl Drop for BackgroundOdometry {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DriveLoop
// ─────────────────────────────────────────────────────────────────────────────

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub pose: Pose2d,
    /// Detection batches processed across all cameras.
    pub batches: usize,
    pub corrections_applied: usize,
    pub corrections_discarded: usize,
}

pub struct DriveLoop {
    drive: SharedDrive,
    estimator: SharedEstimator,
    vision: VisionAggregator,
    alliance: Alliance,
    background: Option<BackgroundOdometry>,
}

impl DriveLoop {
    pub fn new(drive: SharedDrive, estimator: PoseEstimator, vision: VisionAggregator) -> Self {
        Self {
            drive,
            estimator: Arc::new(Mutex::new(estimator)),
            vision,
            alliance: Alliance::default(),
            background: None,
        }
    }

    /// Assemble a loop from configuration.  Each camera is matched to its
    /// `[[vision.cameras]]` entry by name for its mounting transform.
    ///
    /// # Errors
    ///
    /// Layout and registry errors, invalid drivetrain geometry, and
    /// [`PoseError::Config`] for a camera with no configuration entry.
    pub fn from_config(
        cfg: &Config,
        drive: SharedDrive,
        cameras: Vec<Box<dyn Camera>>,
    ) -> Result<Self, PoseError> {
        let layout = cfg.vision.load_layout()?;
        let registry = Arc::new(TargetRegistry::new(layout, cfg.target_specs())?);
        let settings = cfg.vision.tracker_settings();

        let mut trackers = Vec::with_capacity(cameras.len());
        for camera in cameras {
            let mount = cfg
                .vision
                .cameras
                .iter()
                .find(|c| c.name == camera.name())
                .ok_or_else(|| {
                    PoseError::Config(format!("camera {:?} has no [[vision.cameras]] entry", camera.name()))
                })?;
            trackers.push(CameraTracker::new(
                camera,
                Box::new(CoprocessorSolver::default()),
                mount.robot_to_camera(),
                Arc::clone(&registry),
                settings,
            ));
        }

        let estimator = PoseEstimator::new(cfg.drive.kinematics()?, cfg.estimator.settings());
        info!(
            cameras = trackers.len(),
            markers = registry.layout().len(),
            layout = registry.layout().source_name(),
            vision_enabled = cfg.estimator.vision_enabled,
            "drive loop assembled"
        );
        Ok(Self::new(drive, estimator, VisionAggregator::new(registry, trackers)))
    }

    pub fn alliance(&self) -> Alliance {
        self.alliance
    }

    pub fn set_alliance(&mut self, alliance: Alliance) {
        if alliance != self.alliance {
            info!(%alliance, "alliance changed");
        }
        self.alliance = alliance;
    }

    pub fn vision(&self) -> &VisionAggregator {
        &self.vision
    }

    /// Handle for snapshot reads from other threads.
    pub fn estimator(&self) -> SharedEstimator {
        Arc::clone(&self.estimator)
    }

    pub fn pose(&self) -> Pose2d {
        self.estimator.lock().pose()
    }

    pub fn set_vision_enabled(&mut self, enabled: bool) {
        let mode = if enabled {
            EstimatorMode::VisionCorrected
        } else {
            EstimatorMode::OdometryOnly
        };
        self.estimator.lock().set_mode(mode);
    }

    /// Suspend or resume integration, whichever context owns it.
    pub fn set_odometry_active(&mut self, active: bool) {
        self.estimator.lock().set_odometry_active(active);
    }

    /// Overwrite the pose with the drivetrain's current readings as the new
    /// odometry baseline.
    ///
    /// # Errors
    ///
    /// [`PoseError::OdometryRunning`] while background odometry is running.
    pub fn reset_pose(&mut self, now: f64, pose: Pose2d) -> Result<(), PoseError> {
        if self.is_background_running() {
            return Err(PoseError::OdometryRunning);
        }
        let (gyro, positions) = self.read_drive();
        self.estimator.lock().reset_pose(now, pose, gyro, &positions)
    }

    /// Run one control tick at host time `now` (seconds).
    pub fn on_tick(&mut self, now: f64) -> Result<TickReport, PoseError> {
        if !self.is_background_running() {
            let (gyro, positions) = self.read_drive();
            self.estimator.lock().update(now, gyro, &positions)?;
        }

        let batches = self.vision.poll(now);
        let estimates = self.vision.take_estimates();

        let mut est = self.estimator.lock();
        let mut applied = 0;
        let mut discarded = 0;
        for estimate in &estimates {
            match est.add_camera_estimate(estimate) {
                CorrectionOutcome::Applied => applied += 1,
                CorrectionOutcome::Discarded(reason) => {
                    debug!(camera = %estimate.camera, ?reason, "camera estimate not fused");
                    discarded += 1;
                }
            }
        }

        Ok(TickReport {
            pose: est.pose(),
            batches,
            corrections_applied: applied,
            corrections_discarded: discarded,
        })
    }

    /// Drive with a translation (m/s) and rotation (rad/s) command.
    /// Field-relative commands use the estimated heading.
    pub fn drive(
        &mut self,
        translation: Translation2d,
        rotation: f64,
        field_relative: bool,
    ) -> Result<Vec<ModuleState>, PoseError> {
        let chassis = if field_relative {
            ChassisVelocity::field_relative(translation.x, translation.y, rotation)
        } else {
            ChassisVelocity::robot_relative(translation.x, translation.y, rotation)
        };
        self.drive_chassis(chassis)
    }

    /// Compute module setpoints for `velocity` and send them to the drive.
    pub fn drive_chassis(&mut self, velocity: ChassisVelocity) -> Result<Vec<ModuleState>, PoseError> {
        let angles = self.drive.lock().module_angles();
        let states = {
            let est = self.estimator.lock();
            est.kinematics()
                .inverse_kinematics(velocity, est.pose().heading(), &angles)?
        };
        self.drive.lock().set_module_states(&states)?;
        Ok(states)
    }

    /// Stop every module in place.
    pub fn halt(&mut self) -> Result<(), PoseError> {
        self.drive_chassis(ChassisVelocity::robot_relative(0.0, 0.0, 0.0))
            .map(|_| ())
    }

    /// Aim pose for `target` on the current alliance, or `None` when none of
    /// its markers is in view.  `None` lets an aim request finish at once.
    pub fn aim_at(&self, target: FieldTarget) -> Option<Pose2d> {
        self.vision.aim_pose(target, self.alliance)
    }

    /// Aim pose for the closest visible target on the current alliance.
    pub fn aim_at_nearest(&self) -> Option<Pose2d> {
        let target = self.vision.nearest_target(self.pose(), self.alliance)?;
        self.aim_at(target)
    }

    pub fn distance_to(&self, target: FieldTarget) -> Option<f64> {
        self.vision.distance_to(target, self.alliance, self.pose())
    }

    pub fn vision_status(&self) -> VisionStatus {
        self.vision.status()
    }

    /// Move odometry integration to its own thread.  A no-op when it is
    /// already running.
    pub fn start_background_odometry(&mut self, period: Duration, clock: MonotonicClock) {
        if self.is_background_running() {
            return;
        }
        self.background = Some(BackgroundOdometry::start(
            Arc::clone(&self.drive),
            Arc::clone(&self.estimator),
            period,
            clock,
        ));
    }

    /// Stop the background integrator; the tick integrates again.
    pub fn stop_background_odometry(&mut self) {
        if let Some(mut bg) = self.background.take() {
            bg.stop();
        }
    }

    pub fn is_background_running(&self) -> bool {
        self.background.as_ref().is_some_and(BackgroundOdometry::is_running)
    }

    fn read_drive(&self) -> (Rotation2d, Vec<ModulePosition>) {
        let d = self.drive.lock();
        (d.gyro_heading(), d.module_positions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldpose_hal::{SharedSimCamera, SimCamera, SimDrive, SwerveKinematics};
    use fieldpose_perception::estimator::EstimatorSettings;
    use fieldpose_perception::layout::FieldLayout;
    use fieldpose_perception::tracker::TrackerSettings;
    use fieldpose_types::{Quaternion, Transform3d, Vec3};

    const EPS: f64 = 1e-9;

    struct Rig {
        robot: DriveLoop,
        sim: Arc<Mutex<SimDrive>>,
        camera: SharedSimCamera,
        registry: Arc<TargetRegistry>,
    }

    fn kinematics() -> SwerveKinematics {
        SwerveKinematics::new(
            vec![
                Translation2d::new(0.411, 0.332),
                Translation2d::new(0.411, -0.332),
                Translation2d::new(-0.411, 0.332),
                Translation2d::new(-0.411, -0.332),
            ],
            3.0,
        )
        .unwrap()
    }

    fn rig(mode: EstimatorMode) -> Rig {
        let sim = Arc::new(Mutex::new(SimDrive::new(kinematics())));
        let drive: SharedDrive = sim.clone();
        let registry = Arc::new(TargetRegistry::with_defaults(FieldLayout::bundled().unwrap()).unwrap());
        let extrinsic = Transform3d::new(Vec3::new(0.3, 0.0, 0.25), Quaternion::identity());
        let camera = SharedSimCamera::new(SimCamera::new("front", extrinsic));
        let tracker = CameraTracker::new(
            Box::new(camera.clone()),
            Box::new(CoprocessorSolver::default()),
            extrinsic,
            Arc::clone(&registry),
            TrackerSettings::default(),
        );
        let vision = VisionAggregator::new(Arc::clone(&registry), vec![tracker]);
        let settings = EstimatorSettings {
            mode,
            ..EstimatorSettings::default()
        };
        let robot = DriveLoop::new(drive, PoseEstimator::new(kinematics(), settings), vision);
        Rig {
            robot,
            sim,
            camera,
            registry,
        }
    }

    /// Facing the blue reef from 2 m out; markers 17, 18 and 19 are in view.
    fn reef_view() -> Pose2d {
        Pose2d::new(1.5, 4.026, Rotation2d::zero())
    }

    #[test]
    fn one_tick_straight_ahead() {
        let mut rig = rig(EstimatorMode::OdometryOnly);
        rig.robot.reset_pose(0.0, Pose2d::origin()).unwrap();
        rig.robot.drive(Translation2d::new(1.0, 0.0), 0.0, true).unwrap();
        rig.sim.lock().step(0.02);

        let report = rig.robot.on_tick(0.02).unwrap();
        assert!((report.pose.x() - 0.02).abs() < EPS);
        assert!(report.pose.y().abs() < EPS);
        assert!(report.pose.heading().radians().abs() < EPS);
        assert_eq!(report.batches, 0);
    }

    #[test]
    fn field_relative_drive_uses_estimated_heading() {
        let mut rig = rig(EstimatorMode::OdometryOnly);
        rig.robot
            .reset_pose(0.0, Pose2d::new(0.0, 0.0, Rotation2d::from_degrees(30.0)))
            .unwrap();
        let states = rig.robot.drive(Translation2d::new(1.0, 0.0), 0.0, true).unwrap();
        for s in &states {
            assert!((s.speed - 1.0).abs() < EPS);
            assert!((s.angle.degrees() + 30.0).abs() < 1e-6);
        }
        assert_eq!(rig.sim.lock().commanded(), states.as_slice());

        let robot_rel = rig.robot.drive(Translation2d::new(1.0, 0.0), 0.0, false).unwrap();
        assert!(robot_rel.iter().all(|s| s.angle.degrees().abs() < 1e-6));
    }

    #[test]
    fn halt_holds_module_angles() {
        let mut rig = rig(EstimatorMode::OdometryOnly);
        rig.robot.reset_pose(0.0, Pose2d::origin()).unwrap();
        rig.robot.drive(Translation2d::new(0.0, 1.0), 0.0, false).unwrap();
        rig.sim.lock().step(0.02);
        rig.robot.halt().unwrap();
        for s in rig.sim.lock().commanded() {
            assert!(s.speed.abs() < EPS);
            assert!((s.angle.degrees().abs() - 90.0).abs() < 1e-6);
        }
    }

    #[test]
    fn vision_corrects_drifted_pose() {
        let mut rig = rig(EstimatorMode::VisionCorrected);
        let start = Pose2d::new(1.0, 4.026, Rotation2d::zero());
        rig.robot.reset_pose(0.0, start).unwrap();

        rig.camera.render(reef_view(), 0.02, rig.registry.layout());
        let report = rig.robot.on_tick(0.02).unwrap();
        assert_eq!(report.batches, 1);
        assert_eq!(report.corrections_applied, 1);
        assert!(report.pose.x() > start.x() + 1e-3);
        assert!(report.pose.x() < reef_view().x());
    }

    #[test]
    fn odometry_only_mode_drains_but_ignores_vision() {
        let mut rig = rig(EstimatorMode::OdometryOnly);
        let start = Pose2d::new(1.0, 4.026, Rotation2d::zero());
        rig.robot.reset_pose(0.0, start).unwrap();

        rig.camera.render(reef_view(), 0.02, rig.registry.layout());
        let report = rig.robot.on_tick(0.02).unwrap();
        assert_eq!(report.corrections_applied, 0);
        assert_eq!(report.corrections_discarded, 1);
        assert!((report.pose.x() - start.x()).abs() < EPS);

        rig.robot.set_vision_enabled(true);
        rig.camera.render(reef_view(), 0.04, rig.registry.layout());
        let report = rig.robot.on_tick(0.04).unwrap();
        assert_eq!(report.corrections_applied, 1);
    }

    #[test]
    fn disconnected_camera_leaves_odometry_running() {
        let mut rig = rig(EstimatorMode::VisionCorrected);
        rig.robot.reset_pose(0.0, Pose2d::origin()).unwrap();
        rig.camera.render(reef_view(), 0.02, rig.registry.layout());
        rig.camera.set_connected(false);
        let report = rig.robot.on_tick(0.02).unwrap();
        assert_eq!(report.batches, 0);
        assert_eq!(rig.robot.vision_status().connected.len(), 0);
        assert!(report.pose.translation.norm() < EPS);
    }

    #[test]
    fn aim_follows_alliance() {
        let mut rig = rig(EstimatorMode::OdometryOnly);
        rig.robot.reset_pose(0.0, reef_view()).unwrap();
        rig.camera.render(reef_view(), 0.02, rig.registry.layout());
        rig.robot.on_tick(0.02).unwrap();

        let aim = rig.robot.aim_at(FieldTarget::Reef).expect("reef in view");
        assert!((aim.x() - 4.074).abs() < 1e-3);
        assert!((aim.y() - 3.306).abs() < 1e-3);
        assert_eq!(rig.robot.aim_at_nearest(), Some(aim));
        assert!(rig.robot.distance_to(FieldTarget::Reef).is_some());
        assert!(rig.robot.aim_at(FieldTarget::Barge).is_none());

        rig.robot.set_alliance(Alliance::Red);
        assert!(rig.robot.aim_at(FieldTarget::Reef).is_none());
        assert!(rig.robot.aim_at_nearest().is_none());
    }

    #[test]
    fn background_odometry_owns_integration() {
        let mut rig = rig(EstimatorMode::OdometryOnly);
        rig.robot.reset_pose(0.0, Pose2d::origin()).unwrap();
        let clock = MonotonicClock::new();
        rig.robot
            .start_background_odometry(Duration::from_millis(2), clock);
        assert!(rig.robot.is_background_running());
        assert!(matches!(
            rig.robot.reset_pose(clock.now(), Pose2d::origin()),
            Err(PoseError::OdometryRunning)
        ));

        rig.robot.drive(Translation2d::new(1.0, 0.0), 0.0, false).unwrap();
        rig.sim.lock().step(0.5);

        let deadline = Instant::now() + Duration::from_secs(2);
        while (rig.robot.pose().x() - 0.5).abs() > 1e-6 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!((rig.robot.pose().x() - 0.5).abs() < 1e-6);

        rig.robot.stop_background_odometry();
        assert!(!rig.robot.is_background_running());
        rig.robot.reset_pose(clock.now(), Pose2d::origin()).unwrap();
        assert!(rig.robot.pose().translation.norm() < EPS);
    }

    #[test]
    fn from_config_matches_cameras_by_name() {
        let cfg = Config::default();
        let sim = Arc::new(Mutex::new(SimDrive::new(cfg.drive.kinematics().unwrap())));
        let front = SimCamera::new("front", cfg.vision.cameras[0].robot_to_camera());
        let robot = DriveLoop::from_config(&cfg, sim.clone(), vec![Box::new(front) as Box<dyn Camera>]).unwrap();
        assert_eq!(robot.vision_status().cameras, vec!["front".to_string()]);
        assert_eq!(robot.estimator().lock().mode(), EstimatorMode::OdometryOnly);

        let stray = SimCamera::new("turret", Transform3d::identity());
        assert!(matches!(
            DriveLoop::from_config(&cfg, sim, vec![Box::new(stray) as Box<dyn Camera>]),
            Err(PoseError::Config(_))
        ));
    }

    #[test]
    fn background_thread_exits_on_module_mismatch() {
        let sim = Arc::new(Mutex::new(SimDrive::new(
            SwerveKinematics::new(
                vec![Translation2d::new(0.3, 0.0), Translation2d::new(-0.3, 0.0), Translation2d::new(0.0, 0.3)],
                3.0,
            )
            .unwrap(),
        )));
        let drive: SharedDrive = sim;
        let estimator = Arc::new(Mutex::new(PoseEstimator::new(kinematics(), EstimatorSettings::default())));
        let mut bg = BackgroundOdometry::start(drive, estimator, Duration::from_millis(1), MonotonicClock::new());

        let deadline = Instant::now() + Duration::from_secs(2);
        while bg.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(!bg.is_running());
        bg.stop();
    }

    /// Drive whose encoders fail hard on the first read.
    struct SeizedDrive;

    impl DriveIo for SeizedDrive {
        fn module_positions(&self) -> Vec<ModulePosition> {
            panic!("encoder bus seized");
        }

        fn gyro_heading(&self) -> Rotation2d {
            Rotation2d::zero()
        }

        fn set_module_states(&mut self, _states: &[ModuleState]) -> Result<(), PoseError> {
            Ok(())
        }
    }

    #[test]
    fn stopping_after_a_thread_panic_does_not_propagate() {
        let drive: SharedDrive = Arc::new(Mutex::new(SeizedDrive));
        let estimator = Arc::new(Mutex::new(PoseEstimator::new(kinematics(), EstimatorSettings::default())));
        let mut bg = BackgroundOdometry::start(drive, estimator.clone(), Duration::from_millis(1), MonotonicClock::new());

        let deadline = Instant::now() + Duration::from_secs(2);
        while bg.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        bg.stop();
        assert!(!bg.is_running());
        // The estimator lock was never held by the panicking read.
        assert!(estimator.try_lock().is_some());
    }
}
