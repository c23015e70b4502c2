//! Headless simulated match: a swerve robot laps the blue reef while the
//! estimator tracks it from drifting odometry and simulated cameras.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fieldpose_hal::{SharedSimCamera, SimDrive};
use fieldpose_perception::registry::FieldTarget;
use fieldpose_runtime::{DriveLoop, MonotonicClock};
use fieldpose_types::{Pose2d, PoseError, Rotation2d, Translation2d};
use parking_lot::Mutex;

// ─────────────────────────────────────────────────────────────────────────────
// Options and results
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MatchOptions {
    /// Match length in seconds.
    pub duration: f64,
    pub tick: Duration,
    /// Cameras render a frame every this many ticks.
    pub camera_every: usize,
    /// A track line is reported every this many ticks.
    pub report_every: usize,
    /// Pace ticks against the wall clock instead of simulated time.
    pub realtime: bool,
    /// Run odometry on its own thread; implies `realtime`.
    pub background_odometry: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            duration: 15.0,
            tick: Duration::from_millis(20),
            camera_every: 3,
            report_every: 25,
            realtime: false,
            background_odometry: false,
        }
    }
}

/// One row of the printed pose track.
#[derive(Debug, Clone)]
pub struct TrackLine {
    pub time: f64,
    pub estimate: Pose2d,
    pub truth: Pose2d,
    pub visible: Vec<FieldTarget>,
    pub aim: Option<Pose2d>,
}

impl TrackLine {
    pub fn error(&self) -> f64 {
        self.estimate.translation.distance(self.truth.translation)
    }
}

#[derive(Debug, Clone)]
pub struct MatchSummary {
    pub ticks: usize,
    pub corrections_applied: usize,
    pub estimate: Pose2d,
    pub truth: Pose2d,
    pub interrupted: bool,
}

impl MatchSummary {
    pub fn error(&self) -> f64 {
        self.estimate.translation.distance(self.truth.translation)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Waypoint follower
// ─────────────────────────────────────────────────────────────────────────────

/// Proportional follower over a closed loop of field points, holding a
/// fixed heading.
pub struct Waypoints {
    points: Vec<Translation2d>,
    index: usize,
    max_speed: f64,
    heading: Rotation2d,
}

const ARRIVAL_RADIUS: f64 = 0.15;
const TRANSLATION_GAIN: f64 = 2.0;
const HEADING_GAIN: f64 = 2.0;

impl Waypoints {
    pub fn new(points: Vec<Translation2d>, max_speed: f64) -> Self {
        Self {
            points,
            index: 0,
            max_speed,
            heading: Rotation2d::zero(),
        }
    }

    /// A lap around the blue reef, about 2.3 m out.
    pub fn reef_lap(max_speed: f64) -> Self {
        Self::new(
            vec![
                Translation2d::new(2.0, 4.026),
                Translation2d::new(3.0, 6.3),
                Translation2d::new(6.0, 6.3),
                Translation2d::new(7.0, 4.026),
                Translation2d::new(6.0, 1.75),
                Translation2d::new(3.0, 1.75),
            ],
            max_speed,
        )
    }

    pub fn start(&self) -> Pose2d {
        let origin = self.points.first().copied().unwrap_or_else(Translation2d::zero);
        Pose2d {
            translation: origin,
            rotation: self.heading,
        }
    }

    pub fn current(&self) -> Option<Translation2d> {
        self.points.get(self.index).copied()
    }

    /// Field-relative translation (m/s) and rotation (rad/s) toward the
    /// current waypoint.  Arriving advances to the next one, wrapping.
    pub fn command(&mut self, pose: Pose2d) -> (Translation2d, f64) {
        let Some(mut goal) = self.current() else {
            return (Translation2d::zero(), 0.0);
        };
        if goal.distance(pose.translation) < ARRIVAL_RADIUS {
            self.index = (self.index + 1) % self.points.len();
            goal = self.points[self.index];
        }
        let error = goal.minus(pose.translation);
        let mut velocity = error.scale(TRANSLATION_GAIN);
        if velocity.norm() > self.max_speed {
            velocity = velocity.scale(self.max_speed / velocity.norm());
        }
        let omega = HEADING_GAIN * pose.heading().delta_to(self.heading);
        (velocity, omega)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Match loop
// ─────────────────────────────────────────────────────────────────────────────

/// Drive the lap until `duration` elapses or `shutdown` is raised.
///
/// Camera frames are rendered from ground truth after a tick and consumed
/// on the next, so every correction arrives one tick late.
pub fn run(
    robot: &mut DriveLoop,
    sim: &Arc<Mutex<SimDrive>>,
    cameras: &[SharedSimCamera],
    waypoints: &mut Waypoints,
    opts: &MatchOptions,
    shutdown: &AtomicBool,
    mut on_track: impl FnMut(&TrackLine),
) -> Result<MatchSummary, PoseError> {
    let dt = opts.tick.as_secs_f64();
    let total = (opts.duration / dt).round() as usize;
    let realtime = opts.realtime || opts.background_odometry;
    let clock = MonotonicClock::new();

    let start = waypoints.start();
    robot.reset_pose(clock_time(realtime, &clock, 0.0), start)?;
    if opts.background_odometry {
        robot.start_background_odometry(opts.tick / 2, clock);
    }

    let mut last = clock_time(realtime, &clock, 0.0);
    let mut applied = 0;
    let mut ticks = 0;
    let mut interrupted = false;

    for tick in 1..=total {
        if shutdown.load(Ordering::SeqCst) {
            interrupted = true;
            break;
        }
        if realtime {
            std::thread::sleep(opts.tick);
        }
        let now = clock_time(realtime, &clock, tick as f64 * dt);
        sim.lock().step(now - last);
        last = now;

        let report = robot.on_tick(now)?;
        applied += report.corrections_applied;
        ticks = tick;

        let (velocity, omega) = waypoints.command(report.pose);
        robot.drive(velocity, omega, true)?;

        let truth = sim.lock().true_pose();
        if opts.camera_every > 0 && tick % opts.camera_every == 0 {
            let layout = robot.vision().registry().layout();
            for camera in cameras {
                camera.render(truth, now, layout);
            }
        }
        if opts.report_every > 0 && tick % opts.report_every == 0 {
            on_track(&TrackLine {
                time: now,
                estimate: report.pose,
                truth,
                visible: robot.vision().visible_targets(),
                aim: robot.aim_at_nearest(),
            });
        }
    }

    robot.halt()?;
    robot.stop_background_odometry();

    Ok(MatchSummary {
        ticks,
        corrections_applied: applied,
        estimate: robot.pose(),
        truth: sim.lock().true_pose(),
        interrupted,
    })
}

fn clock_time(realtime: bool, clock: &MonotonicClock, simulated: f64) -> f64 {
    if realtime { clock.now() } else { simulated }
}
