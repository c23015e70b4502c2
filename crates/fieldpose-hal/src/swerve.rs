//! Swerve drive kinematics.
//!
//! Converts chassis-level velocity commands into per-module speed/angle
//! setpoints (inverse kinematics) and per-module measurements back into
//! chassis motion (forward kinematics).
//!
//! Each module's velocity is the chassis linear velocity plus `ω × r`, where
//! `r` is the module's fixed offset from the rotation centre:
//!
//! ```text
//! v_i = (vx − ω·r_i.y, vy + ω·r_i.x)
//! ```
//!
//! Forward kinematics solves the over-determined system above for
//! `(vx, vy, ω)` in the least-squares sense.
//!
//! # Example
//!
//! ```rust
//! use fieldpose_hal::swerve::SwerveKinematics;
//! use fieldpose_types::{ChassisVelocity, Rotation2d, Translation2d};
//!
//! let kin = SwerveKinematics::new(
//!     vec![
//!         Translation2d::new(0.3, 0.3),
//!         Translation2d::new(0.3, -0.3),
//!         Translation2d::new(-0.3, 0.3),
//!         Translation2d::new(-0.3, -0.3),
//!     ],
//!     4.0,
//! )
//! .unwrap();
//!
//! let current = vec![Rotation2d::zero(); 4];
//! let states = kin
//!     .inverse_kinematics(ChassisVelocity::robot_relative(1.0, 0.0, 0.0), Rotation2d::zero(), &current)
//!     .unwrap();
//! assert!(states.iter().all(|s| (s.speed - 1.0).abs() < 1e-9));
//! ```

use std::f64::consts::FRAC_PI_2;

use fieldpose_types::{
    ChassisVelocity, ModulePosition, ModuleState, Pose2d, PoseError, Rotation2d, Translation2d,
    Twist2d,
};
use nalgebra::{DMatrix, DVector};

/// Inverse and forward kinematics for `N` swerve modules.
#[derive(Debug, Clone)]
pub struct SwerveKinematics {
    modules: Vec<Translation2d>,
    max_speed: f64,
    /// Left pseudo-inverse of the 2N×3 module Jacobian.
    forward: DMatrix<f64>,
}

impl SwerveKinematics {
    /// Build the kinematics for modules at `modules` (metres from the
    /// rotation centre) with a shared wheel speed limit of `max_speed` m/s.
    ///
    /// # Errors
    ///
    /// Returns [`PoseError::InvalidGeometry`] when fewer than two modules are
    /// given or the layout cannot observe rotation (all modules coincide).
    pub fn new(modules: Vec<Translation2d>, max_speed: f64) -> Result<Self, PoseError> {
        if modules.len() < 2 {
            return Err(PoseError::InvalidGeometry(format!(
                "need at least two modules, got {}",
                modules.len()
            )));
        }

        let n = modules.len();
        let mut jacobian = DMatrix::<f64>::zeros(2 * n, 3);
        for (i, m) in modules.iter().enumerate() {
            jacobian[(2 * i, 0)] = 1.0;
            jacobian[(2 * i, 2)] = -m.y;
            jacobian[(2 * i + 1, 1)] = 1.0;
            jacobian[(2 * i + 1, 2)] = m.x;
        }
        let normal = jacobian.transpose() * &jacobian;
        let normal_inv = normal.try_inverse().ok_or_else(|| {
            PoseError::InvalidGeometry("module offsets cannot resolve rotation".to_string())
        })?;
        let forward = normal_inv * jacobian.transpose();

        Ok(Self {
            modules,
            max_speed,
            forward,
        })
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn modules(&self) -> &[Translation2d] {
        &self.modules
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    fn check_len(&self, actual: usize) -> Result<(), PoseError> {
        if actual == self.modules.len() {
            Ok(())
        } else {
            Err(PoseError::ModuleCount {
                expected: self.modules.len(),
                actual,
            })
        }
    }

    /// Per-module velocity vectors for `chassis`, in the robot frame.
    fn module_vectors(&self, chassis: ChassisVelocity, heading: Rotation2d) -> Vec<Translation2d> {
        let v = chassis.to_robot_relative(heading);
        self.modules
            .iter()
            .map(|m| Translation2d::new(v.vx - v.omega * m.y, v.vy + v.omega * m.x))
            .collect()
    }

    /// Unoptimised, unsaturated module states.  Modules with no required
    /// motion point straight ahead.
    pub fn raw_module_states(
        &self,
        chassis: ChassisVelocity,
        heading: Rotation2d,
    ) -> Vec<ModuleState> {
        self.module_vectors(chassis, heading)
            .into_iter()
            .map(|v| ModuleState::new(v.norm(), v.angle().unwrap_or_default()))
            .collect()
    }

    /// Module setpoints for `chassis`.
    ///
    /// `heading` is only used for field-relative input.  `current` holds each
    /// module's measured azimuth; setpoints are optimised against it and
    /// then desaturated to [`max_speed`](Self::max_speed).  A module asked
    /// for no motion holds its current azimuth at zero speed.
    ///
    /// # Errors
    ///
    /// [`PoseError::ModuleCount`] when `current` has the wrong length.
    pub fn inverse_kinematics(
        &self,
        chassis: ChassisVelocity,
        heading: Rotation2d,
        current: &[Rotation2d],
    ) -> Result<Vec<ModuleState>, PoseError> {
        self.check_len(current.len())?;

        if chassis.is_stationary() {
            return Ok(current.iter().map(|a| ModuleState::new(0.0, *a)).collect());
        }

        let mut states: Vec<ModuleState> = self
            .module_vectors(chassis, heading)
            .into_iter()
            .zip(current)
            .map(|(v, cur)| match v.angle() {
                Some(angle) => optimize(ModuleState::new(v.norm(), angle), *cur),
                None => ModuleState::new(0.0, *cur),
            })
            .collect();
        desaturate(&mut states, self.max_speed);
        Ok(states)
    }

    /// Least-squares chassis velocity (robot-relative) from measured module
    /// states.
    pub fn to_chassis_velocity(&self, states: &[ModuleState]) -> Result<ChassisVelocity, PoseError> {
        self.check_len(states.len())?;
        let vectors = states
            .iter()
            .map(|s| Translation2d::from_polar(s.speed, s.angle));
        let (vx, vy, omega) = self.solve(vectors);
        Ok(ChassisVelocity::robot_relative(vx, vy, omega))
    }

    /// Robot-frame twist between two sets of module positions.
    pub fn to_twist(
        &self,
        start: &[ModulePosition],
        end: &[ModulePosition],
    ) -> Result<Twist2d, PoseError> {
        self.check_len(start.len())?;
        self.check_len(end.len())?;
        let deltas = start
            .iter()
            .zip(end)
            .map(|(a, b)| Translation2d::from_polar(b.distance - a.distance, b.angle));
        let (dx, dy, dtheta) = self.solve(deltas);
        Ok(Twist2d::new(dx, dy, dtheta))
    }

    /// Average chassis velocity over `dt` seconds and the pose change it
    /// produced, expressed relative to the starting pose.
    ///
    /// A non-positive `dt` reports zero velocity but still returns the pose
    /// change.
    pub fn forward_kinematics(
        &self,
        start: &[ModulePosition],
        end: &[ModulePosition],
        dt: f64,
    ) -> Result<(ChassisVelocity, Pose2d), PoseError> {
        let twist = self.to_twist(start, end)?;
        let velocity = if dt > 0.0 {
            ChassisVelocity::robot_relative(twist.dx / dt, twist.dy / dt, twist.dtheta / dt)
        } else {
            ChassisVelocity::default()
        };
        Ok((velocity, Pose2d::origin().exp(twist)))
    }

    fn solve(&self, vectors: impl Iterator<Item = Translation2d>) -> (f64, f64, f64) {
        let flat: Vec<f64> = vectors.flat_map(|v| [v.x, v.y]).collect();
        let b = DVector::from_vec(flat);
        let x = &self.forward * b;
        (x[0], x[1], x[2])
    }
}

/// Pick the equivalent setpoint that needs at most a quarter turn of the
/// azimuth from `current`, reversing the drive direction if necessary.
pub fn optimize(desired: ModuleState, current: Rotation2d) -> ModuleState {
    let delta = current.delta_to(desired.angle);
    if delta.abs() > FRAC_PI_2 {
        ModuleState::new(
            -desired.speed,
            Rotation2d::new(desired.angle.radians() + std::f64::consts::PI).wrapped(),
        )
    } else {
        desired
    }
}

/// Scale every module speed by the same factor so the fastest one is at
/// `max_speed`.  A non-positive or non-finite limit stops every module.
pub fn desaturate(states: &mut [ModuleState], max_speed: f64) {
    if !(max_speed.is_finite() && max_speed > 0.0) {
        for s in states.iter_mut() {
            s.speed = 0.0;
        }
        return;
    }
    let fastest = states.iter().map(|s| s.speed.abs()).fold(0.0, f64::max);
    if fastest > max_speed {
        let factor = max_speed / fastest;
        for s in states.iter_mut() {
            s.speed *= factor;
        }
    }
}
