//! `DriveIo` – the hardware seam for a swerve drivetrain.
//!
//! Drivers read wheel encoders, azimuth encoders and the gyro, and accept
//! module setpoints.  Everything above this trait (odometry, the pose
//! estimator, the drive loop) is hardware agnostic, so a
//! [`SimDrive`][crate::sim::SimDrive] can stand in for a real robot.

use fieldpose_types::{ModulePosition, ModuleState, PoseError, Rotation2d};

/// Swerve drivetrain sensors and outputs.
///
/// Module order is fixed for the lifetime of a driver and must match the
/// order of offsets handed to [`SwerveKinematics`][crate::swerve::SwerveKinematics].
pub trait DriveIo: Send {
    /// Accumulated drive distance and current azimuth of each module.
    fn module_positions(&self) -> Vec<ModulePosition>;

    /// Current azimuth of each module.
    fn module_angles(&self) -> Vec<Rotation2d> {
        self.module_positions().iter().map(|p| p.angle).collect()
    }

    /// Raw gyro yaw, counter-clockwise positive.  Not field-relative until
    /// the estimator applies its reset offset.
    fn gyro_heading(&self) -> Rotation2d;

    /// Command every module.
    ///
    /// # Errors
    ///
    /// Returns [`PoseError::HardwareFault`] when the command cannot be
    /// applied and [`PoseError::ModuleCount`] when `states` does not have
    /// one entry per module.
    fn set_module_states(&mut self, states: &[ModuleState]) -> Result<(), PoseError>;
}
