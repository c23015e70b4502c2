//! `fieldpose-hal` – Hardware seams and drivetrain kinematics.
//!
//! Everything that touches a sensor or an actuator goes through a trait
//! defined here, so the estimator and vision stack never see a concrete
//! driver.
//!
//! # Modules
//!
//! - [`camera`] – [`Camera`][camera::Camera], [`MarkerLayout`][camera::MarkerLayout]
//!   and the [`PoseSolver`][camera::PoseSolver] black box with its default
//!   [`CoprocessorSolver`][camera::CoprocessorSolver].
//! - [`drive`] – [`DriveIo`][drive::DriveIo], encoders, gyro and module
//!   outputs.
//! - [`swerve`] – [`SwerveKinematics`][swerve::SwerveKinematics], module
//!   optimisation and desaturation.
//! - [`sim`] – headless [`SimDrive`][sim::SimDrive],
//!   [`SimCamera`][sim::SimCamera] and its shared handle.

pub mod camera;
pub mod drive;
pub mod sim;
pub mod swerve;

pub use camera::{Camera, CoprocessorSolver, MarkerLayout, PoseSolver};
pub use drive::DriveIo;
pub use sim::{SharedSimCamera, SimCamera, SimDrive};
pub use swerve::{SwerveKinematics, desaturate, optimize};
