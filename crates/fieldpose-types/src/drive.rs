//! Chassis- and module-level motion values for a swerve drivetrain.

use serde::{Deserialize, Serialize};

use crate::geometry::{Rotation2d, Translation2d};

/// The frame a [`ChassisVelocity`] is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityFrame {
    /// +X is the robot's front.
    #[default]
    RobotRelative,
    /// +X is down-field; converting needs the current heading.
    FieldRelative,
}

/// Net linear and angular velocity of the robot body.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChassisVelocity {
    /// m/s along the frame's X axis.
    pub vx: f64,
    /// m/s along the frame's Y axis.
    pub vy: f64,
    /// rad/s, counter-clockwise positive.
    pub omega: f64,
    pub frame: VelocityFrame,
}

impl ChassisVelocity {
    pub fn robot_relative(vx: f64, vy: f64, omega: f64) -> Self {
        Self {
            vx,
            vy,
            omega,
            frame: VelocityFrame::RobotRelative,
        }
    }

    pub fn field_relative(vx: f64, vy: f64, omega: f64) -> Self {
        Self {
            vx,
            vy,
            omega,
            frame: VelocityFrame::FieldRelative,
        }
    }

    pub fn linear(&self) -> Translation2d {
        Translation2d::new(self.vx, self.vy)
    }

    /// Re-express in the robot frame given the robot's field heading.
    /// Robot-relative input is returned unchanged.
    pub fn to_robot_relative(self, heading: Rotation2d) -> Self {
        match self.frame {
            VelocityFrame::RobotRelative => self,
            VelocityFrame::FieldRelative => {
                let v = self.linear().rotate_by(heading.neg());
                Self::robot_relative(v.x, v.y, self.omega)
            }
        }
    }

    /// Re-express in the field frame given the robot's field heading.
    /// Field-relative input is returned unchanged.
    pub fn to_field_relative(self, heading: Rotation2d) -> Self {
        match self.frame {
            VelocityFrame::FieldRelative => self,
            VelocityFrame::RobotRelative => {
                let v = self.linear().rotate_by(heading);
                Self::field_relative(v.x, v.y, self.omega)
            }
        }
    }

    /// `true` when every component is exactly zero.
    pub fn is_stationary(&self) -> bool {
        self.vx == 0.0 && self.vy == 0.0 && self.omega == 0.0
    }
}

/// Commanded or measured state of one swerve module.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleState {
    /// Signed wheel surface speed (m/s).
    pub speed: f64,
    /// Wheel azimuth in the robot frame.
    pub angle: Rotation2d,
}

impl ModuleState {
    pub fn new(speed: f64, angle: Rotation2d) -> Self {
        Self { speed, angle }
    }
}

/// Cumulative odometry reading of one swerve module.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModulePosition {
    /// Signed distance travelled by the wheel since boot (m).
    pub distance: f64,
    /// Wheel azimuth in the robot frame.
    pub angle: Rotation2d,
}

impl ModulePosition {
    pub fn new(distance: f64, angle: Rotation2d) -> Self {
        Self { distance, angle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_relative_forward_at_quarter_turn_is_robot_right() {
        // Facing +Y, driving down-field (+X) means moving to the robot's right.
        let v = ChassisVelocity::field_relative(1.0, 0.0, 0.5)
            .to_robot_relative(Rotation2d::from_degrees(90.0));
        assert_eq!(v.frame, VelocityFrame::RobotRelative);
        assert!(v.vx.abs() < 1e-9);
        assert!((v.vy + 1.0).abs() < 1e-9);
        assert!((v.omega - 0.5).abs() < 1e-12);
    }

    #[test]
    fn frame_conversion_roundtrips() {
        let heading = Rotation2d::from_degrees(-33.0);
        let v = ChassisVelocity::robot_relative(0.7, -0.2, 1.0);
        let back = v.to_field_relative(heading).to_robot_relative(heading);
        assert!((back.vx - v.vx).abs() < 1e-12);
        assert!((back.vy - v.vy).abs() < 1e-12);
    }

    #[test]
    fn robot_relative_is_unchanged_by_heading() {
        let v = ChassisVelocity::robot_relative(1.0, 2.0, 3.0);
        assert_eq!(v.to_robot_relative(Rotation2d::from_degrees(45.0)), v);
    }

    #[test]
    fn stationary_detection() {
        assert!(ChassisVelocity::default().is_stationary());
        assert!(!ChassisVelocity::robot_relative(0.0, 0.0, 0.1).is_stationary());
    }
}
