//! `fieldpose-perception` – Field geometry and pose estimation.
//!
//! Turns camera detections and wheel odometry into one authoritative robot
//! pose, and answers "where is the target and where do I stand to engage
//! it" questions.
//!
//! # Modules
//!
//! - [`layout`] – [`FieldLayout`][layout::FieldLayout]: the static marker
//!   map, loaded from WPILib JSON or the bundled 2025 field.
//! - [`registry`] – [`TargetRegistry`][registry::TargetRegistry]: marker ↔
//!   [`FieldTarget`][registry::FieldTarget] index, partitioned per alliance.
//! - [`tracker`] – [`CameraTracker`][tracker::CameraTracker]: per-camera
//!   polling, confidence grading and visible targets.
//! - [`aggregator`] – [`VisionAggregator`][aggregator::VisionAggregator]:
//!   cross-camera target selection and aim poses.
//! - [`estimator`] – [`PoseEstimator`][estimator::PoseEstimator]: odometry
//!   integration with latency-compensated vision corrections.

pub mod aggregator;
pub mod estimator;
pub mod layout;
pub mod registry;
pub mod tracker;

pub use aggregator::{VisionAggregator, VisionStatus};
pub use estimator::{CorrectionOutcome, DiscardReason, EstimatorMode, EstimatorSettings, PoseEstimator};
pub use layout::FieldLayout;
pub use registry::{FieldTarget, TargetRegistry, TargetSpec};
pub use tracker::{CameraEstimate, CameraTracker, TrackerSettings};
