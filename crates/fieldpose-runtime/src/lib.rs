//! `fieldpose-runtime` – Assembly and ambient services.
//!
//! Wires the drivetrain, cameras and estimator into one control tick and
//! provides the process-wide services around it.
//!
//! # Modules
//!
//! - [`drive_loop`] – [`DriveLoop`][drive_loop::DriveLoop]: the
//!   fixed-period tick (odometry, non-blocking vision polling, timestamp
//!   ordered corrections, module setpoints and aim queries), plus
//!   [`BackgroundOdometry`][drive_loop::BackgroundOdometry] for running
//!   integration on its own thread behind the estimator mutex.
//! - [`config`] – [`Config`][config::Config]: TOML configuration with
//!   `FIELDPOSE_*` environment overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod config;
pub mod drive_loop;
pub mod telemetry;

pub use config::Config;
pub use drive_loop::{BackgroundOdometry, DriveLoop, MonotonicClock, SharedDrive, SharedEstimator, TickReport};
pub use telemetry::{TracerProviderGuard, init_tracing};
