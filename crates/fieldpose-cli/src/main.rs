//! `fieldpose` – simulated match runner.
//!
//! Loads the robot configuration and field layout, wires a simulated swerve
//! drivetrain and one simulated camera per `[[vision.cameras]]` entry into a
//! [`DriveLoop`], laps the blue reef and prints the estimated pose track
//! against ground truth.  Ctrl-C ends the match early and halts the modules.

mod sim_match;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use colored::Colorize;
use fieldpose_hal::{Camera, SharedSimCamera, SimCamera, SimDrive};
use fieldpose_runtime::{Config, DriveLoop, SharedDrive, config};
use fieldpose_types::{Alliance, Pose2d, PoseError};
use parking_lot::Mutex;
use tracing::warn;

use sim_match::{MatchOptions, MatchSummary, TrackLine, Waypoints};

const CAMERA_PERIOD_MS: u64 = 60;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Robot configuration (TOML).  Missing means defaults.
    #[arg(short, long, default_value = "fieldpose.toml")]
    config: PathBuf,

    /// Alliance used for target queries.
    #[arg(short, long, default_value = "blue")]
    alliance: Alliance,

    /// Match length in seconds.
    #[arg(short, long, default_value = "15.0")]
    duration: f64,

    /// Simulated gyro drift in rad/s.
    #[arg(long, default_value = "0.02")]
    gyro_drift: f64,

    /// Force vision corrections on regardless of configuration.
    #[arg(long)]
    vision: bool,

    /// Pace the match against the wall clock.
    #[arg(long)]
    realtime: bool,

    /// Integrate odometry on a background thread (implies --realtime).
    #[arg(long)]
    background_odometry: bool,

    /// Print the resolved configuration as TOML and exit.
    #[arg(long)]
    dump_config: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _telemetry = fieldpose_runtime::init_tracing("fieldpose");

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), PoseError> {
    let mut cfg = config::load(&args.config)?;
    if args.vision {
        cfg.estimator.vision_enabled = true;
    }
    if args.dump_config {
        print!("{}", cfg.to_toml_string()?);
        return Ok(());
    }

    print_banner(&args, &cfg);

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – halting modules …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the match can only end on its own");
    }

    // ── Simulated robot ───────────────────────────────────────────────────
    let mut waypoints = Waypoints::reef_lap(cfg.drive.max_module_speed.min(1.5));
    let sim = Arc::new(Mutex::new(
        SimDrive::new(cfg.drive.kinematics()?)
            .with_gyro_drift(args.gyro_drift)
            .with_true_pose(waypoints.start()),
    ));
    let cameras: Vec<SharedSimCamera> = cfg
        .vision
        .cameras
        .iter()
        .map(|c| SharedSimCamera::new(SimCamera::new(c.name.clone(), c.robot_to_camera())))
        .collect();
    let boxed: Vec<Box<dyn Camera>> = cameras
        .iter()
        .map(|c| Box::new(c.clone()) as Box<dyn Camera>)
        .collect();

    let drive: SharedDrive = sim.clone();
    let mut robot = DriveLoop::from_config(&cfg, drive, boxed)?;
    robot.set_alliance(args.alliance);

    let opts = MatchOptions {
        duration: args.duration,
        tick: cfg.drive.tick_period(),
        // Cameras run at roughly 16 Hz whatever the tick period.
        camera_every: (CAMERA_PERIOD_MS / cfg.drive.tick_period_ms.max(1)).max(1) as usize,
        realtime: args.realtime,
        background_odometry: args.background_odometry,
        ..MatchOptions::default()
    };

    println!(
        "  {:>6}  {:>22}  {:>22}  {:>7}  {}",
        "t (s)".bold(),
        "estimate".bold(),
        "truth".bold(),
        "error".bold(),
        "targets".bold()
    );
    let summary = sim_match::run(&mut robot, &sim, &cameras, &mut waypoints, &opts, &shutdown, print_track_line)?;
    print_summary(&summary);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner(args: &Args, cfg: &Config) {
    println!();
    println!("  {} {}",
        "fieldpose".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Swerve pose estimation – simulated match");
    println!();
    println!("  Config    {}", args.config.display().to_string().bold());
    println!(
        "  Layout    {}",
        cfg.vision
            .field_layout
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "bundled 2025 field".to_string())
            .bold()
    );
    println!("  Alliance  {}", args.alliance.to_string().bold());
    println!(
        "  Vision    {}",
        if cfg.estimator.vision_enabled { "corrected".green() } else { "odometry only".yellow() }
    );
    println!("  Cameras   {}", cfg.vision.cameras.len());
    println!();
}

fn fmt_pose(p: Pose2d) -> String {
    format!("({:6.2}, {:5.2}, {:6.1}°)", p.x(), p.y(), p.heading().degrees())
}

fn print_track_line(line: &TrackLine) {
    let error = format!("{:.3} m", line.error());
    let error = if line.error() < 0.05 {
        error.green()
    } else if line.error() < 0.25 {
        error.yellow()
    } else {
        error.red()
    };
    let targets = if line.visible.is_empty() {
        "–".dimmed().to_string()
    } else {
        line.visible.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", ")
    };
    let aim = line
        .aim
        .map(|a| format!(" → aim {}", fmt_pose(a)).dimmed().to_string())
        .unwrap_or_default();
    println!(
        "  {:>6.2}  {}  {}  {:>7}  {}{}",
        line.time,
        fmt_pose(line.estimate),
        fmt_pose(line.truth).dimmed(),
        error,
        targets,
        aim
    );
}

fn print_summary(summary: &MatchSummary) {
    println!();
    if summary.interrupted {
        println!("  {}", "Match interrupted.".yellow().bold());
    } else {
        println!("  {}", "Match complete.".green().bold());
    }
    println!("  Ticks               {}", summary.ticks);
    println!("  Vision corrections  {}", summary.corrections_applied);
    println!("  Final estimate      {}", fmt_pose(summary.estimate));
    println!("  Ground truth        {}", fmt_pose(summary.truth));
    println!("  Final error         {:.3} m", summary.error());
    println!();
}
