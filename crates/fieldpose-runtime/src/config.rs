//! Robot configuration, read from a TOML file.
//!
//! Every field has a default, so a partial file (or no file at all) is
//! valid.  `FIELDPOSE_*` environment variables are applied on top after
//! parsing.
//!
//! ```toml
//! [drive]
//! max_module_speed = 4.2
//!
//! [estimator]
//! vision_enabled = true
//!
//! [[vision.cameras]]
//! name = "front"
//! x = 0.3
//! z = 0.25
//! pitch = -15.0
//!
//! [[targets]]
//! target = "reef"
//! approach = { x = 0.6, heading_deg = 180.0 }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fieldpose_hal::SwerveKinematics;
use fieldpose_perception::estimator::{EstimatorMode, EstimatorSettings};
use fieldpose_perception::layout::FieldLayout;
use fieldpose_perception::registry::{FieldTarget, TargetSpec, default_targets};
use fieldpose_perception::tracker::TrackerSettings;
use fieldpose_types::{
    ConfidenceVector, PoseError, Quaternion, Rotation2d, Transform2d, Transform3d, Translation2d,
    Vec3,
};
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Sections
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    /// Per-target overrides of the built-in target table.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<TargetOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveConfig {
    /// Module speed ceiling in m/s.
    #[serde(default = "default_max_module_speed")]
    pub max_module_speed: f64,
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,
    /// Module mounting offsets from the robot centre, in metres.
    #[serde(default = "default_modules")]
    pub modules: Vec<ModuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    #[serde(default)]
    pub vision_enabled: bool,
    #[serde(default = "default_stale_window_ms")]
    pub stale_window_ms: u64,
    #[serde(default = "default_history_window_ms")]
    pub history_window_ms: u64,
    #[serde(default = "default_state_std_devs")]
    pub state_std_devs: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_visibility_timeout_ms")]
    pub visibility_timeout_ms: u64,
    #[serde(default = "default_single_tag_std_devs")]
    pub single_tag_std_devs: [f64; 3],
    #[serde(default = "default_multi_tag_std_devs")]
    pub multi_tag_std_devs: [f64; 3],
    #[serde(default = "default_max_single_tag_distance")]
    pub max_single_tag_distance: f64,
    /// WPILib layout JSON.  `None` selects the bundled field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_layout: Option<PathBuf>,
    #[serde(default = "default_cameras")]
    pub cameras: Vec<CameraConfig>,
}

/// Camera mounting relative to the robot centre.  Metres and degrees;
/// positive pitch tips the lens toward the floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub name: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default)]
    pub roll: f64,
    #[serde(default)]
    pub pitch: f64,
    #[serde(default)]
    pub yaw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetOverride {
    pub target: FieldTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blue_ids: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub red_ids: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approach: Option<ApproachConfig>,
}

/// Engagement offset in the marker's frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ApproachConfig {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub heading_deg: f64,
}

// ────────────────────────────────────────────────────────────────────────────
// Defaults
// ────────────────────────────────────────────────────────────────────────────

fn default_max_module_speed() -> f64 {
    3.0
}
fn default_tick_period_ms() -> u64 {
    20
}
fn default_modules() -> Vec<ModuleConfig> {
    [
        ("front_left", 0.411, 0.332),
        ("front_right", 0.411, -0.332),
        ("back_left", -0.411, 0.332),
        ("back_right", -0.411, -0.332),
    ]
    .into_iter()
    .map(|(name, x, y)| ModuleConfig {
        name: name.to_string(),
        x,
        y,
    })
    .collect()
}
fn default_stale_window_ms() -> u64 {
    250
}
fn default_history_window_ms() -> u64 {
    1500
}
fn default_state_std_devs() -> [f64; 3] {
    [0.1, 0.1, 0.1]
}
fn default_poll_interval_ms() -> u64 {
    15
}
fn default_visibility_timeout_ms() -> u64 {
    500
}
fn default_single_tag_std_devs() -> [f64; 3] {
    [4.0, 4.0, 8.0]
}
fn default_multi_tag_std_devs() -> [f64; 3] {
    [0.5, 0.5, 1.0]
}
fn default_max_single_tag_distance() -> f64 {
    4.0
}
fn default_cameras() -> Vec<CameraConfig> {
    vec![
        CameraConfig {
            name: "front".to_string(),
            x: 0.3,
            y: 0.0,
            z: 0.25,
            roll: 0.0,
            pitch: -15.0,
            yaw: 0.0,
        },
        CameraConfig {
            name: "back".to_string(),
            x: -0.3,
            y: 0.0,
            z: 0.25,
            roll: 0.0,
            pitch: -15.0,
            yaw: 180.0,
        },
    ]
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            max_module_speed: default_max_module_speed(),
            tick_period_ms: default_tick_period_ms(),
            modules: default_modules(),
        }
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            vision_enabled: false,
            stale_window_ms: default_stale_window_ms(),
            history_window_ms: default_history_window_ms(),
            state_std_devs: default_state_std_devs(),
        }
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            visibility_timeout_ms: default_visibility_timeout_ms(),
            single_tag_std_devs: default_single_tag_std_devs(),
            multi_tag_std_devs: default_multi_tag_std_devs(),
            max_single_tag_distance: default_max_single_tag_distance(),
            field_layout: None,
            cameras: default_cameras(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Conversions into runtime settings
// ────────────────────────────────────────────────────────────────────────────

fn ms(value: u64) -> f64 {
    value as f64 / 1000.0
}

impl DriveConfig {
    pub fn kinematics(&self) -> Result<SwerveKinematics, PoseError> {
        let offsets = self
            .modules
            .iter()
            .map(|m| Translation2d::new(m.x, m.y))
            .collect();
        SwerveKinematics::new(offsets, self.max_module_speed)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }
}

impl EstimatorConfig {
    pub fn settings(&self) -> EstimatorSettings {
        EstimatorSettings {
            state_std_devs: self.state_std_devs.into(),
            stale_window: ms(self.stale_window_ms),
            history_window: ms(self.history_window_ms),
            mode: if self.vision_enabled {
                EstimatorMode::VisionCorrected
            } else {
                EstimatorMode::OdometryOnly
            },
        }
    }
}

impl VisionConfig {
    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            single_tag_std_devs: ConfidenceVector::from(self.single_tag_std_devs),
            multi_tag_std_devs: ConfidenceVector::from(self.multi_tag_std_devs),
            max_single_tag_distance: self.max_single_tag_distance,
            poll_interval: ms(self.poll_interval_ms),
            visibility_timeout: ms(self.visibility_timeout_ms),
        }
    }

    /// The configured layout file, or the bundled field.
    pub fn load_layout(&self) -> Result<FieldLayout, PoseError> {
        match &self.field_layout {
            Some(path) => FieldLayout::load(path),
            None => FieldLayout::bundled(),
        }
    }
}

impl CameraConfig {
    pub fn robot_to_camera(&self) -> Transform3d {
        Transform3d::new(
            Vec3::new(self.x, self.y, self.z),
            Quaternion::from_euler(
                self.roll.to_radians(),
                self.pitch.to_radians(),
                self.yaw.to_radians(),
            ),
        )
    }
}

impl ApproachConfig {
    pub fn transform(&self) -> Transform2d {
        Transform2d::new(
            Translation2d::new(self.x, self.y),
            Rotation2d::from_degrees(self.heading_deg),
        )
    }
}

impl Config {
    /// The built-in target table with `[[targets]]` overrides applied.
    pub fn target_specs(&self) -> Vec<(FieldTarget, TargetSpec)> {
        let mut specs = default_targets();
        for o in &self.targets {
            let Some((_, spec)) = specs.iter_mut().find(|(t, _)| *t == o.target) else {
                continue;
            };
            if let Some(ids) = &o.blue_ids {
                spec.blue_ids = ids.clone();
            }
            if let Some(ids) = &o.red_ids {
                spec.red_ids = ids.clone();
            }
            if let Some(approach) = o.approach {
                spec.approach = approach.transform();
            }
        }
        specs
    }

    /// Reject values no loop can run with.
    pub fn validate(&self) -> Result<(), PoseError> {
        if self.drive.tick_period_ms == 0 {
            return Err(PoseError::Config("drive.tick_period_ms must be positive".into()));
        }
        let speed = self.drive.max_module_speed;
        if !speed.is_finite() || speed <= 0.0 {
            return Err(PoseError::Config(
                "drive.max_module_speed must be finite and positive".into(),
            ));
        }
        if self.estimator.state_std_devs.iter().any(|s| s.is_nan() || *s < 0.0) {
            return Err(PoseError::Config("estimator.state_std_devs must be non-negative".into()));
        }
        // A zero or infinite vision baseline grades every estimate unusable.
        let vision = [
            ("vision.single_tag_std_devs", self.vision.single_tag_std_devs),
            ("vision.multi_tag_std_devs", self.vision.multi_tag_std_devs),
        ];
        for (field, v) in vision {
            if !ConfidenceVector::from(v).is_finite() {
                return Err(PoseError::Config(format!("{field} must be finite and positive")));
            }
        }
        let mut names: Vec<&str> = self.vision.cameras.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        if let Some(w) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(PoseError::Config(format!("duplicate camera name {:?}", w[0])));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, PoseError> {
        toml::to_string_pretty(self)
            .map_err(|e| PoseError::Config(format!("failed to serialize config: {e}")))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Loading
// ────────────────────────────────────────────────────────────────────────────

/// Parse TOML text.  No environment overrides are applied.
pub fn parse(raw: &str) -> Result<Config, PoseError> {
    let cfg: Config =
        toml::from_str(raw).map_err(|e| PoseError::Config(format!("failed to parse config: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load `path`, falling back to defaults when it does not exist, then apply
/// environment overrides.
pub fn load(path: &Path) -> Result<Config, PoseError> {
    let mut cfg = if path.exists() {
        let raw = fs::read_to_string(path).map_err(|e| {
            PoseError::Config(format!("failed to read config at {}: {e}", path.display()))
        })?;
        parse(&raw)?
    } else {
        Config::default()
    };
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Apply `FIELDPOSE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FIELDPOSE_VISION_ENABLED` | `estimator.vision_enabled` |
/// | `FIELDPOSE_FIELD_LAYOUT` | `vision.field_layout` |
/// | `FIELDPOSE_STALE_WINDOW_MS` | `estimator.stale_window_ms` |
/// | `FIELDPOSE_MAX_MODULE_SPEED` | `drive.max_module_speed` |
///
/// Unparsable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("FIELDPOSE_VISION_ENABLED")
        && let Some(enabled) = parse_flag(&v)
    {
        cfg.estimator.vision_enabled = enabled;
    }
    if let Some(v) = lookup("FIELDPOSE_FIELD_LAYOUT")
        && !v.trim().is_empty()
    {
        cfg.vision.field_layout = Some(PathBuf::from(v));
    }
    if let Some(v) = lookup("FIELDPOSE_STALE_WINDOW_MS")
        && let Ok(window) = v.trim().parse::<u64>()
    {
        cfg.estimator.stale_window_ms = window;
    }
    if let Some(v) = lookup("FIELDPOSE_MAX_MODULE_SPEED")
        && let Ok(speed) = v.trim().parse::<f64>()
    {
        cfg.drive.max_module_speed = speed;
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse("").expect("parse");
        assert_eq!(cfg, Config::default());
        assert!(!cfg.estimator.vision_enabled);
        assert_eq!(cfg.drive.modules.len(), 4);
        assert_eq!(cfg.drive.tick_period(), Duration::from_millis(20));
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg = parse("[estimator]\nvision_enabled = true\n").expect("parse");
        assert!(cfg.estimator.vision_enabled);
        assert_eq!(cfg.estimator.stale_window_ms, 250);
        assert_eq!(cfg.vision.poll_interval_ms, 15);
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = load(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(cfg.drive.tick_period_ms, 20);
        assert_eq!(cfg.vision.cameras.len(), 2);
    }

    #[test]
    fn file_is_read_from_disk() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("robot.toml");
        std::fs::write(
            &path,
            r#"
[drive]
tick_period_ms = 10

[[vision.cameras]]
name = "left"
y = 0.2
yaw = 90.0
"#,
        )
        .expect("write");
        let cfg = load(&path).expect("load");
        assert_eq!(cfg.drive.tick_period_ms, 10);
        assert_eq!(cfg.vision.cameras.len(), 1);
        assert_eq!(cfg.vision.cameras[0].name, "left");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("robot.toml");
        std::fs::write(&path, "[drive\nmax_module_speed = ").expect("write");
        assert!(matches!(load(&path), Err(PoseError::Config(_))));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(parse("[drive]\ntick_period_ms = 0\n"), Err(PoseError::Config(_))));
        assert!(matches!(
            parse("[drive]\nmax_module_speed = -1.0\n"),
            Err(PoseError::Config(_))
        ));
        assert!(matches!(
            parse("[vision]\nsingle_tag_std_devs = [1.0, -1.0, 1.0]\n"),
            Err(PoseError::Config(_))
        ));
        assert!(matches!(
            parse("[drive]\nmax_module_speed = inf\n"),
            Err(PoseError::Config(_))
        ));
        assert!(matches!(
            parse("[vision]\nmulti_tag_std_devs = [0.5, 0.0, 1.0]\n"),
            Err(PoseError::Config(_))
        ));
        // Zero state noise is legal: odometry is then fully trusted.
        assert!(parse("[estimator]\nstate_std_devs = [0.0, 0.0, 0.0]\n").is_ok());
        let dup = "[[vision.cameras]]\nname = \"a\"\n[[vision.cameras]]\nname = \"a\"\n";
        assert!(matches!(parse(dup), Err(PoseError::Config(_))));
    }

    #[test]
    fn env_overrides_apply() {
        let env = overrides(&[
            ("FIELDPOSE_VISION_ENABLED", "true"),
            ("FIELDPOSE_FIELD_LAYOUT", "/tmp/field.json"),
            ("FIELDPOSE_STALE_WINDOW_MS", "100"),
            ("FIELDPOSE_MAX_MODULE_SPEED", "4.5"),
        ]);
        let mut cfg = Config::default();
        apply_overrides_from(&mut cfg, |k| env.get(k).cloned());
        assert!(cfg.estimator.vision_enabled);
        assert_eq!(cfg.vision.field_layout, Some(PathBuf::from("/tmp/field.json")));
        assert_eq!(cfg.estimator.stale_window_ms, 100);
        assert!((cfg.drive.max_module_speed - 4.5).abs() < 1e-12);
    }

    #[test]
    fn unparsable_env_values_are_ignored() {
        let env = overrides(&[
            ("FIELDPOSE_VISION_ENABLED", "maybe"),
            ("FIELDPOSE_STALE_WINDOW_MS", "soon"),
            ("FIELDPOSE_MAX_MODULE_SPEED", "fast"),
        ]);
        let mut cfg = Config::default();
        apply_overrides_from(&mut cfg, |k| env.get(k).cloned());
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn settings_conversions() {
        let mut cfg = Config::default();
        cfg.estimator.vision_enabled = true;
        let est = cfg.estimator.settings();
        assert_eq!(est.mode, EstimatorMode::VisionCorrected);
        assert!((est.stale_window - 0.25).abs() < 1e-12);
        assert!((est.history_window - 1.5).abs() < 1e-12);

        let tracker = cfg.vision.tracker_settings();
        assert_eq!(tracker, TrackerSettings::default());

        let kin = cfg.drive.kinematics().expect("kinematics");
        assert_eq!(kin.module_count(), 4);
        assert!((kin.max_speed() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn camera_extrinsic_uses_degrees() {
        let cam = CameraConfig {
            name: "side".into(),
            x: 0.1,
            y: 0.2,
            z: 0.3,
            roll: 0.0,
            pitch: -15.0,
            yaw: 90.0,
        };
        let t = cam.robot_to_camera();
        assert!((t.translation.z - 0.3).abs() < 1e-12);
        assert!((t.rotation.yaw() - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
        assert!((t.rotation.pitch() + 15f64.to_radians()).abs() < 1e-9);
    }

    #[test]
    fn target_overrides_replace_only_named_fields() {
        let cfg = parse(
            r#"
[[targets]]
target = "reef"
approach = { x = 0.6, heading_deg = 180.0 }

[[targets]]
target = "processor"
red_ids = [16, 99]
"#,
        )
        .expect("parse");
        let specs = cfg.target_specs();
        let reef = &specs.iter().find(|(t, _)| *t == FieldTarget::Reef).expect("reef").1;
        assert_eq!(reef.blue_ids, (17..=22).collect::<Vec<_>>());
        assert!((reef.approach.translation.x - 0.6).abs() < 1e-12);
        assert!((reef.approach.rotation.degrees() - 180.0).abs() < 1e-9);

        let processor = &specs
            .iter()
            .find(|(t, _)| *t == FieldTarget::Processor)
            .expect("processor")
            .1;
        assert_eq!(processor.blue_ids, vec![3]);
        assert_eq!(processor.red_ids, vec![16, 99]);
    }

    #[test]
    fn bundled_layout_when_no_path() {
        let layout = VisionConfig::default().load_layout().expect("bundled");
        assert!(layout.contains(18));
    }

    #[test]
    fn serialized_defaults_parse_back() {
        let raw = Config::default().to_toml_string().expect("serialize");
        assert_eq!(parse(&raw).expect("parse"), Config::default());
    }
}
