//! Fiducial field layout: marker id → field-frame [`Pose3d`].
//!
//! Layouts use the WPILib AprilTag JSON format:
//!
//! ```json
//! { "tags": [ { "ID": 1, "pose": { "translation": { "x": 0, "y": 0, "z": 0 },
//!                                  "rotation": { "quaternion": { "W": 1, "X": 0, "Y": 0, "Z": 0 } } } } ],
//!   "field": { "length": 17.548, "width": 8.052 } }
//! ```
//!
//! The 2025 welded-field layout is compiled into the crate and returned by
//! [`FieldLayout::bundled`].

use std::collections::HashMap;
use std::path::Path;

use fieldpose_hal::MarkerLayout;
use fieldpose_types::{Pose3d, PoseError, Quaternion, Vec3};
use serde::{Deserialize, Serialize};

/// File name of the layout shipped with the crate.
pub const BUNDLED_LAYOUT_NAME: &str = "2025-reefscape-welded.json";

const BUNDLED_LAYOUT: &str = include_str!("../assets/2025-reefscape-welded.json");

// ────────────────────────────────────────────────────────────────────────────
// JSON schema
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutFile {
    tags: Vec<LayoutTag>,
    field: FieldDimensions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LayoutTag {
    #[serde(rename = "ID")]
    id: u32,
    pose: LayoutPose,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct LayoutPose {
    translation: LayoutTranslation,
    rotation: LayoutRotation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct LayoutTranslation {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct LayoutRotation {
    quaternion: LayoutQuaternion,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct LayoutQuaternion {
    #[serde(rename = "W")]
    w: f64,
    #[serde(rename = "X")]
    x: f64,
    #[serde(rename = "Y")]
    y: f64,
    #[serde(rename = "Z")]
    z: f64,
}

/// Field extent in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldDimensions {
    pub length: f64,
    pub width: f64,
}

// ────────────────────────────────────────────────────────────────────────────
// FieldLayout
// ────────────────────────────────────────────────────────────────────────────

/// An immutable marker map, loaded once at startup.
#[derive(Debug, Clone)]
pub struct FieldLayout {
    source_name: String,
    markers: HashMap<u32, Pose3d>,
    dimensions: FieldDimensions,
}

impl FieldLayout {
    /// Parse a layout from JSON text.  `source_name` only labels errors.
    ///
    /// # Errors
    ///
    /// [`PoseError::FieldLayout`] when the JSON does not match the schema,
    /// has no tags, repeats an id, or carries a degenerate quaternion.
    pub fn from_json(source_name: &str, json: &str) -> Result<Self, PoseError> {
        let fail = |details: String| PoseError::FieldLayout {
            source_name: source_name.to_string(),
            details,
        };

        let file: LayoutFile = serde_json::from_str(json).map_err(|e| fail(e.to_string()))?;
        if file.tags.is_empty() {
            return Err(fail("layout contains no tags".to_string()));
        }

        let mut markers = HashMap::with_capacity(file.tags.len());
        for tag in file.tags {
            let q = tag.pose.rotation.quaternion;
            let norm = (q.w * q.w + q.x * q.x + q.y * q.y + q.z * q.z).sqrt();
            if !norm.is_finite() || norm < 1e-9 {
                return Err(fail(format!("tag {} has a degenerate rotation", tag.id)));
            }
            let t = tag.pose.translation;
            let pose = Pose3d::new(
                Vec3::new(t.x, t.y, t.z),
                Quaternion::new(q.w / norm, q.x / norm, q.y / norm, q.z / norm),
            );
            if markers.insert(tag.id, pose).is_some() {
                return Err(fail(format!("tag {} appears more than once", tag.id)));
            }
        }

        Ok(Self {
            source_name: source_name.to_string(),
            markers,
            dimensions: file.field,
        })
    }

    /// Read and parse a layout file.
    ///
    /// # Errors
    ///
    /// [`PoseError::FieldLayout`] when the file is missing, unreadable, or
    /// fails [`from_json`](Self::from_json).
    pub fn load(path: &Path) -> Result<Self, PoseError> {
        let source_name = path.display().to_string();
        let json = std::fs::read_to_string(path).map_err(|e| PoseError::FieldLayout {
            source_name: source_name.clone(),
            details: e.to_string(),
        })?;
        Self::from_json(&source_name, &json)
    }

    /// The 2025 welded-field layout compiled into the crate.
    pub fn bundled() -> Result<Self, PoseError> {
        Self::from_json(BUNDLED_LAYOUT_NAME, BUNDLED_LAYOUT)
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn dimensions(&self) -> FieldDimensions {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn contains(&self, marker_id: u32) -> bool {
        self.markers.contains_key(&marker_id)
    }
}

impl MarkerLayout for FieldLayout {
    fn marker_pose(&self, marker_id: u32) -> Option<Pose3d> {
        self.markers.get(&marker_id).copied()
    }

    fn marker_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.markers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
