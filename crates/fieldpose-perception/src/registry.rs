//! Field Target Registry.
//!
//! Maps fiducial markers to the semantic [`FieldTarget`] they mark, per
//! alliance, and serves the marker geometry from the [`FieldLayout`].  The
//! reverse index is built once at construction; nothing mutates afterwards.
//!
//! # Example
//!
//! ```rust
//! use fieldpose_perception::layout::FieldLayout;
//! use fieldpose_perception::registry::{FieldTarget, TargetRegistry};
//! use fieldpose_types::Alliance;
//!
//! let registry = TargetRegistry::with_defaults(FieldLayout::bundled().unwrap()).unwrap();
//! assert_eq!(registry.target_for_marker(12), Some(FieldTarget::CoralStation));
//! assert_eq!(registry.ids(FieldTarget::CoralStation, Alliance::Blue), &[1, 2]);
//! assert!(registry.target_for_marker_on(12, Alliance::Blue).is_none());
//! ```

use std::collections::HashMap;

use fieldpose_hal::MarkerLayout;
use fieldpose_types::{Alliance, Pose3d, PoseError, Transform2d};
use serde::{Deserialize, Serialize};

use crate::layout::FieldLayout;

/// A semantic field object represented by one or more markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTarget {
    CoralStation,
    Processor,
    Barge,
    Reef,
}

impl FieldTarget {
    /// Every target, in registry order.
    pub const ALL: [FieldTarget; 4] = [
        FieldTarget::CoralStation,
        FieldTarget::Processor,
        FieldTarget::Barge,
        FieldTarget::Reef,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FieldTarget::CoralStation => "coral_station",
            FieldTarget::Processor => "processor",
            FieldTarget::Barge => "barge",
            FieldTarget::Reef => "reef",
        }
    }
}

impl std::fmt::Display for FieldTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Marker sets and approach offset for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub blue_ids: Vec<u32>,
    pub red_ids: Vec<u32>,
    /// Where the robot should sit relative to the marker to engage it,
    /// expressed in the marker's frame.
    pub approach: Transform2d,
}

impl TargetSpec {
    pub fn new(blue_ids: Vec<u32>, red_ids: Vec<u32>) -> Self {
        Self {
            blue_ids,
            red_ids,
            approach: Transform2d::identity(),
        }
    }

    pub fn ids(&self, alliance: Alliance) -> &[u32] {
        match alliance {
            Alliance::Blue => &self.blue_ids,
            Alliance::Red => &self.red_ids,
        }
    }
}

/// The 2025 target table.  Approach offsets start as identity.
pub fn default_targets() -> Vec<(FieldTarget, TargetSpec)> {
    vec![
        (FieldTarget::CoralStation, TargetSpec::new(vec![1, 2], vec![12, 13])),
        (FieldTarget::Processor, TargetSpec::new(vec![3], vec![16])),
        (FieldTarget::Barge, TargetSpec::new(vec![4, 14], vec![5, 15])),
        (FieldTarget::Reef, TargetSpec::new((17..=22).collect(), (6..=11).collect())),
    ]
}

/// Immutable marker ↔ target index over a [`FieldLayout`].
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    layout: FieldLayout,
    targets: Vec<(FieldTarget, TargetSpec)>,
    by_marker: HashMap<u32, FieldTarget>,
    by_alliance: HashMap<(Alliance, u32), FieldTarget>,
}

impl TargetRegistry {
    /// Build the registry and its reverse index.
    ///
    /// # Errors
    ///
    /// [`PoseError::MalformedRegistry`] when a target is listed twice, a
    /// marker id is not in the layout, or a marker would map to two
    /// different targets (under one alliance or across alliances).
    pub fn new(
        layout: FieldLayout,
        targets: Vec<(FieldTarget, TargetSpec)>,
    ) -> Result<Self, PoseError> {
        let mut by_marker: HashMap<u32, FieldTarget> = HashMap::new();
        let mut by_alliance: HashMap<(Alliance, u32), FieldTarget> = HashMap::new();

        for (i, (target, spec)) in targets.iter().enumerate() {
            if targets[..i].iter().any(|(t, _)| t == target) {
                return Err(PoseError::MalformedRegistry(format!(
                    "target {target} is defined more than once"
                )));
            }
            for alliance in [Alliance::Blue, Alliance::Red] {
                for &id in spec.ids(alliance) {
                    if !layout.contains(id) {
                        return Err(PoseError::MalformedRegistry(format!(
                            "target {target} references marker {id}, which is not in {}",
                            layout.source_name()
                        )));
                    }
                    if let Some(other) = by_alliance.insert((alliance, id), *target) {
                        if other != *target {
                            return Err(PoseError::MalformedRegistry(format!(
                                "marker {id} maps to both {other} and {target} for the {alliance} alliance"
                            )));
                        }
                    }
                    if let Some(other) = by_marker.insert(id, *target) {
                        if other != *target {
                            return Err(PoseError::MalformedRegistry(format!(
                                "marker {id} maps to {other} and {target} on opposite alliances"
                            )));
                        }
                    }
                }
            }
        }

        Ok(Self {
            layout,
            targets,
            by_marker,
            by_alliance,
        })
    }

    /// Registry over [`default_targets`].
    pub fn with_defaults(layout: FieldLayout) -> Result<Self, PoseError> {
        Self::new(layout, default_targets())
    }

    /// The target a marker represents, regardless of alliance.
    pub fn target_for_marker(&self, marker_id: u32) -> Option<FieldTarget> {
        self.by_marker.get(&marker_id).copied()
    }

    /// The target a marker represents for `alliance` only.
    pub fn target_for_marker_on(&self, marker_id: u32, alliance: Alliance) -> Option<FieldTarget> {
        self.by_alliance.get(&(alliance, marker_id)).copied()
    }

    pub fn pose_for_marker(&self, marker_id: u32) -> Option<Pose3d> {
        self.layout.marker_pose(marker_id)
    }

    /// Approach offset for `target`; identity for targets not registered.
    pub fn approach_offset(&self, target: FieldTarget) -> Transform2d {
        self.spec(target)
            .map(|s| s.approach)
            .unwrap_or_else(Transform2d::identity)
    }

    /// Marker ids of `target` for `alliance`, in registry order.
    pub fn ids(&self, target: FieldTarget, alliance: Alliance) -> &[u32] {
        self.spec(target).map(|s| s.ids(alliance)).unwrap_or(&[])
    }

    pub fn spec(&self, target: FieldTarget) -> Option<&TargetSpec> {
        self.targets
            .iter()
            .find(|(t, _)| *t == target)
            .map(|(_, s)| s)
    }

    /// Registered targets in registry order.
    pub fn targets(&self) -> impl Iterator<Item = FieldTarget> + '_ {
        self.targets.iter().map(|(t, _)| *t)
    }

    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
