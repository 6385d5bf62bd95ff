//! Type definitions for normalized vision analysis output.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::catalog::EquipmentId;

/// A single equipment/confidence pair attributed to a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionItem {
    #[serde(rename = "type")]
    pub equipment: EquipmentId,
    /// Always within [0, 1]
    pub confidence: f64,
}

/// One person found in a frame and the equipment attributed to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonDetection {
    pub id: u32,
    /// Unique by equipment, sorted in catalog order
    pub items: Vec<DetectionItem>,
    #[serde(default)]
    pub notes: String,
}

impl PersonDetection {
    /// Build a person record, collapsing repeated equipment to the highest confidence.
    pub fn new(id: u32, items: impl IntoIterator<Item = DetectionItem>, notes: String) -> Self {
        let mut best: BTreeMap<EquipmentId, f64> = BTreeMap::new();
        for item in items {
            let confidence = clamp_unit(item.confidence);
            best.entry(item.equipment)
                .and_modify(|c| *c = c.max(confidence))
                .or_insert(confidence);
        }

        Self {
            id,
            items: best
                .into_iter()
                .map(|(equipment, confidence)| DetectionItem {
                    equipment,
                    confidence,
                })
                .collect(),
            notes,
        }
    }
}

/// Structured result for one analyzed frame. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub persons: Vec<PersonDetection>,
    pub person_count: u32,
    pub overall_confidence: f64,
    #[serde(default)]
    pub description: String,
}

impl AnalysisResult {
    /// Union of equipment across every person in the frame.
    pub fn detected_equipment(&self) -> BTreeSet<EquipmentId> {
        self.persons
            .iter()
            .flat_map(|p| p.items.iter().map(|i| i.equipment))
            .collect()
    }

    pub fn has_person(&self) -> bool {
        self.person_count > 0
    }

    /// Detected equipment as a list in catalog order, the shape stored with captures.
    pub fn detection_list(&self) -> Vec<EquipmentId> {
        self.detected_equipment().into_iter().collect()
    }
}

/// Response shape requested from the vision endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Per-frame list of equipment plus a single confidence
    #[default]
    Simple,
    /// Per-item detected flag and percentage confidence
    Detailed,
}

impl ResponseFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseFormat::Simple => "simple",
            ResponseFormat::Detailed => "detailed",
        }
    }
}

/// Clamp into [0, 1]; NaN becomes 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
