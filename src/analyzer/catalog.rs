//! Fixed catalog of recognized protective equipment.
//!
//! Identifiers serialize as the lowercase tokens the vision prompts ask the
//! model to emit. English names are accepted as aliases when parsing.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A recognized piece of protective equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EquipmentId {
    #[serde(rename = "casco")]
    Helmet,
    #[serde(rename = "chaleco")]
    Vest,
    #[serde(rename = "botas")]
    Boots,
    #[serde(rename = "orejeras")]
    EarProtection,
    #[serde(rename = "mascarilla")]
    Mask,
    #[serde(rename = "gafas")]
    Goggles,
    #[serde(rename = "guantes")]
    Gloves,
}

impl EquipmentId {
    /// Every catalog entry, in catalog order.
    pub const ALL: [EquipmentId; 7] = [
        EquipmentId::Helmet,
        EquipmentId::Vest,
        EquipmentId::Boots,
        EquipmentId::EarProtection,
        EquipmentId::Mask,
        EquipmentId::Goggles,
        EquipmentId::Gloves,
    ];

    /// Wire token used in model responses and stored records.
    pub fn token(&self) -> &'static str {
        match self {
            EquipmentId::Helmet => "casco",
            EquipmentId::Vest => "chaleco",
            EquipmentId::Boots => "botas",
            EquipmentId::EarProtection => "orejeras",
            EquipmentId::Mask => "mascarilla",
            EquipmentId::Goggles => "gafas",
            EquipmentId::Gloves => "guantes",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EquipmentId::Helmet => "Safety helmet",
            EquipmentId::Vest => "Reflective vest",
            EquipmentId::Boots => "Safety boots",
            EquipmentId::EarProtection => "Ear protection",
            EquipmentId::Mask => "Mask",
            EquipmentId::Goggles => "Safety goggles",
            EquipmentId::Gloves => "Protective gloves",
        }
    }

    /// Parse a token case-insensitively. Unknown tokens yield `None`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "casco" | "helmet" => Some(EquipmentId::Helmet),
            "chaleco" | "vest" => Some(EquipmentId::Vest),
            "botas" | "boots" => Some(EquipmentId::Boots),
            "orejeras" | "ear-protection" | "ear_protection" => Some(EquipmentId::EarProtection),
            "mascarilla" | "mask" => Some(EquipmentId::Mask),
            "gafas" | "goggles" => Some(EquipmentId::Goggles),
            "guantes" | "gloves" => Some(EquipmentId::Gloves),
            _ => None,
        }
    }
}

impl fmt::Display for EquipmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Items a worker is expected to wear when no configuration overrides it.
/// Ear protection is tracked but not required.
pub fn default_required() -> BTreeSet<EquipmentId> {
    BTreeSet::from([
        EquipmentId::Helmet,
        EquipmentId::Vest,
        EquipmentId::Goggles,
        EquipmentId::Gloves,
        EquipmentId::Mask,
        EquipmentId::Boots,
    ])
}

/// Keep only recognized tokens, in first-seen order, without duplicates.
pub fn filter_tokens<'a, I>(tokens: I) -> Vec<EquipmentId>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = BTreeSet::new();
    tokens
        .into_iter()
        .filter_map(EquipmentId::from_token)
        .filter(|id| seen.insert(*id))
        .collect()
}
