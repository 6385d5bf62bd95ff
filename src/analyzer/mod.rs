//! PPE detection: equipment catalog, vision calls, response normalization
//! and coverage-based confidence scoring.

pub mod catalog;
pub mod confidence;
pub mod image_prep;
pub mod normalize;
pub mod prompts;
pub mod types;
pub mod vision;

pub use catalog::{default_required, EquipmentId};
pub use confidence::{estimate, estimate_list, CONFIDENCE_FLOOR};
pub use normalize::normalize;
pub use types::*;
pub use vision::{analyze_frame, VisionAnalyzer, VisionClient};
