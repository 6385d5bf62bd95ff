//! Gallery commands: list, delete and export captured images.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::analyzer::catalog::EquipmentId;
use crate::analyzer::image_prep::is_data_uri;
use crate::storage::persist::Persister;
use crate::storage::types::{CapturedImage, DeleteReport, SyncState};

/// One gallery row, without the (possibly huge) inline image data.
#[derive(Debug, Clone, Serialize)]
pub struct GalleryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub detections: Vec<EquipmentId>,
    pub confidence: f64,
    pub is_protected: bool,
    pub sync_state: SyncState,
    /// Public URL, or None for images held inline in the local store
    pub url: Option<String>,
}

impl From<CapturedImage> for GalleryEntry {
    fn from(image: CapturedImage) -> Self {
        Self {
            url: (!is_data_uri(&image.url)).then_some(image.url),
            id: image.id,
            timestamp: image.timestamp,
            detections: image.detections,
            confidence: image.confidence,
            is_protected: image.is_protected,
            sync_state: image.sync_state,
        }
    }
}

/// List captures, newest first.
pub async fn list_captures(persister: &Persister) -> Result<Vec<GalleryEntry>, String> {
    let images = persister
        .list()
        .await
        .map_err(|e| format!("Failed to load gallery: {}", e))?;
    info!("Listed {} captures", images.len());
    Ok(images.into_iter().map(GalleryEntry::from).collect())
}

pub async fn delete_captures(
    persister: &Persister,
    ids: &[String],
) -> Result<DeleteReport, String> {
    persister
        .delete_many(ids)
        .await
        .map_err(|e| format!("Failed to delete captures: {}", e))
}

pub async fn export_capture(
    persister: &Persister,
    id: &str,
    out_dir: &Path,
) -> Result<PathBuf, String> {
    persister
        .export(id, out_dir)
        .await
        .map_err(|e| e.user_message())
}
