use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analyzer::catalog::{filter_tokens, EquipmentId};
use crate::error::PpeError;

/// Lifecycle of one captured frame.
///
/// `Captured -> UploadPending -> {Synced | LocalOnly}`, then `LocalOnly -> Synced`
/// through migration. `Synced` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Captured,
    UploadPending,
    Synced,
    #[default]
    LocalOnly,
}

impl SyncState {
    pub fn can_transition_to(self, next: SyncState) -> bool {
        matches!(
            (self, next),
            (SyncState::Captured, SyncState::UploadPending)
                | (SyncState::UploadPending, SyncState::Synced)
                | (SyncState::UploadPending, SyncState::LocalOnly)
                | (SyncState::LocalOnly, SyncState::Synced)
        )
    }

    pub fn advance(self, next: SyncState) -> Result<SyncState, PpeError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PpeError::LocalStore(format!(
                "invalid capture state transition {:?} -> {:?}",
                self, next
            )))
        }
    }
}

/// A captured frame with its detections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedImage {
    pub id: String,
    /// Public URL of the stored object, or a `data:` URI while unsynced
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub detections: Vec<EquipmentId>,
    pub confidence: f64,
    #[serde(default)]
    pub is_protected: bool,
    #[serde(default)]
    pub sync_state: SyncState,
}

impl CapturedImage {
    pub fn from_row(row: ImageRow) -> Self {
        Self {
            detections: filter_tokens(row.detections.iter().map(String::as_str)),
            id: row.id,
            url: row.url,
            timestamp: row.created_at,
            confidence: row.confidence,
            is_protected: row.is_protected,
            sync_state: SyncState::Synced,
        }
    }

    pub fn to_row(&self) -> ImageRow {
        ImageRow {
            id: self.id.clone(),
            url: self.url.clone(),
            detections: self
                .detections
                .iter()
                .map(|d| d.token().to_string())
                .collect(),
            confidence: self.confidence,
            created_at: self.timestamp,
            is_protected: self.is_protected,
            user_id: None,
        }
    }
}

/// Row shape of the hosted metadata table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRow {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub detections: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_protected: bool,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Where a capture ended up after `persist`.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Synced { id: String, url: String },
    LocalOnly { id: String, reason: String },
}

impl PersistOutcome {
    pub fn id(&self) -> &str {
        match self {
            PersistOutcome::Synced { id, .. } | PersistOutcome::LocalOnly { id, .. } => id,
        }
    }

    pub fn state(&self) -> SyncState {
        match self {
            PersistOutcome::Synced { .. } => SyncState::Synced,
            PersistOutcome::LocalOnly { .. } => SyncState::LocalOnly,
        }
    }
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Local records still marked LocalOnly at the start
    pub examined: usize,
    /// Uploaded and inserted remotely during this pass
    pub migrated: usize,
    /// Already present remotely
    pub skipped: usize,
    pub failed: usize,
}

/// Result of deleting one or more captures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub removed_local: usize,
    pub removed_remote: bool,
    pub remote_error: Option<String>,
}
