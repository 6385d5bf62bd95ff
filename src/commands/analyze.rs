//! Single-image analysis: validate, analyze, report coverage, optionally save.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::analyzer::catalog::EquipmentId;
use crate::analyzer::confidence::{estimate, missing};
use crate::analyzer::image_prep::{prepare_frame, validate_upload};
use crate::analyzer::types::{AnalysisResult, ResponseFormat};
use crate::analyzer::vision::{analyze_frame, VisionAnalyzer};
use crate::config::AppConfig;
use crate::error::PpeError;
use crate::storage::persist::Persister;
use crate::storage::types::{PersistOutcome, SyncState};

/// Analysis report for one file.
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub file: String,
    pub result: AnalysisResult,
    pub detected: Vec<EquipmentId>,
    /// Required items not seen on anyone in the frame
    pub missing: Vec<EquipmentId>,
    /// Coverage of the required set, as stored with captures
    pub coverage_confidence: f64,
    pub saved: Option<SavedCapture>,
}

#[derive(Debug, Serialize)]
pub struct SavedCapture {
    pub id: String,
    pub state: SyncState,
    pub detail: String,
}

impl From<PersistOutcome> for SavedCapture {
    fn from(outcome: PersistOutcome) -> Self {
        let state = outcome.state();
        match outcome {
            PersistOutcome::Synced { id, url } => Self {
                id,
                state,
                detail: url,
            },
            PersistOutcome::LocalOnly { id, reason } => Self {
                id,
                state,
                detail: reason,
            },
        }
    }
}

/// Analyze one image file. Validation runs before any network call.
pub async fn analyze_file(
    analyzer: &dyn VisionAnalyzer,
    persister: Option<&Persister>,
    config: &AppConfig,
    path: &Path,
    format: ResponseFormat,
) -> Result<AnalyzeResponse, PpeError> {
    info!("Analyzing {:?}", path);
    let bytes = std::fs::read(path)?;
    validate_upload(&bytes, config.upload.max_bytes)?;
    let frame = prepare_frame(&bytes)?;

    let result = analyze_frame(analyzer, &frame, format).await?;
    let required = config.required_set()?;
    let detected: BTreeSet<EquipmentId> = result.detected_equipment();

    let saved = match persister {
        Some(persister) => Some(persister.persist(&frame, &result).await.into()),
        None => None,
    };

    Ok(AnalyzeResponse {
        file: path.to_string_lossy().to_string(),
        coverage_confidence: estimate(&detected, &required),
        missing: missing(&detected, &required),
        detected: detected.into_iter().collect(),
        result,
        saved,
    })
}

/// Analyze several files, continuing past failures.
///
/// Returns the successful reports and the per-file error messages.
pub async fn analyze_files(
    analyzer: &dyn VisionAnalyzer,
    persister: Option<&Persister>,
    config: &AppConfig,
    paths: &[impl AsRef<Path>],
    format: ResponseFormat,
) -> (Vec<AnalyzeResponse>, Vec<String>) {
    let mut reports = Vec::new();
    let mut failures = Vec::new();

    for path in paths {
        let path = path.as_ref();
        match analyze_file(analyzer, persister, config, path, format).await {
            Ok(report) => reports.push(report),
            Err(e) => {
                warn!("Analysis of {:?} failed: {}", path, e);
                failures.push(format!("{}: {}", path.display(), e.user_message()));
            }
        }
    }

    (reports, failures)
}
