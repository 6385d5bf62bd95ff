//! Capture persistence: primary upload with local fallback, reconciliation,
//! and the gallery operations built on top of both stores.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use super::local::LocalStore;
use super::remote::{MetadataStore, ObjectStore};
use super::types::{CapturedImage, DeleteReport, MigrationReport, PersistOutcome, SyncState};
use crate::analyzer::catalog::EquipmentId;
use crate::analyzer::confidence::estimate_list;
use crate::analyzer::image_prep::{decode_data_uri, is_data_uri, to_data_uri};
use crate::analyzer::types::AnalysisResult;
use crate::error::PpeError;

/// The hosted object store and metadata table, used together.
#[derive(Clone)]
pub struct RemoteStores {
    pub objects: Arc<dyn ObjectStore>,
    pub metadata: Arc<dyn MetadataStore>,
}

/// Owns both stores and the required-equipment set used for scoring.
///
/// Local store calls from async methods run on the blocking pool.
pub struct Persister {
    remote: Option<RemoteStores>,
    local: Arc<LocalStore>,
    required: BTreeSet<EquipmentId>,
}

/// Unique capture id: creation time in milliseconds plus 7 random hex chars.
pub fn generate_capture_id() -> String {
    let bytes: [u8; 4] = rand::random();
    format!(
        "{}_{:07x}",
        Utc::now().timestamp_millis(),
        u32::from_be_bytes(bytes) & 0x0FFF_FFFF
    )
}

pub fn capture_object_name(id: &str) -> String {
    format!("epp_{}.jpg", id)
}

pub fn migrated_object_name(id: &str) -> String {
    format!("migrated_{}.jpg", id)
}

/// `<dir>/EPP_Images/<YYYY-MM-DD>/EPP_<id>.jpg`
pub fn export_path(dir: &Path, image: &CapturedImage) -> PathBuf {
    dir.join("EPP_Images")
        .join(image.timestamp.format("%Y-%m-%d").to_string())
        .join(format!("EPP_{}.jpg", image.id))
}

fn step(image: &mut CapturedImage, next: SyncState) {
    match image.sync_state.advance(next) {
        Ok(state) => image.sync_state = state,
        Err(e) => warn!("Capture {}: {}", image.id, e),
    }
}

impl Persister {
    pub fn new(
        remote: Option<RemoteStores>,
        local: LocalStore,
        required: BTreeSet<EquipmentId>,
    ) -> Self {
        Self {
            remote,
            local: Arc::new(local),
            required,
        }
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    async fn with_local<T, F>(&self, f: F) -> Result<T, PpeError>
    where
        T: Send + 'static,
        F: FnOnce(&LocalStore) -> Result<T, PpeError> + Send + 'static,
    {
        let local = self.local.clone();
        tokio::task::spawn_blocking(move || f(&local))
            .await
            .map_err(|e| PpeError::LocalStore(format!("local store task failed: {}", e)))?
    }

    /// Store a captured frame. Never fails: if the remote path fails the
    /// frame is kept in the local store as a data URI, marked LocalOnly.
    pub async fn persist(&self, frame_jpeg: &[u8], result: &AnalysisResult) -> PersistOutcome {
        let detections = result.detection_list();
        let mut image = CapturedImage {
            id: generate_capture_id(),
            url: String::new(),
            timestamp: Utc::now(),
            confidence: estimate_list(&detections, &self.required),
            detections,
            is_protected: false,
            sync_state: SyncState::Captured,
        };
        step(&mut image, SyncState::UploadPending);

        match self.upload_and_insert(&image, frame_jpeg).await {
            Ok(url) => {
                step(&mut image, SyncState::Synced);
                info!("Capture {} synced to remote storage", image.id);
                PersistOutcome::Synced { id: image.id, url }
            }
            Err(e) => {
                warn!("Remote persistence failed for {}, keeping it locally: {}", image.id, e);
                step(&mut image, SyncState::LocalOnly);
                image.url = to_data_uri(frame_jpeg);
                let id = image.id.clone();
                let reason = match self.with_local(move |local| local.append(image)).await {
                    Ok(()) => e.to_string(),
                    Err(local_err) => {
                        error!("Local fallback also failed for {}: {}", id, local_err);
                        format!("{}; local fallback failed: {}", e, local_err)
                    }
                };
                PersistOutcome::LocalOnly { id, reason }
            }
        }
    }

    async fn upload_and_insert(
        &self,
        image: &CapturedImage,
        frame_jpeg: &[u8],
    ) -> Result<String, PpeError> {
        let remote = self.require_remote()?;
        let name = capture_object_name(&image.id);
        remote.objects.upload(&name, frame_jpeg.to_vec()).await?;

        let url = remote.objects.public_url(&name);
        let mut row = image.to_row();
        row.url = url.clone();
        remote.metadata.insert(&row).await?;
        Ok(url)
    }

    fn require_remote(&self) -> Result<&RemoteStores, PpeError> {
        self.remote
            .as_ref()
            .ok_or_else(|| PpeError::Config("no remote storage configured".to_string()))
    }

    /// Push every LocalOnly record that the metadata table does not already
    /// hold. Failures are counted and logged; the batch always completes.
    pub async fn migrate(&self) -> Result<MigrationReport, PpeError> {
        let remote = self.require_remote()?;
        let pending = self.with_local(|local| local.unsynced()).await?;
        let mut report = MigrationReport {
            examined: pending.len(),
            ..Default::default()
        };
        info!("Migrating {} local captures", pending.len());

        for image in pending {
            match remote.metadata.exists(&image.id).await {
                Ok(true) => {
                    info!("Capture {} already stored remotely, skipping", image.id);
                    match self.mark_synced(&image.id, &image.url).await {
                        Ok(()) => report.skipped += 1,
                        Err(e) => {
                            error!("Could not mark capture {} as synced: {}", image.id, e);
                            report.failed += 1;
                        }
                    }
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Could not check capture {}: {}", image.id, e);
                    report.failed += 1;
                    continue;
                }
            }

            let migrated = match self.migrate_one(remote, &image).await {
                Ok(url) => self.mark_synced(&image.id, &url).await,
                Err(e) => Err(e),
            };
            match migrated {
                Ok(()) => {
                    report.migrated += 1;
                    info!("Migrated capture {}", image.id);
                }
                Err(e) => {
                    error!("Failed to migrate capture {}: {}", image.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Migration finished: {} migrated, {} skipped, {} failed",
            report.migrated, report.skipped, report.failed
        );
        Ok(report)
    }

    async fn mark_synced(&self, id: &str, url: &str) -> Result<(), PpeError> {
        let (id, url) = (id.to_string(), url.to_string());
        self.with_local(move |local| local.mark_synced(&id, &url).map(|_| ()))
            .await
    }

    async fn migrate_one(
        &self,
        remote: &RemoteStores,
        image: &CapturedImage,
    ) -> Result<String, PpeError> {
        let url = if is_data_uri(&image.url) {
            let bytes = decode_data_uri(&image.url)?;
            let name = migrated_object_name(&image.id);
            remote.objects.upload(&name, bytes).await?;
            remote.objects.public_url(&name)
        } else {
            image.url.clone()
        };

        let mut row = image.to_row();
        row.url = url.clone();
        remote.metadata.insert(&row).await?;
        Ok(url)
    }

    /// Gallery view, newest first, with confidence recomputed against the
    /// required set. Falls back to the local list when the remote is down.
    pub async fn list(&self) -> Result<Vec<CapturedImage>, PpeError> {
        let remote_rows = match &self.remote {
            Some(remote) => match remote.metadata.list_recent().await {
                Ok(rows) => Some(rows),
                Err(e) => {
                    warn!("Remote gallery unavailable, showing local captures: {}", e);
                    None
                }
            },
            None => None,
        };

        let mut images: Vec<CapturedImage> = match remote_rows {
            Some(rows) => {
                let mut images: Vec<CapturedImage> =
                    rows.into_iter().map(CapturedImage::from_row).collect();
                let mut seen: HashSet<String> = images.iter().map(|i| i.id.clone()).collect();
                for image in self.with_local(|local| local.unsynced()).await? {
                    if seen.insert(image.id.clone()) {
                        images.push(image);
                    }
                }
                images
            }
            None => self.with_local(|local| local.load()).await?,
        };

        for image in &mut images {
            image.confidence = estimate_list(&image.detections, &self.required);
        }
        images.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(images)
    }

    pub async fn delete(&self, id: &str) -> Result<DeleteReport, PpeError> {
        self.delete_many(&[id.to_string()]).await
    }

    /// Remove rows, stored objects and local records. A remote failure is
    /// reported in the result; local removal still happens.
    pub async fn delete_many(&self, ids: &[String]) -> Result<DeleteReport, PpeError> {
        let mut report = DeleteReport::default();
        if ids.is_empty() {
            return Ok(report);
        }

        if let Some(remote) = &self.remote {
            let rows = if ids.len() == 1 {
                remote.metadata.delete(&ids[0]).await
            } else {
                remote.metadata.delete_many(ids).await
            };

            let names: Vec<String> = ids
                .iter()
                .flat_map(|id| [capture_object_name(id), migrated_object_name(id)])
                .collect();
            let objects = remote.objects.remove(&names).await;

            match rows.and(objects) {
                Ok(()) => report.removed_remote = true,
                Err(e) => {
                    warn!("Remote delete failed for {} captures: {}", ids.len(), e);
                    report.remote_error = Some(e.to_string());
                }
            }
        }

        let owned = ids.to_vec();
        report.removed_local = self.with_local(move |local| local.remove(&owned)).await?;
        info!(
            "Deleted {} captures ({} local records)",
            ids.len(),
            report.removed_local
        );
        Ok(report)
    }

    /// Write a capture's image under `dir` using the gallery download layout.
    pub async fn export(&self, id: &str, dir: &Path) -> Result<PathBuf, PpeError> {
        let image = self.find(id).await?;
        let bytes = self.image_bytes(&image).await?;

        let path = export_path(dir, &image);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        info!("Exported capture {} to {:?}", id, path);
        Ok(path)
    }

    async fn find(&self, id: &str) -> Result<CapturedImage, PpeError> {
        let key = id.to_string();
        if let Some(image) = self.with_local(move |local| local.get(&key)).await? {
            if is_data_uri(&image.url) || self.remote.is_none() {
                return Ok(image);
            }
        }
        self.list()
            .await?
            .into_iter()
            .find(|image| image.id == id)
            .ok_or_else(|| PpeError::NotFound(id.to_string()))
    }

    async fn image_bytes(&self, image: &CapturedImage) -> Result<Vec<u8>, PpeError> {
        if is_data_uri(&image.url) {
            return decode_data_uri(&image.url);
        }
        let remote = self.require_remote()?;
        let name = remote.objects.object_name(&image.url).ok_or_else(|| {
            PpeError::Validation(format!(
                "capture {} points outside the configured bucket: {}",
                image.id, image.url
            ))
        })?;
        remote.objects.download(&name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::catalog::default_required;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn local_only_persister() -> (Persister, TempDir) {
        let dir = TempDir::new().unwrap();
        let local = LocalStore::open(&dir.path().join("local.db")).unwrap();
        (Persister::new(None, local, default_required()), dir)
    }

    #[tokio::test]
    async fn test_local_store_calls_leave_the_runtime_thread() {
        let (persister, _dir) = local_only_persister();
        let caller = std::thread::current().id();
        let worker = persister
            .with_local(|local| {
                local.load()?;
                Ok(std::thread::current().id())
            })
            .await
            .unwrap();
        assert_ne!(caller, worker);
    }

    fn result_with(tokens: &[&str]) -> AnalysisResult {
        crate::analyzer::normalize(
            &serde_json::json!({
                "ppe_detected": tokens,
                "confidence": 0.9,
                "person_detected": true
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_capture_id_shape() {
        let id = generate_capture_id();
        let (millis, suffix) = id.split_once('_').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 7);
        assert_ne!(generate_capture_id(), generate_capture_id());
    }

    #[test]
    fn test_object_names() {
        assert_eq!(capture_object_name("1_abc"), "epp_1_abc.jpg");
        assert_eq!(migrated_object_name("1_abc"), "migrated_1_abc.jpg");
    }

    #[test]
    fn test_export_path_layout() {
        let image = CapturedImage {
            id: "42".to_string(),
            url: String::new(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            detections: vec![],
            confidence: 0.3,
            is_protected: false,
            sync_state: SyncState::LocalOnly,
        };
        assert_eq!(
            export_path(Path::new("/out"), &image),
            PathBuf::from("/out/EPP_Images/2024-05-01/EPP_42.jpg")
        );
    }

    #[tokio::test]
    async fn test_persist_without_remote_goes_local() {
        let (persister, _dir) = local_only_persister();
        let outcome = persister
            .persist(&[0xFF, 0xD8, 0xFF], &result_with(&["casco", "chaleco"]))
            .await;

        assert_eq!(outcome.state(), SyncState::LocalOnly);
        let stored = persister.local().get(outcome.id()).unwrap().unwrap();
        assert!(stored.url.starts_with("data:image/jpeg;base64,"));
        assert_eq!(stored.sync_state, SyncState::LocalOnly);
        assert!((stored.confidence - 2.0 / 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_migrate_requires_remote() {
        let (persister, _dir) = local_only_persister();
        assert!(matches!(
            persister.migrate().await,
            Err(PpeError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_list_local_recomputes_confidence() {
        let (persister, _dir) = local_only_persister();
        let mut image = CapturedImage {
            id: "old".to_string(),
            url: to_data_uri(&[1, 2, 3]),
            timestamp: Utc::now(),
            detections: EquipmentId::ALL.to_vec(),
            confidence: 0.1,
            is_protected: false,
            sync_state: SyncState::LocalOnly,
        };
        persister.local().append(image.clone()).unwrap();
        image.id = "new".to_string();
        image.timestamp = Utc::now() + chrono::Duration::seconds(5);
        image.detections = vec![];
        persister.local().append(image).unwrap();

        let listed = persister.list().await.unwrap();
        assert_eq!(listed[0].id, "new");
        assert_eq!(listed[0].confidence, 0.3);
        assert_eq!(listed[1].confidence, 1.0);
    }

    #[tokio::test]
    async fn test_export_and_delete_local_capture() {
        let (persister, dir) = local_only_persister();
        let outcome = persister
            .persist(&[9, 8, 7], &result_with(&["casco"]))
            .await;

        let path = persister
            .export(outcome.id(), &dir.path().join("out"))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![9, 8, 7]);

        let report = persister.delete(outcome.id()).await.unwrap();
        assert_eq!(report.removed_local, 1);
        assert!(!report.removed_remote);
        assert!(matches!(
            persister.export(outcome.id(), dir.path()).await,
            Err(PpeError::NotFound(_))
        ));
    }
}
